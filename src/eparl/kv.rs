//! # Replicated KV Command Module
//!
//! The command module the fabric replicates through eParl: a string
//! key-value store. Two commands interfere when they touch the same key and
//! at least one writes, so independent keys ride the fast path and reads of
//! one key commute.

use crate::eparl::CommandSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Replicated KV operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvCommand {
    Put { key: String, value: String },
    Get { key: String },
    Del { key: String },
}

impl KvCommand {
    pub fn key(&self) -> &str {
        match self {
            KvCommand::Put { key, .. } | KvCommand::Get { key } | KvCommand::Del { key } => key,
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, KvCommand::Get { .. })
    }
}

/// The executor's application state.
pub type KvState = HashMap<String, String>;

/// Result of one executed KV command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOutput {
    /// A Put or Del completed
    Done,
    /// A Get result; `None` when the key is absent
    Value(Option<String>),
}

impl CommandSpec for KvCommand {
    type State = KvState;
    type Output = KvOutput;

    fn interferes(a: &Self, b: &Self) -> bool {
        a.key() == b.key() && !(a.is_read() && b.is_read())
    }

    fn execute(&self, state: &mut KvState) -> KvOutput {
        match self {
            KvCommand::Put { key, value } => {
                state.insert(key.clone(), value.clone());
                KvOutput::Done
            }
            KvCommand::Get { key } => KvOutput::Value(state.get(key).cloned()),
            KvCommand::Del { key } => {
                state.remove(key);
                KvOutput::Done
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str) -> KvCommand {
        KvCommand::Put {
            key: key.into(),
            value: "v".into(),
        }
    }

    fn get(key: &str) -> KvCommand {
        KvCommand::Get { key: key.into() }
    }

    #[test]
    fn interference_is_symmetric_and_keyed() {
        assert!(KvCommand::interferes(&put("a"), &put("a")));
        assert!(KvCommand::interferes(&put("a"), &get("a")));
        assert!(KvCommand::interferes(&get("a"), &put("a")));
        assert!(!KvCommand::interferes(&put("a"), &put("b")));
        // Two reads of the same key commute
        assert!(!KvCommand::interferes(&get("a"), &get("a")));
    }

    #[test]
    fn execute_applies_in_order() {
        let mut state = KvState::new();
        assert_eq!(put("k").execute(&mut state), KvOutput::Done);
        assert_eq!(get("k").execute(&mut state), KvOutput::Value(Some("v".into())));
        assert_eq!(
            KvCommand::Del { key: "k".into() }.execute(&mut state),
            KvOutput::Done
        );
        assert_eq!(get("k").execute(&mut state), KvOutput::Value(None));
    }
}
