//! # Instance Table Persistence
//!
//! JSON snapshot of the instance table, written on status transitions so a
//! restarted replica answers Prepare with its last persisted view. The
//! schema per entry is {id, command, ballot, seq, deps, status}.

use crate::eparl::instance::Instance;
use crate::error::ModemError;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// File-backed instance table snapshotting.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    path: PathBuf,
}

impl InstanceStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write a snapshot of the table.
    ///
    /// The snapshot goes through a sibling temp file and a rename so a
    /// crash mid-write leaves the previous snapshot intact.
    pub fn save<'a, C, I>(&self, instances: I) -> Result<(), ModemError>
    where
        C: Serialize + 'a,
        I: IntoIterator<Item = &'a Instance<C>>,
    {
        let entries: Vec<&Instance<C>> = instances.into_iter().collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| ModemError::StoreError(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| ModemError::StoreError(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| ModemError::StoreError(e.to_string()))?;
        debug!("persisted {} instances to {:?}", entries.len(), self.path);
        Ok(())
    }

    /// Load the last snapshot; an absent file is an empty table.
    pub fn load<C: DeserializeOwned>(&self) -> Result<Vec<Instance<C>>, ModemError> {
        match fs::read_to_string(&self.path) {
            Ok(json) => {
                serde_json::from_str(&json).map_err(|e| ModemError::StoreError(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ModemError::StoreError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eparl::ballot::Ballot;
    use crate::eparl::instance::{InstanceId, Status};
    use crate::eparl::membership::ReplicaId;
    use std::collections::BTreeSet;

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstanceStore::new(dir.path().join("instances.json"));

        let mut deps = BTreeSet::new();
        deps.insert(InstanceId::new(ReplicaId(2), 1));
        let instance = Instance {
            id: InstanceId::new(ReplicaId(1), 7),
            command: Some("put".to_string()),
            ballot: Ballot::initial(ReplicaId(1)),
            seq: 3,
            deps,
            status: Status::Committed,
        };

        store.save([&instance]).unwrap();
        let loaded: Vec<Instance<String>> = store.load().unwrap();
        assert_eq!(loaded, vec![instance]);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstanceStore::new(dir.path().join("nope.json"));
        let loaded: Vec<Instance<String>> = store.load().unwrap();
        assert!(loaded.is_empty());
    }
}
