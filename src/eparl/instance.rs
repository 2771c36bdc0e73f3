//! # Replicated Instances
//!
//! An instance is one replicated command slot, identified by the leader
//! replica that created it and a per-leader slot number. Its status moves
//! monotonically through pre-accepted → accepted → committed → executed, and
//! once committed its (seq, deps) never change.

use crate::eparl::ballot::Ballot;
use crate::eparl::membership::ReplicaId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identity of a replicated command slot: (leader replica, slot number).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InstanceId {
    pub replica: ReplicaId,
    pub slot: u64,
}

impl InstanceId {
    pub fn new(replica: ReplicaId, slot: u64) -> Self {
        Self { replica, slot }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.replica, self.slot)
    }
}

/// Instance lifecycle status, ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Status {
    PreAccepted,
    Accepted,
    Committed,
    Executed,
}

/// One replicated command slot.
///
/// `command` is `None` only while a recovering replica prepares an instance
/// it has never seen; a commit without a command executes as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance<C> {
    pub id: InstanceId,
    pub command: Option<C>,
    pub ballot: Ballot,
    pub seq: u64,
    pub deps: BTreeSet<InstanceId>,
    pub status: Status,
}

impl<C> Instance<C> {
    /// A fresh pre-accepted instance at its original leader.
    pub fn new(id: InstanceId, command: C, seq: u64, deps: BTreeSet<InstanceId>) -> Self {
        Self {
            id,
            command: Some(command),
            ballot: Ballot::initial(id.replica),
            seq,
            deps,
            status: Status::PreAccepted,
        }
    }

    /// Raise status, never lowering it.
    pub fn advance(&mut self, status: Status) {
        if status > self.status {
            self.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_monotone() {
        let id = InstanceId::new(ReplicaId(1), 4);
        let mut instance = Instance::new(id, "cmd", 1, BTreeSet::new());
        instance.advance(Status::Committed);
        assert_eq!(instance.status, Status::Committed);
        instance.advance(Status::PreAccepted);
        assert_eq!(instance.status, Status::Committed);
    }

    #[test]
    fn instance_ids_order_by_replica_then_slot() {
        let a = InstanceId::new(ReplicaId(1), 9);
        let b = InstanceId::new(ReplicaId(2), 1);
        assert!(a < b);
        assert!(InstanceId::new(ReplicaId(1), 1) < a);
    }
}
