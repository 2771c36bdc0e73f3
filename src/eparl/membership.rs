//! # Replica Membership
//!
//! The replica set a node sees. Read-mostly: quorum sizing for an instance
//! uses the cluster-size snapshot taken at instance creation, so later
//! membership changes never retroactively alter an in-flight instance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one replica in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The membership view of one replica.
#[derive(Debug, Clone)]
pub struct ReplicaSet {
    local: ReplicaId,
    members: Vec<ReplicaId>,
}

impl ReplicaSet {
    /// Build a membership view. `members` must contain `local`.
    pub fn new(local: ReplicaId, mut members: Vec<ReplicaId>) -> Self {
        members.sort_unstable();
        members.dedup();
        debug_assert!(members.contains(&local));
        Self { local, members }
    }

    /// This node's identity.
    pub fn local(&self) -> ReplicaId {
        self.local
    }

    /// Every member except this node.
    pub fn remote(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        let local = self.local;
        self.members.iter().copied().filter(move |&r| r != local)
    }

    /// All members, sorted.
    pub fn all(&self) -> &[ReplicaId] {
        &self.members
    }

    /// Cluster size.
    pub fn size(&self) -> usize {
        self.members.len()
    }
}
