//! # Ballots
//!
//! Per-instance round numbers used by the recovery protocol. Ballots are
//! totally ordered by (epoch, node), so two recovering replicas can never
//! tie.

use crate::eparl::membership::ReplicaId;
use serde::{Deserialize, Serialize};

/// A totally ordered (epoch, node) pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ballot {
    pub epoch: u64,
    pub node: ReplicaId,
}

impl Ballot {
    /// The ballot every instance starts with at its original leader.
    pub fn initial(node: ReplicaId) -> Self {
        Self { epoch: 0, node }
    }

    /// A ballot strictly above `other`, owned by `node`.
    pub fn higher_than(other: Ballot, node: ReplicaId) -> Self {
        Self {
            epoch: other.epoch + 1,
            node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_epoch_then_node() {
        let a = Ballot {
            epoch: 1,
            node: ReplicaId(9),
        };
        let b = Ballot {
            epoch: 2,
            node: ReplicaId(1),
        };
        assert!(b > a);

        let c = Ballot {
            epoch: 1,
            node: ReplicaId(1),
        };
        assert!(a > c);
    }

    #[test]
    fn higher_than_always_wins() {
        let base = Ballot {
            epoch: 7,
            node: ReplicaId(3),
        };
        let bumped = Ballot::higher_than(base, ReplicaId(1));
        assert!(bumped > base);
        assert_eq!(bumped.node, ReplicaId(1));
    }
}
