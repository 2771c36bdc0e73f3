//! # Replica Protocol Messages
//!
//! Every message crossing the replica bus is a tagged variant with an
//! explicit shape; responses carry the sender so the leader can count
//! distinct replicas. The transport must preserve per-edge FIFO, nothing
//! more — commit delivery order does not matter because execution waits on
//! dependencies, not on arrival order.

use crate::eparl::ballot::Ballot;
use crate::eparl::instance::{Instance, InstanceId};
use crate::eparl::membership::ReplicaId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Intra-cluster protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolMsg<C> {
    PreAccept {
        from: ReplicaId,
        ballot: Ballot,
        instance: Instance<C>,
    },
    PreAcceptOk {
        from: ReplicaId,
        id: InstanceId,
        seq: u64,
        deps: BTreeSet<InstanceId>,
    },
    Accept {
        from: ReplicaId,
        ballot: Ballot,
        instance: Instance<C>,
    },
    AcceptOk {
        from: ReplicaId,
        id: InstanceId,
    },
    Commit {
        instance: Instance<C>,
    },
    Prepare {
        from: ReplicaId,
        ballot: Ballot,
        id: InstanceId,
    },
    PrepareOk {
        from: ReplicaId,
        id: InstanceId,
        /// The responder's view of the instance, `None` if unknown
        instance: Option<Instance<C>>,
    },
    TryPreAccept {
        from: ReplicaId,
        ballot: Ballot,
        instance: Instance<C>,
    },
    TryPreAcceptOk {
        from: ReplicaId,
        id: InstanceId,
        outcome: TryPreAcceptReply,
    },
    /// Ballot too low; carries the ballot the responder holds
    Nack {
        from: ReplicaId,
        id: InstanceId,
        ballot: Ballot,
    },
}

impl<C> ProtocolMsg<C> {
    /// The instance the message is about.
    pub fn instance_id(&self) -> InstanceId {
        match self {
            ProtocolMsg::PreAccept { instance, .. }
            | ProtocolMsg::Accept { instance, .. }
            | ProtocolMsg::Commit { instance }
            | ProtocolMsg::TryPreAccept { instance, .. } => instance.id,
            ProtocolMsg::PreAcceptOk { id, .. }
            | ProtocolMsg::AcceptOk { id, .. }
            | ProtocolMsg::Prepare { id, .. }
            | ProtocolMsg::PrepareOk { id, .. }
            | ProtocolMsg::TryPreAcceptOk { id, .. }
            | ProtocolMsg::Nack { id, .. } => *id,
        }
    }
}

/// Acceptor verdict on a TryPreAccept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TryPreAcceptReply {
    /// The proposed (seq, deps) fit the responder's local history
    Ok,
    /// A conflicting instance exists; `committed` marks it as already
    /// committed, which forces a phase-1 restart
    Conflict { committed: bool },
}
