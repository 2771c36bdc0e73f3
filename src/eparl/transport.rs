//! # Replica Bus
//!
//! Transport abstraction between replicas. The engine only requires that
//! messages between any ordered pair of replicas arrive FIFO; the in-memory
//! implementation backs tests and the single-process cluster demo, and
//! supports partitioning a replica to exercise recovery.

use crate::eparl::membership::ReplicaId;
use crate::eparl::messages::ProtocolMsg;
use crate::eparl::replica::ReplicaMsg;
use crate::eparl::CommandSpec;
use async_trait::async_trait;
use log::trace;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Point-to-point message transport between replicas.
#[async_trait]
pub trait ReplicaBus<C: CommandSpec>: Send + Sync {
    /// Deliver `msg` to `to`. Best effort: a partitioned or dead peer
    /// silently drops the message.
    async fn send(&self, from: ReplicaId, to: ReplicaId, msg: ProtocolMsg<C>);
}

/// In-memory bus over per-replica tokio channels.
///
/// One mpsc channel per receiving replica; tokio preserves per-sender FIFO,
/// which is exactly the per-edge guarantee the protocol needs.
pub struct InMemoryBus<C: CommandSpec> {
    routes: RwLock<HashMap<ReplicaId, mpsc::Sender<ReplicaMsg<C>>>>,
    partitioned: RwLock<HashSet<ReplicaId>>,
}

impl<C: CommandSpec> InMemoryBus<C> {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            partitioned: RwLock::new(HashSet::new()),
        }
    }

    /// Register a replica's inbox.
    pub fn register(&self, id: ReplicaId, inbox: mpsc::Sender<ReplicaMsg<C>>) {
        self.routes.write().unwrap().insert(id, inbox);
    }

    /// Cut a replica off: messages to and from it are dropped.
    pub fn partition(&self, id: ReplicaId) {
        self.partitioned.write().unwrap().insert(id);
    }

    /// Reconnect a partitioned replica.
    pub fn heal(&self, id: ReplicaId) {
        self.partitioned.write().unwrap().remove(&id);
    }

    fn route(&self, from: ReplicaId, to: ReplicaId) -> Option<mpsc::Sender<ReplicaMsg<C>>> {
        {
            let partitioned = self.partitioned.read().unwrap();
            if partitioned.contains(&from) || partitioned.contains(&to) {
                return None;
            }
        }
        self.routes.read().unwrap().get(&to).cloned()
    }
}

impl<C: CommandSpec> Default for InMemoryBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: CommandSpec> ReplicaBus<C> for InMemoryBus<C> {
    async fn send(&self, from: ReplicaId, to: ReplicaId, msg: ProtocolMsg<C>) {
        let Some(inbox) = self.route(from, to) else {
            trace!("bus: dropping {from} -> {to} (partitioned or unknown)");
            return;
        };
        // A dead receiver is indistinguishable from a partition
        let _ = inbox.send(ReplicaMsg::Protocol(msg)).await;
    }
}
