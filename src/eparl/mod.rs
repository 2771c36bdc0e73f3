//! # eParl - EPaxos-Style Consensus Engine
//!
//! Totally orders and executes replicated commands with a one-round fast
//! path for non-interfering commands, a two-round slow path otherwise, and
//! an explicit recovery protocol for failed or stalled instances. This is
//! the distributed backbone of the simulation fabric and the replicated KV
//! state it carries.
//!
//! ## Structure
//!
//! ```text
//! ┌──────────┐ propose  ┌─────────┐ protocol ┌─────────┐
//! │  client  │─────────▶│ replica │◀────────▶│  peers  │
//! └──────────┘          │  task   │          └─────────┘
//!                       └────┬────┘
//!                     commit │ ▲ executed / needs-recovery
//!                       ┌────▼─┴───┐
//!                       │ executor │  (single writer of app_state)
//!                       └──────────┘
//! ```
//!
//! Each replica is one task processing its inbox FIFO; each instance is a
//! tagged-variant state machine inside that task; timers live in a deadline
//! min-heap. There is no shared mutable state between tasks.

pub mod ballot;
pub mod executor;
pub mod fsm;
pub mod instance;
pub mod kv;
pub mod membership;
pub mod messages;
pub mod quorum;
pub mod replica;
pub mod store;
pub mod transport;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

pub use ballot::Ballot;
pub use instance::{Instance, InstanceId, Status};
pub use kv::{KvCommand, KvOutput, KvState};
pub use membership::{ReplicaId, ReplicaSet};
pub use quorum::{fast_quorum, slow_quorum};
pub use replica::{Replica, ReplicaHandle};
pub use store::InstanceStore;
pub use transport::{InMemoryBus, ReplicaBus};

/// The command module contract the engine replicates over.
///
/// `interferes` must be symmetric; the fast path is only safe when
/// non-interfering commands commute through `execute`.
pub trait CommandSpec:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The executor's application state
    type State: Default + Send + 'static;
    /// Result returned to the proposing client
    type Output: Clone + Debug + Send + 'static;

    fn interferes(a: &Self, b: &Self) -> bool;
    fn execute(&self, state: &mut Self::State) -> Self::Output;
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EparlConfig {
    /// How long a committed instance may wait on an unknown dependency
    /// before the executor asks for recovery
    pub missing_dep_grace: Duration,
    /// Sweep interval for the missing-dependency check
    pub check_blocked_interval: Duration,
}

impl Default for EparlConfig {
    fn default() -> Self {
        Self {
            missing_dep_grace: Duration::from_secs(2),
            check_blocked_interval: Duration::from_secs(1),
        }
    }
}

/// A single-process cluster over the in-memory bus.
///
/// Backs the integration tests and the `cluster` CLI demo; every replica
/// and executor is a task in this process.
pub struct Cluster<C: CommandSpec> {
    bus: Arc<InMemoryBus<C>>,
    handles: Vec<ReplicaHandle<C>>,
}

impl<C: CommandSpec> Cluster<C> {
    /// Spin up `n` replicas with fresh state and full connectivity.
    pub fn new(n: usize, config: EparlConfig) -> Self {
        let ids: Vec<ReplicaId> = (0..n as u64).map(ReplicaId).collect();
        let bus = Arc::new(InMemoryBus::new());

        let handles: Vec<ReplicaHandle<C>> = ids
            .iter()
            .map(|&id| {
                let membership = ReplicaSet::new(id, ids.clone());
                let handle = Replica::<C>::spawn(
                    membership,
                    config.clone(),
                    bus.clone() as Arc<dyn ReplicaBus<C>>,
                    None,
                );
                bus.register(id, handle.inbox());
                handle
            })
            .collect();

        Self { bus, handles }
    }

    /// Handle to replica `i` (by construction order).
    pub fn replica(&self, i: usize) -> &ReplicaHandle<C> {
        &self.handles[i]
    }

    /// Number of replicas.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Cut replica `i` off from the bus.
    pub fn partition(&self, i: usize) {
        self.bus.partition(self.handles[i].id);
    }

    /// Reconnect replica `i`.
    pub fn heal(&self, i: usize) {
        self.bus.heal(self.handles[i].id);
    }
}
