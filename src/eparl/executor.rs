//! # Dependency-Ordered Executor
//!
//! The single writer of the application state. Committed instances queue up
//! here and run once their dependencies have executed; dependency cycles are
//! a legitimate outcome of the protocol and are collapsed with Tarjan's
//! strongly-connected components, ordering instances inside a component by
//! (seq, instance id).
//!
//! A committed instance may name a dependency no local commit has arrived
//! for. Such missing deps are tracked with first-seen timestamps; once one
//! ages past the grace period the replica is asked to recover it, and the
//! request is recorded so duplicates are suppressed.

use crate::eparl::instance::{Instance, InstanceId};
use crate::eparl::replica::ReplicaMsg;
use crate::eparl::{CommandSpec, EparlConfig};
use log::{debug, trace, warn};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Messages into the executor task.
pub enum ExecutorMsg<C: CommandSpec> {
    /// An instance committed (locally or via a Commit broadcast)
    Committed(Instance<C>),
    /// Counter snapshot for supervision and tests
    Stats(oneshot::Sender<ExecutorStats>),
}

/// Executor counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    pub executed: usize,
    pub pending: usize,
    pub missing_deps: usize,
    pub recoveries_requested: u64,
}

/// The executor task state.
pub struct Executor<C: CommandSpec> {
    app_state: C::State,
    committed: HashMap<InstanceId, Instance<C>>,
    executed: HashSet<InstanceId>,
    missing: HashMap<InstanceId, Instant>,
    recovering: HashSet<InstanceId>,
    recoveries_requested: u64,
    replica: mpsc::Sender<ReplicaMsg<C>>,
    config: EparlConfig,
}

impl<C: CommandSpec> Executor<C> {
    /// Spawn the executor task; returns its inbox.
    pub fn spawn(
        config: EparlConfig,
        replica: mpsc::Sender<ReplicaMsg<C>>,
    ) -> mpsc::Sender<ExecutorMsg<C>> {
        let (tx, mut rx) = mpsc::channel::<ExecutorMsg<C>>(256);

        let mut executor = Executor {
            app_state: C::State::default(),
            committed: HashMap::new(),
            executed: HashSet::new(),
            missing: HashMap::new(),
            recovering: HashSet::new(),
            recoveries_requested: 0,
            replica,
            config,
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(executor.config.check_blocked_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(ExecutorMsg::Committed(instance)) => {
                            executor.on_committed(instance).await;
                        }
                        Some(ExecutorMsg::Stats(reply)) => {
                            let _ = reply.send(executor.stats());
                        }
                        None => break,
                    },
                    _ = ticker.tick() => executor.check_blocked().await,
                }
            }
            debug!("executor task stopped");
        });

        tx
    }

    fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            executed: self.executed.len(),
            pending: self.committed.len(),
            missing_deps: self.missing.len(),
            recoveries_requested: self.recoveries_requested,
        }
    }

    async fn on_committed(&mut self, instance: Instance<C>) {
        let id = instance.id;
        self.missing.remove(&id);
        self.recovering.remove(&id);

        if self.executed.contains(&id) {
            trace!("executor: duplicate commit for {id}");
            return;
        }
        self.committed.insert(id, instance);
        self.run_ready().await;
    }

    /// Execute everything whose dependency closure is satisfied.
    async fn run_ready(&mut self) {
        let order = self.execution_order();
        for id in order {
            let Some(instance) = self.committed.remove(&id) else {
                continue;
            };
            self.executed.insert(id);
            match instance.command {
                Some(command) => {
                    let result = command.execute(&mut self.app_state);
                    trace!("executed {id}: {result:?}");
                    let _ = self
                        .replica
                        .send(ReplicaMsg::Executed { id, result })
                        .await;
                }
                // A recovered no-op carries no command
                None => debug!("executed {id} as no-op"),
            }
        }
    }

    /// Compute the executable order: unblocked committed instances, SCC by
    /// SCC in dependency order, (seq, id) within an SCC.
    fn execution_order(&mut self) -> Vec<InstanceId> {
        let now = Instant::now();

        // Directly blocked: a dep that is neither executed nor committed
        let mut blocked: HashSet<InstanceId> = HashSet::new();
        for (id, instance) in &self.committed {
            for dep in &instance.deps {
                if !self.executed.contains(dep) && !self.committed.contains_key(dep) {
                    self.missing.entry(*dep).or_insert(now);
                    blocked.insert(*id);
                }
            }
        }

        // Transitively blocked through committed chains
        loop {
            let mut changed = false;
            for (id, instance) in &self.committed {
                if blocked.contains(id) {
                    continue;
                }
                if instance.deps.iter().any(|d| blocked.contains(d)) {
                    blocked.insert(*id);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut eligible: Vec<InstanceId> = self
            .committed
            .keys()
            .filter(|id| !blocked.contains(id))
            .copied()
            .collect();
        eligible.sort_unstable();

        let mut tarjan = Tarjan {
            committed: &self.committed,
            executed: &self.executed,
            blocked: &blocked,
            index: HashMap::new(),
            low: HashMap::new(),
            on_stack: HashSet::new(),
            stack: Vec::new(),
            next_index: 0,
            order: Vec::new(),
        };
        for id in eligible {
            if !tarjan.index.contains_key(&id) {
                tarjan.strongconnect(id);
            }
        }
        tarjan.order
    }

    /// Ask the replica to recover missing deps past the grace period.
    async fn check_blocked(&mut self) {
        let overdue: Vec<InstanceId> = self
            .missing
            .iter()
            .filter(|(id, first_seen)| {
                first_seen.elapsed() >= self.config.missing_dep_grace
                    && !self.recovering.contains(*id)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in overdue {
            warn!("executor: dependency {id} missing past grace, requesting recovery");
            self.recovering.insert(id);
            self.recoveries_requested += 1;
            let _ = self.replica.send(ReplicaMsg::NeedsRecovery(id)).await;
        }
    }
}

/// Tarjan SCC over the unblocked committed graph, emitting components in
/// dependency order and sorting each component by (seq, id).
struct Tarjan<'a, C: CommandSpec> {
    committed: &'a HashMap<InstanceId, Instance<C>>,
    executed: &'a HashSet<InstanceId>,
    blocked: &'a HashSet<InstanceId>,
    index: HashMap<InstanceId, usize>,
    low: HashMap<InstanceId, usize>,
    on_stack: HashSet<InstanceId>,
    stack: Vec<InstanceId>,
    next_index: usize,
    order: Vec<InstanceId>,
}

impl<C: CommandSpec> Tarjan<'_, C> {
    fn strongconnect(&mut self, v: InstanceId) {
        self.index.insert(v, self.next_index);
        self.low.insert(v, self.next_index);
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        let deps: Vec<InstanceId> = self.committed[&v]
            .deps
            .iter()
            .filter(|d| !self.executed.contains(d))
            .copied()
            .collect();

        for w in deps {
            if self.blocked.contains(&w) || !self.committed.contains_key(&w) {
                continue;
            }
            if !self.index.contains_key(&w) {
                self.strongconnect(w);
                let low = self.low[&v].min(self.low[&w]);
                self.low.insert(v, low);
            } else if self.on_stack.contains(&w) {
                let low = self.low[&v].min(self.index[&w]);
                self.low.insert(v, low);
            }
        }

        if self.low[&v] == self.index[&v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack.remove(&w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            // Cycles are legal; break ties by (seq, instance id)
            component.sort_by_key(|id| (self.committed[id].seq, *id));
            self.order.extend(component);
        }
    }
}
