//! # Replica Task
//!
//! One task per cluster member. The replica owns the instance table (it is
//! the only writer of its records), answers protocol messages strictly in
//! arrival order, drives the leader FSMs of instances it proposed or is
//! recovering, and keeps state timers in a deadline min-heap.

use crate::eparl::ballot::Ballot;
use crate::eparl::executor::{Executor, ExecutorMsg, ExecutorStats};
use crate::eparl::fsm::{Action, LeaderFsm};
use crate::eparl::instance::{Instance, InstanceId, Status};
use crate::eparl::membership::{ReplicaId, ReplicaSet};
use crate::eparl::messages::{ProtocolMsg, TryPreAcceptReply};
use crate::eparl::store::InstanceStore;
use crate::eparl::transport::ReplicaBus;
use crate::eparl::{CommandSpec, EparlConfig};
use crate::error::ModemError;
use log::{debug, trace, warn};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Messages into the replica task.
pub enum ReplicaMsg<C: CommandSpec> {
    /// Client proposal; the reply fires after execution
    Propose {
        command: C,
        reply: oneshot::Sender<Result<C::Output, ModemError>>,
    },
    /// A protocol message from a peer
    Protocol(ProtocolMsg<C>),
    /// The executor finished an instance this replica leads
    Executed { id: InstanceId, result: C::Output },
    /// The executor wants a missing dependency recovered
    NeedsRecovery(InstanceId),
}

/// Handle to one replica and its executor.
#[derive(Clone)]
pub struct ReplicaHandle<C: CommandSpec> {
    pub id: ReplicaId,
    inbox: mpsc::Sender<ReplicaMsg<C>>,
    executor: mpsc::Sender<ExecutorMsg<C>>,
}

impl<C: CommandSpec> ReplicaHandle<C> {
    /// Propose a command and wait for its execution result.
    pub async fn propose(&self, command: C) -> Result<C::Output, ModemError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(ReplicaMsg::Propose {
                command,
                reply: tx,
            })
            .await
            .map_err(|_| ModemError::ProposalDropped("replica gone".into()))?;
        rx.await
            .map_err(|_| ModemError::ProposalDropped("reply dropped".into()))?
    }

    /// Executor counters (executed count, pending, missing deps).
    pub async fn executor_stats(&self) -> Result<ExecutorStats, ModemError> {
        let (tx, rx) = oneshot::channel();
        self.executor
            .send(ExecutorMsg::Stats(tx))
            .await
            .map_err(|_| ModemError::ModemUnavailable)?;
        rx.await.map_err(|_| ModemError::ModemUnavailable)
    }

    /// Raw inbox, used by the transport layer.
    pub fn inbox(&self) -> mpsc::Sender<ReplicaMsg<C>> {
        self.inbox.clone()
    }
}

/// The replica task state.
pub struct Replica<C: CommandSpec> {
    id: ReplicaId,
    membership: ReplicaSet,
    bus: Arc<dyn ReplicaBus<C>>,
    table: HashMap<InstanceId, Instance<C>>,
    leaders: HashMap<InstanceId, LeaderFsm<C>>,
    next_slot: u64,
    timers: BinaryHeap<Reverse<(Instant, InstanceId, u64)>>,
    executor: mpsc::Sender<ExecutorMsg<C>>,
    store: Option<InstanceStore>,
}

impl<C: CommandSpec> Replica<C> {
    /// Spawn a replica and its executor; returns the handle.
    pub fn spawn(
        membership: ReplicaSet,
        config: EparlConfig,
        bus: Arc<dyn ReplicaBus<C>>,
        store: Option<InstanceStore>,
    ) -> ReplicaHandle<C> {
        let id = membership.local();
        let (tx, rx) = mpsc::channel::<ReplicaMsg<C>>(1024);
        let executor = Executor::<C>::spawn(config, tx.clone());

        let mut table = HashMap::new();
        let mut next_slot = 0;
        if let Some(store) = &store {
            match store.load::<C>() {
                Ok(instances) => {
                    for instance in instances {
                        if instance.id.replica == id {
                            next_slot = next_slot.max(instance.id.slot + 1);
                        }
                        table.insert(instance.id, instance);
                    }
                    debug!("{id}: loaded {} persisted instances", table.len());
                }
                Err(e) => warn!("{id}: instance store unreadable: {e}"),
            }
        }

        let replica = Replica {
            id,
            membership,
            bus,
            table,
            leaders: HashMap::new(),
            next_slot,
            timers: BinaryHeap::new(),
            executor: executor.clone(),
            store,
        };

        tokio::spawn(replica.run(rx));

        ReplicaHandle {
            id,
            inbox: tx,
            executor,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<ReplicaMsg<C>>) {
        debug!("{}: replica task started", self.id);
        loop {
            let deadline = self.timers.peek().map(|Reverse(entry)| entry.0);
            tokio::select! {
                msg = inbox.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
                _ = async { tokio::time::sleep_until(deadline.unwrap()).await },
                    if deadline.is_some() => {
                    self.fire_timers().await;
                }
            }
        }
        debug!("{}: replica task stopped", self.id);
    }

    async fn handle(&mut self, msg: ReplicaMsg<C>) {
        match msg {
            ReplicaMsg::Propose { command, reply } => self.on_propose(command, reply).await,
            ReplicaMsg::Protocol(msg) => self.on_protocol(msg).await,
            ReplicaMsg::Executed { id, result } => {
                if let Some(entry) = self.table.get_mut(&id) {
                    entry.advance(Status::Executed);
                }
                if let Some(fsm) = self.leaders.get_mut(&id) {
                    let actions = fsm.on_executed(result);
                    self.apply(id, actions).await;
                }
            }
            ReplicaMsg::NeedsRecovery(id) => self.on_needs_recovery(id).await,
        }
    }

    async fn on_propose(
        &mut self,
        command: C,
        reply: oneshot::Sender<Result<C::Output, ModemError>>,
    ) {
        let id = InstanceId::new(self.id, self.next_slot);
        self.next_slot += 1;

        let (seq, deps) = self.attributes_for(&command, id);
        let instance = Instance::new(id, command, seq, deps);
        trace!("{}: proposing {id} seq {seq}", self.id);

        // Quorum sizing snapshots the cluster size at creation
        let (fsm, actions) =
            LeaderFsm::propose(instance, self.membership.size(), self.id, reply);
        self.leaders.insert(id, fsm);
        self.apply(id, actions).await;
    }

    async fn on_needs_recovery(&mut self, id: InstanceId) {
        if let Some(instance) = self.table.get(&id) {
            if instance.status >= Status::Committed {
                // The executor raced a commit; just replay it
                let _ = self
                    .executor
                    .send(ExecutorMsg::Committed(instance.clone()))
                    .await;
                return;
            }
        }
        if self.leaders.contains_key(&id) {
            return; // already driving this instance
        }

        let own_view = self
            .table
            .get(&id)
            .filter(|i| i.command.is_some())
            .cloned();
        debug!("{}: recovering {id}", self.id);
        let (fsm, actions) =
            LeaderFsm::recover(id, own_view, self.membership.size(), self.id);
        self.leaders.insert(id, fsm);
        self.apply(id, actions).await;
    }

    async fn on_protocol(&mut self, msg: ProtocolMsg<C>) {
        let id = msg.instance_id();
        match msg {
            // ---- acceptor side ----
            ProtocolMsg::PreAccept {
                from,
                ballot,
                instance,
            } => self.accept_preaccept(from, ballot, instance).await,
            ProtocolMsg::Accept {
                from,
                ballot,
                instance,
            } => self.accept_accept(from, ballot, instance).await,
            ProtocolMsg::Commit { instance } => self.accept_commit(instance).await,
            ProtocolMsg::Prepare { from, ballot, id } => {
                self.accept_prepare(from, ballot, id).await
            }
            ProtocolMsg::TryPreAccept {
                from,
                ballot,
                instance,
            } => self.accept_try_preaccept(from, ballot, instance).await,

            // ---- leader side ----
            ProtocolMsg::PreAcceptOk {
                from, seq, deps, ..
            } => {
                if let Some(fsm) = self.leaders.get_mut(&id) {
                    let actions = fsm.on_preaccept_ok(from, seq, deps);
                    self.apply(id, actions).await;
                }
            }
            ProtocolMsg::AcceptOk { from, .. } => {
                if let Some(fsm) = self.leaders.get_mut(&id) {
                    let actions = fsm.on_accept_ok(from);
                    self.apply(id, actions).await;
                }
            }
            ProtocolMsg::PrepareOk { from, instance, .. } => {
                if let Some(fsm) = self.leaders.get_mut(&id) {
                    let actions = fsm.on_prepare_ok(from, instance);
                    self.apply(id, actions).await;
                }
            }
            ProtocolMsg::TryPreAcceptOk { from, outcome, .. } => {
                if let Some(fsm) = self.leaders.get_mut(&id) {
                    let actions = fsm.on_try_preaccept_ok(from, outcome);
                    self.apply(id, actions).await;
                }
            }
            ProtocolMsg::Nack { ballot, .. } => {
                if let Some(fsm) = self.leaders.get_mut(&id) {
                    let actions = fsm.on_nack(ballot);
                    self.apply(id, actions).await;
                }
            }
        }
    }

    /// Compute (seq, deps) from interfering instances in the local table.
    fn attributes_for(&self, command: &C, excluding: InstanceId) -> (u64, BTreeSet<InstanceId>) {
        let mut seq = 1;
        let mut deps = BTreeSet::new();
        for (id, instance) in &self.table {
            if *id == excluding {
                continue;
            }
            let Some(other) = &instance.command else {
                continue;
            };
            if C::interferes(command, other) {
                deps.insert(*id);
                seq = seq.max(instance.seq + 1);
            }
        }
        (seq, deps)
    }

    async fn accept_preaccept(&mut self, from: ReplicaId, ballot: Ballot, mut instance: Instance<C>) {
        let id = instance.id;
        if let Some(local) = self.table.get(&id) {
            if local.ballot > ballot {
                self.nack(from, id, local.ballot).await;
                return;
            }
            if local.status >= Status::Committed {
                // Stale phase-1 for a decided instance; the commit
                // broadcast supersedes it
                return;
            }
        }

        let (seq, deps) = match &instance.command {
            Some(command) => self.attributes_for(command, id),
            None => (instance.seq, instance.deps.clone()),
        };
        instance.seq = instance.seq.max(seq);
        instance.deps.extend(deps);
        instance.ballot = ballot;
        instance.status = Status::PreAccepted;

        let reply = ProtocolMsg::PreAcceptOk {
            from: self.id,
            id,
            seq: instance.seq,
            deps: instance.deps.clone(),
        };
        self.table.insert(id, instance);
        self.persist();
        self.bus.send(self.id, from, reply).await;
    }

    async fn accept_accept(&mut self, from: ReplicaId, ballot: Ballot, mut instance: Instance<C>) {
        let id = instance.id;
        if let Some(local) = self.table.get(&id) {
            if local.ballot > ballot {
                self.nack(from, id, local.ballot).await;
                return;
            }
            if local.status >= Status::Committed {
                return;
            }
        }

        instance.ballot = ballot;
        instance.status = Status::Accepted;
        self.table.insert(id, instance);
        self.persist();
        self.bus
            .send(self.id, from, ProtocolMsg::AcceptOk { from: self.id, id })
            .await;
    }

    async fn accept_commit(&mut self, mut instance: Instance<C>) {
        let id = instance.id;
        if let Some(local) = self.table.get(&id) {
            if local.status >= Status::Committed {
                return; // committed (seq, deps) are immutable
            }
        }

        instance.status = Status::Committed;
        trace!("{}: commit for {id}", self.id);
        self.table.insert(id, instance.clone());
        self.persist();

        // A concurrent recovery of the same instance yields to the commit
        if let Some(fsm) = self.leaders.get_mut(&id) {
            fsm.adopt_commit(instance.clone());
        }
        let _ = self.executor.send(ExecutorMsg::Committed(instance)).await;
    }

    async fn accept_prepare(&mut self, from: ReplicaId, ballot: Ballot, id: InstanceId) {
        match self.table.get_mut(&id) {
            Some(local) => {
                if local.ballot >= ballot {
                    let local_ballot = local.ballot;
                    self.nack(from, id, local_ballot).await;
                    return;
                }
                local.ballot = ballot;
                let view = Some(local.clone()).filter(|i| i.command.is_some());
                self.persist();
                self.bus
                    .send(
                        self.id,
                        from,
                        ProtocolMsg::PrepareOk {
                            from: self.id,
                            id,
                            instance: view,
                        },
                    )
                    .await;
            }
            None => {
                // Remember the promise so lower ballots are refused later
                let placeholder = Instance {
                    id,
                    command: None,
                    ballot,
                    seq: 0,
                    deps: BTreeSet::new(),
                    status: Status::PreAccepted,
                };
                self.table.insert(id, placeholder);
                self.persist();
                self.bus
                    .send(
                        self.id,
                        from,
                        ProtocolMsg::PrepareOk {
                            from: self.id,
                            id,
                            instance: None,
                        },
                    )
                    .await;
            }
        }
    }

    async fn accept_try_preaccept(
        &mut self,
        from: ReplicaId,
        ballot: Ballot,
        mut instance: Instance<C>,
    ) {
        let id = instance.id;
        if let Some(local) = self.table.get(&id) {
            if local.ballot > ballot {
                self.nack(from, id, local.ballot).await;
                return;
            }
        }

        // Conflict: an interfering instance the proposal does not order
        // itself after
        let conflict = instance.command.as_ref().and_then(|command| {
            self.table.iter().find_map(|(other_id, other)| {
                if *other_id == id || instance.deps.contains(other_id) {
                    return None;
                }
                let other_command = other.command.as_ref()?;
                if C::interferes(command, other_command) && other.seq >= instance.seq {
                    Some(other.status >= Status::Committed)
                } else {
                    None
                }
            })
        });

        let outcome = match conflict {
            Some(committed) => TryPreAcceptReply::Conflict { committed },
            None => {
                instance.ballot = ballot;
                instance.status = Status::PreAccepted;
                self.table.insert(id, instance);
                self.persist();
                TryPreAcceptReply::Ok
            }
        };
        self.bus
            .send(
                self.id,
                from,
                ProtocolMsg::TryPreAcceptOk {
                    from: self.id,
                    id,
                    outcome,
                },
            )
            .await;
    }

    async fn nack(&mut self, to: ReplicaId, id: InstanceId, ballot: Ballot) {
        trace!("{}: nacking {id} toward {to}", self.id);
        self.bus
            .send(
                self.id,
                to,
                ProtocolMsg::Nack {
                    from: self.id,
                    id,
                    ballot,
                },
            )
            .await;
    }

    /// Interpret FSM actions. RestartPhase1 feeds new actions back into the
    /// queue, so the loop runs until quiescent.
    async fn apply(&mut self, id: InstanceId, actions: Vec<Action<C>>) {
        let mut queue: VecDeque<Action<C>> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Broadcast(msg) => {
                    let remote: Vec<ReplicaId> = self.membership.remote().collect();
                    for peer in remote {
                        self.bus.send(self.id, peer, msg.clone()).await;
                    }
                }
                Action::Persist => {
                    if let Some(fsm) = self.leaders.get(&id) {
                        self.table.insert(id, fsm.instance.clone());
                    }
                    self.persist();
                }
                Action::NotifyCommit => {
                    if let Some(fsm) = self.leaders.get(&id) {
                        let _ = self
                            .executor
                            .send(ExecutorMsg::Committed(fsm.instance.clone()))
                            .await;
                    }
                }
                Action::SetTimer(duration, gen) => {
                    self.timers
                        .push(Reverse((Instant::now() + duration, id, gen)));
                }
                Action::RestartPhase1 => {
                    let command = self
                        .leaders
                        .get(&id)
                        .and_then(|f| f.instance.command.clone());
                    match command {
                        Some(command) => {
                            let (seq, deps) = self.attributes_for(&command, id);
                            if let Some(fsm) = self.leaders.get_mut(&id) {
                                queue.extend(fsm.enter_preaccept(seq, deps));
                            }
                        }
                        None => {
                            // Nothing to re-propose without a command
                            if let Some(mut fsm) = self.leaders.remove(&id) {
                                fsm.fail(ModemError::InstanceNotFound);
                            }
                        }
                    }
                }
                Action::Terminate => {
                    self.leaders.remove(&id);
                }
            }
        }
    }

    async fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((deadline, id, gen))) = self.timers.peek().copied() {
            if deadline > now {
                break;
            }
            self.timers.pop();
            if let Some(fsm) = self.leaders.get_mut(&id) {
                if fsm.timer_gen() == gen {
                    let actions = fsm.on_timeout(gen);
                    self.apply(id, actions).await;
                }
            }
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(self.table.values()) {
                warn!("{}: persist failed: {e}", self.id);
            }
        }
    }
}
