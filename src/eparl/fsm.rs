//! # Per-Instance Leader FSM
//!
//! The state machine a replica runs for every instance it leads or
//! recovers, encoded as tagged variants driven by protocol responses and
//! timer expirations. The FSM is pure with respect to I/O: every handler
//! returns a list of [`Action`]s the owning replica task interprets
//! (broadcasts, persistence, executor notification, timers).
//!
//! Paths through the machine:
//!
//! ```text
//! PreAccepted ──fast quorum, all agree──────────────▶ Committed
//!      │  └──slow quorum, merged──▶ Accepted ──────▶ Committed
//!      └──timeout/nack──▶ Recovering ──▶ {Committed, Accepted,
//!                                         TryPreAccepting, PreAccepted}
//! ```

use crate::eparl::ballot::Ballot;
use crate::eparl::instance::{Instance, InstanceId, Status};
use crate::eparl::membership::ReplicaId;
use crate::eparl::messages::{ProtocolMsg, TryPreAcceptReply};
use crate::eparl::quorum::{
    analyse_prepare_responses, analyse_try_preaccept, fast_quorum, slow_quorum, RecoveryVerdict,
    TryPreAcceptVerdict,
};
use crate::eparl::CommandSpec;
use crate::error::ModemError;
use log::{debug, warn};
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::oneshot;

// Per-phase supervision timeouts
pub const PREACCEPT_TIMEOUT: Duration = Duration::from_secs(2);
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(2);
pub const PREPARE_TIMEOUT: Duration = Duration::from_secs(5);
pub const TRY_PREACCEPT_TIMEOUT: Duration = Duration::from_secs(3);

/// Effects the replica task performs on the FSM's behalf.
#[derive(Debug)]
pub enum Action<C> {
    /// Send to every remote replica
    Broadcast(ProtocolMsg<C>),
    /// Mirror the FSM's instance into the table and persist it
    Persist,
    /// Hand the committed instance to the executor
    NotifyCommit,
    /// Arm the state timer; the generation invalidates earlier timers
    SetTimer(Duration, u64),
    /// Recompute (seq, deps) locally and rerun phase 1
    RestartPhase1,
    /// The FSM is finished; drop it
    Terminate,
}

/// Outcome of evaluating the pre-accept response set.
enum PreAcceptDecision {
    FastCommit,
    SlowPath(u64, BTreeSet<InstanceId>),
    Wait,
}

/// Current phase with its response accumulators.
#[derive(Debug)]
pub enum Phase<C> {
    PreAccepted {
        /// (seq, deps) per responding replica, this node included
        responses: HashMap<ReplicaId, (u64, BTreeSet<InstanceId>)>,
        /// The leader's original proposal, the fast-path reference
        original: (u64, BTreeSet<InstanceId>),
    },
    Accepted {
        /// Acks collected, this node included
        acks: usize,
    },
    Committed,
    /// Outran by a higher ballot; waiting out a jittered delay before
    /// preparing again so dueling recoverers cannot ping-pong forever
    Backoff,
    Recovering {
        responses: HashMap<ReplicaId, Option<Instance<C>>>,
        leader_answered: bool,
    },
    TryPreAccepting {
        oks: usize,
        answered: usize,
        committed_conflict: bool,
        possible_quorum: Vec<ReplicaId>,
    },
}

/// FSM for one led (or recovered) instance.
pub struct LeaderFsm<C: CommandSpec> {
    pub instance: Instance<C>,
    pub phase: Phase<C>,
    /// Cluster size snapshot taken at instance creation
    pub cluster_size: usize,
    self_id: ReplicaId,
    reply: Option<oneshot::Sender<Result<C::Output, ModemError>>>,
    timer_gen: u64,
}

impl<C: CommandSpec> LeaderFsm<C> {
    /// Start leading a fresh proposal. The returned actions include the
    /// PreAccept broadcast; on a single-node cluster they commit outright.
    pub fn propose(
        instance: Instance<C>,
        cluster_size: usize,
        self_id: ReplicaId,
        reply: oneshot::Sender<Result<C::Output, ModemError>>,
    ) -> (Self, Vec<Action<C>>) {
        let original = (instance.seq, instance.deps.clone());
        let mut responses = HashMap::new();
        responses.insert(self_id, original.clone());

        let mut fsm = Self {
            instance,
            phase: Phase::PreAccepted {
                responses,
                original,
            },
            cluster_size,
            self_id,
            reply: Some(reply),
            timer_gen: 0,
        };

        let mut actions = vec![
            Action::Persist,
            Action::Broadcast(ProtocolMsg::PreAccept {
                from: self_id,
                ballot: fsm.instance.ballot,
                instance: fsm.instance.clone(),
            }),
            fsm.arm_timer(PREACCEPT_TIMEOUT),
        ];
        actions.extend(fsm.check_preaccept_quorum());
        (fsm, actions)
    }

    /// Start recovering an instance this node did not lead (or whose
    /// leader went silent). `own_view` is this node's table entry, if any.
    pub fn recover(
        id: InstanceId,
        own_view: Option<Instance<C>>,
        cluster_size: usize,
        self_id: ReplicaId,
    ) -> (Self, Vec<Action<C>>) {
        let instance = own_view.clone().unwrap_or(Instance {
            id,
            command: None,
            ballot: Ballot::initial(id.replica),
            seq: 0,
            deps: BTreeSet::new(),
            status: Status::PreAccepted,
        });

        let mut fsm = Self {
            instance,
            phase: Phase::Committed, // replaced by enter_recovery
            cluster_size,
            self_id,
            reply: None,
            timer_gen: 0,
        };
        let actions = fsm.enter_recovery(own_view);
        (fsm, actions)
    }

    /// Raise the ballot and broadcast Prepare.
    fn enter_recovery(&mut self, own_view: Option<Instance<C>>) -> Vec<Action<C>> {
        self.instance.ballot = Ballot::higher_than(self.instance.ballot, self.self_id);
        let mut responses = HashMap::new();
        responses.insert(self.self_id, own_view);
        self.phase = Phase::Recovering {
            leader_answered: self.self_id == self.instance.id.replica,
            responses,
        };
        debug!(
            "{}: recovering under ballot {:?}",
            self.instance.id, self.instance.ballot
        );
        vec![
            Action::Persist,
            Action::Broadcast(ProtocolMsg::Prepare {
                from: self.self_id,
                ballot: self.instance.ballot,
                id: self.instance.id,
            }),
            self.arm_timer(PREPARE_TIMEOUT),
        ]
    }

    /// Re-enter phase 1 with freshly computed attributes.
    pub fn enter_preaccept(&mut self, seq: u64, deps: BTreeSet<InstanceId>) -> Vec<Action<C>> {
        self.instance.seq = seq;
        self.instance.deps = deps.clone();
        self.instance.status = Status::PreAccepted;
        let original = (seq, deps);
        let mut responses = HashMap::new();
        responses.insert(self.self_id, original.clone());
        self.phase = Phase::PreAccepted {
            responses,
            original,
        };

        let mut actions = vec![
            Action::Persist,
            Action::Broadcast(ProtocolMsg::PreAccept {
                from: self.self_id,
                ballot: self.instance.ballot,
                instance: self.instance.clone(),
            }),
            self.arm_timer(PREACCEPT_TIMEOUT),
        ];
        actions.extend(self.check_preaccept_quorum());
        actions
    }

    /// A PreAcceptOk arrived.
    pub fn on_preaccept_ok(
        &mut self,
        from: ReplicaId,
        seq: u64,
        deps: BTreeSet<InstanceId>,
    ) -> Vec<Action<C>> {
        if let Phase::PreAccepted { responses, .. } = &mut self.phase {
            responses.insert(from, (seq, deps));
            self.check_preaccept_quorum()
        } else {
            Vec::new()
        }
    }

    /// Fast path if a fast quorum agrees with the original proposal;
    /// otherwise the slow path once a slow quorum is in.
    fn check_preaccept_quorum(&mut self) -> Vec<Action<C>> {
        match self.preaccept_decision(false) {
            PreAcceptDecision::FastCommit => {
                debug!("{}: fast-path commit", self.instance.id);
                self.commit()
            }
            PreAcceptDecision::SlowPath(seq, deps) => self.enter_accept(seq, deps),
            PreAcceptDecision::Wait => Vec::new(),
        }
    }

    /// Evaluate the pre-accept responses. With `merge_on_quorum` the slow
    /// path is taken at slow quorum even if the fast window is still open
    /// (the timeout case).
    fn preaccept_decision(&self, merge_on_quorum: bool) -> PreAcceptDecision {
        let Phase::PreAccepted {
            responses,
            original,
        } = &self.phase
        else {
            return PreAcceptDecision::Wait;
        };

        if !merge_on_quorum
            && responses.len() >= fast_quorum(self.cluster_size)
            && responses.values().all(|r| r == original)
        {
            return PreAcceptDecision::FastCommit;
        }

        if responses.len() >= slow_quorum(self.cluster_size) {
            // Merge: max seq, union deps
            let seq = responses.values().map(|(s, _)| *s).max().unwrap_or(0);
            let mut deps = BTreeSet::new();
            for (_, d) in responses.values() {
                deps.extend(d.iter().copied());
            }
            return PreAcceptDecision::SlowPath(seq, deps);
        }

        PreAcceptDecision::Wait
    }

    fn enter_accept(&mut self, seq: u64, deps: BTreeSet<InstanceId>) -> Vec<Action<C>> {
        self.instance.seq = seq;
        self.instance.deps = deps;
        self.instance.status = Status::Accepted;
        self.phase = Phase::Accepted { acks: 1 };
        debug!("{}: slow path, accept round", self.instance.id);
        vec![
            Action::Persist,
            Action::Broadcast(ProtocolMsg::Accept {
                from: self.self_id,
                ballot: self.instance.ballot,
                instance: self.instance.clone(),
            }),
            self.arm_timer(ACCEPT_TIMEOUT),
        ]
    }

    /// An AcceptOk arrived.
    pub fn on_accept_ok(&mut self, _from: ReplicaId) -> Vec<Action<C>> {
        if let Phase::Accepted { acks } = &mut self.phase {
            *acks += 1;
            if *acks >= slow_quorum(self.cluster_size) {
                return self.commit();
            }
        }
        Vec::new()
    }

    /// A PrepareOk arrived.
    pub fn on_prepare_ok(
        &mut self,
        from: ReplicaId,
        view: Option<Instance<C>>,
    ) -> Vec<Action<C>> {
        let leader = self.instance.id.replica;
        let quorum_reached = match &mut self.phase {
            Phase::Recovering {
                responses,
                leader_answered,
            } => {
                responses.insert(from, view);
                if from == leader {
                    *leader_answered = true;
                }
                responses.len() >= slow_quorum(self.cluster_size)
            }
            _ => return Vec::new(),
        };

        if !quorum_reached {
            return Vec::new();
        }

        let Phase::Recovering { responses, .. } = &self.phase else {
            unreachable!();
        };
        match analyse_prepare_responses(self.instance.id, responses, leader) {
            RecoveryVerdict::Commit(instance) => {
                self.adopt(instance);
                self.commit()
            }
            RecoveryVerdict::Accept(instance) => {
                let ballot = self.instance.ballot;
                self.adopt(instance);
                self.instance.ballot = ballot;
                let seq = self.instance.seq;
                let deps = self.instance.deps.clone();
                self.enter_accept(seq, deps)
            }
            RecoveryVerdict::TryPreAccept(instance, possible_quorum) => {
                let ballot = self.instance.ballot;
                self.adopt(instance);
                self.instance.ballot = ballot;
                self.instance.status = Status::PreAccepted;
                self.phase = Phase::TryPreAccepting {
                    oks: 1,
                    answered: 0,
                    committed_conflict: false,
                    possible_quorum,
                };
                debug!("{}: try-preaccept round", self.instance.id);
                vec![
                    Action::Persist,
                    Action::Broadcast(ProtocolMsg::TryPreAccept {
                        from: self.self_id,
                        ballot: self.instance.ballot,
                        instance: self.instance.clone(),
                    }),
                    self.arm_timer(TRY_PREACCEPT_TIMEOUT),
                ]
            }
            RecoveryVerdict::RestartPhase1(seed) => {
                let ballot = self.instance.ballot;
                self.adopt(seed);
                self.instance.ballot = ballot;
                vec![Action::RestartPhase1]
            }
            RecoveryVerdict::NotFound => {
                warn!("{}: no replica knows the instance", self.instance.id);
                self.fail(ModemError::InstanceNotFound);
                vec![Action::Terminate]
            }
        }
    }

    /// A TryPreAcceptOk arrived.
    pub fn on_try_preaccept_ok(
        &mut self,
        _from: ReplicaId,
        reply: TryPreAcceptReply,
    ) -> Vec<Action<C>> {
        let verdict = match &mut self.phase {
            Phase::TryPreAccepting {
                oks,
                answered,
                committed_conflict,
                possible_quorum,
            } => {
                *answered += 1;
                match reply {
                    TryPreAcceptReply::Ok => *oks += 1,
                    TryPreAcceptReply::Conflict { committed } => {
                        *committed_conflict |= committed;
                    }
                }
                analyse_try_preaccept(
                    *oks,
                    *committed_conflict,
                    *answered,
                    possible_quorum.len(),
                    self.cluster_size,
                )
            }
            _ => return Vec::new(),
        };

        match verdict {
            TryPreAcceptVerdict::Accept => {
                let seq = self.instance.seq;
                let deps = self.instance.deps.clone();
                self.enter_accept(seq, deps)
            }
            TryPreAcceptVerdict::Restart => vec![Action::RestartPhase1],
            TryPreAcceptVerdict::Continue => Vec::new(),
        }
    }

    /// Another recoverer outran us: their ballot is higher. Back off a
    /// jittered interval before preparing above them, so two recoverers
    /// cannot bump ballots at each other indefinitely.
    pub fn on_nack(&mut self, ballot: Ballot) -> Vec<Action<C>> {
        if matches!(self.phase, Phase::Committed | Phase::Backoff) {
            return Vec::new();
        }
        debug!(
            "{}: nacked (ballot {:?}), backing off",
            self.instance.id, ballot
        );
        if ballot > self.instance.ballot {
            self.instance.ballot = ballot;
        }
        self.phase = Phase::Backoff;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(50..250));
        vec![self.arm_timer(jitter)]
    }

    /// The state timer fired.
    pub fn on_timeout(&mut self, gen: u64) -> Vec<Action<C>> {
        if gen != self.timer_gen {
            return Vec::new(); // superseded timer
        }
        match &self.phase {
            Phase::PreAccepted { .. } => match self.preaccept_decision(true) {
                PreAcceptDecision::SlowPath(seq, deps) => self.enter_accept(seq, deps),
                _ => {
                    let own_view = Some(self.instance.clone()).filter(|i| i.command.is_some());
                    self.enter_recovery(own_view)
                }
            },
            Phase::Accepted { .. } | Phase::Backoff => {
                let own_view = Some(self.instance.clone()).filter(|i| i.command.is_some());
                self.enter_recovery(own_view)
            }
            Phase::Recovering { .. } => {
                warn!("{}: recovery timed out", self.instance.id);
                self.fail(ModemError::RecoveryTimeout);
                vec![Action::Terminate]
            }
            Phase::TryPreAccepting { .. } => vec![Action::RestartPhase1],
            Phase::Committed => Vec::new(),
        }
    }

    /// A commit from a concurrent recoverer of the same instance.
    pub fn adopt_commit(&mut self, instance: Instance<C>) {
        if !matches!(self.phase, Phase::Committed) {
            self.adopt(instance);
            self.instance.status = Status::Committed;
            self.phase = Phase::Committed;
            self.timer_gen += 1;
        }
    }

    /// The executor finished this instance.
    pub fn on_executed(&mut self, result: C::Output) -> Vec<Action<C>> {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(result));
        }
        vec![Action::Terminate]
    }

    /// Abort with an error to the waiting client, if any.
    pub fn fail(&mut self, error: ModemError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn commit(&mut self) -> Vec<Action<C>> {
        self.instance.advance(Status::Committed);
        self.phase = Phase::Committed;
        self.timer_gen += 1; // cancel any pending state timer
        vec![
            Action::Persist,
            Action::Broadcast(ProtocolMsg::Commit {
                instance: self.instance.clone(),
            }),
            Action::NotifyCommit,
        ]
    }

    /// Take over another replica's view of the instance, keeping identity.
    fn adopt(&mut self, mut instance: Instance<C>) {
        instance.id = self.instance.id;
        if instance.command.is_none() {
            instance.command = self.instance.command.clone();
        }
        self.instance = instance;
    }

    fn arm_timer(&mut self, duration: Duration) -> Action<C> {
        self.timer_gen += 1;
        Action::SetTimer(duration, self.timer_gen)
    }

    /// Current timer generation (stale heap entries compare against this).
    pub fn timer_gen(&self) -> u64 {
        self.timer_gen
    }
}
