//! # Quorum Sizing and Recovery Analysis
//!
//! Pure decision logic for the instance FSM: quorum arithmetic over the
//! cluster-size snapshot, the Prepare-response analyser that drives the
//! recovery state, and the TryPreAccept-response analyser.

use crate::eparl::instance::{Instance, InstanceId, Status};
use crate::eparl::membership::ReplicaId;
use std::collections::HashMap;

/// Majority quorum: ⌊N/2⌋ + 1.
pub fn slow_quorum(n: usize) -> usize {
    n / 2 + 1
}

/// Fast-path quorum: N − ⌊(N−1)/2⌋.
pub fn fast_quorum(n: usize) -> usize {
    n - (n.saturating_sub(1)) / 2
}

/// What recovery should do next, decided from a slow quorum of PrepareOk
/// responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryVerdict<C> {
    /// Some replica already committed: adopt its (seq, deps) verbatim.
    Commit(Instance<C>),
    /// An accepted value exists: finish its Accept round.
    Accept(Instance<C>),
    /// Identical pre-accepts short of a fast quorum: probe with
    /// TryPreAccept against the replicas that might complete it.
    TryPreAccept(Instance<C>, Vec<ReplicaId>),
    /// Divergent pre-accepts: rerun phase 1 from the leader's view.
    RestartPhase1(Instance<C>),
    /// No replica knows the instance.
    NotFound,
}

/// Analyse a slow quorum of Prepare responses.
///
/// `responses` maps each answering replica to its view of the instance
/// (`None` when unknown). `original_leader` is the replica named in the
/// instance id; its own pre-accept does not count toward the identical set
/// because the leader always agrees with itself.
pub fn analyse_prepare_responses<C: Clone>(
    id: InstanceId,
    responses: &HashMap<ReplicaId, Option<Instance<C>>>,
    original_leader: ReplicaId,
) -> RecoveryVerdict<C> {
    let known: Vec<&Instance<C>> = responses.values().flatten().collect();

    if known.is_empty() {
        return RecoveryVerdict::NotFound;
    }

    // Highest-status view wins outright for committed/executed
    if let Some(committed) = known
        .iter()
        .find(|i| i.status >= Status::Committed)
    {
        return RecoveryVerdict::Commit((*committed).clone());
    }

    // Accepted views: adopt the one under the highest ballot
    if let Some(accepted) = known
        .iter()
        .filter(|i| i.status == Status::Accepted)
        .max_by_key(|i| i.ballot)
    {
        return RecoveryVerdict::Accept((*accepted).clone());
    }

    // Only pre-accepted views remain. Count replicas (other than the
    // original leader) that reported the identical (seq, deps).
    let pre_accepts: Vec<(&ReplicaId, &Instance<C>)> = responses
        .iter()
        .filter_map(|(r, view)| view.as_ref().map(|i| (r, i)))
        .collect();

    let (_, reference) = pre_accepts[0];
    let identical = pre_accepts
        .iter()
        .all(|(_, i)| i.seq == reference.seq && i.deps == reference.deps);

    if identical {
        let supporters: Vec<ReplicaId> = pre_accepts
            .iter()
            .map(|(r, _)| **r)
            .filter(|r| *r != original_leader)
            .collect();
        if supporters.is_empty() {
            // Only the leader's own view survived; nothing to probe
            let mut seed = reference.clone();
            seed.id = id;
            seed.status = Status::PreAccepted;
            return RecoveryVerdict::RestartPhase1(seed);
        }
        return RecoveryVerdict::TryPreAccept(reference.clone(), supporters);
    }

    let mut seed = reference.clone();
    seed.id = id;
    seed.status = Status::PreAccepted;
    RecoveryVerdict::RestartPhase1(seed)
}

/// What the TryPreAccept round decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryPreAcceptVerdict {
    /// Enough of the possible quorum agreed: proceed to Accept.
    Accept,
    /// A committed conflict surfaced: rerun phase 1.
    Restart,
    /// Keep waiting for the remaining members of the possible quorum.
    Continue,
}

/// Analyse TryPreAccept responses against the tracked quorum set.
///
/// `oks` counts agreeing replicas (the recovering leader included),
/// `committed_conflict` is set when any responder reported a conflict with
/// a committed instance, and `answered` counts all responses so far.
pub fn analyse_try_preaccept(
    oks: usize,
    committed_conflict: bool,
    answered: usize,
    possible_quorum: usize,
    cluster_size: usize,
) -> TryPreAcceptVerdict {
    if committed_conflict {
        return TryPreAcceptVerdict::Restart;
    }
    if oks >= slow_quorum(cluster_size) {
        return TryPreAcceptVerdict::Accept;
    }
    if answered >= possible_quorum {
        // Everyone eligible has answered and the quorum still fell short
        return TryPreAcceptVerdict::Restart;
    }
    TryPreAcceptVerdict::Continue
}
