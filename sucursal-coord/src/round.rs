use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sucursal_base::{protocol, BranchId, Result};

/// Per-node, per-round phase (spec §4.5 state machine). Every node —
/// initiator included — passes through COLLECTING, DECIDED and APPLIED;
/// WAITING-COMPLETION exists only on the initiator's copy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Collecting,
    Decided,
    Applied,
    WaitingCompletion,
}

struct RoundState {
    phase: Phase,
    initiator_id: Option<BranchId>,
    expected_votes: usize,
    votes: Vec<(BranchId, String)>,
    voted: BTreeSet<BranchId>,
    decision: Option<String>,
    expected_acks: usize,
    acks: usize,
}

impl RoundState {
    fn idle() -> RoundState {
        RoundState {
            phase: Phase::Idle,
            initiator_id: None,
            expected_votes: 0,
            votes: Vec::new(),
            voted: BTreeSet::new(),
            decision: None,
            expected_acks: 0,
            acks: 0,
        }
    }
}

/// The one round-state slot a node holds (spec §9: "exactly one shared
/// round-state block per node; concurrent rounds are undefined"). Votes
/// can arrive before `begin` runs (a fast peer may forward its vote before
/// this node's own `start_consensus` handling reaches `begin`), so `begin`
/// folds in whatever was already collected rather than discarding it.
pub struct Round {
    state: Mutex<RoundState>,
    cv: Condvar,
}

impl Round {
    pub fn new() -> Round {
        Round {
            state: Mutex::new(RoundState::idle()),
            cv: Condvar::new(),
        }
    }

    /// Transitions IDLE -> COLLECTING for a new round. Rejects a second
    /// `start_consensus`/initiate while one is already in flight (spec §9.4
    /// REDESIGN: a defensive ProtocolError rather than silent corruption).
    pub fn begin(&self, initiator_id: BranchId, expected_votes: usize, expected_acks: usize) -> Result<()> {
        let mut s = self.state.lock();
        if s.phase != Phase::Idle {
            return Err(protocol("a round is already in progress on this node"));
        }
        s.initiator_id = Some(initiator_id);
        s.expected_votes = expected_votes;
        s.expected_acks = expected_acks;
        s.phase = Phase::Collecting;
        let done = !s.votes.is_empty() && s.votes.len() == expected_votes;
        if done {
            s.decision = plurality_decision(&s.votes);
            s.phase = Phase::Decided;
        }
        drop(s);
        if done {
            self.cv.notify_all();
        }
        Ok(())
    }

    /// Records one vote, discarding a duplicate from a sender already seen
    /// this round (idempotence against retransmits, spec §4.5 edge policy).
    pub fn record_vote(&self, sender: BranchId, command: String) {
        let mut s = self.state.lock();
        if s.voted.insert(sender) {
            s.votes.push((sender, command));
        }
        let done = s.phase == Phase::Collecting && s.votes.len() == s.expected_votes;
        if done {
            s.decision = plurality_decision(&s.votes);
            s.phase = Phase::Decided;
        }
        drop(s);
        if done {
            self.cv.notify_all();
        }
    }

    /// Blocks until this round reaches DECIDED, or `timeout` elapses.
    pub fn wait_for_decision(&self, timeout: Duration) -> Option<String> {
        let mut s = self.state.lock();
        let deadline = Instant::now() + timeout;
        while s.phase == Phase::Collecting {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let r = self.cv.wait_for(&mut s, remaining);
            if r.timed_out() && s.phase == Phase::Collecting {
                return None;
            }
        }
        s.decision.clone()
    }

    pub fn mark_applied(&self) {
        self.state.lock().phase = Phase::Applied;
    }

    /// Only the initiator's copy of the round makes this transition. A fast
    /// peer's ack can arrive and be counted (see `record_ack`) before this
    /// runs, so it checks for an already-complete count rather than assuming
    /// `acks` starts at zero.
    pub fn begin_waiting_completion(&self) {
        let mut s = self.state.lock();
        s.phase = Phase::WaitingCompletion;
        let done = s.acks >= s.expected_acks;
        drop(s);
        if done {
            self.cv.notify_all();
        }
    }

    /// `consensus_over` carries no sender id on the wire, so acks are a
    /// plain count rather than a per-sender set. Counted once APPLIED is
    /// reached (mirrors `record_vote`'s tolerance of a vote arriving before
    /// `begin`): a fast peer's ack can otherwise race ahead of this node's
    /// own `mark_applied` -> `begin_waiting_completion` transition and be
    /// dropped, costing the initiator a full `round_timeout` wait for
    /// nothing.
    pub fn record_ack(&self) {
        let mut s = self.state.lock();
        if !matches!(s.phase, Phase::Applied | Phase::WaitingCompletion) {
            return;
        }
        s.acks += 1;
        let done = s.phase == Phase::WaitingCompletion && s.acks >= s.expected_acks;
        drop(s);
        if done {
            self.cv.notify_all();
        }
    }

    pub fn wait_for_all_acks(&self, timeout: Duration) -> bool {
        let mut s = self.state.lock();
        let deadline = Instant::now() + timeout;
        while s.acks < s.expected_acks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let r = self.cv.wait_for(&mut s, remaining);
            if r.timed_out() && s.acks < s.expected_acks {
                return false;
            }
        }
        true
    }

    /// Clears the round back to IDLE (spec §8: "at the end, every
    /// participant's votes, votes_received, completion_acks are zero/empty").
    pub fn reset(&self) {
        let mut s = self.state.lock();
        *s = RoundState::idle();
        drop(s);
        self.cv.notify_all();
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }
}

impl Default for Round {
    fn default() -> Round {
        Round::new()
    }
}

/// Highest-multiplicity command string, first-seen order breaking ties
/// (spec §4.5 DECIDE: "ties are broken by first-seen order... operates on
/// strings bytewise"). `None` only if `votes` is empty, which callers never
/// hand it (the round never decides on zero votes).
fn plurality_decision(votes: &[(BranchId, String)]) -> Option<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for (_, cmd) in votes {
        if !counts.contains_key(cmd.as_str()) {
            order.push(cmd.as_str());
        }
        *counts.entry(cmd.as_str()).or_insert(0) += 1;
    }
    let mut best: Option<&str> = None;
    let mut best_count = 0usize;
    for candidate in &order {
        let count = counts[candidate];
        if count > best_count {
            best = Some(candidate);
            best_count = count;
        }
    }
    best.map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plurality_breaks_ties_by_first_seen() {
        let votes = vec![
            (BranchId(1), "a".to_string()),
            (BranchId(2), "b".to_string()),
            (BranchId(3), "a".to_string()),
            (BranchId(4), "b".to_string()),
        ];
        assert_eq!(plurality_decision(&votes).as_deref(), Some("a"));
    }

    #[test]
    fn plurality_picks_the_majority() {
        let votes = vec![
            (BranchId(1), "x".to_string()),
            (BranchId(2), "y".to_string()),
            (BranchId(3), "y".to_string()),
            (BranchId(4), "y".to_string()),
        ];
        assert_eq!(plurality_decision(&votes).as_deref(), Some("y"));
    }

    #[test]
    fn duplicate_vote_from_same_sender_is_discarded() {
        let round = Round::new();
        round.begin(BranchId(1), 2, 1).unwrap();
        round.record_vote(BranchId(2), "create_cliente|a|b|c|1".to_string());
        round.record_vote(BranchId(2), "create_cliente|a|b|c|1".to_string());
        assert_eq!(round.state.lock().votes.len(), 1);
    }

    #[test]
    fn out_of_order_vote_survives_begin() {
        let round = Round::new();
        round.record_vote(BranchId(2), "create_cliente|a|b|c|1".to_string());
        round.begin(BranchId(1), 1, 0).unwrap();
        assert_eq!(round.phase(), Phase::Decided);
    }

    #[test]
    fn second_begin_while_in_progress_is_a_protocol_error() {
        let round = Round::new();
        round.begin(BranchId(1), 3, 2).unwrap();
        assert!(round.begin(BranchId(2), 3, 2).is_err());
    }

    #[test]
    fn ack_arriving_before_waiting_completion_is_not_lost() {
        let round = Round::new();
        round.begin(BranchId(1), 1, 1).unwrap();
        round.record_vote(BranchId(1), "x".to_string());
        round.mark_applied();
        round.record_ack();
        round.begin_waiting_completion();
        assert!(round.wait_for_all_acks(Duration::from_millis(50)));
    }

    #[test]
    fn ack_before_applied_is_ignored() {
        let round = Round::new();
        round.begin(BranchId(1), 1, 1).unwrap();
        round.record_ack();
        assert_eq!(round.state.lock().acks, 0);
    }

    #[test]
    fn reset_clears_votes_and_acks() {
        let round = Round::new();
        round.begin(BranchId(1), 1, 0).unwrap();
        round.record_vote(BranchId(1), "x".to_string());
        round.reset();
        assert_eq!(round.phase(), Phase::Idle);
        assert_eq!(round.state.lock().votes.len(), 0);
    }
}
