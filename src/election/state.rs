use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::election::term::TermRegister;

/// Raft election role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Published on role entry, in transition order.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionEvent {
    BecameFollower { term: u64, at: DateTime<Utc> },
    BecameCandidate { term: u64, at: DateTime<Utc> },
    BecameLeader { term: u64, at: DateTime<Utc> },
}

impl ElectionEvent {
    pub(crate) fn follower(term: u64) -> Self {
        Self::BecameFollower {
            term,
            at: Utc::now(),
        }
    }

    fn candidate(term: u64) -> Self {
        Self::BecameCandidate {
            term,
            at: Utc::now(),
        }
    }

    fn leader(term: u64) -> Self {
        Self::BecameLeader {
            term,
            at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::BecameFollower { .. } => Role::Follower,
            Self::BecameCandidate { .. } => Role::Candidate,
            Self::BecameLeader { .. } => Role::Leader,
        }
    }

    pub fn term(&self) -> u64 {
        match self {
            Self::BecameFollower { term, .. }
            | Self::BecameCandidate { term, .. }
            | Self::BecameLeader { term, .. } => *term,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::BecameFollower { at, .. }
            | Self::BecameCandidate { at, .. }
            | Self::BecameLeader { at, .. } => *at,
        }
    }
}

/// The local member's view of group leadership. `leader_id` is absent until
/// a leader is known for the current term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderView {
    pub member_id: String,
    pub leader_id: Option<String>,
}

impl LeaderView {
    pub fn is_leader(&self) -> bool {
        self.leader_id.as_deref() == Some(self.member_id.as_str())
    }
}

/// Result of applying an inbound heartbeat.
#[derive(Debug)]
pub enum HeartbeatOutcome {
    /// Heartbeat from the current (or a newer) term; the election timer must
    /// be re-armed. `event` is present when the heartbeat forced a step-down.
    Accepted { event: Option<ElectionEvent> },
    /// Heartbeat from an older term; ignored.
    Stale,
}

/// Election state machine: role, term, and known leader for one
/// (member, topic) pair.
///
/// Every mutation runs on the driver's event loop, so transitions are
/// serialized and the events returned here are published in the exact order
/// the transitions occurred. The term register is shared with in-flight RPC
/// tasks, which may only ever raise it.
#[derive(Debug)]
pub struct ElectionState {
    member_id: String,
    role: Role,
    term: Arc<TermRegister>,
    leader_id: Option<String>,
}

impl ElectionState {
    pub fn new(member_id: impl Into<String>, term: Arc<TermRegister>) -> Self {
        Self {
            member_id: member_id.into(),
            role: Role::Follower,
            term,
            leader_id: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn term(&self) -> u64 {
        self.term.current()
    }

    pub fn leader_view(&self) -> LeaderView {
        LeaderView {
            member_id: self.member_id.clone(),
            leader_id: self.leader_id.clone(),
        }
    }

    /// Transition to follower, raising the term to `term` if it is ahead.
    /// Repeated calls at the same term emit no duplicate event; callers
    /// still re-arm the election timer on every call.
    pub fn become_follower(&mut self, term: u64) -> Option<ElectionEvent> {
        if self.term.is_before(term) {
            self.term.update_to(term);
            // Whoever led the old term is not the leader of this one.
            self.leader_id = None;
        }
        if self.role == Role::Follower {
            return None;
        }
        self.role = Role::Follower;
        Some(ElectionEvent::follower(self.term.current()))
    }

    /// Start a new election: move to candidate and increment the term.
    pub fn become_candidate(&mut self) -> ElectionEvent {
        self.role = Role::Candidate;
        self.leader_id = None;
        ElectionEvent::candidate(self.term.next())
    }

    /// Promote to leader. Effective only while still a candidate at `term`;
    /// stale promotions (the role or term moved on) are dropped.
    pub fn become_leader(&mut self, term: u64) -> Option<ElectionEvent> {
        if self.role != Role::Candidate || self.term.current() != term {
            return None;
        }
        self.role = Role::Leader;
        self.leader_id = Some(self.member_id.clone());
        Some(ElectionEvent::leader(term))
    }

    /// Apply an inbound heartbeat from `peer_id` at `peer_term`.
    pub fn heartbeat(&mut self, peer_id: &str, peer_term: u64) -> HeartbeatOutcome {
        let current = self.term.current();
        if peer_term < current {
            return HeartbeatOutcome::Stale;
        }

        self.term.update_to(peer_term);
        self.leader_id = Some(peer_id.to_string());

        let event = match self.role {
            Role::Follower => None,
            Role::Candidate => {
                self.role = Role::Follower;
                Some(ElectionEvent::follower(peer_term))
            }
            // A competing leader at the same term keeps its role here; only
            // a strictly newer term forces the step-down.
            Role::Leader if peer_term > current => {
                self.role = Role::Follower;
                Some(ElectionEvent::follower(peer_term))
            }
            Role::Leader => None,
        };

        HeartbeatOutcome::Accepted { event }
    }

    /// Apply the outcome of a candidate vote round. Outcomes from a round
    /// the machine has already moved past (no longer candidate, or the term
    /// advanced) are discarded.
    pub fn finish_round(&mut self, round_term: u64, won: bool) -> Option<ElectionEvent> {
        if self.role != Role::Candidate || self.term.current() != round_term {
            return None;
        }
        if won {
            self.become_leader(round_term)
        } else {
            self.become_follower(round_term)
        }
    }

    /// A strictly higher term was observed outside the heartbeat/vote
    /// paths (e.g. on a heartbeat response): raise the term and step down.
    pub fn observe_term(&mut self, term: u64) -> Option<ElectionEvent> {
        if !self.term.is_before(term) {
            return None;
        }
        self.term.update_to(term);
        self.leader_id = None;
        if self.role == Role::Follower {
            return None;
        }
        self.role = Role::Follower;
        Some(ElectionEvent::follower(term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(member_id: &str) -> ElectionState {
        ElectionState::new(member_id, Arc::new(TermRegister::new(0)))
    }

    fn elect(st: &mut ElectionState) -> u64 {
        let event = st.become_candidate();
        let term = event.term();
        st.finish_round(term, true).expect("promotion applies");
        term
    }

    #[test]
    fn test_new_state_is_follower_at_term_zero() {
        let st = state("a");
        assert_eq!(st.role(), Role::Follower);
        assert_eq!(st.term(), 0);
        assert_eq!(st.leader_view().leader_id, None);
    }

    #[test]
    fn test_become_candidate_increments_term() {
        let mut st = state("a");
        let event = st.become_candidate();

        assert_eq!(st.role(), Role::Candidate);
        assert_eq!(event.role(), Role::Candidate);
        assert_eq!(event.term(), 1);
        assert_eq!(st.term(), 1);
        assert_eq!(st.leader_view().leader_id, None);
    }

    #[test]
    fn test_won_round_promotes_to_leader() {
        let mut st = state("a");
        let term = elect(&mut st);

        assert_eq!(st.role(), Role::Leader);
        assert_eq!(st.term(), term);
        assert!(st.leader_view().is_leader());
    }

    #[test]
    fn test_lost_round_falls_back_to_follower() {
        let mut st = state("a");
        let event = st.become_candidate();

        let fallback = st.finish_round(event.term(), false).expect("demotion applies");
        assert_eq!(fallback.role(), Role::Follower);
        assert_eq!(st.role(), Role::Follower);
        assert_eq!(st.term(), event.term());
    }

    #[test]
    fn test_stale_round_outcome_is_discarded() {
        let mut st = state("a");
        let event = st.become_candidate();
        let round_term = event.term();

        // A newer term arrived while the round was in flight.
        st.become_follower(round_term + 2);

        assert!(st.finish_round(round_term, true).is_none());
        assert_eq!(st.role(), Role::Follower);
        assert_eq!(st.term(), round_term + 2);
    }

    #[test]
    fn test_become_follower_same_term_is_idempotent() {
        let mut st = state("a");
        st.become_candidate();

        let first = st.become_follower(1);
        assert!(first.is_some());

        // Same term again: timer re-arm only, no second event
        assert!(st.become_follower(1).is_none());
        assert_eq!(st.role(), Role::Follower);
    }

    #[test]
    fn test_become_follower_never_lowers_term() {
        let mut st = state("a");
        st.become_follower(5);
        st.become_follower(3);
        assert_eq!(st.term(), 5);
    }

    #[test]
    fn test_heartbeat_with_higher_term_steps_leader_down() {
        let mut st = state("a");
        let term = elect(&mut st);

        let outcome = st.heartbeat("b", term + 1);
        let HeartbeatOutcome::Accepted { event } = outcome else {
            panic!("heartbeat from a newer term must be accepted");
        };

        assert_eq!(event.expect("step-down event").role(), Role::Follower);
        assert_eq!(st.role(), Role::Follower);
        assert_eq!(st.term(), term + 1);
        assert_eq!(st.leader_view().leader_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_heartbeat_at_current_term_adopts_leader() {
        let mut st = state("a");
        st.become_follower(2);

        let outcome = st.heartbeat("b", 2);
        let HeartbeatOutcome::Accepted { event } = outcome else {
            panic!("heartbeat at the current term must be accepted");
        };

        assert!(event.is_none(), "follower stays follower");
        assert_eq!(st.leader_view().leader_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_heartbeat_at_current_term_demotes_candidate() {
        let mut st = state("a");
        let event = st.become_candidate();

        let outcome = st.heartbeat("b", event.term());
        let HeartbeatOutcome::Accepted { event } = outcome else {
            panic!("heartbeat at the candidate's term must be accepted");
        };

        assert_eq!(event.expect("demotion event").role(), Role::Follower);
        assert_eq!(st.role(), Role::Follower);
        assert_eq!(st.leader_view().leader_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_heartbeat_from_older_term_is_stale() {
        let mut st = state("a");
        st.become_follower(5);

        assert!(matches!(st.heartbeat("b", 4), HeartbeatOutcome::Stale));
        assert_eq!(st.term(), 5);
        assert_eq!(st.leader_view().leader_id, None);
    }

    #[test]
    fn test_observe_term_steps_leader_down() {
        let mut st = state("a");
        let term = elect(&mut st);

        let event = st.observe_term(term + 3).expect("step-down event");
        assert_eq!(event.role(), Role::Follower);
        assert_eq!(st.term(), term + 3);
        assert_eq!(st.leader_view().leader_id, None);

        // Equal or lower terms are a no-op
        assert!(st.observe_term(term + 3).is_none());
        assert!(st.observe_term(1).is_none());
    }

    #[test]
    fn test_stale_promotion_after_new_election_round() {
        let mut st = state("a");
        let first = st.become_candidate().term();
        // Timer fired again before the first round resolved.
        let second = st.become_candidate().term();
        assert_eq!(second, first + 1);

        // The first round's win straggles in: wrong term, dropped.
        assert!(st.finish_round(first, true).is_none());
        assert_eq!(st.role(), Role::Candidate);

        // The current round can still promote.
        assert!(st.finish_round(second, true).is_some());
        assert_eq!(st.role(), Role::Leader);
    }
}
