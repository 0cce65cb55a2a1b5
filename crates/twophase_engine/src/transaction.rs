//! Per-transaction state and vote/ack bookkeeping.

use crate::error::{EngineError, EngineResult};
use std::collections::{HashMap, HashSet};
use twophase_protocol::{now_millis, ParticipantId, TransactionId, TransactionState, Vote};

/// Result of tallying the votes collected so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Some participants have not voted and nobody refused.
    Pending,
    /// Every participant voted COMMIT.
    Commit,
    /// At least one participant voted ABORT; these are the refusers.
    Abort(Vec<ParticipantId>),
}

/// A distributed transaction as seen by the coordinator.
///
/// The participant list is fixed at creation. Votes and acknowledgments are
/// only accepted from listed participants, and the state only moves forward
/// along the edges allowed by [`TransactionState::can_transition_to`].
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    participants: Vec<ParticipantId>,
    votes: HashMap<ParticipantId, Vote>,
    acknowledged: HashSet<ParticipantId>,
    start_time: u64,
    prepare_time: Option<u64>,
    complete_time: Option<u64>,
}

impl Transaction {
    /// Creates a transaction in `INITIAL`.
    ///
    /// Repeated participant ids are collapsed, keeping first-seen order.
    pub fn new(
        id: impl Into<TransactionId>,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> Self {
        let mut seen = HashSet::new();
        let participants = participants
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();

        Self {
            id: id.into(),
            state: TransactionState::Initial,
            participants,
            votes: HashMap::new(),
            acknowledged: HashSet::new(),
            start_time: now_millis(),
            prepare_time: None,
            complete_time: None,
        }
    }

    /// Rebuilds a transaction from logged history.
    pub(crate) fn restore(
        id: TransactionId,
        participants: Vec<ParticipantId>,
        state: TransactionState,
        start_time: u64,
        prepare_time: Option<u64>,
    ) -> Self {
        let mut tx = Self::new(id, participants);
        tx.state = state;
        tx.start_time = start_time;
        tx.prepare_time = prepare_time;
        tx
    }

    /// Returns the transaction id.
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the participants in creation order.
    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    /// Returns the votes collected so far.
    pub fn votes(&self) -> &HashMap<ParticipantId, Vote> {
        &self.votes
    }

    /// Returns the participants that acknowledged the decision.
    pub fn acknowledged(&self) -> &HashSet<ParticipantId> {
        &self.acknowledged
    }

    /// Creation time, milliseconds since the Unix epoch.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Time the transaction entered `PREPARED`.
    pub fn prepare_time(&self) -> Option<u64> {
        self.prepare_time
    }

    /// Time the transaction reached `COMMITTED` or `ABORTED`.
    pub fn complete_time(&self) -> Option<u64> {
        self.complete_time
    }

    /// Returns true if `participant` is part of this transaction.
    pub fn is_member(&self, participant: &ParticipantId) -> bool {
        self.participants.contains(participant)
    }

    /// Returns true once the transaction is committed or aborted.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Tallies the votes: a single ABORT decides, otherwise unanimity.
    pub fn vote_outcome(&self) -> VoteOutcome {
        let refusers: Vec<ParticipantId> = self
            .participants
            .iter()
            .filter(|p| self.votes.get(*p) == Some(&Vote::Abort))
            .cloned()
            .collect();
        if !refusers.is_empty() {
            return VoteOutcome::Abort(refusers);
        }
        if self.participants.iter().all(|p| self.votes.contains_key(p)) {
            VoteOutcome::Commit
        } else {
            VoteOutcome::Pending
        }
    }

    /// Participants that have not voted yet.
    pub fn missing_votes(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| !self.votes.contains_key(*p))
            .cloned()
            .collect()
    }

    /// Participants that have not acknowledged yet.
    pub fn missing_acks(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| !self.acknowledged.contains(*p))
            .cloned()
            .collect()
    }

    /// Returns true when every participant acknowledged.
    pub fn all_acknowledged(&self) -> bool {
        self.participants
            .iter()
            .all(|p| self.acknowledged.contains(p))
    }

    /// Records a vote. Returns false for non-members and while the
    /// transaction is still `INITIAL`, since no PREPARE has gone out.
    ///
    /// The first vote from a participant sticks. Votes arriving after the
    /// prepare phase are kept but no longer change the outcome.
    pub(crate) fn record_vote(&mut self, participant: &ParticipantId, vote: Vote) -> bool {
        if !self.is_member(participant) || self.state == TransactionState::Initial {
            return false;
        }
        self.votes.entry(participant.clone()).or_insert(vote);
        true
    }

    /// Records an acknowledgment. Returns false for non-members and outside
    /// `COMMITTING` and `ABORTING`.
    pub(crate) fn record_ack(&mut self, participant: &ParticipantId) -> bool {
        let deciding = matches!(
            self.state,
            TransactionState::Committing | TransactionState::Aborting
        );
        if !deciding || !self.is_member(participant) {
            return false;
        }
        self.acknowledged.insert(participant.clone());
        true
    }

    /// Moves to `next`, stamping phase times the first time they are reached.
    pub(crate) fn transition(&mut self, next: TransactionState) -> EngineResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::invalid_transition(&self.id, self.state, next));
        }
        self.state = next;

        let now = now_millis();
        if next == TransactionState::Prepared && self.prepare_time.is_none() {
            self.prepare_time = Some(now);
        }
        if next.is_terminal() && self.complete_time.is_none() {
            self.complete_time = Some(now);
        }
        Ok(())
    }
}

/// Encodes a participant list for the `INITIAL` log entry.
pub(crate) fn encode_participants(participants: &[ParticipantId]) -> EngineResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(participants, &mut buf)
        .map_err(|e| EngineError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes the participant list stored in a transaction's `INITIAL` log entry.
pub fn decode_participants(bytes: &[u8]) -> EngineResult<Vec<ParticipantId>> {
    ciborium::from_reader(bytes).map_err(|e| EngineError::codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(names: &[&str]) -> Vec<ParticipantId> {
        names.iter().map(|n| ParticipantId::new(*n)).collect()
    }

    fn preparing(names: &[&str]) -> Transaction {
        let mut tx = Transaction::new("tx-1", ids(names));
        tx.transition(TransactionState::Preparing).unwrap();
        tx
    }

    #[test]
    fn new_transaction_starts_initial() {
        let tx = Transaction::new("tx-1", ids(&["p1", "p2", "p1"]));
        assert_eq!(tx.state(), TransactionState::Initial);
        assert_eq!(tx.participants(), ids(&["p1", "p2"]).as_slice());
        assert!(tx.prepare_time().is_none());
        assert!(tx.complete_time().is_none());
    }

    #[test]
    fn unanimity_required() {
        let mut tx = preparing(&["p1", "p2"]);
        assert_eq!(tx.vote_outcome(), VoteOutcome::Pending);

        tx.record_vote(&"p1".into(), Vote::Commit);
        assert_eq!(tx.vote_outcome(), VoteOutcome::Pending);
        assert_eq!(tx.missing_votes(), ids(&["p2"]));

        tx.record_vote(&"p2".into(), Vote::Commit);
        assert_eq!(tx.vote_outcome(), VoteOutcome::Commit);
    }

    #[test]
    fn single_abort_decides() {
        let mut tx = preparing(&["p1", "p2", "p3"]);
        tx.record_vote(&"p3".into(), Vote::Abort);
        assert_eq!(tx.vote_outcome(), VoteOutcome::Abort(ids(&["p3"])));
    }

    #[test]
    fn first_vote_sticks() {
        let mut tx = preparing(&["p1"]);
        tx.record_vote(&"p1".into(), Vote::Abort);
        tx.record_vote(&"p1".into(), Vote::Commit);
        assert_eq!(tx.votes().get(&ParticipantId::new("p1")), Some(&Vote::Abort));
    }

    #[test]
    fn outsiders_are_ignored() {
        let mut tx = preparing(&["p1"]);
        assert!(!tx.record_vote(&"ghost".into(), Vote::Commit));
        assert!(!tx.record_ack(&"ghost".into()));
        assert!(tx.votes().is_empty());
        assert!(tx.acknowledged().is_empty());
    }

    #[test]
    fn acks_complete() {
        let mut tx = Transaction::new("tx-1", ids(&["p1", "p2"]));
        tx.transition(TransactionState::Aborting).unwrap();
        tx.record_ack(&"p2".into());
        assert!(!tx.all_acknowledged());
        assert_eq!(tx.missing_acks(), ids(&["p1"]));
        tx.record_ack(&"p1".into());
        assert!(tx.all_acknowledged());
    }

    #[test]
    fn votes_before_prepare_are_refused() {
        let mut tx = Transaction::new("tx-1", ids(&["p1"]));
        assert!(!tx.record_vote(&"p1".into(), Vote::Commit));
        assert_eq!(tx.vote_outcome(), VoteOutcome::Pending);

        tx.transition(TransactionState::Preparing).unwrap();
        assert!(tx.record_vote(&"p1".into(), Vote::Commit));
        assert_eq!(tx.vote_outcome(), VoteOutcome::Commit);
    }

    #[test]
    fn late_votes_are_kept() {
        let mut tx = preparing(&["p1", "p2"]);
        tx.transition(TransactionState::Aborting).unwrap();
        assert!(tx.record_vote(&"p2".into(), Vote::Commit));
        assert_eq!(tx.votes().len(), 1);
    }

    #[test]
    fn acks_only_count_after_a_decision() {
        let mut tx = Transaction::new("tx-1", ids(&["p1"]));
        assert!(!tx.record_ack(&"p1".into()));

        tx.transition(TransactionState::Preparing).unwrap();
        assert!(!tx.record_ack(&"p1".into()));
        tx.transition(TransactionState::Prepared).unwrap();
        assert!(!tx.record_ack(&"p1".into()));
        assert!(tx.acknowledged().is_empty());

        tx.transition(TransactionState::Committing).unwrap();
        assert!(tx.record_ack(&"p1".into()));
        assert!(tx.all_acknowledged());
    }

    #[test]
    fn timestamps_are_set_once() {
        let mut tx = Transaction::new("tx-1", ids(&["p1"]));
        tx.transition(TransactionState::Preparing).unwrap();
        tx.transition(TransactionState::Prepared).unwrap();
        let prepared_at = tx.prepare_time();
        assert!(prepared_at.is_some());

        tx.transition(TransactionState::Committing).unwrap();
        tx.transition(TransactionState::Committing).unwrap();
        tx.transition(TransactionState::Committed).unwrap();
        assert_eq!(tx.prepare_time(), prepared_at);
        assert!(tx.complete_time().is_some());
        assert!(tx.is_terminal());
    }

    #[test]
    fn regressions_are_rejected() {
        let mut tx = Transaction::new("tx-1", ids(&["p1"]));
        tx.transition(TransactionState::Aborting).unwrap();
        tx.transition(TransactionState::Aborted).unwrap();

        let err = tx.transition(TransactionState::Committing).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: TransactionState::Aborted,
                to: TransactionState::Committing,
                ..
            }
        ));
        assert_eq!(tx.state(), TransactionState::Aborted);
    }

    #[test]
    fn participant_list_codec() {
        let list = ids(&["p1", "p2", "p3"]);
        let bytes = encode_participants(&list).unwrap();
        assert_eq!(decode_participants(&bytes).unwrap(), list);
        assert!(decode_participants(&[0xFF, 0x00]).is_err());
    }

    proptest! {
        #[test]
        fn state_never_regresses(steps in proptest::collection::vec(1u8..8, 0..30)) {
            let mut tx = Transaction::new("tx-p", ids(&["p1"]));
            for byte in steps {
                let before = tx.state();
                let next = TransactionState::from_byte(byte).unwrap();
                let _ = tx.transition(next);
                prop_assert!(tx.state().rank() >= before.rank());
            }
        }
    }
}
