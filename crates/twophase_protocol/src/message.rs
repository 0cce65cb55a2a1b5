//! Protocol messages exchanged between coordinator and participants.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{ParticipantId, TransactionId};
use crate::state::Vote;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating to zero on clock skew.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Kind of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Coordinator → participant: phase 1 request.
    Prepare,
    /// Participant → coordinator: ready to commit.
    VoteCommit,
    /// Participant → coordinator: cannot commit.
    VoteAbort,
    /// Coordinator → participant: final decision is commit.
    Commit,
    /// Coordinator → participant: final decision is abort.
    Abort,
    /// Participant → coordinator: decision applied.
    Ack,
}

impl MessageType {
    /// Returns true for messages a participant sends to the coordinator.
    #[must_use]
    pub fn is_reply(self) -> bool {
        matches!(self, Self::VoteCommit | Self::VoteAbort | Self::Ack)
    }

    /// Upper-case protocol name, e.g. `VOTE_COMMIT`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "PREPARE",
            Self::VoteCommit => "VOTE_COMMIT",
            Self::VoteAbort => "VOTE_ABORT",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Ack => "ACK",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable protocol message.
///
/// `transaction_id` is used purely for correlation; a message never owns the
/// transaction it refers to. `participant_id` is the addressee for requests
/// and the sender for replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Transaction the message belongs to.
    pub transaction_id: TransactionId,
    /// Addressee (requests) or sender (replies).
    pub participant_id: ParticipantId,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(
        message_type: MessageType,
        transaction_id: impl Into<TransactionId>,
        participant_id: impl Into<ParticipantId>,
    ) -> Self {
        Self {
            message_type,
            transaction_id: transaction_id.into(),
            participant_id: participant_id.into(),
            timestamp: now_millis(),
        }
    }

    /// Creates a PREPARE request.
    pub fn prepare(
        transaction_id: impl Into<TransactionId>,
        participant_id: impl Into<ParticipantId>,
    ) -> Self {
        Self::new(MessageType::Prepare, transaction_id, participant_id)
    }

    /// Creates a COMMIT request.
    pub fn commit(
        transaction_id: impl Into<TransactionId>,
        participant_id: impl Into<ParticipantId>,
    ) -> Self {
        Self::new(MessageType::Commit, transaction_id, participant_id)
    }

    /// Creates an ABORT request.
    pub fn abort(
        transaction_id: impl Into<TransactionId>,
        participant_id: impl Into<ParticipantId>,
    ) -> Self {
        Self::new(MessageType::Abort, transaction_id, participant_id)
    }

    /// Creates a vote reply.
    pub fn vote(
        transaction_id: impl Into<TransactionId>,
        participant_id: impl Into<ParticipantId>,
        vote: Vote,
    ) -> Self {
        let message_type = match vote {
            Vote::Commit => MessageType::VoteCommit,
            Vote::Abort => MessageType::VoteAbort,
        };
        Self::new(message_type, transaction_id, participant_id)
    }

    /// Creates an ACK reply.
    pub fn ack(
        transaction_id: impl Into<TransactionId>,
        participant_id: impl Into<ParticipantId>,
    ) -> Self {
        Self::new(MessageType::Ack, transaction_id, participant_id)
    }

    /// Replaces the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns the vote carried by this message, if it is a vote.
    #[must_use]
    pub fn vote_value(&self) -> Option<Vote> {
        match self.message_type {
            MessageType::VoteCommit => Some(Vote::Commit),
            MessageType::VoteAbort => Some(Vote::Abort),
            _ => None,
        }
    }

    /// Encodes the message to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| ProtocolError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a message from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::codec(e.to_string()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tx={} participant={}",
            self.message_type, self.transaction_id, self.participant_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_constructor_picks_type() {
        assert_eq!(
            Message::vote("tx", "p", Vote::Commit).message_type,
            MessageType::VoteCommit
        );
        assert_eq!(
            Message::vote("tx", "p", Vote::Abort).message_type,
            MessageType::VoteAbort
        );
        assert_eq!(
            Message::vote("tx", "p", Vote::Abort).vote_value(),
            Some(Vote::Abort)
        );
        assert_eq!(Message::ack("tx", "p").vote_value(), None);
    }

    #[test]
    fn replies_are_classified() {
        assert!(MessageType::Ack.is_reply());
        assert!(MessageType::VoteAbort.is_reply());
        assert!(!MessageType::Prepare.is_reply());
        assert!(!MessageType::Commit.is_reply());
    }

    #[test]
    fn cbor_preserves_identity() {
        let msg = Message::commit("tx-9", "shard-3").with_timestamp(1_700_000_000_000);
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = Message::decode(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Codec(_))));
    }

    #[test]
    fn display_names_match_wire_names() {
        assert_eq!(MessageType::VoteCommit.to_string(), "VOTE_COMMIT");
        let msg = Message::prepare("tx-1", "p1");
        assert_eq!(msg.to_string(), "PREPARE tx=tx-1 participant=p1");
    }
}
