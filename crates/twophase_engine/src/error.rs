//! Error types for the coordination engine.

use crate::transport::TransportError;
use thiserror::Error;
use twophase_log::LogError;
use twophase_protocol::{ParticipantId, ProtocolError, TransactionId, TransactionState};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by coordinator and participant operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A transaction named a participant that was never registered.
    #[error("participant {participant} is not registered")]
    UnregisteredParticipant {
        /// The unknown participant.
        participant: ParticipantId,
    },

    /// A transaction id was reused.
    #[error("transaction {transaction} already exists")]
    DuplicateTransaction {
        /// The reused id.
        transaction: TransactionId,
    },

    /// No transaction with this id is known.
    #[error("transaction {transaction} not found")]
    TransactionNotFound {
        /// The unknown id.
        transaction: TransactionId,
    },

    /// Not every participant voted before the prepare deadline.
    #[error("transaction {transaction} aborted: no vote from {missing:?} before the deadline")]
    VoteTimeout {
        /// The aborted transaction.
        transaction: TransactionId,
        /// Participants that never voted.
        missing: Vec<ParticipantId>,
    },

    /// At least one participant voted to abort.
    #[error("transaction {transaction} aborted: {participants:?} voted to abort")]
    ParticipantAbort {
        /// The aborted transaction.
        transaction: TransactionId,
        /// Participants that voted ABORT.
        participants: Vec<ParticipantId>,
    },

    /// Commit acknowledgments were incomplete at the deadline.
    ///
    /// The transaction stays in `COMMITTING` for recovery to finish.
    #[error("transaction {transaction} committing: no ack from {missing:?} before the deadline")]
    AckTimeout {
        /// The transaction left in `COMMITTING`.
        transaction: TransactionId,
        /// Participants that never acknowledged.
        missing: Vec<ParticipantId>,
    },

    /// A phase operation was invoked from a state that does not permit it.
    #[error("transaction {transaction}: invalid transition from {from} to {to}")]
    InvalidTransition {
        /// The transaction.
        transaction: TransactionId,
        /// Current state.
        from: TransactionState,
        /// Attempted target state.
        to: TransactionState,
    },

    /// The transaction log failed.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// A message could not be handed to a participant.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The coordinator inbox is at capacity.
    #[error("coordinator inbox is full")]
    InboxFull,

    /// The coordinator is no longer accepting messages.
    #[error("coordinator inbox is closed")]
    InboxClosed,

    /// A logged payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl EngineError {
    /// Creates a not-found error.
    pub fn not_found(transaction: impl Into<TransactionId>) -> Self {
        Self::TransactionNotFound {
            transaction: transaction.into(),
        }
    }

    /// Creates an invalid-transition error.
    pub fn invalid_transition(
        transaction: impl Into<TransactionId>,
        from: TransactionState,
        to: TransactionState,
    ) -> Self {
        Self::InvalidTransition {
            transaction: transaction.into(),
            from,
            to,
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Returns true if the error reports an aborted transaction.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            EngineError::VoteTimeout { .. } | EngineError::ParticipantAbort { .. }
        )
    }

    /// Returns true if retrying (or recovering) later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::AckTimeout { .. } => true,
            EngineError::InboxFull => true,
            EngineError::Transport(e) => e.is_retryable(),
            EngineError::Log(LogError::Io(_)) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for EngineError {
    fn from(e: ProtocolError) -> Self {
        EngineError::Codec(e.to_string())
    }
}
