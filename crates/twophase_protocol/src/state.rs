//! Coordinator-side transaction states and participant votes.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a distributed transaction as seen by its coordinator.
///
/// ```text
/// INITIAL ──► PREPARING ──► PREPARED ──► COMMITTING ──► COMMITTED
///    │            │             │
///    └────────────┴─────────────┴──► ABORTING ──► ABORTED
/// ```
///
/// Transitions only ever move forward along this graph. `COMMITTING` and
/// `ABORTING` may additionally be re-entered (a recovery re-drive), which
/// does not count as a new transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TransactionState {
    /// Created, no protocol message sent yet.
    Initial = 1,
    /// PREPARE broadcast, collecting votes.
    Preparing = 2,
    /// Every participant voted COMMIT.
    Prepared = 3,
    /// COMMIT broadcast, collecting acknowledgments.
    Committing = 4,
    /// Every participant acknowledged COMMIT.
    Committed = 5,
    /// ABORT broadcast, collecting acknowledgments.
    Aborting = 6,
    /// Abort resolved, with or without full acknowledgment.
    Aborted = 7,
}

impl TransactionState {
    /// All states, in declaration order.
    pub const ALL: [TransactionState; 7] = [
        TransactionState::Initial,
        TransactionState::Preparing,
        TransactionState::Prepared,
        TransactionState::Committing,
        TransactionState::Committed,
        TransactionState::Aborting,
        TransactionState::Aborted,
    ];

    /// Converts a byte to a state.
    pub fn from_byte(b: u8) -> ProtocolResult<Self> {
        match b {
            1 => Ok(Self::Initial),
            2 => Ok(Self::Preparing),
            3 => Ok(Self::Prepared),
            4 => Ok(Self::Committing),
            5 => Ok(Self::Committed),
            6 => Ok(Self::Aborting),
            7 => Ok(Self::Aborted),
            other => Err(ProtocolError::UnknownState(other)),
        }
    }

    /// Converts the state to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true for `Committed` and `Aborted`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    /// Returns true while a final decision is being delivered.
    #[must_use]
    pub fn is_deciding(self) -> bool {
        matches!(self, Self::Committing | Self::Aborting)
    }

    /// Position of the state along its path through the graph.
    ///
    /// Every permitted transition strictly increases the rank, apart from the
    /// re-drive self-loops.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Initial => 0,
            Self::Preparing => 1,
            Self::Prepared => 2,
            Self::Committing | Self::Aborting => 3,
            Self::Committed | Self::Aborted => 4,
        }
    }

    /// Returns true if moving from `self` to `next` is a permitted edge.
    #[must_use]
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Initial, Preparing)
                | (Initial, Aborting)
                | (Preparing, Prepared)
                | (Preparing, Aborting)
                | (Prepared, Committing)
                | (Prepared, Aborting)
                | (Committing, Committing)
                | (Committing, Committed)
                | (Aborting, Aborting)
                | (Aborting, Aborted)
        )
    }

    /// Upper-case protocol name, e.g. `PREPARING`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Preparing => "PREPARING",
            Self::Prepared => "PREPARED",
            Self::Committing => "COMMITTING",
            Self::Committed => "COMMITTED",
            Self::Aborting => "ABORTING",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's answer to PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    /// The participant can commit.
    Commit,
    /// The participant refuses; the whole transaction must abort.
    Abort,
}
