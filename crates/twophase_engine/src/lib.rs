//! # Twophase Engine
//!
//! Two-phase commit coordination for independent participants.
//!
//! This crate provides:
//! - [`Coordinator`]: begins transactions, runs the prepare and decision
//!   phases, and recovers undelivered decisions from the log
//! - [`Participant`]: a reactive actor that votes, locks, and acknowledges
//! - [`ParticipantProxy`]: the delivery seam between the two
//!
//! ## Protocol
//!
//! ```text
//! INITIAL --prepare--> PREPARING --all COMMIT--> PREPARED --> COMMITTING --all acks--> COMMITTED
//!                           |                        |
//!                           +--any ABORT / timeout---+----> ABORTING --acks or timeout--> ABORTED
//! ```
//!
//! ## Key Invariants
//!
//! - Commit requires a COMMIT vote from every participant
//! - State only moves forward; a terminal transaction is never re-decided
//! - Every transition is logged before it is applied
//! - A commit-phase ack timeout leaves the transaction in `COMMITTING` for
//!   recovery; an abort-phase ack timeout still ends in `ABORTED`
//! - Participant COMMIT and ABORT handlers are idempotent
//!
//! ## Concurrency
//!
//! The coordinator and each participant run dispatch loops on Tokio tasks
//! and talk only through bounded `mpsc` queues. Phase operations poll at
//! [`CoordinatorConfig::poll_interval`] and give up after
//! [`CoordinatorConfig::phase_timeout`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod participant;
mod stats;
mod transaction;
mod transport;

pub use config::{CoordinatorConfig, ParticipantConfig, ProxyConfig};
pub use coordinator::{Coordinator, RecoveryReport};
pub use error::{EngineError, EngineResult};
pub use participant::{AlwaysCommit, AlwaysRefuse, Participant, PreparePolicy, RandomPolicy};
pub use stats::CoordinatorStats;
pub use transaction::{decode_participants, Transaction, VoteOutcome};
pub use transport::{
    ChannelProxy, CoordinatorHandle, ParticipantProxy, TransportError, TransportResult,
};

pub use twophase_log::TransactionLog;
pub use twophase_protocol::{Message, MessageType, ParticipantId, TransactionId, TransactionState, Vote};
