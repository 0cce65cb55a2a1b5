//! # Twophase Protocol
//!
//! Value types shared by every component of the two-phase commit engine.
//!
//! This crate provides:
//! - [`TransactionId`] and [`ParticipantId`] identifiers
//! - [`TransactionState`], the coordinator-side state machine
//! - [`Vote`] and [`MessageType`]
//! - [`Message`], the immutable protocol message, with a CBOR encoding
//!
//! This is a pure protocol crate with no I/O and no async runtime. A real
//! network transport can carry [`Message::encode`] bytes unchanged.
//!
//! ## Example
//!
//! ```rust
//! use twophase_protocol::{Message, MessageType};
//!
//! let msg = Message::prepare("tx-1", "p1");
//! let bytes = msg.encode().unwrap();
//! let decoded = Message::decode(&bytes).unwrap();
//! assert_eq!(decoded.message_type, MessageType::Prepare);
//! assert_eq!(decoded, msg);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod message;
mod state;

pub use error::{ProtocolError, ProtocolResult};
pub use ids::{ParticipantId, TransactionId};
pub use message::{now_millis, Message, MessageType};
pub use state::{TransactionState, Vote};
