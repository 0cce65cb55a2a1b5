//! # Twophase Log
//!
//! Append-only transaction log used by the coordinator for crash recovery.
//!
//! Every coordinator state transition is appended here *before* it is applied
//! in memory. After a restart the coordinator asks the log for the last
//! recorded state of a transaction and re-drives any decision that was in
//! flight.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | state (1) | length (4) | payload (N) | crc32 (4) |
//! payload = | timestamp (8) | id_len (2) | id | data_len (4) | data |
//! ```
//!
//! ## Recovery Policy
//!
//! - A truncated trailing record (crash mid-append) is cut off on open and
//!   treated as a clean end of log.
//! - Bad magic, an unknown state byte, an unsupported version, or a CRC
//!   mismatch is fatal: the log refuses to open.
//!
//! ## Invariants
//!
//! - The log is **append-only**; records are never rewritten
//! - Entries for one transaction id keep their append order
//! - `last_state` is last-write-wins per transaction id
//!
//! ## Example
//!
//! ```rust
//! use twophase_log::TransactionLog;
//! use twophase_protocol::{TransactionId, TransactionState};
//!
//! let log = TransactionLog::in_memory();
//! let tx = TransactionId::new("tx-1");
//! log.append(&tx, TransactionState::Initial, b"").unwrap();
//! log.append(&tx, TransactionState::Preparing, b"").unwrap();
//! assert_eq!(log.last_state(&tx), Some(TransactionState::Preparing));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod iterator;
mod memory;
mod record;
mod transaction_log;

pub use backend::LogBackend;
pub use error::{LogError, LogResult};
pub use file::FileBackend;
pub use iterator::LogIterator;
pub use memory::MemoryBackend;
pub use record::{LogEntry, LOG_MAGIC, LOG_VERSION};
pub use transaction_log::TransactionLog;
