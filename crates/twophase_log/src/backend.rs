//! Byte-store trait underneath the transaction log.

use crate::error::LogResult;

/// An opaque append-only byte store.
///
/// Backends do not understand log records; [`crate::TransactionLog`] owns the
/// framing. A backend only has to return exactly the bytes previously
/// appended at an offset and make them durable on [`LogBackend::sync`].
///
/// # Implementors
///
/// - [`crate::MemoryBackend`] - for tests and ephemeral coordinators
/// - [`crate::FileBackend`] - survives process restart
pub trait LogBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LogError::ReadPastEnd`] if the range extends beyond
    /// the current size.
    fn read_at(&self, offset: u64, len: usize) -> LogResult<Vec<u8>>;

    /// Appends data, returning the offset it was written at.
    fn append(&mut self, data: &[u8]) -> LogResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&mut self) -> LogResult<()>;

    /// Makes all appended data durable.
    fn sync(&mut self) -> LogResult<()>;

    /// Returns the current size in bytes (the next append offset).
    fn size(&self) -> LogResult<u64>;

    /// Cuts the store down to `new_size` bytes.
    ///
    /// Used to drop a torn trailing record found on open and to roll back
    /// an append whose sync failed.
    fn truncate(&mut self, new_size: u64) -> LogResult<()>;
}
