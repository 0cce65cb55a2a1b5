//! In-memory log backend.

use crate::backend::LogBackend;
use crate::error::{LogError, LogResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory log backend.
///
/// Clones share the same buffer. Tests use this to simulate a coordinator
/// restart: keep a clone, drop the log, and open a new log over the clone.
///
/// # Example
///
/// ```rust
/// use twophase_log::{LogBackend, MemoryBackend};
///
/// let mut backend = MemoryBackend::new();
/// let offset = backend.append(b"entry").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 5);
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites a single byte. Test hook for corruption scenarios.
    pub fn corrupt_byte(&self, offset: usize, value: u8) {
        if let Some(byte) = self.data.write().get_mut(offset) {
            *byte = value;
        }
    }
}

impl LogBackend for MemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> LogResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(LogError::ReadPastEnd { offset, len, size });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> LogResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> LogResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> LogResult<()> {
        Ok(())
    }

    fn size(&self) -> LogResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> LogResult<()> {
        let mut data = self.data.write();
        if new_size > data.len() as u64 {
            return Err(LogError::ReadPastEnd {
                offset: new_size,
                len: 0,
                size: data.len() as u64,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
