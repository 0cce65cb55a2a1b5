//! Streaming iteration over log records.

use crate::backend::LogBackend;
use crate::error::LogResult;
use crate::record::{LogEntry, HEADER_SIZE};
use parking_lot::MutexGuard;

/// Outcome of reading one record at an offset.
pub(crate) enum ReadOutcome {
    /// A complete, verified record and its framed length.
    Record(LogEntry, u64),
    /// Fewer bytes remain than the record needs: a torn write.
    Truncated,
    /// Exactly at the end of the backend.
    End,
}

/// Reads and verifies the record starting at `offset`.
pub(crate) fn read_record_at(backend: &dyn LogBackend, offset: u64) -> LogResult<ReadOutcome> {
    let size = backend.size()?;
    if offset >= size {
        return Ok(ReadOutcome::End);
    }
    if size - offset < HEADER_SIZE as u64 {
        return Ok(ReadOutcome::Truncated);
    }

    let header_bytes = backend.read_at(offset, HEADER_SIZE)?;
    let header = LogEntry::decode_header(&header_bytes, offset)?;
    let record_len = header.record_len();
    if size - offset < record_len as u64 {
        return Ok(ReadOutcome::Truncated);
    }

    let record = backend.read_at(offset, record_len)?;
    let entry = LogEntry::decode_record(&record, offset)?;
    Ok(ReadOutcome::Record(entry, record_len as u64))
}

/// A streaming iterator over `(offset, entry)` pairs.
///
/// Holds the log's backend lock while alive, so appends wait until the
/// iterator is dropped.
///
/// - A torn trailing record ends iteration cleanly; [`LogIterator::truncated`]
///   reports it.
/// - Corruption yields one `Err` and then ends iteration.
pub struct LogIterator<'a> {
    backend: MutexGuard<'a, Box<dyn LogBackend>>,
    offset: u64,
    truncated: bool,
    finished: bool,
}

impl<'a> LogIterator<'a> {
    pub(crate) fn new(backend: MutexGuard<'a, Box<dyn LogBackend>>, start_offset: u64) -> Self {
        Self {
            backend,
            offset: start_offset,
            truncated: false,
            finished: false,
        }
    }

    /// Offset just past the last record yielded.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Returns true if iteration stopped at a torn trailing record.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl Iterator for LogIterator<'_> {
    type Item = LogResult<(u64, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match read_record_at(&**self.backend, self.offset) {
            Ok(ReadOutcome::Record(entry, len)) => {
                let at = self.offset;
                self.offset += len;
                Some(Ok((at, entry)))
            }
            Ok(ReadOutcome::Truncated) => {
                self.truncated = true;
                self.finished = true;
                None
            }
            Ok(ReadOutcome::End) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
