//! The coordinator's append-only transaction log.

use crate::backend::LogBackend;
use crate::error::{LogError, LogResult};
use crate::file::FileBackend;
use crate::iterator::{read_record_at, LogIterator, ReadOutcome};
use crate::memory::MemoryBackend;
use crate::record::LogEntry;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};
use twophase_protocol::{TransactionId, TransactionState};

/// Per-transaction index slot.
#[derive(Debug, Clone)]
struct IndexSlot {
    offsets: Vec<u64>,
    last_state: TransactionState,
}

#[derive(Debug, Default)]
struct LogIndex {
    /// Transaction ids in first-seen order.
    order: Vec<TransactionId>,
    by_id: HashMap<TransactionId, IndexSlot>,
    entries: usize,
}

impl LogIndex {
    fn record(&mut self, entry: &LogEntry, offset: u64) {
        match self.by_id.get_mut(&entry.transaction_id) {
            Some(slot) => {
                slot.offsets.push(offset);
                slot.last_state = entry.state;
            }
            None => {
                self.order.push(entry.transaction_id.clone());
                self.by_id.insert(
                    entry.transaction_id.clone(),
                    IndexSlot {
                        offsets: vec![offset],
                        last_state: entry.state,
                    },
                );
            }
        }
        self.entries += 1;
    }
}

/// Append-only record of transaction state transitions.
///
/// The log keeps an in-memory index from transaction id to record offsets,
/// so [`TransactionLog::last_state`] is a map lookup rather than a backward
/// scan. Entries are read back from the backend on demand.
///
/// # Thread Safety
///
/// Appends are serialized on the backend lock, and the index is updated
/// under that same lock, so per-id ordering in the index always matches
/// append order.
pub struct TransactionLog {
    backend: Mutex<Box<dyn LogBackend>>,
    index: RwLock<LogIndex>,
    sync_on_write: bool,
}

impl TransactionLog {
    /// Creates an empty log held in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Mutex::new(Box::new(MemoryBackend::new())),
            index: RwLock::new(LogIndex::default()),
            sync_on_write: false,
        }
    }

    /// Opens (or creates) a durable log file, syncing after every append.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Locked`] if another coordinator holds the file, or
    /// a corruption error if the existing contents fail verification.
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path.as_ref())?;
        Self::with_backend(Box::new(backend), true)
    }

    /// Opens a log over an arbitrary backend, replaying its contents.
    ///
    /// A torn trailing record is cut off so later appends start on a record
    /// boundary.
    pub fn with_backend(mut backend: Box<dyn LogBackend>, sync_on_write: bool) -> LogResult<Self> {
        let mut index = LogIndex::default();
        let mut offset = 0u64;

        loop {
            match read_record_at(&*backend, offset)? {
                ReadOutcome::Record(entry, len) => {
                    index.record(&entry, offset);
                    offset += len;
                }
                ReadOutcome::End => break,
                ReadOutcome::Truncated => {
                    let size = backend.size()?;
                    warn!(
                        offset,
                        dropped = size - offset,
                        "discarding torn record at end of transaction log"
                    );
                    backend.truncate(offset)?;
                    break;
                }
            }
        }

        debug!(
            entries = index.entries,
            transactions = index.order.len(),
            "transaction log replayed"
        );

        Ok(Self {
            backend: Mutex::new(backend),
            index: RwLock::new(index),
            sync_on_write,
        })
    }

    /// Appends an entry for `transaction_id`, returning its offset.
    ///
    /// The entry is durable when this returns if the log syncs on write.
    /// If the sync fails the record is cut back off, so the log never holds
    /// an entry that was reported as failed.
    pub fn append(
        &self,
        transaction_id: &TransactionId,
        state: TransactionState,
        payload: &[u8],
    ) -> LogResult<u64> {
        let entry = LogEntry::new(transaction_id, state, payload);
        let data = entry.encode()?;

        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        if self.sync_on_write {
            if let Err(e) = sync_backend(&mut **backend) {
                match backend.truncate(offset) {
                    Ok(()) => {
                        warn!(
                            tx = %transaction_id,
                            state = %state,
                            offset,
                            error = %e,
                            "log sync failed, append rolled back"
                        );
                    }
                    Err(undo) => {
                        // The bytes are still there; keep the index in step.
                        warn!(
                            tx = %transaction_id,
                            state = %state,
                            offset,
                            error = %e,
                            rollback = %undo,
                            "log sync failed and rollback failed"
                        );
                        self.index.write().record(&entry, offset);
                    }
                }
                return Err(e);
            }
        }
        self.index.write().record(&entry, offset);
        drop(backend);

        debug!(tx = %transaction_id, state = %state, offset, "log append");
        Ok(offset)
    }

    /// Returns the most recently appended state for `transaction_id`.
    #[must_use]
    pub fn last_state(&self, transaction_id: &TransactionId) -> Option<TransactionState> {
        self.index
            .read()
            .by_id
            .get(transaction_id)
            .map(|slot| slot.last_state)
    }

    /// Returns every entry for `transaction_id` in append order.
    pub fn entries(&self, transaction_id: &TransactionId) -> LogResult<Vec<LogEntry>> {
        let offsets = match self.index.read().by_id.get(transaction_id) {
            Some(slot) => slot.offsets.clone(),
            None => return Ok(Vec::new()),
        };

        let backend = self.backend.lock();
        offsets
            .into_iter()
            .map(|offset| match read_record_at(&**backend, offset)? {
                ReadOutcome::Record(entry, _) => Ok(entry),
                ReadOutcome::Truncated | ReadOutcome::End => Err(LogError::corruption(format!(
                    "indexed record missing at offset {offset}"
                ))),
            })
            .collect()
    }

    /// Returns every transaction id in the order it first appeared.
    #[must_use]
    pub fn transaction_ids(&self) -> Vec<TransactionId> {
        self.index.read().order.clone()
    }

    /// Returns ids whose last recorded state is `COMMITTING` or `ABORTING`.
    ///
    /// These are transactions whose decision was taken but may not have
    /// reached every participant.
    #[must_use]
    pub fn pending_recovery(&self) -> Vec<TransactionId> {
        let index = self.index.read();
        index
            .order
            .iter()
            .filter(|id| {
                index
                    .by_id
                    .get(*id)
                    .is_some_and(|slot| slot.last_state.is_deciding())
            })
            .cloned()
            .collect()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().entries
    }

    /// Returns true if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the log in bytes.
    pub fn size(&self) -> LogResult<u64> {
        self.backend.lock().size()
    }

    /// Streams all entries with their offsets.
    ///
    /// Appends block until the iterator is dropped.
    pub fn iter(&self) -> LogIterator<'_> {
        LogIterator::new(self.backend.lock(), 0)
    }

    /// Forces buffered appends to durable storage.
    pub fn sync(&self) -> LogResult<()> {
        sync_backend(&mut **self.backend.lock())
    }
}

fn sync_backend(backend: &mut dyn LogBackend) -> LogResult<()> {
    backend.flush()?;
    backend.sync()
}

impl std::fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("TransactionLog")
            .field("entries", &index.entries)
            .field("transactions", &index.order.len())
            .field("sync_on_write", &self.sync_on_write)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// A memory backend whose sync can be made to fail.
    struct FlakySync {
        inner: MemoryBackend,
        failing: Arc<AtomicBool>,
    }

    impl LogBackend for FlakySync {
        fn read_at(&self, offset: u64, len: usize) -> LogResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> LogResult<u64> {
            self.inner.append(data)
        }

        fn flush(&mut self) -> LogResult<()> {
            self.inner.flush()
        }

        fn sync(&mut self) -> LogResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("device went away").into());
            }
            self.inner.sync()
        }

        fn size(&self) -> LogResult<u64> {
            self.inner.size()
        }

        fn truncate(&mut self, new_size: u64) -> LogResult<()> {
            self.inner.truncate(new_size)
        }
    }

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id)
    }

    #[test]
    fn unknown_transaction_has_no_state() {
        let log = TransactionLog::in_memory();
        assert_eq!(log.last_state(&tx("missing")), None);
        assert!(log.entries(&tx("missing")).unwrap().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn last_write_wins_per_transaction() {
        let log = TransactionLog::in_memory();
        log.append(&tx("a"), TransactionState::Initial, b"").unwrap();
        log.append(&tx("b"), TransactionState::Initial, b"").unwrap();
        log.append(&tx("a"), TransactionState::Preparing, b"").unwrap();
        log.append(&tx("a"), TransactionState::Aborting, b"").unwrap();

        assert_eq!(log.last_state(&tx("a")), Some(TransactionState::Aborting));
        assert_eq!(log.last_state(&tx("b")), Some(TransactionState::Initial));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn entries_keep_append_order_and_payload() {
        let log = TransactionLog::in_memory();
        log.append(&tx("a"), TransactionState::Initial, b"p1,p2").unwrap();
        log.append(&tx("z"), TransactionState::Initial, b"").unwrap();
        log.append(&tx("a"), TransactionState::Preparing, b"").unwrap();

        let entries = log.entries(&tx("a")).unwrap();
        let states: Vec<_> = entries.iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![TransactionState::Initial, TransactionState::Preparing]
        );
        assert_eq!(entries[0].payload, b"p1,p2");
    }

    #[test]
    fn pending_recovery_lists_deciding_transactions() {
        let log = TransactionLog::in_memory();
        log.append(&tx("done"), TransactionState::Committed, b"").unwrap();
        log.append(&tx("commit"), TransactionState::Committing, b"").unwrap();
        log.append(&tx("abort"), TransactionState::Aborting, b"").unwrap();
        log.append(&tx("early"), TransactionState::Preparing, b"").unwrap();

        assert_eq!(log.pending_recovery(), vec![tx("commit"), tx("abort")]);
        assert_eq!(
            log.transaction_ids(),
            vec![tx("done"), tx("commit"), tx("abort"), tx("early")]
        );
    }

    #[test]
    fn replay_rebuilds_index() {
        let shared = MemoryBackend::new();
        {
            let log = TransactionLog::with_backend(Box::new(shared.clone()), false).unwrap();
            log.append(&tx("a"), TransactionState::Initial, b"x").unwrap();
            log.append(&tx("a"), TransactionState::Committing, b"").unwrap();
        }

        let reopened = TransactionLog::with_backend(Box::new(shared), false).unwrap();
        assert_eq!(
            reopened.last_state(&tx("a")),
            Some(TransactionState::Committing)
        );
        assert_eq!(reopened.entries(&tx("a")).unwrap().len(), 2);
    }

    #[test]
    fn torn_tail_is_cut_on_open() {
        let shared = MemoryBackend::new();
        let good_len;
        {
            let log = TransactionLog::with_backend(Box::new(shared.clone()), false).unwrap();
            log.append(&tx("a"), TransactionState::Initial, b"").unwrap();
            good_len = log.size().unwrap();
        }
        let torn = LogEntry::new("a", TransactionState::Preparing, Vec::new())
            .encode()
            .unwrap();
        let mut writer = shared.clone();
        writer.append(&torn[..torn.len() / 2]).unwrap();

        let log = TransactionLog::with_backend(Box::new(shared.clone()), false).unwrap();
        assert_eq!(log.last_state(&tx("a")), Some(TransactionState::Initial));
        assert_eq!(log.size().unwrap(), good_len);

        log.append(&tx("a"), TransactionState::Aborting, b"").unwrap();
        let reopened = TransactionLog::with_backend(Box::new(shared), false).unwrap();
        assert_eq!(
            reopened.last_state(&tx("a")),
            Some(TransactionState::Aborting)
        );
    }

    #[test]
    fn corrupted_record_refuses_to_open() {
        let shared = MemoryBackend::new();
        {
            let log = TransactionLog::with_backend(Box::new(shared.clone()), false).unwrap();
            log.append(&tx("a"), TransactionState::Initial, b"payload").unwrap();
        }
        shared.corrupt_byte(14, 0xEE);

        let result = TransactionLog::with_backend(Box::new(shared), false);
        assert!(matches!(result, Err(LogError::ChecksumMismatch { .. })));
    }

    #[test]
    fn damaged_length_is_not_a_torn_tail() {
        let shared = MemoryBackend::new();
        let size;
        {
            let log = TransactionLog::with_backend(Box::new(shared.clone()), false).unwrap();
            log.append(&tx("a"), TransactionState::Initial, b"").unwrap();
            log.append(&tx("a"), TransactionState::Committing, b"").unwrap();
            log.append(&tx("b"), TransactionState::Aborting, b"").unwrap();
            size = log.size().unwrap();
        }
        // High byte of the first record's length field.
        shared.corrupt_byte(10, 0x7F);

        let err = TransactionLog::with_backend(Box::new(shared.clone()), false).unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(shared.data().len() as u64, size);
    }

    #[test]
    fn failed_sync_rolls_back_the_append() {
        let shared = MemoryBackend::new();
        let failing = Arc::new(AtomicBool::new(false));
        let backend = FlakySync {
            inner: shared.clone(),
            failing: Arc::clone(&failing),
        };
        let log = TransactionLog::with_backend(Box::new(backend), true).unwrap();
        log.append(&tx("a"), TransactionState::Initial, b"").unwrap();
        let size = log.size().unwrap();

        failing.store(true, Ordering::SeqCst);
        let err = log
            .append(&tx("a"), TransactionState::Committing, b"")
            .unwrap_err();
        assert!(matches!(err, LogError::Io(_)));
        assert_eq!(log.last_state(&tx("a")), Some(TransactionState::Initial));
        assert_eq!(log.size().unwrap(), size);
        assert_eq!(log.len(), 1);

        failing.store(false, Ordering::SeqCst);
        log.append(&tx("a"), TransactionState::Aborting, b"").unwrap();
        drop(log);

        let reopened = TransactionLog::with_backend(Box::new(shared), false).unwrap();
        let states: Vec<_> = reopened
            .entries(&tx("a"))
            .unwrap()
            .iter()
            .map(|e| e.state)
            .collect();
        assert_eq!(
            states,
            vec![TransactionState::Initial, TransactionState::Aborting]
        );
        assert!(reopened.pending_recovery().contains(&tx("a")));
    }

    #[test]
    fn iter_streams_everything() {
        let log = TransactionLog::in_memory();
        log.append(&tx("a"), TransactionState::Initial, b"").unwrap();
        log.append(&tx("b"), TransactionState::Initial, b"").unwrap();

        let ids: Vec<_> = log
            .iter()
            .map(|r| r.unwrap().1.transaction_id)
            .collect();
        assert_eq!(ids, vec![tx("a"), tx("b")]);
    }

    proptest! {
        #[test]
        fn last_state_matches_last_append(ops in proptest::collection::vec((0u8..4, 1u8..8), 1..40)) {
            let log = TransactionLog::in_memory();
            let mut expected: HashMap<TransactionId, TransactionState> = HashMap::new();
            for (id, state_byte) in ops {
                let id = TransactionId::new(format!("tx-{id}"));
                let state = TransactionState::from_byte(state_byte).unwrap();
                log.append(&id, state, b"").unwrap();
                expected.insert(id, state);
            }
            for (id, state) in &expected {
                prop_assert_eq!(log.last_state(id), Some(*state));
                let entries = log.entries(id).unwrap();
                prop_assert_eq!(entries.last().map(|e| e.state), Some(*state));
            }
        }
    }
}
