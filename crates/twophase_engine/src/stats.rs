//! Coordinator counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated from the coordinator and its dispatch task.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    vote_timeouts: AtomicU64,
    participant_aborts: AtomicU64,
    ack_timeouts: AtomicU64,
    recovered: AtomicU64,
    late_votes: AtomicU64,
    dropped_messages: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_begin(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_vote_timeout(&self) {
        self.vote_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_participant_abort(&self) {
        self.participant_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self) {
        self.recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_late_vote(&self) {
        self.late_votes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            vote_timeouts: self.vote_timeouts.load(Ordering::Relaxed),
            participant_aborts: self.participant_aborts.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            late_votes: self.late_votes.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of coordinator statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoordinatorStats {
    /// Transactions begun.
    pub begun: u64,
    /// Transactions that reached `COMMITTED`.
    pub committed: u64,
    /// Transactions that reached `ABORTED`.
    pub aborted: u64,
    /// Prepare phases that hit the deadline.
    pub vote_timeouts: u64,
    /// Prepare phases decided by an ABORT vote.
    pub participant_aborts: u64,
    /// Commit phases that hit the deadline.
    pub ack_timeouts: u64,
    /// Transactions finished by recovery.
    pub recovered: u64,
    /// Votes that arrived after the prepare phase ended.
    pub late_votes: u64,
    /// Inbound messages for unknown transactions or from non-members.
    pub dropped_messages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(StatsCounters::default().snapshot(), CoordinatorStats::default());
    }

    #[test]
    fn counters_accumulate() {
        let stats = StatsCounters::default();
        stats.record_begin();
        stats.record_begin();
        stats.record_commit();
        stats.record_abort();
        stats.record_vote_timeout();
        stats.record_late_vote();
        stats.record_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.begun, 2);
        assert_eq!(snap.committed, 1);
        assert_eq!(snap.aborted, 1);
        assert_eq!(snap.vote_timeouts, 1);
        assert_eq!(snap.late_votes, 1);
        assert_eq!(snap.dropped_messages, 1);
        assert_eq!(snap.recovered, 0);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StatsCounters::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_begin();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().begun, 800);
    }
}
