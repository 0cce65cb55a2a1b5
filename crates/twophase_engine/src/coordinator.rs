//! The two-phase commit coordinator.
//!
//! The coordinator drives each transaction through prepare, then commit or
//! abort. Replies from participants arrive on a bounded inbox drained by a
//! dispatch task, which merges them into the per-transaction bookkeeping.
//! Phase operations poll that bookkeeping at a fixed interval until the
//! outcome is known or the phase deadline passes.
//!
//! Every logged transition is appended to the [`TransactionLog`] before the
//! in-memory state changes, under the transaction's own lock.

use crate::config::CoordinatorConfig;
use crate::error::{EngineError, EngineResult};
use crate::stats::{CoordinatorStats, StatsCounters};
use crate::transaction::{decode_participants, encode_participants, Transaction, VoteOutcome};
use crate::transport::{CoordinatorHandle, ParticipantProxy};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use twophase_log::{LogError, TransactionLog};
use twophase_protocol::{Message, MessageType, ParticipantId, TransactionId, TransactionState};

type TransactionMap = RwLock<HashMap<TransactionId, Arc<Mutex<Transaction>>>>;

/// Outcome of [`Coordinator::recover_all`].
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Transactions driven to `COMMITTED`.
    pub committed: Vec<TransactionId>,
    /// Transactions driven to `ABORTED`.
    pub aborted: Vec<TransactionId>,
    /// Transactions recovery could not finish, with the reason.
    pub pending: Vec<(TransactionId, EngineError)>,
}

impl RecoveryReport {
    /// Returns true if nothing is left pending.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Coordinates distributed transactions across registered participants.
///
/// # Thread Safety
///
/// All operations take `&self`. Registries sit behind `RwLock`s, each
/// transaction behind its own `Mutex`, and no lock is held across an
/// `.await`. Distinct transactions progress in parallel.
///
/// # Example
///
/// ```rust,no_run
/// use twophase_engine::{
///     AlwaysCommit, Coordinator, CoordinatorConfig, Participant, ParticipantConfig, ProxyConfig,
/// };
///
/// # async fn run() -> twophase_engine::EngineResult<()> {
/// let coordinator = Coordinator::in_memory(CoordinatorConfig::default());
/// let p1 = Participant::spawn("p1", AlwaysCommit, coordinator.handle(), ParticipantConfig::default());
/// coordinator.register_participant("p1", p1.proxy(ProxyConfig::default()));
///
/// coordinator.begin_transaction("tx-1", ["p1"])?;
/// coordinator.prepare("tx-1").await?;
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    config: CoordinatorConfig,
    log: Arc<TransactionLog>,
    participants: RwLock<HashMap<ParticipantId, Arc<dyn ParticipantProxy>>>,
    transactions: Arc<TransactionMap>,
    stats: Arc<StatsCounters>,
    inbox: CoordinatorHandle,
    dispatch: JoinHandle<()>,
}

impl Coordinator {
    /// Creates a coordinator over `log` and starts its dispatch task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: CoordinatorConfig, log: impl Into<Arc<TransactionLog>>) -> Self {
        let (sender, receiver) = mpsc::channel(config.inbox_capacity);
        let transactions: Arc<TransactionMap> = Arc::default();
        let stats = Arc::new(StatsCounters::default());
        let dispatch = tokio::spawn(dispatch(
            receiver,
            Arc::clone(&transactions),
            Arc::clone(&stats),
        ));

        Self {
            config,
            log: log.into(),
            participants: RwLock::new(HashMap::new()),
            transactions,
            stats,
            inbox: CoordinatorHandle::new(sender),
            dispatch,
        }
    }

    /// Creates a coordinator with a fresh in-memory log.
    pub fn in_memory(config: CoordinatorConfig) -> Self {
        Self::new(config, TransactionLog::in_memory())
    }

    /// Returns a handle participants use to reply.
    pub fn handle(&self) -> CoordinatorHandle {
        self.inbox.clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns the transaction log.
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Registers a reachable participant. Re-registering replaces the proxy.
    pub fn register_participant(
        &self,
        participant: impl Into<ParticipantId>,
        proxy: impl ParticipantProxy + 'static,
    ) {
        let participant = participant.into();
        let replaced = self
            .participants
            .write()
            .insert(participant.clone(), Arc::new(proxy))
            .is_some();
        info!(participant = %participant, replaced, "participant registered");
    }

    /// Returns the registered participant ids, sorted.
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.participants.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Creates a transaction in `INITIAL` over `participants`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnregisteredParticipant`] if any participant is
    ///   unknown; nothing is created.
    /// - [`EngineError::DuplicateTransaction`] if the id is in use or
    ///   appears anywhere in the log.
    pub fn begin_transaction(
        &self,
        transaction: impl Into<TransactionId>,
        participants: impl IntoIterator<Item = impl Into<ParticipantId>>,
    ) -> EngineResult<()> {
        let id = transaction.into();
        let tx = Transaction::new(id.clone(), participants.into_iter().map(Into::into));

        {
            let registry = self.participants.read();
            if let Some(unknown) = tx.participants().iter().find(|p| !registry.contains_key(*p)) {
                warn!(tx = %id, participant = %unknown, "begin rejected: unregistered participant");
                return Err(EngineError::UnregisteredParticipant {
                    participant: unknown.clone(),
                });
            }
        }

        let payload = encode_participants(tx.participants())?;
        let count = tx.participants().len();

        let mut transactions = self.transactions.write();
        if transactions.contains_key(&id) || self.log.last_state(&id).is_some() {
            return Err(EngineError::DuplicateTransaction { transaction: id });
        }
        self.log.append(&id, TransactionState::Initial, &payload)?;
        transactions.insert(id.clone(), Arc::new(Mutex::new(tx)));
        drop(transactions);

        self.stats.record_begin();
        info!(tx = %id, participants = count, "transaction begun");
        Ok(())
    }

    /// Runs the prepare phase and, on a unanimous COMMIT vote, the commit
    /// phase.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ParticipantAbort`] if anyone voted ABORT; the
    ///   transaction has been aborted.
    /// - [`EngineError::VoteTimeout`] if votes were missing at the deadline;
    ///   the transaction has been aborted.
    /// - [`EngineError::AckTimeout`] from the commit phase.
    pub async fn prepare(&self, transaction: impl Into<TransactionId>) -> EngineResult<()> {
        let id = transaction.into();
        let tx = self.lookup(&id)?;

        let participants = {
            let mut guard = tx.lock();
            self.advance(&mut guard, TransactionState::Preparing)?;
            guard.participants().to_vec()
        };
        info!(tx = %id, participants = participants.len(), "prepare phase started");
        self.broadcast(&id, &participants, MessageType::Prepare);

        let outcome = self
            .wait_for(&tx, |t| match t.vote_outcome() {
                VoteOutcome::Pending => None,
                decided => Some(decided),
            })
            .await;

        match outcome {
            Some(VoteOutcome::Commit) => {
                {
                    let mut guard = tx.lock();
                    self.advance(&mut guard, TransactionState::Prepared)?;
                }
                info!(tx = %id, "all participants voted commit");
                self.commit(id).await
            }
            Some(VoteOutcome::Abort(refusers)) => {
                self.stats.record_participant_abort();
                info!(tx = %id, refusers = ?refusers, "participant voted abort");
                self.abort(&id).await?;
                Err(EngineError::ParticipantAbort {
                    transaction: id,
                    participants: refusers,
                })
            }
            Some(VoteOutcome::Pending) | None => {
                let missing = tx.lock().missing_votes();
                self.stats.record_vote_timeout();
                warn!(tx = %id, missing = ?missing, "vote deadline passed");
                self.abort(&id).await?;
                Err(EngineError::VoteTimeout {
                    transaction: id,
                    missing,
                })
            }
        }
    }

    /// Runs the commit phase for a prepared transaction.
    ///
    /// Committing an already committed transaction is a no-op; calling this
    /// while `COMMITTING` re-sends COMMIT to every participant.
    ///
    /// # Errors
    ///
    /// [`EngineError::AckTimeout`] if acknowledgments are missing at the
    /// deadline. The transaction stays in `COMMITTING`.
    pub async fn commit(&self, transaction: impl Into<TransactionId>) -> EngineResult<()> {
        let id = transaction.into();
        let tx = self.lookup(&id)?;

        let participants = {
            let mut guard = tx.lock();
            if guard.state() == TransactionState::Committed {
                return Ok(());
            }
            self.advance(&mut guard, TransactionState::Committing)?;
            guard.participants().to_vec()
        };
        self.broadcast(&id, &participants, MessageType::Commit);

        let acked = self
            .wait_for(&tx, |t| t.all_acknowledged().then_some(()))
            .await;
        if acked.is_none() {
            let missing = tx.lock().missing_acks();
            self.stats.record_ack_timeout();
            warn!(tx = %id, missing = ?missing, "commit acknowledgments incomplete");
            return Err(EngineError::AckTimeout {
                transaction: id,
                missing,
            });
        }

        if self.finish(&tx, TransactionState::Committed)? {
            self.stats.record_commit();
            info!(tx = %id, "transaction committed");
        }
        Ok(())
    }

    /// Runs the abort phase.
    ///
    /// The transaction ends `ABORTED` whether or not every participant
    /// acknowledged in time. Aborting an aborted transaction is a no-op.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] once a commit decision was taken.
    pub async fn abort(&self, transaction: impl Into<TransactionId>) -> EngineResult<()> {
        let id = transaction.into();
        let tx = self.lookup(&id)?;

        let participants = {
            let mut guard = tx.lock();
            if guard.state() == TransactionState::Aborted {
                return Ok(());
            }
            self.advance(&mut guard, TransactionState::Aborting)?;
            guard.participants().to_vec()
        };
        info!(tx = %id, "abort phase started");
        self.broadcast(&id, &participants, MessageType::Abort);

        let acked = self
            .wait_for(&tx, |t| t.all_acknowledged().then_some(()))
            .await;
        if acked.is_none() {
            let missing = tx.lock().missing_acks();
            warn!(tx = %id, missing = ?missing, "abort acknowledgments incomplete, aborting anyway");
        }

        if self.finish(&tx, TransactionState::Aborted)? {
            self.stats.record_abort();
            info!(tx = %id, "transaction aborted");
        }
        Ok(())
    }

    /// Queues a participant reply without waiting.
    ///
    /// # Errors
    ///
    /// [`EngineError::InboxFull`] at capacity, [`EngineError::InboxClosed`]
    /// if the dispatch task has stopped.
    pub fn receive_message(&self, message: Message) -> EngineResult<()> {
        self.inbox.try_send(message)
    }

    /// Finishes a transaction whose decision was logged but maybe not
    /// delivered.
    ///
    /// A transaction last logged as `COMMITTING` is committed again and one
    /// logged as `ABORTING` is aborted again. Any other state is left alone.
    /// After a restart the transaction is rebuilt from the log first.
    ///
    /// Returns the state after recovery.
    pub async fn recover_transaction(
        &self,
        transaction: impl Into<TransactionId>,
    ) -> EngineResult<TransactionState> {
        let id = transaction.into();
        let Some(logged) = self.log.last_state(&id) else {
            return Err(EngineError::not_found(id));
        };

        match logged {
            TransactionState::Committing => {
                self.restore(&id)?;
                info!(tx = %id, "recovery: re-driving commit");
                self.commit(&id).await?;
            }
            TransactionState::Aborting => {
                self.restore(&id)?;
                info!(tx = %id, "recovery: re-driving abort");
                self.abort(&id).await?;
            }
            other => {
                debug!(tx = %id, state = %other, "recovery: nothing to do");
                return Ok(other);
            }
        }

        self.stats.record_recovery();
        Ok(self.state(&id).unwrap_or(logged))
    }

    /// Recovers every transaction the log shows as undelivered.
    pub async fn recover_all(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let pending = self.log.pending_recovery();
        info!(count = pending.len(), "recovery sweep started");

        for id in pending {
            match self.recover_transaction(&id).await {
                Ok(TransactionState::Committed) => report.committed.push(id),
                Ok(TransactionState::Aborted) => report.aborted.push(id),
                Ok(state) => debug!(tx = %id, state = %state, "recovery left state unchanged"),
                Err(e) => {
                    warn!(tx = %id, error = %e, "recovery incomplete");
                    report.pending.push((id, e));
                }
            }
        }

        info!(
            committed = report.committed.len(),
            aborted = report.aborted.len(),
            pending = report.pending.len(),
            "recovery sweep finished"
        );
        report
    }

    /// Drops committed and aborted transactions from memory.
    ///
    /// Their history stays in the log. Returns how many were evicted.
    pub fn evict_completed(&self) -> usize {
        let mut transactions = self.transactions.write();
        let before = transactions.len();
        transactions.retain(|_, tx| !tx.lock().is_terminal());
        let evicted = before - transactions.len();
        if evicted > 0 {
            debug!(evicted, remaining = transactions.len(), "evicted completed transactions");
        }
        evicted
    }

    /// Returns a snapshot of a transaction held in memory.
    pub fn transaction(&self, transaction: &TransactionId) -> Option<Transaction> {
        let tx = self.transactions.read().get(transaction).cloned()?;
        let snapshot = tx.lock().clone();
        Some(snapshot)
    }

    /// Returns the current state, falling back to the log for evicted
    /// transactions.
    pub fn state(&self, transaction: &TransactionId) -> Option<TransactionState> {
        let Some(tx) = self.transactions.read().get(transaction).cloned() else {
            return self.log.last_state(transaction);
        };
        let state = tx.lock().state();
        Some(state)
    }

    /// Number of transactions held in memory.
    pub fn transaction_count(&self) -> usize {
        self.transactions.read().len()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.snapshot()
    }

    fn lookup(&self, id: &TransactionId) -> EngineResult<Arc<Mutex<Transaction>>> {
        self.transactions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(id))
    }

    /// Logs and applies a transition. Self-loops are not logged.
    fn advance(&self, tx: &mut Transaction, next: TransactionState) -> EngineResult<()> {
        let from = tx.state();
        if !from.can_transition_to(next) {
            return Err(EngineError::invalid_transition(tx.id(), from, next));
        }
        if from != next {
            self.log.append(tx.id(), next, &[])?;
            debug!(tx = %tx.id(), from = %from, to = %next, "transition");
        }
        tx.transition(next)
    }

    /// Moves to a terminal state. Returns false if already there.
    fn finish(&self, tx: &Mutex<Transaction>, terminal: TransactionState) -> EngineResult<bool> {
        let mut guard = tx.lock();
        if guard.state() == terminal {
            return Ok(false);
        }
        self.advance(&mut guard, terminal)?;
        Ok(true)
    }

    fn broadcast(&self, id: &TransactionId, participants: &[ParticipantId], kind: MessageType) {
        for participant in participants {
            let proxy = self.participants.read().get(participant).cloned();
            let Some(proxy) = proxy else {
                warn!(tx = %id, participant = %participant, "no proxy registered");
                continue;
            };
            match proxy.deliver(Message::new(kind, id, participant)) {
                Ok(()) => debug!(tx = %id, participant = %participant, kind = %kind, "sent"),
                Err(e) => warn!(
                    tx = %id,
                    participant = %participant,
                    kind = %kind,
                    error = %e,
                    "delivery failed"
                ),
            }
        }
    }

    /// Polls `check` until it yields a value or the phase deadline passes.
    async fn wait_for<T>(
        &self,
        tx: &Mutex<Transaction>,
        check: impl Fn(&Transaction) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + self.config.phase_timeout;
        loop {
            let found = check(&*tx.lock());
            if found.is_some() {
                return found;
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Rebuilds a transaction from the log unless it is already in memory.
    fn restore(&self, id: &TransactionId) -> EngineResult<()> {
        if self.transactions.read().contains_key(id) {
            return Ok(());
        }

        let entries = self.log.entries(id)?;
        let Some(first) = entries.first() else {
            return Err(EngineError::not_found(id));
        };
        if first.state != TransactionState::Initial {
            return Err(LogError::corruption(format!(
                "transaction {id} has no INITIAL entry"
            ))
            .into());
        }

        let participants = decode_participants(&first.payload)?;
        let state = entries.last().map_or(first.state, |e| e.state);
        let prepare_time = entries
            .iter()
            .find(|e| e.state == TransactionState::Prepared)
            .map(|e| e.timestamp);
        let tx = Transaction::restore(id.clone(), participants, state, first.timestamp, prepare_time);

        self.transactions
            .write()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(tx)));
        info!(tx = %id, state = %state, "transaction restored from log");
        Ok(())
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("participants", &self.participants.read().len())
            .field("transactions", &self.transactions.read().len())
            .finish()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<Message>,
    transactions: Arc<TransactionMap>,
    stats: Arc<StatsCounters>,
) {
    while let Some(message) = receiver.recv().await {
        route(&transactions, &stats, &message);
    }
}

/// Merges one participant reply into its transaction.
fn route(transactions: &TransactionMap, stats: &StatsCounters, message: &Message) {
    let tx = transactions.read().get(&message.transaction_id).cloned();
    let Some(tx) = tx else {
        stats.record_dropped();
        debug!(
            tx = %message.transaction_id,
            kind = %message.message_type,
            "dropping message for unknown transaction"
        );
        return;
    };

    let mut guard = tx.lock();
    let accepted = if let Some(vote) = message.vote_value() {
        let accepted = guard.record_vote(&message.participant_id, vote);
        if accepted && guard.state() != TransactionState::Preparing {
            stats.record_late_vote();
            debug!(
                tx = %message.transaction_id,
                participant = %message.participant_id,
                state = %guard.state(),
                "late vote"
            );
        }
        accepted
    } else if message.message_type == MessageType::Ack {
        guard.record_ack(&message.participant_id)
    } else {
        warn!(
            tx = %message.transaction_id,
            kind = %message.message_type,
            "coordinator ignoring request-type message"
        );
        false
    };

    if !accepted {
        stats.record_dropped();
        debug!(
            tx = %message.transaction_id,
            participant = %message.participant_id,
            kind = %message.message_type,
            state = %guard.state(),
            "dropping reply outside its phase or from a non-member"
        );
    }
}
