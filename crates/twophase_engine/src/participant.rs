//! Participant actor.
//!
//! A participant owns a small key-value store and answers protocol messages
//! from its own task. PREPARE takes a per-transaction lock and snapshots the
//! store into a shadow copy; COMMIT and ABORT discard both and acknowledge.

use crate::config::{ParticipantConfig, ProxyConfig};
use crate::transport::{ChannelProxy, CoordinatorHandle};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use twophase_protocol::{Message, MessageType, ParticipantId, TransactionId, Vote};

/// Decides whether a participant can prepare a transaction.
pub trait PreparePolicy: Send + Sync + 'static {
    /// Returns true to vote COMMIT.
    fn can_prepare(&self, transaction: &TransactionId, participant: &ParticipantId) -> bool;
}

impl<F> PreparePolicy for F
where
    F: Fn(&TransactionId, &ParticipantId) -> bool + Send + Sync + 'static,
{
    fn can_prepare(&self, transaction: &TransactionId, participant: &ParticipantId) -> bool {
        self(transaction, participant)
    }
}

/// Always votes COMMIT.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCommit;

impl PreparePolicy for AlwaysCommit {
    fn can_prepare(&self, _: &TransactionId, _: &ParticipantId) -> bool {
        true
    }
}

/// Always votes ABORT.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRefuse;

impl PreparePolicy for AlwaysRefuse {
    fn can_prepare(&self, _: &TransactionId, _: &ParticipantId) -> bool {
        false
    }
}

/// Votes COMMIT with a fixed probability.
#[derive(Debug)]
pub struct RandomPolicy {
    probability: f64,
    rng: Mutex<StdRng>,
}

impl RandomPolicy {
    /// Creates a policy seeded from the OS.
    ///
    /// `probability` is clamped to `0.0..=1.0`.
    pub fn new(probability: f64) -> Self {
        Self::with_rng(probability, StdRng::from_entropy())
    }

    /// Creates a reproducible policy.
    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self::with_rng(probability, StdRng::seed_from_u64(seed))
    }

    fn with_rng(probability: f64, rng: StdRng) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self {
            probability,
            rng: Mutex::new(rng),
        }
    }

    /// Returns the probability of voting COMMIT.
    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl PreparePolicy for RandomPolicy {
    fn can_prepare(&self, _: &TransactionId, _: &ParticipantId) -> bool {
        self.rng.lock().gen_bool(self.probability)
    }
}

#[derive(Debug, Default)]
struct LocalState {
    data: HashMap<String, String>,
    locks: HashSet<TransactionId>,
    shadows: HashMap<TransactionId, HashMap<String, String>>,
}

struct ParticipantCore {
    id: ParticipantId,
    policy: Box<dyn PreparePolicy>,
    state: Mutex<LocalState>,
}

impl ParticipantCore {
    /// The policy runs without the state lock held, so it may read the
    /// participant's own data.
    fn prepare(&self, transaction: &TransactionId) -> Vote {
        if self.state.lock().locks.contains(transaction) {
            return Vote::Commit;
        }
        if !self.policy.can_prepare(transaction, &self.id) {
            debug!(participant = %self.id, tx = %transaction, "refusing to prepare");
            return Vote::Abort;
        }
        let mut state = self.state.lock();
        if !state.locks.insert(transaction.clone()) {
            return Vote::Commit;
        }
        let snapshot = state.data.clone();
        state.shadows.insert(transaction.clone(), snapshot);
        debug!(participant = %self.id, tx = %transaction, "prepared");
        Vote::Commit
    }

    fn release(&self, transaction: &TransactionId) {
        let mut state = self.state.lock();
        state.shadows.remove(transaction);
        state.locks.remove(transaction);
    }

    fn handle(&self, message: &Message) -> Option<Message> {
        let tx = &message.transaction_id;
        match message.message_type {
            MessageType::Prepare => Some(Message::vote(tx, &self.id, self.prepare(tx))),
            MessageType::Commit | MessageType::Abort => {
                self.release(tx);
                debug!(
                    participant = %self.id,
                    tx = %tx,
                    decision = %message.message_type,
                    "released"
                );
                Some(Message::ack(tx, &self.id))
            }
            other => {
                warn!(participant = %self.id, tx = %tx, kind = %other, "ignoring reply-type message");
                None
            }
        }
    }
}

/// An autonomous participant running its own dispatch task.
///
/// Multiple transactions can be prepared against one participant at a time;
/// locks and shadow copies are keyed by transaction id. COMMIT and ABORT
/// are idempotent and always acknowledged, even without a prior PREPARE.
pub struct Participant {
    core: Arc<ParticipantCore>,
    sender: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

impl Participant {
    /// Starts a participant whose replies go to `coordinator`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        id: impl Into<ParticipantId>,
        policy: impl PreparePolicy,
        coordinator: CoordinatorHandle,
        config: ParticipantConfig,
    ) -> Self {
        let core = Arc::new(ParticipantCore {
            id: id.into(),
            policy: Box::new(policy),
            state: Mutex::new(LocalState::default()),
        });
        let (sender, receiver) = mpsc::channel(config.inbox_capacity);
        let task = tokio::spawn(dispatch(Arc::clone(&core), receiver, coordinator));

        Self { core, sender, task }
    }

    /// Returns the participant id.
    pub fn id(&self) -> &ParticipantId {
        &self.core.id
    }

    /// Returns a proxy that delivers into this participant's inbox.
    pub fn proxy(&self, config: ProxyConfig) -> ChannelProxy {
        ChannelProxy::new(self.core.id.clone(), self.sender.clone(), config)
    }

    /// Handles one message synchronously, returning the reply.
    pub fn handle(&self, message: &Message) -> Option<Message> {
        self.core.handle(message)
    }

    /// PREPARE handler.
    pub fn on_prepare(&self, transaction: &TransactionId) -> Vote {
        self.core.prepare(transaction)
    }

    /// COMMIT handler.
    pub fn on_commit(&self, transaction: &TransactionId) {
        self.core.release(transaction);
    }

    /// ABORT handler. Safe without a prior PREPARE.
    pub fn on_abort(&self, transaction: &TransactionId) {
        self.core.release(transaction);
    }

    /// Writes a local value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.core.state.lock().data.insert(key.into(), value.into());
    }

    /// Reads a local value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.core.state.lock().data.get(key).cloned()
    }

    /// Returns true while `transaction` holds this participant's lock.
    pub fn is_locked(&self, transaction: &TransactionId) -> bool {
        self.core.state.lock().locks.contains(transaction)
    }

    /// Returns true while a shadow copy exists for `transaction`.
    pub fn has_prepared(&self, transaction: &TransactionId) -> bool {
        self.core.state.lock().shadows.contains_key(transaction)
    }

    /// Returns the transactions currently holding locks, sorted.
    pub fn locked_transactions(&self) -> Vec<TransactionId> {
        let mut locked: Vec<_> = self.core.state.lock().locks.iter().cloned().collect();
        locked.sort();
        locked
    }

    /// Stops the dispatch task. Later deliveries fail as closed.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.core.id)
            .field("running", &!self.task.is_finished())
            .finish()
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn dispatch(
    core: Arc<ParticipantCore>,
    mut receiver: mpsc::Receiver<Message>,
    coordinator: CoordinatorHandle,
) {
    while let Some(message) = receiver.recv().await {
        let Some(reply) = core.handle(&message) else {
            continue;
        };
        if coordinator.send(reply).await.is_err() {
            debug!(participant = %core.id, "coordinator gone, stopping");
            break;
        }
    }
}
