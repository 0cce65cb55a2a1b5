//! Message delivery between the coordinator and participants.

use crate::config::ProxyConfig;
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use twophase_protocol::{Message, ParticipantId};

/// Result type for proxy deliveries.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised when a message cannot be handed to a participant.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The proxy is disconnected.
    #[error("participant {participant} is not connected")]
    NotConnected {
        /// Addressed participant.
        participant: ParticipantId,
    },

    /// The participant's inbox is at capacity.
    #[error("inbox of participant {participant} is full")]
    QueueFull {
        /// Addressed participant.
        participant: ParticipantId,
    },

    /// The participant stopped receiving.
    #[error("inbox of participant {participant} is closed")]
    Closed {
        /// Addressed participant.
        participant: ParticipantId,
    },

    /// Delayed delivery needs a Tokio runtime and none is running.
    #[error("no async runtime available for delayed delivery")]
    NoRuntime,
}

impl TransportError {
    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected { .. } | TransportError::QueueFull { .. }
        )
    }
}

/// Delivers protocol messages to one participant.
///
/// This trait abstracts where the participant lives. The in-process
/// [`ChannelProxy`] pushes onto the participant's queue; a network client
/// can implement the same trait. A proxy holds no protocol state and does no
/// validation.
pub trait ParticipantProxy: Send + Sync {
    /// Hands `message` over for delivery. Must not block.
    fn deliver(&self, message: Message) -> TransportResult<()>;

    /// Returns true if the participant is currently reachable.
    fn is_connected(&self) -> bool;
}

/// A proxy over a participant's bounded in-process queue.
///
/// Clones share the connection flag, so a test can keep one clone and cut
/// the link after handing another to the coordinator.
///
/// With a delay configured, all clones feed one forwarding task, so messages
/// reach the participant in the order they were handed over.
#[derive(Debug, Clone)]
pub struct ChannelProxy {
    participant: ParticipantId,
    sender: mpsc::Sender<Message>,
    config: ProxyConfig,
    connected: Arc<AtomicBool>,
    delayed: Arc<Mutex<Option<mpsc::UnboundedSender<(Instant, Message)>>>>,
}

impl ChannelProxy {
    /// Creates a proxy that feeds `sender`.
    pub fn new(
        participant: impl Into<ParticipantId>,
        sender: mpsc::Sender<Message>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            participant: participant.into(),
            sender,
            config,
            connected: Arc::new(AtomicBool::new(true)),
            delayed: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the participant this proxy addresses.
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Connects or disconnects the link.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queues `message` on the link's forwarder, starting it if needed.
    ///
    /// A forwarder whose runtime has shut down is replaced on the next call.
    fn forward_later(&self, delay: Duration, message: Message) -> TransportResult<()> {
        let due = Instant::now() + delay;
        let mut delayed = self.delayed.lock();
        let message = match delayed.as_ref() {
            Some(queue) => match queue.send((due, message)) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError((_, message))) => message,
            },
            None => message,
        };
        self.start_forwarder(&mut delayed, due, message)
    }

    fn start_forwarder(
        &self,
        slot: &mut Option<mpsc::UnboundedSender<(Instant, Message)>>,
        due: Instant,
        message: Message,
    ) -> TransportResult<()> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let (queue, mut pending) = mpsc::unbounded_channel::<(Instant, Message)>();
        let sender = self.sender.clone();
        let participant = self.participant.clone();
        runtime.spawn(async move {
            while let Some((due, message)) = pending.recv().await {
                tokio::time::sleep_until(due).await;
                if sender.send(message).await.is_err() {
                    debug!(participant = %participant, "delayed messages dropped: inbox closed");
                    break;
                }
            }
        });
        // Fails only if the runtime is already shutting down.
        let _ = queue.send((due, message));
        *slot = Some(queue);
        Ok(())
    }
}

impl ParticipantProxy for ChannelProxy {
    fn deliver(&self, message: Message) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected {
                participant: self.participant.clone(),
            });
        }

        let Some(delay) = self.config.delay else {
            return self.sender.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull {
                    participant: self.participant.clone(),
                },
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed {
                    participant: self.participant.clone(),
                },
            });
        };

        if self.sender.is_closed() {
            return Err(TransportError::Closed {
                participant: self.participant.clone(),
            });
        }
        self.forward_later(delay, message)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A handle for sending replies into the coordinator's inbox.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<Message>,
}

impl CoordinatorHandle {
    pub(crate) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Enqueues without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InboxFull`] at capacity and
    /// [`EngineError::InboxClosed`] once the coordinator is gone.
    pub fn try_send(&self, message: Message) -> EngineResult<()> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::InboxFull,
            mpsc::error::TrySendError::Closed(_) => EngineError::InboxClosed,
        })
    }

    /// Enqueues, waiting for capacity.
    pub async fn send(&self, message: Message) -> EngineResult<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| EngineError::InboxClosed)
    }

    /// Returns true once the coordinator stopped receiving.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use twophase_protocol::MessageType;

    #[tokio::test]
    async fn immediate_delivery() {
        let (tx, mut rx) = mpsc::channel(4);
        let proxy = ChannelProxy::new("p1", tx, ProxyConfig::default());

        proxy.deliver(Message::prepare("tx-1", "p1")).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message_type, MessageType::Prepare);
        assert_eq!(received.transaction_id, "tx-1");
    }

    #[tokio::test]
    async fn disconnected_proxy_refuses() {
        let (tx, mut rx) = mpsc::channel(4);
        let proxy = ChannelProxy::new("p1", tx, ProxyConfig::default());
        let link = proxy.clone();
        link.set_connected(false);

        let err = proxy.deliver(Message::commit("tx-1", "p1")).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { .. }));
        assert!(err.is_retryable());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let proxy = ChannelProxy::new("p1", tx, ProxyConfig::default());

        proxy.deliver(Message::prepare("tx-1", "p1")).unwrap();
        let err = proxy.deliver(Message::prepare("tx-2", "p1")).unwrap_err();
        assert!(matches!(err, TransportError::QueueFull { .. }));
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let proxy = ChannelProxy::new("p1", tx, ProxyConfig::default());
        let err = proxy.deliver(Message::abort("tx-1", "p1")).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn delayed_delivery_arrives_later() {
        let (tx, mut rx) = mpsc::channel(4);
        let proxy = ChannelProxy::new(
            "p1",
            tx,
            ProxyConfig::new().with_delay(Duration::from_millis(30)),
        );

        let start = tokio::time::Instant::now();
        proxy.deliver(Message::prepare("tx-1", "p1")).unwrap();
        assert!(rx.try_recv().is_err());

        rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delayed_delivery_keeps_order() {
        let (tx, mut rx) = mpsc::channel(64);
        let proxy = ChannelProxy::new(
            "p1",
            tx,
            ProxyConfig::new().with_delay(Duration::from_millis(5)),
        );
        let clone = proxy.clone();

        for i in 0..32 {
            let link = if i % 2 == 0 { &proxy } else { &clone };
            link.deliver(Message::prepare(format!("tx-{i}"), "p1")).unwrap();
        }

        for i in 0..32 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.transaction_id.as_str(), format!("tx-{i}"));
        }
    }

    #[tokio::test]
    async fn delayed_delivery_to_closed_inbox_is_refused() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let proxy = ChannelProxy::new(
            "p1",
            tx,
            ProxyConfig::new().with_delay(Duration::from_millis(1)),
        );
        let err = proxy.deliver(Message::commit("tx-1", "p1")).unwrap_err();
        assert!(matches!(err, TransportError::Closed { .. }));
    }

    #[test]
    fn delayed_delivery_needs_runtime() {
        let (tx, _rx) = mpsc::channel(4);
        let proxy = ChannelProxy::new(
            "p1",
            tx,
            ProxyConfig::new().with_delay(Duration::from_millis(1)),
        );
        assert!(matches!(
            proxy.deliver(Message::prepare("tx-1", "p1")),
            Err(TransportError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn handle_reports_backpressure() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = CoordinatorHandle::new(tx);

        handle.try_send(Message::ack("tx-1", "p1")).unwrap();
        assert!(matches!(
            handle.try_send(Message::ack("tx-1", "p2")),
            Err(EngineError::InboxFull)
        ));

        rx.recv().await.unwrap();
        handle.send(Message::ack("tx-1", "p2")).await.unwrap();
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.try_send(Message::ack("tx-1", "p3")),
            Err(EngineError::InboxClosed)
        ));
    }
}
