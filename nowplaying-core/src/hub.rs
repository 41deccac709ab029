//! Subscriber registry and fan-out.
//!
//! The hub is transport-agnostic: each subscriber is a bounded queue of
//! [`Outbound`] items drained by whatever owns the connection. Sends never
//! block; a subscriber whose queue is full or closed is unregistered.

use crate::history::HistoryLog;
use crate::protocol::ServerMessage;
use crate::tracker::PlaybackTracker;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Opaque random subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Item queued for a subscriber's transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized [`ServerMessage`], shared between subscribers
    Frame(Arc<str>),
    /// Liveness probe
    Ping,
}

/// Receiving half handed to the transport on registration.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Outbound>,
}

/// Per-broadcast delivery report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Interval between liveness probes
    pub heartbeat_interval: Duration,
    /// Number of history entries sent to a new subscriber
    pub backfill_history: usize,
    /// Outbound queue depth per subscriber
    pub queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            backfill_history: 10,
            queue_capacity: 32,
        }
    }
}

/// Backfill needs room for the snapshot and the history frame
const MIN_QUEUE_CAPACITY: usize = 2;

struct Subscriber {
    sender: mpsc::Sender<Outbound>,
    connected_at: DateTime<Utc>,
}

/// Registry of live subscribers.
pub struct BroadcastHub {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    tracker: Arc<PlaybackTracker>,
    history: Arc<dyn HistoryLog>,
    settings: HubSettings,
}

impl BroadcastHub {
    #[must_use]
    pub fn new(
        tracker: Arc<PlaybackTracker>,
        history: Arc<dyn HistoryLog>,
        settings: HubSettings,
    ) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            tracker,
            history,
            settings,
        }
    }

    /// Add a subscriber and queue its backfill.
    ///
    /// The backfill (current snapshot, then recent history) is queued while
    /// the registry is write-locked, so it always precedes any broadcast the
    /// subscriber receives.
    pub async fn register(&self) -> Subscription {
        let id = SubscriberId::random();
        let (sender, receiver) =
            mpsc::channel(self.settings.queue_capacity.max(MIN_QUEUE_CAPACITY));

        let mut subscribers = self.subscribers.write().await;

        let current = self.tracker.current().await;
        let history = match self.history.recent(self.settings.backfill_history).await {
            Ok(history) => history,
            Err(e) => {
                error!("Failed to read history backfill: {}", e);
                Vec::new()
            }
        };

        for message in [
            ServerMessage::CurrentlyPlaying(current),
            ServerMessage::History(history),
        ] {
            match message.to_frame() {
                Ok(frame) => {
                    if let Err(e) = sender.try_send(Outbound::Frame(frame)) {
                        warn!("Backfill for subscriber {} was not queued: {}", id, e);
                    }
                }
                Err(e) => error!("Failed to serialize {} backfill: {}", message.kind(), e),
            }
        }

        subscribers.insert(
            id,
            Subscriber {
                sender,
                connected_at: Utc::now(),
            },
        );
        info!("Subscriber {} connected ({} live)", id, subscribers.len());

        Subscription { id, receiver }
    }

    /// Remove a subscriber. Safe to call more than once.
    ///
    /// Returns `true` if the subscriber was still registered.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        match subscribers.remove(&id) {
            Some(subscriber) => {
                let connected_for = (Utc::now() - subscriber.connected_at).num_seconds();
                info!(
                    "Subscriber {} disconnected after {}s ({} live)",
                    id,
                    connected_for,
                    subscribers.len()
                );
                true
            }
            None => false,
        }
    }

    /// Deliver `message` to every registered subscriber.
    ///
    /// Serializes once. A subscriber that cannot accept the frame is
    /// unregistered without affecting the others.
    pub async fn broadcast(&self, message: &ServerMessage) -> Delivery {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize {} broadcast: {}", message.kind(), e);
                return Delivery::default();
            }
        };

        let delivery = self.deliver_all(&Outbound::Frame(frame)).await;
        debug!(
            "Broadcast {} to {} subscriber(s), dropped {}",
            message.kind(),
            delivery.delivered,
            delivery.dropped
        );
        delivery
    }

    /// Deliver `message` to a single subscriber.
    ///
    /// Returns `false` if the subscriber is gone or could not accept it.
    pub async fn send_to(&self, id: SubscriberId, message: &ServerMessage) -> bool {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize {} reply: {}", message.kind(), e);
                return false;
            }
        };

        let result = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(&id) {
                Some(subscriber) => subscriber.sender.try_send(Outbound::Frame(frame)),
                None => return false,
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                Self::log_send_failure(id, &e);
                self.unregister(id).await;
                false
            }
        }
    }

    /// Queue a liveness probe on every connection.
    pub async fn heartbeat(&self) -> Delivery {
        let delivery = self.deliver_all(&Outbound::Ping).await;
        if delivery.dropped > 0 {
            warn!("Heartbeat dropped {} dead subscriber(s)", delivery.dropped);
        }
        delivery
    }

    /// Start the heartbeat loop in a background task
    #[must_use]
    pub fn start_heartbeat(
        self: Arc<Self>,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.settings.heartbeat_interval;
            info!("Starting subscriber heartbeat every {}s", interval.as_secs());
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!("Heartbeat shutting down");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        self.heartbeat().await;
                    }
                }
            }
        })
    }

    /// Drop every subscriber; their transports see the queue close.
    pub async fn close_all(&self) -> usize {
        let mut subscribers = self.subscribers.write().await;
        let closed = subscribers.len();
        subscribers.clear();
        info!("Closed {} subscriber connection(s)", closed);
        closed
    }

    /// Number of live subscribers
    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }

    async fn deliver_all(&self, outbound: &Outbound) -> Delivery {
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                match subscriber.sender.try_send(outbound.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        Self::log_send_failure(*id, &e);
                        dead.push(*id);
                    }
                }
            }
        }

        for id in &dead {
            self.unregister(*id).await;
        }

        Delivery {
            delivered,
            dropped: dead.len(),
        }
    }

    fn log_send_failure(id: SubscriberId, error: &TrySendError<Outbound>) {
        match error {
            TrySendError::Full(_) => warn!("Subscriber {} is not keeping up, disconnecting", id),
            TrySendError::Closed(_) => debug!("Subscriber {} connection already closed", id),
        }
    }
}
