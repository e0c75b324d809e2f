//! Subscriber Registry
//!
//! The dynamic set of connected stream consumers. Each subscriber owns a
//! bounded outbound queue; delivery is a non-blocking `try_send`, so one
//! stuck or vanished client never delays the others or the scheduler.
//!
//! Flow: register → init frame queued first → broadcast frames → removal
//! (client drop, closed queue, or full queue).
//!
//! A short fan-out gate serialises registration against delivery so a new
//! subscriber either sees a broadcast in its queue or has its effect in the
//! init snapshot, never neither.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use types::ids::SubscriberId;

/// A serialized event ready to be written to any subscriber.
///
/// `data` is shared so one serialization serves every recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    /// Broadcast sequence number; `None` for per-subscriber frames.
    pub id: Option<u64>,
    pub event: &'static str,
    pub data: Arc<str>,
}

impl EventFrame {
    pub fn new(id: Option<u64>, event: &'static str, data: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            event,
            data: data.into(),
        }
    }
}

/// Why a subscriber was removed during delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Outbound queue full: the client is not keeping up.
    Lagging,
    /// Receiving side is gone.
    Disconnected,
}

/// Outcome of delivering one frame to every member.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: Vec<(SubscriberId, DropReason)>,
}

struct Subscriber {
    tx: mpsc::Sender<EventFrame>,
    alive: Arc<AtomicBool>,
    connected_at: DateTime<Utc>,
}

/// Concurrency-safe set of subscribers.
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, Subscriber>,
    gate: Mutex<()>,
    queue_capacity: usize,
}

impl SubscriberRegistry {
    /// `queue_capacity` is the per-subscriber backlog tolerated before the
    /// client is dropped as lagging (minimum 1).
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            gate: Mutex::new(()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a subscriber whose first frame is produced by `build_init`.
    ///
    /// The init frame is built and queued while no delivery is in progress,
    /// then the subscriber becomes visible to broadcasts.
    pub fn register<E>(
        self: &Arc<Self>,
        build_init: impl FnOnce() -> Result<EventFrame, E>,
    ) -> Result<Subscription, E> {
        let _gate = self.gate();

        let init = build_init()?;
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        if tx.try_send(init).is_err() {
            warn!("Init frame could not be queued for new subscriber");
        }

        let id = SubscriberId::new();
        let alive = Arc::new(AtomicBool::new(true));
        self.subscribers.insert(
            id,
            Subscriber {
                tx,
                alive: Arc::clone(&alive),
                connected_at: Utc::now(),
            },
        );
        debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber registered");

        Ok(Subscription {
            id,
            rx,
            alive,
            registry: Arc::downgrade(self),
        })
    }

    /// Deregister a subscriber. Returns whether it was present.
    pub fn remove(&self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, subscriber)) => {
                subscriber.alive.store(false, Ordering::Release);
                let connected_for = Utc::now() - subscriber.connected_at;
                debug!(
                    subscriber = %id,
                    connected_secs = connected_for.num_seconds(),
                    remaining = self.subscribers.len(),
                    "Subscriber removed"
                );
                true
            }
            None => false,
        }
    }

    /// Queue `frame` for every member without waiting on any of them.
    ///
    /// Members whose queue is full or closed are removed.
    pub fn deliver(&self, frame: &EventFrame) -> Delivery {
        let _gate = self.gate();
        let mut delivery = Delivery::default();

        for entry in self.subscribers.iter() {
            match entry.tx.try_send(frame.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    delivery.dropped.push((*entry.key(), DropReason::Lagging));
                }
                Err(TrySendError::Closed(_)) => {
                    delivery.dropped.push((*entry.key(), DropReason::Disconnected));
                }
            }
        }

        // Shard locks are released once iteration ends.
        for (id, _) in &delivery.dropped {
            self.remove(*id);
        }

        delivery
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }
}

/// Receiving end of one subscriber. Dropping it deregisters the subscriber.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<EventFrame>,
    alive: Arc<AtomicBool>,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// False once the registry has dropped this subscriber.
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Next frame; `None` after removal once the backlog is drained.
    pub async fn recv(&mut self) -> Option<EventFrame> {
        self.rx.recv().await
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<EventFrame> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued.
    pub fn drain(&mut self) -> Vec<EventFrame> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for Subscription {
    type Item = EventFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
