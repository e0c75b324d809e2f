//! Broadcaster
//!
//! Fans a named event out to every registered subscriber. The payload is
//! serialized once per broadcast and shared; each broadcast gets the next
//! sequence number, which clients see as the SSE `id`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use types::events::StreamEvent;

use crate::registry::{DropReason, EventFrame, SubscriberRegistry};

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Failed to serialize {event} payload: {source}")]
    Serialization {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of one broadcast call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub event_id: u64,
    pub delivered: usize,
    pub dropped: usize,
}

/// Running totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub events_sent: u64,
    pub subscribers_dropped: u64,
}

pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
    next_id: AtomicU64,
    events_sent: AtomicU64,
    subscribers_dropped: AtomicU64,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            next_id: AtomicU64::new(1),
            events_sent: AtomicU64::new(0),
            subscribers_dropped: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Serialize `event` once and queue it for every current subscriber.
    ///
    /// Unreachable subscribers are dropped; that is not an error.
    pub fn broadcast(&self, event: &StreamEvent) -> Result<BroadcastReport, BroadcastError> {
        let name = event.name();
        let data = event
            .to_json()
            .map_err(|source| BroadcastError::Serialization { event: name, source })?;

        let event_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = EventFrame::new(Some(event_id), name, data);
        let delivery = self.registry.deliver(&frame);

        for (subscriber, reason) in &delivery.dropped {
            match reason {
                DropReason::Lagging => warn!(
                    %subscriber,
                    event = name,
                    "Dropping lagging subscriber"
                ),
                DropReason::Disconnected => debug!(
                    %subscriber,
                    event = name,
                    "Dropping disconnected subscriber"
                ),
            }
        }

        self.events_sent.fetch_add(1, Ordering::Relaxed);
        self.subscribers_dropped
            .fetch_add(delivery.dropped.len() as u64, Ordering::Relaxed);

        let report = BroadcastReport {
            event_id,
            delivered: delivery.delivered,
            dropped: delivery.dropped.len(),
        };
        info!(
            event = name,
            event_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast"
        );
        Ok(report)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
        }
    }
}
