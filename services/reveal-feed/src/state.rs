use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::Broadcaster;
use crate::clock::{Clock, ClockAligner};
use crate::history::HistoryStore;
use crate::registry::SubscriberRegistry;

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<HistoryStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub clock: Arc<dyn Clock>,
    pub aligner: ClockAligner,
    /// Results included in each subscriber's init event.
    pub init_history_len: usize,
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(
        history: Arc<HistoryStore>,
        broadcaster: Arc<Broadcaster>,
        clock: Arc<dyn Clock>,
        aligner: ClockAligner,
    ) -> Self {
        Self {
            history,
            registry: Arc::clone(broadcaster.registry()),
            broadcaster,
            clock,
            aligner,
            init_history_len: 20,
            keep_alive: Duration::from_secs(15),
        }
    }

    pub fn with_init_history_len(mut self, len: usize) -> Self {
        self.init_history_len = len;
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }
}
