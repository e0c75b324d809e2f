//! Reveal Scheduler
//!
//! A self-rearming timer loop that produces exactly one result per minute
//! boundary. The loop alternates between two states:
//!
//! - `Waiting { target }`: timer armed for the reveal instant of `target`.
//! - `Revealing { target }`: generate, persist, preview, wait for the
//!   boundary, reveal.
//!
//! Revealing always hands back to Waiting, whether the cycle succeeded,
//! failed or panicked, so the cadence never stops.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::events::{PreviewPayload, StreamEvent};
use types::ids::MinuteStart;
use types::result::MinuteResult;

use crate::broadcast::{BroadcastError, Broadcaster};
use crate::clock::{Clock, ClockAligner};
use crate::generator::{GeneratorError, NumberGenerator};
use crate::history::{AppendOutcome, HistoryError, HistoryStore};

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Emit `preview` events at the lead instant.
    pub preview_enabled: bool,
    /// Delay used when a reveal instant has already passed at arming time.
    pub catch_up_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            preview_enabled: true,
            catch_up_delay: Duration::from_secs(1),
        }
    }
}

/// Generation state owned by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleState {
    pub last_generated: Option<MinuteStart>,
}

/// What the generation step did for a target minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    Fresh(MinuteResult),
    AlreadyGenerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting { target: MinuteStart },
    Revealing { target: MinuteStart },
}

pub struct RevealScheduler {
    aligner: ClockAligner,
    clock: Arc<dyn Clock>,
    generator: Arc<dyn NumberGenerator>,
    history: Arc<HistoryStore>,
    broadcaster: Arc<Broadcaster>,
    config: SchedulerConfig,
    state: ScheduleState,
}

impl RevealScheduler {
    /// `state.last_generated` is recovered from the newest history entry.
    pub fn new(
        aligner: ClockAligner,
        clock: Arc<dyn Clock>,
        generator: Arc<dyn NumberGenerator>,
        history: Arc<HistoryStore>,
        broadcaster: Arc<Broadcaster>,
        config: SchedulerConfig,
    ) -> Self {
        let state = ScheduleState {
            last_generated: history.latest().map(|r| r.minute_start),
        };
        Self {
            aligner,
            clock,
            generator,
            history,
            broadcaster,
            config,
            state,
        }
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Minute the loop starts with.
    pub fn first_target(&self) -> MinuteStart {
        self.aligner
            .pending_target(self.clock.now(), self.state.last_generated)
    }

    /// Produce and record the result for `target`, at most once.
    pub fn generate(&mut self, target: MinuteStart) -> Result<Generation, ScheduleError> {
        if self.state.last_generated.is_some_and(|last| last >= target) {
            debug!(minute = %target, "Already generated, skipping");
            return Ok(Generation::AlreadyGenerated);
        }

        let number = self.generator.next_digit()?;
        let result = MinuteResult::new(target, number, self.clock.now());

        match self.history.append(result.clone()) {
            Ok(AppendOutcome::Persisted) => {}
            Ok(AppendOutcome::MemoryOnly) => {
                if self.history.path().is_some() {
                    warn!(minute = %target, "Result kept in memory only");
                }
            }
            Err(HistoryError::DuplicateMinute(_)) => {
                self.state.last_generated = Some(target);
                return Ok(Generation::AlreadyGenerated);
            }
            Err(e) => return Err(e.into()),
        }

        self.state.last_generated = Some(target);
        info!(minute = %target, number = %result.number, "Generated");
        Ok(Generation::Fresh(result))
    }

    fn broadcast(&self, event: StreamEvent) -> Result<(), ScheduleError> {
        self.broadcaster.broadcast(&event)?;
        Ok(())
    }

    /// One Revealing phase for `target`. Errors are logged, never returned.
    pub async fn run_cycle(&mut self, target: MinuteStart) {
        let result = match self.generate(target) {
            Ok(Generation::Fresh(result)) => {
                if self.config.preview_enabled {
                    let preview = StreamEvent::Preview(PreviewPayload {
                        preview_at: self.clock.now(),
                        number: result.number,
                    });
                    if let Err(e) = self.broadcast(preview) {
                        error!(minute = %target, error = %e, "Preview broadcast failed");
                    }
                }
                Some(result)
            }
            Ok(Generation::AlreadyGenerated) => self.history.get(target),
            Err(e) => {
                error!(minute = %target, error = %e, "Generation failed");
                None
            }
        };

        let until_boundary = self
            .aligner
            .delay_until(self.clock.now(), target.as_datetime());
        tokio::time::sleep(until_boundary).await;

        match result {
            Some(result) => {
                if let Err(e) = self.broadcast(StreamEvent::Reveal(result)) {
                    error!(minute = %target, error = %e, "Reveal broadcast failed");
                }
            }
            None => warn!(minute = %target, "Nothing to reveal"),
        }
    }

    /// Delay before the Revealing phase for `target`.
    fn arm_delay(&self, target: MinuteStart) -> Duration {
        let delay = self
            .aligner
            .delay_until(self.clock.now(), self.aligner.reveal_instant(target));
        if delay.is_zero() {
            self.config.catch_up_delay
        } else {
            delay
        }
    }

    /// Run forever.
    pub async fn run(mut self) {
        let first = self.first_target();
        info!(
            first_target = %first,
            lead_secs = self.aligner.lead_secs(),
            last_generated = ?self.state.last_generated.map(|m| m.to_string()),
            "Reveal scheduler started"
        );

        let mut phase = Phase::Waiting { target: first };
        loop {
            phase = match phase {
                Phase::Waiting { target } => {
                    let delay = self.arm_delay(target);
                    debug!(minute = %target, delay_ms = delay.as_millis() as u64, "Timer armed");
                    tokio::time::sleep(delay).await;
                    Phase::Revealing { target }
                }
                Phase::Revealing { target } => {
                    let cycle = AssertUnwindSafe(self.run_cycle(target)).catch_unwind().await;
                    if cycle.is_err() {
                        error!(minute = %target, "Reveal cycle panicked");
                    }

                    let next = self.aligner.next_target(target, self.clock.now());
                    let skipped = next.minutes_since(target) - 1;
                    if skipped > 0 {
                        warn!(from = %target, to = %next, skipped, "Scheduler fell behind, skipping minutes");
                    }
                    Phase::Waiting { target: next }
                }
            };
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::AnchoredClock;
    use crate::generator::SeededGenerator;
    use crate::registry::SubscriberRegistry;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use types::result::Digit;

    struct Harness {
        scheduler: RevealScheduler,
        history: Arc<HistoryStore>,
        registry: Arc<SubscriberRegistry>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 10).unwrap()
    }

    fn harness_with(generator: Arc<dyn NumberGenerator>, history: Arc<HistoryStore>) -> Harness {
        let registry = Arc::new(SubscriberRegistry::new(64));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let scheduler = RevealScheduler::new(
            ClockAligner::new(35),
            Arc::new(AnchoredClock::starting_at(start())),
            generator,
            Arc::clone(&history),
            broadcaster,
            SchedulerConfig::default(),
        );
        Harness {
            scheduler,
            history,
            registry,
        }
    }

    fn harness() -> Harness {
        harness_with(
            Arc::new(SeededGenerator::new(1)),
            Arc::new(HistoryStore::in_memory(100)),
        )
    }

    struct FailingGenerator {
        calls: AtomicUsize,
    }

    impl NumberGenerator for FailingGenerator {
        fn next_digit(&self) -> Result<Digit, GeneratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GeneratorError::Digit(types::errors::TypeError::DigitOutOfRange { value: 99 }))
        }
    }

    struct PanickingGenerator;

    impl NumberGenerator for PanickingGenerator {
        fn next_digit(&self) -> Result<Digit, GeneratorError> {
            panic!("entropy exploded");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_is_idempotent() {
        let mut h = harness();
        let target = h.scheduler.first_target();

        let first = h.scheduler.generate(target).unwrap();
        assert!(matches!(first, Generation::Fresh(_)));
        let second = h.scheduler.generate(target).unwrap();
        assert_eq!(second, Generation::AlreadyGenerated);

        assert_eq!(h.history.len(), 1);
        assert_eq!(h.scheduler.state().last_generated, Some(target));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_recovered_from_history() {
        let history = Arc::new(HistoryStore::in_memory(100));
        let minute = MinuteStart::containing(start()).next();
        history
            .append(MinuteResult::new(minute, Digit::new(4).unwrap(), start()))
            .unwrap();

        let mut h = harness_with(Arc::new(SeededGenerator::new(1)), history);
        assert_eq!(h.scheduler.state().last_generated, Some(minute));
        assert_eq!(h.scheduler.first_target(), minute);
        assert_eq!(h.scheduler.generate(minute).unwrap(), Generation::AlreadyGenerated);
        assert_eq!(h.history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reveals_stored_result() {
        let history = Arc::new(HistoryStore::in_memory(100));
        let minute = MinuteStart::containing(start()).next();
        let stored = MinuteResult::new(minute, Digit::new(6).unwrap(), start());
        history.append(stored.clone()).unwrap();

        let mut h = harness_with(Arc::new(SeededGenerator::new(1)), history);
        let mut sub = h
            .registry
            .register(|| Ok::<_, std::convert::Infallible>(crate::registry::EventFrame::new(None, "init", "{}")))
            .unwrap();

        h.scheduler.run_cycle(minute).await;

        let frames = sub.drain();
        let names: Vec<&str> = frames.iter().map(|f| f.event).collect();
        assert_eq!(names, vec!["init", "reveal"]);
        let revealed: MinuteResult = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(revealed, stored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_previews_then_reveals_at_boundary() {
        let mut h = harness();
        let mut sub = h
            .registry
            .register(|| Ok::<_, std::convert::Infallible>(crate::registry::EventFrame::new(None, "init", "{}")))
            .unwrap();
        let target = h.scheduler.first_target();

        tokio::time::sleep(Duration::from_secs(15)).await;
        let began = tokio::time::Instant::now();
        h.scheduler.run_cycle(target).await;

        // Lead is 35s; the reveal waits for the boundary.
        assert_eq!(began.elapsed(), Duration::from_secs(35));
        let names: Vec<&str> = sub.drain().iter().map(|f| f.event).collect();
        assert_eq!(names, vec!["init", "preview", "reveal"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_can_be_disabled() {
        let mut h = harness();
        h.scheduler.config.preview_enabled = false;
        let mut sub = h
            .registry
            .register(|| Ok::<_, std::convert::Infallible>(crate::registry::EventFrame::new(None, "init", "{}")))
            .unwrap();

        let target = h.scheduler.first_target();
        h.scheduler.run_cycle(target).await;

        let names: Vec<&str> = sub.drain().iter().map(|f| f.event).collect();
        assert_eq!(names, vec!["init", "reveal"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_does_not_stop_loop() {
        let generator = Arc::new(FailingGenerator {
            calls: AtomicUsize::new(0),
        });
        let h = harness_with(generator.clone(), Arc::new(HistoryStore::in_memory(100)));
        let handle = h.scheduler.spawn();

        tokio::time::sleep(Duration::from_secs(3 * 60)).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        assert!(h.history.is_empty());
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_cycle_is_contained() {
        let h = harness_with(Arc::new(PanickingGenerator), Arc::new(HistoryStore::in_memory(100)));
        let handle = h.scheduler.spawn();

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_fires_after_fixed_delay() {
        let mut h = harness();
        // 12:00:50: the 12:01 reveal instant (12:00:25) has passed.
        tokio::time::sleep(Duration::from_secs(40)).await;
        let target = h.scheduler.first_target();
        assert_eq!(target, MinuteStart::containing(start()).next());
        assert_eq!(h.scheduler.arm_delay(target), Duration::from_secs(1));

        h.scheduler.config.catch_up_delay = Duration::from_millis(250);
        assert_eq!(h.scheduler.arm_delay(target), Duration::from_millis(250));
    }
}
