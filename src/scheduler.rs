//! Per-outlet extraction timers.
//!
//! The [`Scheduler`] owns one cancellable timer task per armed outlet, keyed
//! by outlet id. Each tick hands off to [`RunManager::start`] and goes back
//! to sleep without waiting for the run, so ticks never stack:
//!
//! | Outlet state at tick | Outcome |
//! |----------------------|---------|
//! | active, idle | run started |
//! | active, run in flight | tick skipped, "skipped: already running" logged to the run's stream |
//! | paused | tick skipped, timer stays armed |
//! | deactivated | never armed |
//!
//! Missed fires are never replayed. After a restart or a resume the next fire
//! is `now + interval`; when a fire itself is late the following one is
//! scheduled from the current time rather than bunched up.

use crate::error::Error;
use crate::models::{LogEvent, LogLevel, Outlet, OutletId};
use crate::runner::RunManager;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, warn};

#[derive(Debug)]
struct TimerState {
    interval: Duration,
    next_fire: Instant,
    /// Scheduled time of the last fire, the anchor for a re-arm.
    last_fire: Option<Instant>,
    armed_at: Instant,
}

struct Timer {
    state: Arc<Mutex<TimerState>>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Registry of armed extraction timers.
pub struct Scheduler {
    runner: Arc<RunManager>,
    timers: DashMap<OutletId, Timer>,
}

fn extraction_interval(outlet: &Outlet) -> Duration {
    minutes(outlet.frequencies.extraction)
}

fn minutes(m: u32) -> Duration {
    Duration::from_secs(u64::from(m) * 60)
}

impl Scheduler {
    pub fn new(runner: Arc<RunManager>) -> Self {
        Self {
            runner,
            timers: DashMap::new(),
        }
    }

    /// Arm (or re-arm from scratch) the outlet's timer; first fire at
    /// `now + extractionFrequency`.
    ///
    /// Deactivated outlets are disarmed instead. Returns whether a timer is armed.
    #[instrument(level = "info", skip_all, fields(outlet_id = %outlet.id))]
    pub fn arm(&self, outlet: &Outlet) -> bool {
        if outlet.is_deactivated() {
            self.disarm(&outlet.id);
            return false;
        }

        let interval = extraction_interval(outlet);
        let now = Instant::now();
        let state = Arc::new(Mutex::new(TimerState {
            interval,
            next_fire: now + interval,
            last_fire: None,
            armed_at: now,
        }));
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(timer_loop(
            outlet.id.clone(),
            Arc::clone(&state),
            Arc::clone(&wake),
            Arc::clone(&self.runner),
        ));
        // Replacing an existing timer drops it, which aborts its task.
        self.timers.insert(outlet.id.clone(), Timer { state, wake, task });
        info!(interval_minutes = outlet.frequencies.extraction, "Armed extraction timer");
        true
    }

    /// Arm every outlet that can still run. Returns how many were armed.
    pub fn arm_all<'a>(&self, outlets: impl IntoIterator<Item = &'a Outlet>) -> usize {
        outlets.into_iter().filter(|o| self.arm(o)).count()
    }

    /// Switch to a new interval while keeping the timer's phase.
    ///
    /// The next fire becomes the previous scheduled fire (or the arming time
    /// if it never fired) plus the new interval, and fires immediately when
    /// that moment has already passed. A run in flight is untouched.
    #[instrument(level = "info", skip(self))]
    pub fn rearm(&self, outlet_id: &str, extraction_minutes: u32) -> bool {
        let Some(timer) = self.timers.get(outlet_id) else {
            return false;
        };
        let interval = minutes(extraction_minutes);
        {
            let mut state = timer.state.lock();
            let anchor = state.last_fire.unwrap_or(state.armed_at);
            state.interval = interval;
            state.next_fire = (anchor + interval).max(Instant::now());
        }
        timer.wake.notify_one();
        info!("Re-armed extraction timer");
        true
    }

    /// Restart the countdown at `now + interval` without replaying missed fires.
    pub fn restart(&self, outlet: &Outlet) -> bool {
        let Some(timer) = self.timers.get(&outlet.id) else {
            return self.arm(outlet);
        };
        let interval = extraction_interval(outlet);
        {
            let mut state = timer.state.lock();
            let now = Instant::now();
            state.interval = interval;
            state.next_fire = now + interval;
            state.armed_at = now;
            state.last_fire = None;
        }
        timer.wake.notify_one();
        debug!(outlet_id = %outlet.id, "Restarted extraction timer");
        true
    }

    /// Cancel the outlet's timer. Returns whether one was armed.
    pub fn disarm(&self, outlet_id: &str) -> bool {
        let removed = self.timers.remove(outlet_id).is_some();
        if removed {
            info!(%outlet_id, "Disarmed extraction timer");
        }
        removed
    }

    pub fn is_armed(&self, outlet_id: &str) -> bool {
        self.timers.contains_key(outlet_id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// When the outlet's timer fires next.
    pub fn next_fire(&self, outlet_id: &str) -> Option<Instant> {
        self.timers.get(outlet_id).map(|t| t.state.lock().next_fire)
    }

    /// Disarm every timer. Runs already in flight keep going.
    pub fn shutdown(&self) {
        let count = self.timers.len();
        self.timers.clear();
        info!(count, "Scheduler stopped");
    }
}

async fn timer_loop(
    outlet_id: OutletId,
    state: Arc<Mutex<TimerState>>,
    wake: Arc<Notify>,
    runner: Arc<RunManager>,
) {
    loop {
        let due = state.lock().next_fire;
        tokio::select! {
            _ = sleep_until(due) => {}
            _ = wake.notified() => continue,
        }

        {
            let mut state = state.lock();
            if state.next_fire != due {
                continue;
            }
            let now = Instant::now();
            let mut following = due + state.interval;
            if following <= now {
                following = now + state.interval;
            }
            state.last_fire = Some(due);
            state.next_fire = following;
        }
        tick(&runner, &outlet_id).await;
    }
}

#[instrument(level = "info", skip_all, fields(outlet_id = %outlet_id))]
async fn tick(runner: &Arc<RunManager>, outlet_id: &str) {
    match runner.start(outlet_id).await {
        Ok(handle) => info!(run_id = %handle.run_id, "Scheduled run started"),
        Err(Error::AlreadyRunning { run_id, .. }) => {
            info!(%run_id, "Tick skipped: already running");
            runner.broadcaster().publish(LogEvent {
                outlet_id: outlet_id.to_string(),
                run_id,
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: "Scheduled fire skipped: already running".to_string(),
            });
        }
        Err(Error::OutletPaused(_)) => debug!("Tick skipped: outlet paused"),
        Err(e) => warn!(error = %e, "Scheduled fire failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{Broadcaster, RunLogMessage};
    use crate::models::RunStatus;
    use crate::registry::OutletRegistry;
    use crate::runner::RunLimits;
    use crate::store::{MemoryStore, Store};
    use crate::testing::{BASE, RecordingSink, ScriptedFetcher, sample_config};
    use futures::StreamExt;
    use tokio::sync::Semaphore;
    use tokio::time::sleep;

    const MINUTE: Duration = Duration::from_secs(60);

    struct Harness {
        scheduler: Scheduler,
        runner: Arc<RunManager>,
        registry: OutletRegistry,
        store: Arc<MemoryStore>,
    }

    fn harness_with(fetcher: ScriptedFetcher) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(fetcher);
        fetcher.scenario(&format!("{BASE}/latest"), 2, 2);
        let runner = Arc::new(RunManager::new(
            store.clone(),
            fetcher.clone(),
            Arc::new(RecordingSink::default()),
            Broadcaster::new(32),
            // Longer than any test's virtual clock so a gated fetch never times out.
            RunLimits {
                fetch_timeout: Duration::from_secs(24 * 3600),
                ..RunLimits::default()
            },
        ));
        Harness {
            scheduler: Scheduler::new(runner.clone()),
            runner,
            registry: OutletRegistry::new(store.clone(), fetcher, Duration::from_secs(5)),
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedFetcher::new())
    }

    async fn run_count(store: &MemoryStore, outlet_id: &str) -> usize {
        store.history(outlet_id, 100).await.unwrap().len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_configured_interval() {
        let h = harness();
        let outlet = h.registry.create(sample_config("Daily")).await.unwrap();
        assert!(h.scheduler.arm(&outlet));

        sleep(59 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 0);

        sleep(2 * MINUTE).await;
        let runs = h.store.history(&outlet.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);

        sleep(60 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_outlet_skips_ticks_but_stays_armed() {
        let h = harness();
        let outlet = h.registry.create(sample_config("Daily")).await.unwrap();
        h.scheduler.arm(&outlet);
        h.registry.pause(&outlet.id).await.unwrap();

        sleep(61 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 0);
        assert!(h.scheduler.is_armed(&outlet.id));
        let next = h.scheduler.next_fire(&outlet.id).unwrap();
        assert!(next > Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_fires_one_interval_after_resume() {
        let h = harness();
        let outlet = h.registry.create(sample_config("Daily")).await.unwrap();
        h.scheduler.arm(&outlet);
        h.registry.pause(&outlet.id).await.unwrap();

        sleep(150 * MINUTE).await;
        let resumed = h.registry.resume(&outlet.id).await.unwrap();
        let at = Instant::now();
        h.scheduler.restart(&resumed);
        assert_eq!(h.scheduler.next_fire(&outlet.id), Some(at + 60 * MINUTE));

        sleep(59 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 0);
        sleep(2 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_during_run_is_skipped() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness_with(ScriptedFetcher::new().with_gate(gate.clone()));
        let outlet = h.registry.create(sample_config("Daily")).await.unwrap();
        h.scheduler.arm(&outlet);

        let manual = h.runner.start(&outlet.id).await.unwrap();
        let mut log = h.runner.broadcaster().subscribe(&manual.run_id);

        sleep(61 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 1);
        match log.next().await {
            Some(RunLogMessage::Event(e)) if e.message.contains("skipped: already running") => {}
            Some(RunLogMessage::Event(e)) => {
                // The run's own opening line may arrive first.
                assert!(e.message.starts_with("Fetching listing"));
                let Some(RunLogMessage::Event(e)) = log.next().await else {
                    panic!("stream ended early");
                };
                assert!(e.message.contains("skipped: already running"));
            }
            other => panic!("unexpected {other:?}"),
        }

        gate.add_permits(1);
        manual.wait().await.unwrap();
        assert_eq!(run_count(&h.store, &outlet.id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_keeps_phase_of_previous_fire() {
        let h = harness();
        let outlet = h.registry.create(sample_config("Daily")).await.unwrap();
        let armed_at = Instant::now();
        h.scheduler.arm(&outlet);

        sleep(70 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 1);

        assert!(h.scheduler.rearm(&outlet.id, 30));
        let fired_at = armed_at + 60 * MINUTE;
        assert_eq!(h.scheduler.next_fire(&outlet.id), Some(fired_at + 30 * MINUTE));

        sleep(21 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_past_due_fires_now() {
        let h = harness();
        let outlet = h.registry.create(sample_config("Daily")).await.unwrap();
        h.scheduler.arm(&outlet);

        sleep(20 * MINUTE).await;
        h.scheduler.rearm(&outlet.id, 5);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_of_unarmed_outlet_is_noop() {
        let h = harness();
        assert!(!h.scheduler.rearm("missing", 10));
        assert_eq!(h.scheduler.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_stops_fires() {
        let h = harness();
        let outlet = h.registry.create(sample_config("Daily")).await.unwrap();
        h.scheduler.arm(&outlet);
        assert!(h.scheduler.disarm(&outlet.id));
        assert!(!h.scheduler.disarm(&outlet.id));

        sleep(180 * MINUTE).await;
        assert_eq!(run_count(&h.store, &outlet.id).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_all_skips_deactivated_and_isolates_outlets() {
        let h = harness();
        let a = h.registry.create(sample_config("A")).await.unwrap();
        let mut fast = sample_config("B");
        fast.frequencies.extraction = 15;
        let b = h.registry.create(fast).await.unwrap();
        let c = h.registry.create(sample_config("C")).await.unwrap();
        let c = h.registry.deactivate(&c.id).await.unwrap();

        let armed = h.scheduler.arm_all(&[a.clone(), b.clone(), c.clone()]);
        assert_eq!(armed, 2);
        assert!(!h.scheduler.is_armed(&c.id));

        sleep(31 * MINUTE).await;
        assert_eq!(run_count(&h.store, &a.id).await, 0);
        assert_eq!(run_count(&h.store, &b.id).await, 2);

        h.scheduler.rearm(&b.id, 120);
        assert_eq!(
            h.scheduler.next_fire(&a.id).map(|t| t > Instant::now()),
            Some(true)
        );
        h.scheduler.shutdown();
        assert_eq!(h.scheduler.armed_count(), 0);
    }
}
