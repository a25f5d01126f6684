// # Sweep Scheduler
//
// Owns the recurring timer that drives the offline watchdog.
//
// ## Guarantees
//
// - At most one sweep in flight. A tick that finds the previous sweep still
//   running is skipped, not queued.
// - `stop()` cancels the timer and waits for an in-flight sweep to finish
//   before returning.
// - A failed sweep is logged; the next tick simply tries again.
//
// The first sweep runs one full interval after `start()`.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventSink, FleetEvent};
use crate::watchdog::OfflineWatchdog;

#[derive(Debug, Default)]
struct Counters {
    sweeps_started: AtomicU64,
    sweeps_failed: AtomicU64,
    ticks_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub sweeps_started: u64,
    pub sweeps_failed: u64,
    pub ticks_skipped: u64,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SweepScheduler {
    watchdog: Arc<OfflineWatchdog>,
    interval: Duration,
    events: EventSink,
    counters: Arc<Counters>,
    running: Mutex<Option<Running>>,
}

impl SweepScheduler {
    pub fn new(watchdog: Arc<OfflineWatchdog>, interval: Duration, events: EventSink) -> Self {
        Self {
            watchdog,
            interval,
            events,
            counters: Arc::new(Counters::default()),
            running: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            sweeps_started: self.counters.sweeps_started.load(Ordering::Relaxed),
            sweeps_failed: self.counters.sweeps_failed.load(Ordering::Relaxed),
            ticks_skipped: self.counters.ticks_skipped.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Start the timer; a second call while running is a no-op
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let Ok(mut guard) = self.running.lock() else {
            error!("Scheduler state lock poisoned; not starting");
            return;
        };
        if guard.is_some() {
            debug!("Scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(timer_loop(
            self.watchdog.clone(),
            self.interval,
            self.events.clone(),
            self.counters.clone(),
            cancel.clone(),
        ));
        *guard = Some(Running { cancel, handle });
        info!("Offline sweep scheduled every {:?}", self.interval);
    }

    /// Stop the timer and wait for any in-flight sweep
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(Running { cancel, handle }) = running else {
            return;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
        info!("Offline sweep scheduler stopped");
    }
}

async fn timer_loop(
    watchdog: Arc<OfflineWatchdog>,
    period: Duration,
    events: EventSink,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                    counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                    warn!("Previous offline sweep still running; skipping this tick");
                    events.emit(FleetEvent::SweepSkipped);
                    continue;
                }

                counters.sweeps_started.fetch_add(1, Ordering::Relaxed);
                in_flight = Some(tokio::spawn(run_sweep(
                    watchdog.clone(),
                    events.clone(),
                    counters.clone(),
                )));
            }
        }
    }

    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            debug!("Waiting for in-flight sweep to finish");
        }
        if let Err(e) = handle.await {
            error!("Offline sweep task ended abnormally: {}", e);
        }
    }
}

async fn run_sweep(watchdog: Arc<OfflineWatchdog>, events: EventSink, counters: Arc<Counters>) {
    match watchdog.sweep().await {
        Ok(report) => {
            if report.marked_offline > 0 {
                events.emit(FleetEvent::DevicesOffline {
                    device_ids: report.demoted.clone(),
                });
            }
            events.emit(FleetEvent::SweepCompleted {
                checked: report.checked,
                marked_offline: report.marked_offline,
            });
        }
        Err(e) => {
            counters.sweeps_failed.fetch_add(1, Ordering::Relaxed);
            error!("Offline sweep failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityRecorder;
    use crate::state::MemoryStore;

    fn scheduler(period: Duration) -> SweepScheduler {
        let store = Arc::new(MemoryStore::new());
        let watchdog = OfflineWatchdog::new(
            store.clone(),
            ActivityRecorder::new(store),
            chrono::Duration::seconds(60),
        );
        SweepScheduler::new(Arc::new(watchdog), period, EventSink::disabled())
    }

    #[tokio::test(start_paused = true)]
    async fn first_sweep_waits_one_interval() {
        let scheduler = scheduler(Duration::from_secs(60));
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(scheduler.stats().sweeps_started, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.stats().sweeps_started, 1);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_keeps_one_timer() {
        let scheduler = scheduler(Duration::from_secs(10));
        scheduler.start();
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(scheduler.stats().sweeps_started, 2);

        scheduler.stop().await;
        scheduler.stop().await;
    }
}
