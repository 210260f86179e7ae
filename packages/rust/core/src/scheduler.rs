//! Fixed-interval polling of the session store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use pipetrack_shared::MIN_POLL_INTERVAL_MS;

use crate::store::{SessionStore, lock};

/// Tick counters, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    skipped: AtomicU64,
}

struct Timer {
    period: Duration,
    handle: JoinHandle<()>,
}

/// Clears the busy flag when a tick's fetches have all settled.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives `refresh_list` and, with a selection, `refresh_selected` on a
/// fixed interval.
///
/// There is one scheduler per tracker and at most one live timer. A tick
/// that finds the previous tick's fetches still outstanding is dropped, not
/// queued.
pub struct PollingScheduler {
    store: SessionStore,
    timer: Mutex<Option<Timer>>,
    busy: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl PollingScheduler {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            timer: Mutex::new(None),
            busy: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start polling every `interval`. Calling it again with the same
    /// interval is a no-op; a different interval replaces the timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) {
        let period = interval.max(Duration::from_millis(MIN_POLL_INTERVAL_MS));
        let mut timer = lock(&self.timer);

        if let Some(current) = timer.as_ref() {
            if current.period == period && !current.handle.is_finished() {
                return;
            }
        }
        if let Some(old) = timer.take() {
            old.handle.abort();
        }

        let handle = tokio::spawn(run(
            self.store.clone(),
            Instant::now() + period,
            period,
            Arc::clone(&self.busy),
            Arc::clone(&self.counters),
        ));
        info!(interval_ms = period.as_millis() as u64, "polling started");
        *timer = Some(Timer { period, handle });
    }

    /// Cancel the timer. Fetches already in flight finish on their own.
    pub fn stop(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.handle.abort();
            info!("polling stopped");
        }
    }

    /// Replace a running timer with a fresh one of the same period, so the
    /// next tick is a full interval away. Does nothing when stopped.
    pub fn restart(&self) {
        let period = self.interval();
        if let Some(period) = period {
            self.stop();
            self.start(period);
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn interval(&self) -> Option<Duration> {
        lock(&self.timer).as_ref().map(|t| t.period)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.handle.abort();
        }
    }
}

async fn run(
    store: SessionStore,
    first: Instant,
    period: Duration,
    busy: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let mut ticker = time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        counters.ticks.fetch_add(1, Ordering::Relaxed);

        if busy.swap(true, Ordering::AcqRel) {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!("previous poll still in flight, skipping tick");
            continue;
        }

        let guard = BusyGuard(Arc::clone(&busy));
        let store = store.clone();
        tokio::spawn(async move {
            let _guard = guard;
            poll_once(&store).await;
        });
    }
}

/// List and selected-session fetches are independent and run concurrently.
/// Failures are already recorded by the store.
async fn poll_once(store: &SessionStore) {
    let selected = store.selection().is_some();
    let (list, detail) = tokio::join!(store.refresh_list(), async {
        if selected {
            store.refresh_selected().await
        } else {
            Ok(())
        }
    });
    if list.is_err() || detail.is_err() {
        debug!("poll finished with errors");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, Op, settle, wait_for};
    use pipetrack_shared::{Session, SessionStatus};

    const PERIOD: Duration = Duration::from_secs(5);

    fn setup() -> (Arc<FakeTransport>, SessionStore, PollingScheduler) {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Active));
        let store = SessionStore::new(fake.clone());
        let scheduler = PollingScheduler::new(store.clone());
        (fake, store, scheduler)
    }

    async fn tick() {
        time::advance(PERIOD).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_fetch_without_auto_refresh() {
        let (fake, _store, scheduler) = setup();

        for _ in 0..5 {
            tick().await;
        }
        assert_eq!(fake.count(Op::List), 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_scheduler_issues_no_more_fetches() {
        let (fake, _store, scheduler) = setup();
        scheduler.start(PERIOD);
        tick().await;
        assert_eq!(fake.count(Op::List), 1);

        scheduler.stop();
        scheduler.stop();
        for _ in 0..3 {
            tick().await;
        }
        assert_eq!(fake.count(Op::List), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_refreshes_list_and_selection() {
        let (fake, store, scheduler) = setup();
        scheduler.start(PERIOD);

        time::advance(PERIOD - Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 0);

        time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 1);
        assert_eq!(fake.count(Op::Detail), 0);

        store.select_session("s1");
        tick().await;
        assert_eq!(fake.count(Op::List), 2);
        assert_eq!(fake.count(Op::Detail), 1);
        assert_eq!(fake.count(Op::Monitoring), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tick_causes_next_tick_to_be_skipped() {
        let (fake, _store, scheduler) = setup();
        let gate = fake.gate(Op::List, "");
        scheduler.start(PERIOD);

        time::advance(PERIOD).await;
        wait_for(|| fake.count(Op::List) == 1).await;

        tick().await;
        tick().await;
        assert_eq!(fake.count(Op::List), 1);
        assert_eq!(scheduler.stats(), SchedulerStats { ticks: 3, skipped: 2 });

        gate.notify_one();
        settle().await;
        tick().await;
        assert_eq!(fake.count(Op::List), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_per_interval() {
        let (fake, _store, scheduler) = setup();
        scheduler.start(PERIOD);
        scheduler.start(PERIOD);
        tick().await;
        assert_eq!(fake.count(Op::List), 1);

        scheduler.start(PERIOD * 2);
        assert_eq!(scheduler.interval(), Some(PERIOD * 2));
        tick().await;
        assert_eq!(fake.count(Op::List), 1);
        tick().await;
        assert_eq!(fake.count(Op::List), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_pushes_next_tick_a_full_interval_out() {
        let (fake, _store, scheduler) = setup();
        scheduler.start(PERIOD);

        time::advance(Duration::from_secs(3)).await;
        scheduler.restart();
        time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 0);

        time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 1);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_intervals_are_clamped() {
        let (_fake, _store, scheduler) = setup();
        scheduler.start(Duration::ZERO);
        assert_eq!(
            scheduler.interval(),
            Some(Duration::from_millis(MIN_POLL_INTERVAL_MS))
        );
    }
}
