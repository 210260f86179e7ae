//! Wires the store, scheduler, dispatcher and error monitor together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, instrument};

use pipetrack_client::{HttpTransport, Transport};
use pipetrack_shared::{Result, TrackerConfig};

use crate::control::ControlDispatcher;
use crate::error_monitor::ErrorMonitor;
use crate::scheduler::PollingScheduler;
use crate::store::{Selection, SessionStore, StoreView};

/// One tracker per client: a single store, a single scheduler keyed by the
/// auto-refresh flag, and the two command issuers.
pub struct Tracker {
    store: SessionStore,
    scheduler: PollingScheduler,
    control: ControlDispatcher,
    errors: ErrorMonitor,
    poll_interval: Duration,
    auto_refresh: AtomicBool,
}

impl Tracker {
    /// Auto-refresh starts disabled; see [`Self::set_auto_refresh`].
    pub fn new(transport: Arc<dyn Transport>, poll_interval: Duration) -> Self {
        let store = SessionStore::new(Arc::clone(&transport));
        Self {
            scheduler: PollingScheduler::new(store.clone()),
            control: ControlDispatcher::new(Arc::clone(&transport), store.clone()),
            errors: ErrorMonitor::new(transport, store.clone()),
            store,
            poll_interval,
            auto_refresh: AtomicBool::new(false),
        }
    }

    /// Build an HTTP-backed tracker. Polling is not started until
    /// [`Self::set_auto_refresh`] is called from inside a runtime.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport), config.poll_interval))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn control(&self) -> &ControlDispatcher {
        &self.control
    }

    pub fn errors(&self) -> &ErrorMonitor {
        &self.errors
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn view(&self) -> StoreView {
        self.store.view()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh.load(Ordering::Relaxed)
    }

    /// Enable or disable polling. Disabling cancels the timer immediately.
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.auto_refresh.store(enabled, Ordering::Relaxed);
        if enabled {
            self.scheduler.start(self.poll_interval);
        } else {
            self.scheduler.stop();
        }
    }

    /// Select a session. Switching sessions resets the polling timer so the
    /// new session gets a full interval before its first scheduled tick.
    pub fn select_session(&self, session_id: impl Into<String>) -> Selection {
        let before = self.store.selection();
        let selection = self.store.select_session(session_id);
        if before.as_ref() != Some(&selection) && self.auto_refresh() {
            debug!(session_id = %selection.session_id, "selection changed, resetting poll timer");
            self.scheduler.restart();
        }
        selection
    }

    pub fn clear_selection(&self) {
        self.store.clear_selection();
    }

    /// Refresh the list and, when something is selected, the selection.
    /// Returns the first failure.
    #[instrument(skip_all)]
    pub async fn refresh_all(&self) -> Result<()> {
        let selected = self.store.selection().is_some();
        let (list, detail) = tokio::join!(self.store.refresh_list(), async {
            if selected {
                self.store.refresh_selected().await
            } else {
                Ok(())
            }
        });
        list.and(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, Op, settle};
    use pipetrack_shared::{ControlAction, Session, SessionStatus, TrackerError};

    const PERIOD: Duration = Duration::from_secs(5);

    fn tracker(fake: &Arc<FakeTransport>) -> Tracker {
        Tracker::new(fake.clone(), PERIOD)
    }

    #[tokio::test]
    async fn resume_then_refresh_shows_active() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Error));
        let t = tracker(&fake);
        t.select_session("s1");
        t.refresh_all().await.unwrap();
        assert_eq!(t.view().detail.unwrap().status, SessionStatus::Error);

        t.control().dispatch("s1", ControlAction::Resume).await.unwrap();
        t.store().refresh_selected().await.unwrap();

        let view = t.view();
        assert_eq!(view.detail.as_ref().unwrap().status, SessionStatus::Active);
        assert!(view.run_state().unwrap().is_running);
    }

    #[tokio::test]
    async fn refresh_all_reports_first_failure_but_keeps_partial_results() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Active));
        fake.fail_next(Op::Detail, TrackerError::Network("timed out".into()));
        let t = tracker(&fake);
        t.select_session("s1");

        let err = t.refresh_all().await.unwrap_err();
        assert!(err.is_transport());
        let view = t.view();
        assert_eq!(view.sessions.len(), 1);
        assert!(view.detail.is_none());
        assert!(view.detail_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_toggle_controls_the_timer() {
        let fake = FakeTransport::new();
        let t = tracker(&fake);

        tokio::time::advance(PERIOD * 3).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 0);

        t.set_auto_refresh(true);
        assert!(t.scheduler().is_running());
        tokio::time::advance(PERIOD).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 1);

        t.set_auto_refresh(false);
        assert!(!t.scheduler().is_running());
        tokio::time::advance(PERIOD * 3).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_session_resets_the_single_timer() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("a", SessionStatus::Active));
        fake.put_session(Session::new("b", SessionStatus::Active));
        let t = tracker(&fake);
        t.set_auto_refresh(true);
        t.select_session("a");

        tokio::time::advance(Duration::from_secs(4)).await;
        t.select_session("b");
        tokio::time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(fake.count(Op::List), 1);
        assert_eq!(fake.count_for(Op::Detail, "b"), 1);
        assert_eq!(fake.count_for(Op::Detail, "a"), 0);
    }
}
