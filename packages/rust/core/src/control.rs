//! Lifecycle commands and manual stage triggers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, instrument, warn};

use pipetrack_client::Transport;
use pipetrack_shared::{
    Ack, ControlAction, MonitoringSnapshot, Result, StageTarget, TrackerError,
};

use crate::stage;
use crate::store::{SessionStore, lock};

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Running/completed flags of a session as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub is_running: bool,
    pub is_completed: bool,
}

impl RunState {
    pub const RUNNING: Self = Self {
        is_running: true,
        is_completed: false,
    };
    pub const IDLE: Self = Self {
        is_running: false,
        is_completed: false,
    };
    pub const COMPLETED: Self = Self {
        is_running: false,
        is_completed: true,
    };

    /// Flags as reported by the monitoring endpoint. The session status is
    /// not consulted: a paused job still lists as `active`.
    pub fn from_monitoring(monitoring: &MonitoringSnapshot) -> Self {
        Self {
            is_running: monitoring.status.is_running && !monitoring.status.is_completed,
            is_completed: monitoring.status.is_completed,
        }
    }

    /// Lifecycle actions that make sense in this state.
    ///
    /// A completed session can only be restarted. A running one can be
    /// paused or stopped. A stopped, paused or failed one can be resumed.
    pub fn allowed_actions(&self) -> Vec<ControlAction> {
        if self.is_completed {
            vec![ControlAction::Restart]
        } else if self.is_running {
            vec![ControlAction::Pause, ControlAction::Stop, ControlAction::Restart]
        } else {
            vec![ControlAction::Resume, ControlAction::Stop, ControlAction::Restart]
        }
    }

    pub fn allows(&self, action: ControlAction) -> bool {
        self.allowed_actions().contains(&action)
    }

    fn rejection_reason(&self) -> &'static str {
        if self.is_completed {
            "session is completed"
        } else if self.is_running {
            "session is running"
        } else {
            "session is not running"
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

/// Set of keys with a command in flight. Entries are removed when the
/// returned guard drops, whatever the outcome.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlightSet {
    keys: Arc<Mutex<HashSet<String>>>,
}

pub(crate) struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlightSet {
    pub fn try_acquire(&self, key: &str) -> Option<InFlightGuard> {
        let inserted = lock(&self.keys).insert(key.to_string());
        inserted.then(|| InFlightGuard {
            keys: Arc::clone(&self.keys),
            key: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.keys).contains(key)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.keys).remove(&self.key);
    }
}

// ---------------------------------------------------------------------------
// ControlDispatcher
// ---------------------------------------------------------------------------

/// Sends lifecycle commands, at most one per session at a time, and
/// refreshes the store after each success.
#[derive(Clone)]
pub struct ControlDispatcher {
    transport: Arc<dyn Transport>,
    store: SessionStore,
    in_flight: InFlightSet,
}

impl ControlDispatcher {
    pub fn new(transport: Arc<dyn Transport>, store: SessionStore) -> Self {
        Self {
            transport,
            store,
            in_flight: InFlightSet::default(),
        }
    }

    /// Whether a command for this session is awaiting its response.
    pub fn is_in_flight(&self, session_id: &str) -> bool {
        self.in_flight.contains(session_id)
    }

    /// Actions currently enabled for a session. Empty while a command is in
    /// flight. Without monitoring flags every action is offered and the
    /// backend decides.
    pub fn allowed_actions(&self, session_id: &str) -> Vec<ControlAction> {
        if self.is_in_flight(session_id) {
            return Vec::new();
        }
        match self.store.run_state_for(session_id) {
            Some(state) => state.allowed_actions(),
            None => ControlAction::ALL.to_vec(),
        }
    }

    /// Send a lifecycle command.
    ///
    /// Fails with [`TrackerError::ActionNotAllowed`] if the backend-reported
    /// run flags rule the action out, or [`TrackerError::ActionInFlight`] if
    /// a command for the session is already pending. With no flags observed
    /// the command is sent as is. The store is not changed optimistically;
    /// on success the session is re-fetched.
    #[instrument(skip(self, action), fields(action = %action))]
    pub async fn dispatch(&self, session_id: &str, action: ControlAction) -> Result<Ack> {
        if let Some(state) = self.store.run_state_for(session_id) {
            if !state.allows(action) {
                return Err(TrackerError::ActionNotAllowed {
                    action: action.to_string(),
                    reason: state.rejection_reason().to_string(),
                });
            }
        }

        let _guard = self.acquire(session_id)?;
        let ack = self.transport.control(session_id, action).await.map_err(|e| {
            warn!(error = %e, "control command failed");
            e
        })?;
        info!(reply = ack.message.as_deref().unwrap_or(""), "control command accepted");

        self.refresh_after(session_id).await;
        Ok(ack)
    }

    /// Manually start stage 2 or 3.
    ///
    /// Only allowed when the preceding stage is completed and the target is
    /// still pending. Shares the per-session in-flight slot with
    /// [`Self::dispatch`].
    #[instrument(skip(self, target), fields(stage = %target))]
    pub async fn start_stage(&self, session_id: &str, target: StageTarget) -> Result<Ack> {
        let session = self
            .store
            .session_for(session_id)
            .ok_or_else(|| TrackerError::StageNotReady {
                stage: target.to_string(),
                reason: "session state not loaded".to_string(),
            })?;
        stage::check_stage_trigger(&session, target)?;

        let _guard = self.acquire(session_id)?;
        let ack = self
            .transport
            .start_stage(session_id, target)
            .await
            .map_err(|e| {
                warn!(error = %e, "stage start failed");
                e
            })?;
        info!("stage start accepted");

        self.refresh_after(session_id).await;
        Ok(ack)
    }

    fn acquire(&self, session_id: &str) -> Result<InFlightGuard> {
        self.in_flight
            .try_acquire(session_id)
            .ok_or_else(|| TrackerError::ActionInFlight {
                session_id: session_id.to_string(),
            })
    }

    async fn refresh_after(&self, session_id: &str) {
        let selected = self.store.selected_id().as_deref() == Some(session_id);
        let result = if selected {
            self.store.refresh_selected().await
        } else {
            self.store.refresh_list().await
        };
        if let Err(e) = result {
            warn!(error = %e, "refresh after command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, Op, monitoring_with_current, settle, wait_for};
    use pipetrack_shared::{Session, SessionStatus, StageId, StageStatus};

    fn setup(fake: &Arc<FakeTransport>) -> (SessionStore, ControlDispatcher) {
        let store = SessionStore::new(fake.clone());
        let control = ControlDispatcher::new(fake.clone(), store.clone());
        (store, control)
    }

    #[test]
    fn allowed_actions_follow_run_state() {
        use ControlAction::*;
        assert_eq!(RunState::COMPLETED.allowed_actions(), vec![Restart]);
        assert_eq!(RunState::RUNNING.allowed_actions(), vec![Pause, Stop, Restart]);
        assert_eq!(RunState::IDLE.allowed_actions(), vec![Resume, Stop, Restart]);
        assert!(!RunState::RUNNING.allows(Resume));
        assert!(!RunState::COMPLETED.allows(Pause));
    }

    #[test]
    fn run_state_comes_from_monitoring_flags() {
        let mut snap = monitoring_with_current("x");
        assert_eq!(RunState::from_monitoring(&snap), RunState::RUNNING);

        snap.status.is_running = false;
        assert_eq!(RunState::from_monitoring(&snap), RunState::IDLE);

        snap.status.is_running = true;
        snap.status.is_completed = true;
        assert_eq!(RunState::from_monitoring(&snap), RunState::COMPLETED);
    }

    #[tokio::test]
    async fn resume_from_error_reflects_backend_after_refresh() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Error));
        let (store, control) = setup(&fake);
        store.refresh_list().await.unwrap();

        assert_eq!(control.allowed_actions("s1"), ControlAction::ALL.to_vec());

        control.dispatch("s1", ControlAction::Resume).await.unwrap();

        assert_eq!(fake.count(Op::Control), 1);
        let listed = store.view().session("s1").cloned().unwrap();
        assert_eq!(listed.status, SessionStatus::Active);
        assert!(!control.is_in_flight("s1"));
    }

    #[tokio::test]
    async fn resume_of_paused_session_known_only_from_list_is_sent() {
        let fake = FakeTransport::new();
        // A paused job still lists as active.
        fake.put_session(Session::new("s1", SessionStatus::Active));
        let (store, control) = setup(&fake);
        store.refresh_list().await.unwrap();

        assert_eq!(store.run_state_for("s1"), None);
        assert!(control.allowed_actions("s1").contains(&ControlAction::Resume));

        control.dispatch("s1", ControlAction::Resume).await.unwrap();
        assert_eq!(fake.count(Op::Control), 1);
    }

    #[tokio::test]
    async fn paused_flags_enable_resume_for_active_session() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Active));
        let mut snap = monitoring_with_current("paused");
        snap.status.is_running = false;
        fake.put_monitoring("s1", snap);
        let (store, control) = setup(&fake);
        store.select_session("s1");
        store.refresh_selected().await.unwrap();

        assert_eq!(
            control.allowed_actions("s1"),
            vec![ControlAction::Resume, ControlAction::Stop, ControlAction::Restart]
        );
        control.dispatch("s1", ControlAction::Resume).await.unwrap();
        assert_eq!(store.view().run_state(), Some(RunState::RUNNING));
    }

    #[tokio::test]
    async fn dispatch_refreshes_selected_session() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Active));
        fake.put_monitoring("s1", monitoring_with_current("running"));
        let (store, control) = setup(&fake);
        store.select_session("s1");
        store.refresh_selected().await.unwrap();

        control.dispatch("s1", ControlAction::Pause).await.unwrap();

        assert_eq!(fake.count(Op::Detail), 2);
        assert_eq!(store.view().run_state(), Some(RunState::IDLE));
        assert_eq!(
            control.allowed_actions("s1"),
            vec![ControlAction::Resume, ControlAction::Stop, ControlAction::Restart]
        );
    }

    #[tokio::test]
    async fn second_command_is_rejected_while_first_is_pending() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Active));
        let gate = fake.gate(Op::Control, "s1");
        let (store, control) = setup(&fake);
        store.refresh_list().await.unwrap();

        let first = tokio::spawn({
            let control = control.clone();
            async move { control.dispatch("s1", ControlAction::Pause).await }
        });
        wait_for(|| fake.count(Op::Control) == 1).await;

        assert!(control.is_in_flight("s1"));
        assert!(control.allowed_actions("s1").is_empty());
        let err = control
            .dispatch("s1", ControlAction::Stop)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::ActionInFlight { .. }));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(!control.is_in_flight("s1"));
        assert_eq!(fake.count(Op::Control), 1);
    }

    #[tokio::test]
    async fn failed_command_releases_the_slot() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Active));
        fake.fail_next(Op::Control, TrackerError::domain("job is locked"));
        let (store, control) = setup(&fake);
        store.refresh_list().await.unwrap();

        let err = control
            .dispatch("s1", ControlAction::Stop)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "job is locked");
        assert!(!control.is_in_flight("s1"));

        control.dispatch("s1", ControlAction::Stop).await.unwrap();
    }

    #[tokio::test]
    async fn disallowed_action_never_reaches_backend() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Completed));
        let mut snap = monitoring_with_current("done");
        snap.status.is_completed = true;
        fake.put_monitoring("s1", snap);
        let (store, control) = setup(&fake);
        store.select_session("s1");
        store.refresh_selected().await.unwrap();

        assert_eq!(control.allowed_actions("s1"), vec![ControlAction::Restart]);
        let err = control
            .dispatch("s1", ControlAction::Pause)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "pause is not allowed: session is completed");
        assert_eq!(fake.count(Op::Control), 0);
    }

    #[tokio::test]
    async fn commands_for_different_sessions_run_concurrently() {
        let fake = FakeTransport::new();
        fake.put_session(Session::new("s1", SessionStatus::Active));
        fake.put_session(Session::new("s2", SessionStatus::Active));
        let gate = fake.gate(Op::Control, "s1");
        let (store, control) = setup(&fake);
        store.refresh_list().await.unwrap();

        let first = tokio::spawn({
            let control = control.clone();
            async move { control.dispatch("s1", ControlAction::Pause).await }
        });
        wait_for(|| fake.count_for(Op::Control, "s1") == 1).await;

        control.dispatch("s2", ControlAction::Pause).await.unwrap();
        gate.notify_one();
        first.await.unwrap().unwrap();
        settle().await;
        assert_eq!(fake.count(Op::Control), 2);
    }

    #[tokio::test]
    async fn start_stage_requires_completed_predecessor() {
        let fake = FakeTransport::new();
        fake.put_session(
            Session::new("s1", SessionStatus::Active)
                .with_stage(StageId::Stage1, StageStatus::Running),
        );
        let (store, control) = setup(&fake);
        store.refresh_list().await.unwrap();

        let err = control
            .start_stage("s1", StageTarget::Stage2)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::StageNotReady { .. }));
        assert_eq!(fake.count(Op::StartStage), 0);

        fake.put_session(
            Session::new("s1", SessionStatus::Active)
                .with_stage(StageId::Stage1, StageStatus::Completed),
        );
        store.refresh_list().await.unwrap();
        control.start_stage("s1", StageTarget::Stage2).await.unwrap();

        assert_eq!(fake.count(Op::StartStage), 1);
        let listed = store.view().session("s1").cloned().unwrap();
        assert_eq!(listed.stage(StageId::Stage2).status, StageStatus::Running);
    }

    #[tokio::test]
    async fn start_stage_on_unknown_session_is_rejected() {
        let fake = FakeTransport::new();
        let (_store, control) = setup(&fake);
        let err = control
            .start_stage("ghost", StageTarget::Stage3)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage3 cannot be started: session state not loaded"
        );
    }
}
