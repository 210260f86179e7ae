//! In-memory [`Transport`] used by the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use pipetrack_client::Transport;
use pipetrack_shared::{
    Ack, ControlAction, MonitorStatus, MonitoringSnapshot, Result, Session, SessionStatus,
    StageStatus, StageTarget, TrackerError,
};

use crate::store::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    List,
    Detail,
    Monitoring,
    Control,
    StartStage,
    Retry,
}

/// Backend double with call counters, per-call gates and injected failures.
///
/// Gates are keyed by operation and session id (error id for retries, empty
/// for the list). A gated call is counted first, then parks until the test
/// releases it.
#[derive(Default)]
pub(crate) struct FakeTransport {
    sessions: Mutex<Vec<Session>>,
    monitoring: Mutex<HashMap<String, MonitoringSnapshot>>,
    calls: Mutex<Vec<(Op, String)>>,
    gates: Mutex<HashMap<(Op, String), Arc<Notify>>>,
    failures: Mutex<HashMap<Op, VecDeque<TrackerError>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_session(&self, session: Session) {
        let mut sessions = lock(&self.sessions);
        match sessions.iter_mut().find(|s| s.session_id == session.session_id) {
            Some(existing) => *existing = session,
            None => sessions.push(session),
        }
    }

    pub fn put_monitoring(&self, session_id: &str, snapshot: MonitoringSnapshot) {
        lock(&self.monitoring).insert(session_id.to_string(), snapshot);
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        lock(&self.sessions)
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    /// Park the next `op` call for `key` until the returned handle is notified.
    pub fn gate(&self, op: Op, key: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        lock(&self.gates).insert((op, key.to_string()), notify.clone());
        notify
    }

    pub fn fail_next(&self, op: Op, error: TrackerError) {
        lock(&self.failures).entry(op).or_default().push_back(error);
    }

    pub fn count(&self, op: Op) -> usize {
        lock(&self.calls).iter().filter(|(o, _)| *o == op).count()
    }

    pub fn count_for(&self, op: Op, key: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(o, k)| *o == op && k == key)
            .count()
    }

    async fn enter(&self, op: Op, key: &str) -> Result<()> {
        lock(&self.calls).push((op, key.to_string()));
        let gate = lock(&self.gates).remove(&(op, key.to_string()));
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let failure = lock(&self.failures).get_mut(&op).and_then(VecDeque::pop_front);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn update_session(&self, session_id: &str, f: impl FnOnce(&mut Session)) {
        if let Some(s) = lock(&self.sessions)
            .iter_mut()
            .find(|s| s.session_id == session_id)
        {
            f(s);
        }
    }

    fn update_monitoring(&self, session_id: &str, f: impl FnOnce(&mut MonitoringSnapshot)) {
        let mut monitoring = lock(&self.monitoring);
        f(monitoring.entry(session_id.to_string()).or_default());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.enter(Op::List, "").await?;
        Ok(lock(&self.sessions).clone())
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.enter(Op::Detail, session_id).await?;
        self.session(session_id)
            .ok_or_else(|| TrackerError::domain(format!("session {session_id} not found")))
    }

    async fn monitoring(&self, session_id: &str) -> Result<MonitoringSnapshot> {
        self.enter(Op::Monitoring, session_id).await?;
        Ok(lock(&self.monitoring)
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn control(&self, session_id: &str, action: ControlAction) -> Result<Ack> {
        self.enter(Op::Control, session_id).await?;
        let running = matches!(action, ControlAction::Resume | ControlAction::Restart);
        if running {
            self.update_session(session_id, |s| s.status = SessionStatus::Active);
        }
        self.update_monitoring(session_id, |m| {
            m.status.is_running = running;
            if running {
                m.status.is_completed = false;
            }
        });
        Ok(Ack::default())
    }

    async fn start_stage(&self, session_id: &str, stage: StageTarget) -> Result<Ack> {
        self.enter(Op::StartStage, session_id).await?;
        self.update_session(session_id, |s| {
            s.stage_mut(stage.stage()).status = StageStatus::Running;
        });
        Ok(Ack::default())
    }

    async fn retry_error(&self, _session_id: &str, error_id: &str) -> Result<Ack> {
        self.enter(Op::Retry, error_id).await?;
        Ok(Ack {
            message: Some(format!("retry of {error_id} queued")),
        })
    }
}

pub(crate) fn monitoring_with_current(current: &str) -> MonitoringSnapshot {
    MonitoringSnapshot {
        status: MonitorStatus {
            current: current.to_string(),
            is_running: true,
            is_completed: false,
        },
        ..MonitoringSnapshot::default()
    }
}

/// Let spawned tasks run until they park.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `cond` holds.
pub(crate) async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
