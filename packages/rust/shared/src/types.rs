//! Core domain types for the acquisition pipeline tracker.
//!
//! These are the typed values the rest of the workspace works with. They are
//! produced from backend payloads by [`crate::wire`], never deserialized
//! directly, so every field here already carries its default.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::TrackerError;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Backend-reported status of a whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
    /// The backend sent a status this client does not know.
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-reported status of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// `running` or `completed`: the stage has started doing work.
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Running | Self::Completed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stage identity
// ---------------------------------------------------------------------------

/// One of the three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    /// Segmentation: produces the list of companies.
    Stage1,
    /// Company-ID resolution.
    Stage2,
    /// Financial-record collection.
    Stage3,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Stage1, StageId::Stage2, StageId::Stage3];

    /// Zero-based position in the pipeline.
    pub fn index(&self) -> usize {
        match self {
            Self::Stage1 => 0,
            Self::Stage2 => 1,
            Self::Stage3 => 2,
        }
    }

    /// Wire key (`stage1`, `stage2`, `stage3`).
    pub fn key(&self) -> &'static str {
        match self {
            Self::Stage1 => "stage1",
            Self::Stage2 => "stage2",
            Self::Stage3 => "stage3",
        }
    }

    /// Human-readable stage name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stage1 => "Segmentation",
            Self::Stage2 => "Company IDs",
            Self::Stage3 => "Financials",
        }
    }

    /// The stage that must complete before this one may run.
    pub fn predecessor(&self) -> Option<StageId> {
        match self {
            Self::Stage1 => None,
            Self::Stage2 => Some(Self::Stage1),
            Self::Stage3 => Some(Self::Stage2),
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A stage that can be started manually once its predecessor completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageTarget {
    Stage2,
    Stage3,
}

impl StageTarget {
    pub fn stage(&self) -> StageId {
        match self {
            Self::Stage2 => StageId::Stage2,
            Self::Stage3 => StageId::Stage3,
        }
    }

    /// Value of the `stage` field in a stage-control request.
    pub fn wire_value(&self) -> &'static str {
        match self {
            Self::Stage2 => "2",
            Self::Stage3 => "3",
        }
    }
}

impl fmt::Display for StageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage().key())
    }
}

impl FromStr for StageTarget {
    type Err = TrackerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2" | "stage2" => Ok(Self::Stage2),
            "3" | "stage3" => Ok(Self::Stage3),
            other => Err(TrackerError::validation(format!(
                "stage must be 2 or 3, got '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One stage of a session as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub id: StageId,
    pub status: StageStatus,
    /// Companies, company IDs, or financial records, depending on the stage.
    pub completed_count: u64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Stage {
    /// A pending stage with nothing done.
    pub fn pending(id: StageId) -> Self {
        Self {
            id,
            status: StageStatus::Pending,
            completed_count: 0,
            completed_at: None,
        }
    }
}

/// Item totals collected so far by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub companies: u64,
    pub company_ids: u64,
    pub financials: u64,
}

/// One run of the three-stage acquisition pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub totals: Totals,
    /// Always ordered stage1, stage2, stage3.
    pub stages: [Stage; 3],
    /// Opaque search criteria, passed through untouched.
    pub filters: Option<serde_json::Value>,
}

impl Session {
    /// A session with every stage pending. Mostly useful in tests.
    pub fn new(session_id: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            session_id: session_id.into(),
            status,
            created_at: None,
            updated_at: None,
            totals: Totals::default(),
            stages: StageId::ALL.map(Stage::pending),
            filters: None,
        }
    }

    pub fn stage(&self, id: StageId) -> &Stage {
        &self.stages[id.index()]
    }

    pub fn stage_mut(&mut self, id: StageId) -> &mut Stage {
        &mut self.stages[id.index()]
    }

    /// Builder-style helper to set a stage status.
    pub fn with_stage(mut self, id: StageId, status: StageStatus) -> Self {
        self.stage_mut(id).status = status;
        self
    }
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

/// Live run flags from the monitoring endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorStatus {
    /// Freeform description of what the job is doing.
    pub current: String,
    pub is_running: bool,
    pub is_completed: bool,
}

/// Per-stage throughput figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageMonitor {
    pub completed: u64,
    /// `None` when the backend does not know the stage total yet.
    pub total: Option<u64>,
    pub percentage: Option<f64>,
    pub rate_per_minute: Option<f64>,
    pub eta_minutes: Option<f64>,
}

/// Aggregate throughput across the whole session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rates {
    pub items_per_minute: Option<f64>,
    pub items_per_hour: Option<f64>,
}

/// A failed unit of work reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub id: String,
    /// Stage key as sent by the backend (`stage1`, ...).
    pub stage: String,
    /// Category string, e.g. `timeout` or `rate_limit`.
    pub error_type: String,
    pub message: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub retryable: bool,
}

/// Error section of a monitoring snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorsSummary {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_stage: BTreeMap<String, u64>,
    pub recent: Vec<ErrorRecord>,
}

/// Point-in-time read of throughput, ETA and errors for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitoringSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub status: MonitorStatus,
    /// Always ordered stage1, stage2, stage3.
    pub stages: [StageMonitor; 3],
    pub rates: Rates,
    pub eta_minutes: Option<f64>,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub errors: ErrorsSummary,
}

impl MonitoringSnapshot {
    pub fn stage(&self, id: StageId) -> &StageMonitor {
        &self.stages[id.index()]
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Job-level control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
    Restart,
}

impl ControlAction {
    pub const ALL: [ControlAction; 4] = [
        ControlAction::Pause,
        ControlAction::Resume,
        ControlAction::Stop,
        ControlAction::Restart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = TrackerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(TrackerError::validation(format!(
                "unknown action '{other}' (expected pause, resume, stop or restart)"
            ))),
        }
    }
}

/// Successful acknowledgement of a command. Carries no state: callers
/// re-fetch after every success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ordering_helpers() {
        assert_eq!(StageId::Stage1.predecessor(), None);
        assert_eq!(StageId::Stage3.predecessor(), Some(StageId::Stage2));
        assert_eq!(StageTarget::Stage3.stage(), StageId::Stage3);
        assert_eq!(StageTarget::Stage2.wire_value(), "2");
    }

    #[test]
    fn parse_control_action() {
        assert_eq!("Pause".parse::<ControlAction>().unwrap(), ControlAction::Pause);
        assert!("launch".parse::<ControlAction>().is_err());
    }

    #[test]
    fn parse_stage_target() {
        assert_eq!("2".parse::<StageTarget>().unwrap(), StageTarget::Stage2);
        assert_eq!("stage3".parse::<StageTarget>().unwrap(), StageTarget::Stage3);
        assert!("1".parse::<StageTarget>().is_err());
    }

    #[test]
    fn new_session_has_pending_stages() {
        let session = Session::new("s-1", SessionStatus::Active)
            .with_stage(StageId::Stage1, StageStatus::Completed);
        assert_eq!(session.stage(StageId::Stage1).status, StageStatus::Completed);
        assert_eq!(session.stage(StageId::Stage2).status, StageStatus::Pending);
        assert_eq!(session.stages[2].id, StageId::Stage3);
    }
}
