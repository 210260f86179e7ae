//! Backend JSON schema and the validating parse step.
//!
//! Every payload from the job-control backend passes through this module
//! exactly once. Absent or malformed fields become typed defaults here so the
//! rest of the workspace never deals with partial data:
//! - negative or missing counts become `0`
//! - unknown stage statuses become `pending`, unknown session statuses `unknown`
//! - unparsable timestamps become `None`
//! - `retryable` defaults to `true`
//! - a missing stage `total` stays `None` (unknown, not zero)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, TrackerError};
use crate::types::{
    Ack, ErrorRecord, ErrorsSummary, MonitorStatus, MonitoringSnapshot, Rates, Session,
    SessionStatus, Stage, StageId, StageMonitor, StageStatus, Totals,
};

/// Fallback message when the backend rejects a request without saying why.
const UNSPECIFIED_FAILURE: &str = "request was rejected by the server";

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SessionsEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    sessions: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    session: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AckEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn decode<'a, T: Deserialize<'a>>(body: &'a str, what: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| TrackerError::parse(format!("invalid {what} payload: {e}")))
}

fn rejected(error: Option<String>) -> TrackerError {
    TrackerError::domain(
        error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string()),
    )
}

// ---------------------------------------------------------------------------
// Session schema
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireSession {
    #[serde(deserialize_with = "lenient_string")]
    session_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    status: Option<String>,
    #[serde(deserialize_with = "lenient_time")]
    created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_time")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    totals: WireTotals,
    #[serde(deserialize_with = "lenient")]
    stages: WireStages,
    filters: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireTotals {
    #[serde(deserialize_with = "lenient_count")]
    companies: u64,
    #[serde(deserialize_with = "lenient_count")]
    company_ids: u64,
    #[serde(deserialize_with = "lenient_count")]
    financials: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireStages {
    #[serde(deserialize_with = "lenient_object")]
    stage1: Option<WireStage>,
    #[serde(deserialize_with = "lenient_object")]
    stage2: Option<WireStage>,
    #[serde(deserialize_with = "lenient_object")]
    stage3: Option<WireStage>,
}

impl WireStages {
    fn take(&mut self, id: StageId) -> Option<WireStage> {
        match id {
            StageId::Stage1 => self.stage1.take(),
            StageId::Stage2 => self.stage2.take(),
            StageId::Stage3 => self.stage3.take(),
        }
    }
}

/// A stage reports its count under a stage-specific key (`companies`,
/// `companyIds`, `financials`) or the generic `completedCount`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireStage {
    #[serde(deserialize_with = "lenient_string")]
    status: Option<String>,
    #[serde(deserialize_with = "present_count")]
    companies: Option<u64>,
    #[serde(deserialize_with = "present_count")]
    company_ids: Option<u64>,
    #[serde(deserialize_with = "present_count")]
    financials: Option<u64>,
    #[serde(deserialize_with = "lenient_count")]
    completed_count: u64,
    #[serde(deserialize_with = "lenient_time")]
    completed_at: Option<DateTime<Utc>>,
}

impl WireStage {
    fn into_stage(self, id: StageId, session_id: &str) -> Stage {
        let status = match self.status {
            Some(s) => stage_status(&s).unwrap_or_else(|| {
                warn!(session_id, stage = %id, status = %s, "unknown stage status, treating as pending");
                StageStatus::Pending
            }),
            None => StageStatus::Pending,
        };
        let specific = match id {
            StageId::Stage1 => self.companies,
            StageId::Stage2 => self.company_ids,
            StageId::Stage3 => self.financials,
        };

        Stage {
            id,
            status,
            completed_count: specific.unwrap_or(self.completed_count),
            completed_at: self.completed_at,
        }
    }
}

impl WireSession {
    fn into_session(self) -> Result<Session> {
        let session_id = self
            .session_id
            .or(self.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TrackerError::parse("session has no `sessionId`"))?;

        let status = match self.status {
            Some(s) => session_status(&s),
            None => SessionStatus::Unknown,
        };

        let mut raw_stages = self.stages;
        let stages = StageId::ALL.map(|id| match raw_stages.take(id) {
            Some(stage) => stage.into_stage(id, &session_id),
            None => Stage::pending(id),
        });

        Ok(Session {
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            totals: Totals {
                companies: self.totals.companies,
                company_ids: self.totals.company_ids,
                financials: self.totals.financials,
            },
            stages,
            filters: self.filters,
            session_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Monitoring schema
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireMonitoring {
    #[serde(deserialize_with = "lenient_time")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    status: WireMonitorStatus,
    #[serde(deserialize_with = "lenient")]
    stages: WireStageMonitors,
    #[serde(deserialize_with = "lenient")]
    rates: WireRates,
    #[serde(deserialize_with = "lenient_number")]
    eta_minutes: Option<f64>,
    #[serde(deserialize_with = "lenient_time")]
    estimated_completion_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    errors: WireErrors,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireMonitorStatus {
    #[serde(deserialize_with = "lenient_string")]
    current: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    is_running: bool,
    #[serde(deserialize_with = "lenient_bool")]
    is_completed: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireStageMonitors {
    #[serde(deserialize_with = "lenient")]
    stage1: WireStageMonitor,
    #[serde(deserialize_with = "lenient")]
    stage2: WireStageMonitor,
    #[serde(deserialize_with = "lenient")]
    stage3: WireStageMonitor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireStageMonitor {
    #[serde(deserialize_with = "lenient_count")]
    completed: u64,
    #[serde(deserialize_with = "lenient_opt_count")]
    total: Option<u64>,
    #[serde(deserialize_with = "lenient_number")]
    percentage: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    rate_per_minute: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    eta_minutes: Option<f64>,
}

impl From<WireStageMonitor> for StageMonitor {
    fn from(w: WireStageMonitor) -> Self {
        Self {
            completed: w.completed,
            total: w.total,
            percentage: w.percentage,
            rate_per_minute: w.rate_per_minute,
            eta_minutes: w.eta_minutes,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireRates {
    #[serde(deserialize_with = "lenient_number")]
    items_per_minute: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    items_per_hour: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireErrors {
    #[serde(deserialize_with = "lenient_opt_count")]
    total: Option<u64>,
    #[serde(deserialize_with = "lenient_count_map")]
    by_type: BTreeMap<String, u64>,
    #[serde(deserialize_with = "lenient_count_map")]
    by_stage: BTreeMap<String, u64>,
    #[serde(deserialize_with = "lenient_records")]
    recent: Vec<WireErrorRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireErrorRecord {
    #[serde(deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    stage: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    error_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    message: Option<String>,
    #[serde(deserialize_with = "lenient_time")]
    occurred_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_opt_bool")]
    retryable: Option<bool>,
}

impl WireErrorRecord {
    fn into_record(self) -> Option<ErrorRecord> {
        let Some(id) = self.id.filter(|id| !id.is_empty()) else {
            debug!("dropping error record without id");
            return None;
        };

        Some(ErrorRecord {
            id,
            stage: self.stage.unwrap_or_default(),
            error_type: self.error_type.unwrap_or_else(|| "unknown".into()),
            message: self.message.unwrap_or_default(),
            occurred_at: self.occurred_at,
            retryable: self.retryable.unwrap_or(true),
        })
    }
}

impl From<WireMonitoring> for MonitoringSnapshot {
    fn from(w: WireMonitoring) -> Self {
        let recent: Vec<ErrorRecord> = w
            .errors
            .recent
            .into_iter()
            .filter_map(WireErrorRecord::into_record)
            .collect();

        Self {
            timestamp: w.timestamp,
            status: MonitorStatus {
                current: w.status.current.unwrap_or_default(),
                is_running: w.status.is_running,
                is_completed: w.status.is_completed,
            },
            stages: [
                w.stages.stage1.into(),
                w.stages.stage2.into(),
                w.stages.stage3.into(),
            ],
            rates: Rates {
                items_per_minute: w.rates.items_per_minute,
                items_per_hour: w.rates.items_per_hour,
            },
            eta_minutes: w.eta_minutes,
            estimated_completion_time: w.estimated_completion_time,
            errors: ErrorsSummary {
                total: w.errors.total.unwrap_or(recent.len() as u64),
                by_type: w.errors.by_type,
                by_stage: w.errors.by_stage,
                recent,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse `GET /api/sessions`. Entries without an identifier are dropped.
pub fn parse_sessions_response(body: &str) -> Result<Vec<Session>> {
    let envelope: SessionsEnvelope = decode(body, "session list")?;
    if envelope.success == Some(false) {
        return Err(rejected(envelope.error));
    }

    let raw = envelope
        .sessions
        .ok_or_else(|| TrackerError::parse("session list payload has no `sessions` array"))?;

    let mut sessions = Vec::with_capacity(raw.len());
    for value in raw {
        match parse_session(value) {
            Ok(session) => sessions.push(session),
            Err(e) => warn!(error = %e, "dropping malformed session entry"),
        }
    }
    Ok(sessions)
}

/// Parse `GET /api/sessions/{id}`.
pub fn parse_session_response(body: &str) -> Result<Session> {
    let envelope: SessionEnvelope = decode(body, "session")?;
    if envelope.success == Some(false) {
        return Err(rejected(envelope.error));
    }
    let value = envelope
        .session
        .ok_or_else(|| TrackerError::parse("session payload has no `session` object"))?;
    parse_session(value)
}

/// Parse `GET /api/monitoring/dashboard`. This endpoint has no envelope.
pub fn parse_monitoring_response(body: &str) -> Result<MonitoringSnapshot> {
    let value: Value = decode(body, "monitoring")?;
    if !value.is_object() {
        return Err(TrackerError::parse("monitoring payload is not an object"));
    }
    let wire = WireMonitoring::deserialize(value)
        .map_err(|e| TrackerError::parse(format!("invalid monitoring payload: {e}")))?;
    Ok(wire.into())
}

/// Parse a `{ success, message?, error? }` command acknowledgement.
///
/// `success: false` becomes [`TrackerError::Domain`] with the backend's
/// message verbatim.
pub fn parse_ack_response(body: &str) -> Result<Ack> {
    let envelope: AckEnvelope = decode(body, "acknowledgement")?;
    match envelope.success {
        Some(true) => Ok(Ack {
            message: envelope.message,
        }),
        _ => Err(rejected(envelope.error.or(envelope.message))),
    }
}

/// Try to read a rejection message out of a non-2xx response body.
///
/// Returns `None` unless the body is an explicit `success: false` envelope.
pub fn rejection_message(body: &str) -> Option<String> {
    let envelope: AckEnvelope = serde_json::from_str(body).ok()?;
    match envelope.success {
        Some(false) => Some(rejected(envelope.error.or(envelope.message)).to_string()),
        _ => None,
    }
}

/// Convert one raw session object into a [`Session`].
pub fn parse_session(value: Value) -> Result<Session> {
    if !value.is_object() {
        return Err(TrackerError::parse("session is not an object"));
    }
    WireSession::deserialize(value)
        .map_err(|e| TrackerError::parse(format!("invalid session: {e}")))?
        .into_session()
}

fn session_status(raw: &str) -> SessionStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "active" | "running" => SessionStatus::Active,
        "completed" | "complete" => SessionStatus::Completed,
        "error" | "failed" => SessionStatus::Error,
        other => {
            debug!(status = other, "unrecognised session status");
            SessionStatus::Unknown
        }
    }
}

fn stage_status(raw: &str) -> Option<StageStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pending" => Some(StageStatus::Pending),
        "running" | "in_progress" => Some(StageStatus::Running),
        "completed" | "complete" => Some(StageStatus::Completed),
        "error" | "failed" => Some(StageStatus::Error),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Lenient field deserializers
// ---------------------------------------------------------------------------

type DeResult<T, E> = std::result::Result<T, E>;

/// A nested section that is not a well-formed object becomes its default.
fn lenient<'de, D, T>(d: D) -> DeResult<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient_object(d)?.unwrap_or_default())
}

/// Only JSON objects produce a value; arrays would otherwise fill struct
/// fields by position.
fn lenient_object<'de, D, T>(d: D) -> DeResult<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(d)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(T::deserialize(value).ok())
}

/// Strings pass through; numeric identifiers are stringified.
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> DeResult<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> DeResult<bool, D::Error> {
    Ok(Value::deserialize(d)?.as_bool().unwrap_or(false))
}

fn lenient_opt_bool<'de, D: Deserializer<'de>>(d: D) -> DeResult<Option<bool>, D::Error> {
    Ok(Value::deserialize(d)?.as_bool())
}

/// Finite floating-point number, or `None`.
fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> DeResult<Option<f64>, D::Error> {
    let n = match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(n.filter(|n| n.is_finite()))
}

/// Non-negative count; malformed counts are `0`.
fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> DeResult<u64, D::Error> {
    Ok(count_value(&Value::deserialize(d)?).unwrap_or(0))
}

/// Count that stays `None` (unknown) when malformed.
fn lenient_opt_count<'de, D: Deserializer<'de>>(d: D) -> DeResult<Option<u64>, D::Error> {
    Ok(count_value(&Value::deserialize(d)?))
}

/// A key that is present always yields a count, `0` when malformed.
fn present_count<'de, D: Deserializer<'de>>(d: D) -> DeResult<Option<u64>, D::Error> {
    Ok(Some(count_value(&Value::deserialize(d)?).unwrap_or(0)))
}

fn lenient_time<'de, D: Deserializer<'de>>(d: D) -> DeResult<Option<DateTime<Utc>>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

fn lenient_count_map<'de, D: Deserializer<'de>>(
    d: D,
) -> DeResult<BTreeMap<String, u64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Object(m) => m
            .into_iter()
            .map(|(k, v)| (k, count_value(&v).unwrap_or(0)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// Non-object entries are skipped.
fn lenient_records<'de, D: Deserializer<'de>>(
    d: D,
) -> DeResult<Vec<WireErrorRecord>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|v| WireErrorRecord::deserialize(v).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Interpret a JSON value as a count, clamping negatives to `0`.
fn count_value(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some(n.max(0.0) as u64)
}
