//! Pure progress and ETA arithmetic.
//!
//! Nothing here does I/O. Derived values are recomputed from the latest
//! [`Session`] and [`MonitoringSnapshot`] every time they are needed and are
//! never stored.

use chrono::{DateTime, Utc};
use serde::Serialize;

use pipetrack_shared::{MonitoringSnapshot, Session, Stage, StageId, StageStatus};

/// Rendered in place of an unknown ETA or timestamp.
pub const ETA_SENTINEL: &str = "—";

/// Fixed display format for timestamps.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// `round(100 * completed_stages / 3)`.
pub fn overall_progress(stages: &[Stage]) -> u8 {
    if stages.is_empty() {
        return 0;
    }
    let completed = stages
        .iter()
        .filter(|s| s.status == StageStatus::Completed)
        .count();
    percent(completed as f64, stages.len() as f64)
}

/// Completion percentage of one stage, clamped to `0..=100`.
///
/// An unknown or zero total yields `0`.
pub fn stage_percentage(completed: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => percent(completed as f64, total as f64),
        _ => 0,
    }
}

fn percent(part: f64, whole: f64) -> u8 {
    (100.0 * part / whole).round().clamp(0.0, 100.0) as u8
}

/// Minutes remaining at the given throughput, or `None` when the rate is
/// zero, negative, or unknown.
pub fn eta(remaining: u64, rate_per_minute: Option<f64>) -> Option<f64> {
    match rate_per_minute {
        Some(rate) if rate.is_finite() && rate > 0.0 => Some(remaining as f64 / rate),
        _ => None,
    }
}

/// `~N min` under an hour (at least 1), otherwise `~Hh Mm`.
/// Unknown ETAs render as [`ETA_SENTINEL`].
pub fn format_eta(minutes: Option<f64>) -> String {
    let Some(minutes) = minutes.filter(|m| m.is_finite() && *m >= 0.0) else {
        return ETA_SENTINEL.to_string();
    };

    if minutes < 60.0 {
        let n = (minutes.round() as u64).max(1);
        return format!("~{n} min");
    }

    let total = minutes.round() as u64;
    format!("~{}h {}m", total / 60, total % 60)
}

/// Render a timestamp in the fixed display format.
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        None => ETA_SENTINEL.to_string(),
    }
}

// ---------------------------------------------------------------------------
// DerivedProgress
// ---------------------------------------------------------------------------

/// Display metrics for one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageProgress {
    pub stage: StageId,
    pub status: StageStatus,
    pub completed: u64,
    pub total: Option<u64>,
    pub percentage: u8,
    pub rate_per_minute: Option<f64>,
    pub eta_minutes: Option<f64>,
}

/// Percentages for every stage plus the overall figure, all `0..=100`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedProgress {
    pub stages: [StageProgress; 3],
    pub overall: u8,
}

impl DerivedProgress {
    /// Combine a session with its (optional) monitoring snapshot.
    ///
    /// Monitoring figures win when present. Without them a stage's total is
    /// implied by the previous stage's output once that stage has completed
    /// (company IDs are resolved for every segmented company, financials for
    /// every resolved ID). The first stage's total is unknown.
    pub fn compute(session: &Session, monitoring: Option<&MonitoringSnapshot>) -> Self {
        let stages = StageId::ALL.map(|id| {
            let stage = session.stage(id);
            match monitoring {
                Some(m) => from_monitor(stage, m),
                None => from_session(session, stage),
            }
        });

        Self {
            overall: overall_progress(&session.stages),
            stages,
        }
    }

    pub fn stage(&self, id: StageId) -> &StageProgress {
        &self.stages[id.index()]
    }
}

fn from_monitor(stage: &Stage, snapshot: &MonitoringSnapshot) -> StageProgress {
    let m = snapshot.stage(stage.id);
    let percentage = if stage.status == StageStatus::Completed && m.total.is_none() {
        100
    } else {
        stage_percentage(m.completed, m.total)
    };
    let eta_minutes = match m.total {
        Some(total) => m
            .eta_minutes
            .or_else(|| eta(total.saturating_sub(m.completed), m.rate_per_minute)),
        None => None,
    };

    StageProgress {
        stage: stage.id,
        status: stage.status,
        completed: m.completed,
        total: m.total,
        percentage,
        rate_per_minute: m.rate_per_minute,
        eta_minutes,
    }
}

fn from_session(session: &Session, stage: &Stage) -> StageProgress {
    let total = stage
        .id
        .predecessor()
        .map(|p| session.stage(p))
        .filter(|p| p.status == StageStatus::Completed)
        .map(|p| p.completed_count)
        .filter(|&t| t > 0);
    let percentage = if stage.status == StageStatus::Completed {
        100
    } else {
        stage_percentage(stage.completed_count, total)
    };

    StageProgress {
        stage: stage.id,
        status: stage.status,
        completed: stage.completed_count,
        total,
        percentage,
        rate_per_minute: None,
        eta_minutes: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipetrack_shared::{SessionStatus, StageMonitor};

    fn session_with(completed: usize) -> Session {
        let mut s = Session::new("s-1", SessionStatus::Active);
        for stage in s.stages.iter_mut().take(completed) {
            stage.status = StageStatus::Completed;
        }
        s
    }

    #[test]
    fn overall_progress_is_rounded_share_of_completed_stages() {
        for (completed, expected) in [(0, 0), (1, 33), (2, 67), (3, 100)] {
            let s = session_with(completed);
            assert_eq!(overall_progress(&s.stages), expected);
            assert_eq!(
                overall_progress(&s.stages) as f64,
                (100.0 * completed as f64 / 3.0).round()
            );
        }
    }

    #[test]
    fn stage_percentage_edges() {
        assert_eq!(stage_percentage(50, Some(200)), 25);
        assert_eq!(stage_percentage(1, Some(3)), 33);
        assert_eq!(stage_percentage(500, Some(200)), 100);
        assert_eq!(stage_percentage(10, Some(0)), 0);
        assert_eq!(stage_percentage(10, None), 0);
        assert_eq!(stage_percentage(0, Some(10)), 0);
    }

    #[test]
    fn eta_requires_positive_rate() {
        assert_eq!(eta(150, Some(10.0)), Some(15.0));
        assert_eq!(eta(150, Some(0.0)), None);
        assert_eq!(eta(150, Some(-2.0)), None);
        assert_eq!(eta(150, None), None);
        assert_eq!(eta(150, Some(f64::NAN)), None);
    }

    #[test]
    fn eta_formatting() {
        assert_eq!(format_eta(Some(45.0)), "~45 min");
        assert_eq!(format_eta(Some(125.0)), "~2h 5m");
        assert_eq!(format_eta(Some(0.2)), "~1 min");
        assert_eq!(format_eta(Some(60.0)), "~1h 0m");
        assert_eq!(format_eta(eta(150, Some(0.0))), ETA_SENTINEL);
        assert_eq!(format_eta(Some(f64::INFINITY)), ETA_SENTINEL);
    }

    #[test]
    fn timestamp_formatting() {
        let ts = DateTime::parse_from_rfc3339("2024-03-04T10:02:35+01:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(Some(ts)), "2024-03-04 09:02:35 UTC");
        assert_eq!(format_timestamp(None), ETA_SENTINEL);
    }

    #[test]
    fn derived_progress_prefers_monitoring() {
        let mut s = session_with(1);
        s.stage_mut(StageId::Stage1).completed_count = 1200;
        s.stage_mut(StageId::Stage2).status = StageStatus::Running;
        s.stage_mut(StageId::Stage2).completed_count = 100;

        let mut snap = MonitoringSnapshot::default();
        snap.stages[1] = StageMonitor {
            completed: 600,
            total: Some(1200),
            percentage: Some(50.0),
            rate_per_minute: Some(20.0),
            eta_minutes: None,
        };

        let derived = DerivedProgress::compute(&s, Some(&snap));
        let stage2 = derived.stage(StageId::Stage2);
        assert_eq!(derived.overall, 33);
        assert_eq!(stage2.percentage, 50);
        assert_eq!(stage2.eta_minutes, Some(30.0));
        assert_eq!(derived.stage(StageId::Stage1).percentage, 100);
        assert_eq!(derived.stage(StageId::Stage3).percentage, 0);
        assert_eq!(derived.stage(StageId::Stage3).eta_minutes, None);
    }

    #[test]
    fn derived_progress_without_monitoring_uses_implied_totals() {
        let mut s = session_with(1);
        s.stage_mut(StageId::Stage1).completed_count = 400;
        s.stage_mut(StageId::Stage2).status = StageStatus::Running;
        s.stage_mut(StageId::Stage2).completed_count = 100;

        let derived = DerivedProgress::compute(&s, None);
        assert_eq!(derived.stage(StageId::Stage1).percentage, 100);
        assert_eq!(derived.stage(StageId::Stage2).percentage, 25);
        assert_eq!(derived.stage(StageId::Stage2).total, Some(400));
        assert_eq!(derived.stage(StageId::Stage3).total, None);
        assert_eq!(derived.stage(StageId::Stage3).percentage, 0);
    }

    #[test]
    fn running_predecessor_does_not_imply_a_total() {
        let mut s = session_with(0);
        s.stage_mut(StageId::Stage1).status = StageStatus::Running;
        s.stage_mut(StageId::Stage1).completed_count = 250;

        let derived = DerivedProgress::compute(&s, None);
        assert_eq!(derived.stage(StageId::Stage1).total, None);
        assert_eq!(derived.stage(StageId::Stage2).total, None);
        assert_eq!(derived.stage(StageId::Stage2).percentage, 0);
    }
}
