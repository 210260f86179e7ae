//! Plain-text rendering for one-shot commands.

use pipetrack_core::{DerivedProgress, ErrorSummary, format_eta, format_timestamp};
use pipetrack_shared::{ControlAction, MonitoringSnapshot, Session};

/// Fixed-width table of sessions, newest first as the backend sent them.
pub(crate) fn session_table(sessions: &[Session]) -> String {
    let width = sessions
        .iter()
        .map(|s| s.session_id.len())
        .max()
        .unwrap_or(0)
        .max(2);

    let mut out = format!(
        "{:<width$}  {:<9}  {:>8}  {:<30}  {}\n",
        "ID", "STATUS", "PROGRESS", "STAGES", "UPDATED"
    );
    for session in sessions {
        let progress = DerivedProgress::compute(session, None);
        let stages = session
            .stages
            .iter()
            .map(|s| s.status.as_str())
            .collect::<Vec<_>>()
            .join("/");
        out.push_str(&format!(
            "{:<width$}  {:<9}  {:>7}%  {:<30}  {}\n",
            session.session_id,
            session.status.as_str(),
            progress.overall,
            stages,
            format_timestamp(session.updated_at.or(session.created_at)),
        ));
    }
    out
}

pub(crate) fn session_detail(
    session: &Session,
    progress: &DerivedProgress,
    monitoring: Option<&MonitoringSnapshot>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("  Session:  {}\n", session.session_id));
    out.push_str(&format!("  Status:   {}\n", session.status));
    if let Some(m) = monitoring.filter(|m| !m.status.current.is_empty()) {
        out.push_str(&format!("  Activity: {}\n", m.status.current));
    }
    out.push_str(&format!("  Created:  {}\n", format_timestamp(session.created_at)));
    out.push_str(&format!("  Updated:  {}\n", format_timestamp(session.updated_at)));
    out.push_str(&format!("  Overall:  {}%\n", progress.overall));
    out.push('\n');

    for stage in &progress.stages {
        let counts = match stage.total {
            Some(total) => format!("{}/{total}", stage.completed),
            None => stage.completed.to_string(),
        };
        out.push_str(&format!(
            "  {:<13} {:<9} {:>3}%  {:<14} eta {}\n",
            stage.stage.label(),
            stage.status.as_str(),
            stage.percentage,
            counts,
            format_eta(stage.eta_minutes),
        ));
    }

    if let Some(m) = monitoring {
        out.push('\n');
        let rate = m
            .rates
            .items_per_minute
            .map(|r| format!("{r:.1}/min"))
            .unwrap_or_else(|| format_eta(None));
        out.push_str(&format!("  Rate:     {rate}\n"));
        out.push_str(&format!("  ETA:      {}\n", format_eta(m.eta_minutes)));
        if m.estimated_completion_time.is_some() {
            out.push_str(&format!(
                "  Finish:   {}\n",
                format_timestamp(m.estimated_completion_time)
            ));
        }
    }
    out
}

pub(crate) fn error_summary(summary: &ErrorSummary) -> String {
    let mut out = format!("\n  Errors:   {}\n", summary.total);
    for (kind, count) in &summary.by_type {
        out.push_str(&format!("    {kind:<20} {count}\n"));
    }
    if !summary.by_stage.is_empty() {
        let stages = summary
            .by_stage
            .iter()
            .map(|(stage, count)| format!("{stage}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("    by stage: {stages}\n"));
    }
    for record in &summary.recent {
        let marker = if record.retryable { "retryable" } else { "final" };
        out.push_str(&format!(
            "    [{}] {} {} ({marker}): {}\n",
            record.id, record.stage, record.error_type, record.message
        ));
    }
    out
}

pub(crate) fn action_list(actions: &[ControlAction]) -> String {
    actions
        .iter()
        .map(ControlAction::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
