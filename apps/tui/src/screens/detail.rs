//! Session detail screen: stage gauges, rates, errors and controls.

use crossterm::event::KeyCode;
use pipetrack_core::{ETA_SENTINEL, ErrorSummary, StoreView, format_eta, format_timestamp};
use pipetrack_shared::{ControlAction, StageTarget};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};

use super::Intent;
use crate::widgets::{Theme, stage_gauge};

/// Outcome of the last command, shown next to the controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notice {
    pub text: String,
    pub is_error: bool,
}

/// What the open session's controls may do right now. Rebuilt by the app
/// on every frame.
#[derive(Debug, Clone, Default)]
pub(crate) struct Controls {
    pub allowed: Vec<ControlAction>,
    /// A lifecycle command or stage start is awaiting its response.
    pub busy: bool,
    pub startable: Vec<StageTarget>,
    pub retrying: Vec<String>,
    pub auto_refresh: bool,
    pub notice: Option<Notice>,
}

const CONTROL_KEYS: [(char, ControlAction); 4] = [
    ('p', ControlAction::Pause),
    ('r', ControlAction::Resume),
    ('s', ControlAction::Stop),
    ('R', ControlAction::Restart),
];

const STAGE_KEYS: [(char, StageTarget); 2] = [('2', StageTarget::Stage2), ('3', StageTarget::Stage3)];

pub(crate) struct DetailScreen {
    error_cursor: usize,
}

impl DetailScreen {
    pub(crate) fn new() -> Self {
        Self { error_cursor: 0 }
    }

    pub(crate) fn reset(&mut self) {
        self.error_cursor = 0;
    }

    pub(crate) fn handle_key(
        &mut self,
        code: KeyCode,
        view: &StoreView,
        controls: &Controls,
    ) -> Option<Intent> {
        let errors = view.error_summary().unwrap_or_default();
        match code {
            KeyCode::Esc | KeyCode::Backspace | KeyCode::Left => Some(Intent::Back),
            KeyCode::Up | KeyCode::Char('k') => {
                self.error_cursor = self.error_cursor.saturating_sub(1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.error_cursor + 1 < errors.recent.len() {
                    self.error_cursor += 1;
                }
                None
            }
            KeyCode::Char('x') => Some(self.retry_intent(&errors, controls)),
            KeyCode::Char(c) => {
                if let Some((_, action)) = CONTROL_KEYS.iter().find(|(k, _)| *k == c) {
                    return Some(control_intent(*action, controls));
                }
                STAGE_KEYS
                    .iter()
                    .find(|(k, _)| *k == c)
                    .map(|(_, target)| start_intent(*target, controls))
            }
            _ => None,
        }
    }

    fn retry_intent(&self, errors: &ErrorSummary, controls: &Controls) -> Intent {
        let Some(record) = errors
            .recent
            .get(self.error_cursor.min(errors.recent.len().saturating_sub(1)))
        else {
            return Intent::Unavailable("no error selected".to_string());
        };
        if !record.retryable {
            return Intent::Unavailable(format!("error {} is not retryable", record.id));
        }
        if controls.retrying.contains(&record.id) {
            return Intent::Unavailable(format!("retry of {} already in flight", record.id));
        }
        Intent::Retry(record.id.clone())
    }

    pub(crate) fn draw(
        &self,
        f: &mut Frame,
        area: Rect,
        view: &StoreView,
        controls: &Controls,
        theme: &Theme,
    ) {
        let Some(session) = view.detail.as_ref() else {
            let text = match view.detail_error.as_ref() {
                Some(err) => format!("Could not load session: {err}"),
                None => "Loading session...".to_string(),
            };
            let block = Block::default().borders(Borders::ALL).title(" Session ");
            f.render_widget(
                Paragraph::new(text)
                    .style(Style::default().fg(theme.muted))
                    .alignment(Alignment::Center)
                    .block(block),
                area,
            );
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4), // Header
                Constraint::Length(3), // Stage 1
                Constraint::Length(3), // Stage 2
                Constraint::Length(3), // Stage 3
                Constraint::Length(1), // Rates
                Constraint::Min(3),    // Errors
                Constraint::Length(3), // Controls
            ])
            .split(area);

        // Header
        let current = view
            .monitoring
            .as_ref()
            .map(|m| m.status.current.as_str())
            .filter(|c| !c.is_empty())
            .unwrap_or(ETA_SENTINEL);
        let overall = view.progress().map(|p| p.overall).unwrap_or_default();
        let mut header = vec![
            Line::from(vec![
                Span::styled(
                    session.status.as_str(),
                    Style::default()
                        .fg(theme.session_color(session.status))
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!("  {current}  overall {overall}%")),
            ]),
            Line::from(format!(
                "updated {}  ·  auto-refresh {}",
                format_timestamp(view.selected_updated_at),
                if controls.auto_refresh { "on" } else { "off" }
            ))
            .style(Style::default().fg(theme.muted)),
        ];
        if let Some(report) = view.validation.as_ref().filter(|r| !r.is_valid()) {
            let detail = report
                .violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            header[1] = Line::from(format!("stage order anomaly: {detail}"))
                .style(Style::default().fg(theme.running));
        }
        f.render_widget(
            Paragraph::new(header).block(
                Block::default()
                    .borders(Borders::TOP)
                    .title(format!(" {} ", session.session_id)),
            ),
            chunks[0],
        );

        // Stages
        if let Some(progress) = view.progress() {
            for (stage, chunk) in progress.stages.iter().zip(&chunks[1..4]) {
                f.render_widget(stage_gauge(stage, theme), *chunk);
            }
        }

        // Rates
        let rates = match view.monitoring.as_ref() {
            Some(m) => format!(
                " rate {}  ·  eta {}  ·  finish {}",
                m.rates
                    .items_per_minute
                    .map(|r| format!("{r:.1}/min"))
                    .unwrap_or_else(|| format_eta(None)),
                format_eta(m.eta_minutes),
                format_timestamp(m.estimated_completion_time),
            ),
            None => " no monitoring data yet".to_string(),
        };
        f.render_widget(
            Paragraph::new(rates).style(Style::default().fg(theme.muted)),
            chunks[4],
        );

        self.draw_errors(f, chunks[5], view, controls, theme);
        draw_controls(f, chunks[6], controls, theme);
    }

    fn draw_errors(
        &self,
        f: &mut Frame,
        area: Rect,
        view: &StoreView,
        controls: &Controls,
        theme: &Theme,
    ) {
        let summary = view.error_summary().unwrap_or_default();
        let counts = summary
            .by_type
            .iter()
            .map(|(kind, n)| format!("{kind} {n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let title = if counts.is_empty() {
            format!(" Errors ({}) ", summary.total)
        } else {
            format!(" Errors ({}): {counts} ", summary.total)
        };
        let block = Block::default().borders(Borders::ALL).title(title);

        if summary.recent.is_empty() {
            f.render_widget(
                Paragraph::new("No recent errors.")
                    .style(Style::default().fg(theme.muted))
                    .block(block),
                area,
            );
            return;
        }

        let cursor = self.error_cursor.min(summary.recent.len() - 1);
        let items: Vec<ListItem> = summary
            .recent
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let marker = if controls.retrying.contains(&record.id) {
                    "retrying"
                } else if record.retryable {
                    "retryable"
                } else {
                    "final"
                };
                let prefix = if i == cursor { "▸ " } else { "  " };
                let item = ListItem::new(format!(
                    "{prefix}[{}] {} {}: {} ({marker})",
                    record.id, record.stage, record.error_type, record.message
                ));
                if i == cursor {
                    item.style(theme.selected())
                } else {
                    item.style(Style::default().fg(theme.text))
                }
            })
            .collect();
        f.render_widget(List::new(items).block(block), area);
    }
}

fn control_intent(action: ControlAction, controls: &Controls) -> Intent {
    if controls.busy {
        Intent::Unavailable("a command for this session is already in flight".to_string())
    } else if controls.allowed.contains(&action) {
        Intent::Control(action)
    } else {
        Intent::Unavailable(format!("{action} is not available now"))
    }
}

fn start_intent(target: StageTarget, controls: &Controls) -> Intent {
    if controls.busy {
        Intent::Unavailable("a command for this session is already in flight".to_string())
    } else if controls.startable.contains(&target) {
        Intent::StartStage(target)
    } else {
        Intent::Unavailable(format!("{} cannot be started yet", target.stage().label()))
    }
}

/// Key hints, dimmed when disabled, plus the last command's outcome.
fn draw_controls(f: &mut Frame, area: Rect, controls: &Controls, theme: &Theme) {
    let hint = |key: char, label: &str, enabled: bool| {
        let style = if enabled {
            Style::default().fg(theme.accent)
        } else {
            Style::default().fg(theme.muted).add_modifier(Modifier::DIM)
        };
        Span::styled(format!("[{key}] {label}  "), style)
    };

    let mut spans: Vec<Span> = CONTROL_KEYS
        .iter()
        .map(|(key, action)| {
            hint(*key, action.as_str(), !controls.busy && controls.allowed.contains(action))
        })
        .collect();
    spans.extend(STAGE_KEYS.iter().map(|(key, target)| {
        hint(
            *key,
            &format!("start {target}"),
            !controls.busy && controls.startable.contains(target),
        )
    }));
    spans.push(hint('x', "retry", true));

    let mut lines = vec![Line::from(spans)];
    if controls.busy {
        lines.push(Line::from("sending...").style(Style::default().fg(theme.running)));
    } else if let Some(notice) = controls.notice.as_ref() {
        let color = if notice.is_error { theme.error } else { theme.ok };
        lines.push(Line::from(notice.text.clone()).style(Style::default().fg(color)));
    }

    f.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::TOP).title(" Controls ")),
        area,
    );
}
