//! Reusable TUI widgets and the color theme they share.

use pipetrack_core::{StageProgress, format_eta};
use pipetrack_shared::{SessionStatus, StageStatus, ThemeName};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

/// Colors for every widget. One renderer, two palettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Theme {
    pub text: Color,
    pub muted: Color,
    pub accent: Color,
    pub bar_bg: Color,
    pub ok: Color,
    pub running: Color,
    pub error: Color,
}

impl Theme {
    pub(crate) fn from_name(name: ThemeName) -> Self {
        match name {
            ThemeName::Default => Self {
                text: Color::White,
                muted: Color::DarkGray,
                accent: Color::Cyan,
                bar_bg: Color::DarkGray,
                ok: Color::Green,
                running: Color::Yellow,
                error: Color::Red,
            },
            ThemeName::Contrast => Self {
                text: Color::White,
                muted: Color::Gray,
                accent: Color::LightCyan,
                bar_bg: Color::Black,
                ok: Color::LightGreen,
                running: Color::LightYellow,
                error: Color::LightRed,
            },
        }
    }

    pub(crate) fn stage_color(&self, status: StageStatus) -> Color {
        match status {
            StageStatus::Pending => self.muted,
            StageStatus::Running => self.running,
            StageStatus::Completed => self.ok,
            StageStatus::Error => self.error,
        }
    }

    pub(crate) fn session_color(&self, status: SessionStatus) -> Color {
        match status {
            SessionStatus::Active => self.running,
            SessionStatus::Completed => self.ok,
            SessionStatus::Error => self.error,
            SessionStatus::Unknown => self.muted,
        }
    }

    pub(crate) fn selected(&self) -> Style {
        Style::default()
            .fg(self.accent)
            .add_modifier(Modifier::BOLD)
    }
}

/// Bottom status bar.
pub(crate) fn status_bar<'a>(msg: &'a str, theme: &Theme) -> Paragraph<'a> {
    Paragraph::new(format!(" {msg}"))
        .style(
            Style::default()
                .bg(theme.bar_bg)
                .fg(theme.text),
        )
}

/// Transient transport failure, shown above the content.
pub(crate) fn banner(msg: String, theme: &Theme) -> Paragraph<'static> {
    Paragraph::new(format!(" ! {msg}"))
        .style(Style::default().fg(theme.error).add_modifier(Modifier::BOLD))
        .wrap(Wrap { trim: true })
}

/// Bordered gauge for one stage.
pub(crate) fn stage_gauge(stage: &StageProgress, theme: &Theme) -> Gauge<'static> {
    let counts = match stage.total {
        Some(total) => format!("{}/{total}", stage.completed),
        None => stage.completed.to_string(),
    };
    let label = format!(
        "{}%  {counts}  eta {}",
        stage.percentage,
        format_eta(stage.eta_minutes)
    );

    Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} · {} ", stage.stage.label(), stage.status)),
        )
        .gauge_style(Style::default().fg(theme.stage_color(stage.status)).bg(theme.bar_bg))
        .percent(u16::from(stage.percentage.min(100)))
        .label(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipetrack_shared::StageId;

    #[test]
    fn themes_differ_but_share_structure() {
        let default = Theme::from_name(ThemeName::Default);
        let contrast = Theme::from_name(ThemeName::Contrast);
        assert_ne!(default, contrast);
        assert_eq!(default.stage_color(StageStatus::Error), Color::Red);
        assert_eq!(contrast.stage_color(StageStatus::Completed), Color::LightGreen);
    }

    #[test]
    fn gauge_renders_eta_sentinel_when_unknown() {
        let stage = StageProgress {
            stage: StageId::Stage3,
            status: StageStatus::Pending,
            completed: 0,
            total: None,
            percentage: 0,
            rate_per_minute: None,
            eta_minutes: None,
        };
        let gauge = stage_gauge(&stage, &Theme::from_name(ThemeName::Default));

        let area = Rect::new(0, 0, 60, 3);
        let mut buf = Buffer::empty(area);
        gauge.render(area, &mut buf);
        let text: String = buf.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("Financials"));
        assert!(text.contains("eta —"));
    }
}
