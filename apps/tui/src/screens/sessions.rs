//! Session list screen.

use crossterm::event::KeyCode;
use pipetrack_core::{DerivedProgress, ListAvailability, StoreView, format_timestamp};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};

use super::Intent;
use crate::widgets::Theme;

pub(crate) struct SessionsScreen {
    selected: usize,
}

impl SessionsScreen {
    pub(crate) fn new() -> Self {
        Self { selected: 0 }
    }

    /// Cursor position, clamped to the current list.
    fn cursor(&self, view: &StoreView) -> Option<usize> {
        match view.sessions.len() {
            0 => None,
            n => Some(self.selected.min(n - 1)),
        }
    }

    pub(crate) fn handle_key(&mut self, code: KeyCode, view: &StoreView) -> Option<Intent> {
        let cursor = self.cursor(view)?;
        match code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = cursor.saturating_sub(1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected = (cursor + 1).min(view.sessions.len() - 1);
                None
            }
            KeyCode::Enter => Some(Intent::Open(view.sessions[cursor].session_id.clone())),
            _ => None,
        }
    }

    pub(crate) fn draw(&self, f: &mut Frame, area: Rect, view: &StoreView, theme: &Theme) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" Sessions ({}) ", view.sessions.len()));

        let message = match view.availability {
            ListAvailability::Loading => Some("Loading sessions...".to_string()),
            ListAvailability::Unavailable => Some(format!(
                "Session list unavailable.\n\n{}\n\nRetrying on every poll; press 'a' if auto-refresh is off.",
                view.list_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            )),
            ListAvailability::Ready if view.sessions.is_empty() => {
                Some("No sessions yet.".to_string())
            }
            ListAvailability::Ready => None,
        };
        if let Some(message) = message {
            let style = match view.availability {
                ListAvailability::Unavailable => Style::default().fg(theme.error),
                _ => Style::default().fg(theme.muted),
            };
            let empty = Paragraph::new(message)
                .style(style)
                .alignment(Alignment::Center)
                .block(block);
            f.render_widget(empty, area);
            return;
        }

        let cursor = self.cursor(view);
        let items: Vec<ListItem> = view
            .sessions
            .iter()
            .enumerate()
            .map(|(i, session)| {
                let selected = Some(i) == cursor;
                let prefix = if selected { "▸ " } else { "  " };
                let overall = DerivedProgress::compute(session, None).overall;
                let line = Line::from(vec![
                    Span::raw(format!("{prefix}{:<24} ", session.session_id)),
                    Span::styled(
                        format!("{:<10}", session.status.as_str()),
                        Style::default().fg(theme.session_color(session.status)),
                    ),
                    Span::raw(format!(
                        "{overall:>3}%  {}",
                        format_timestamp(session.updated_at.or(session.created_at))
                    )),
                ]);
                let item = ListItem::new(line);
                if selected {
                    item.style(theme.selected())
                } else {
                    item
                }
            })
            .collect();

        f.render_widget(List::new(items).block(block), area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screens::tests::view_with;
    use pipetrack_shared::{Session, SessionStatus, ThemeName, TrackerError};
    use ratatui::{Terminal, backend::TestBackend};

    fn sessions() -> Vec<Session> {
        vec![
            Session::new("sess-a", SessionStatus::Active),
            Session::new("sess-b", SessionStatus::Completed),
        ]
    }

    fn render(screen: &SessionsScreen, view: &StoreView) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 10)).unwrap();
        let theme = Theme::from_name(ThemeName::Default);
        terminal
            .draw(|f| screen.draw(f, f.area(), view, &theme))
            .unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn cursor_moves_within_bounds_and_opens() {
        let view = view_with(sessions());
        let mut screen = SessionsScreen::new();

        assert_eq!(screen.handle_key(KeyCode::Up, &view), None);
        screen.handle_key(KeyCode::Down, &view);
        screen.handle_key(KeyCode::Down, &view);
        assert_eq!(
            screen.handle_key(KeyCode::Enter, &view),
            Some(Intent::Open("sess-b".into()))
        );
    }

    #[test]
    fn empty_list_ignores_keys() {
        let view = view_with(Vec::new());
        let mut screen = SessionsScreen::new();
        assert_eq!(screen.handle_key(KeyCode::Enter, &view), None);
    }

    #[test]
    fn renders_sessions() {
        let view = view_with(sessions());
        let text = render(&SessionsScreen::new(), &view);
        assert!(text.contains("sess-a"));
        assert!(text.contains("completed"));
    }

    #[test]
    fn never_loaded_list_shows_unavailable() {
        let mut view = view_with(Vec::new());
        view.availability = ListAvailability::Unavailable;
        view.list_error = Some(TrackerError::Network("connection refused".into()));
        let text = render(&SessionsScreen::new(), &view);
        assert!(text.contains("unavailable"));
        assert!(!text.contains("Loading"));
    }
}
