//! Core TUI application state and event loop.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use pipetrack_core::{StoreView, Tracker, can_trigger_stage};
use pipetrack_shared::{ErrorKind, StageTarget, TrackerError};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::screens::{Controls, DetailScreen, Intent, Notice, ScreenId, SessionsScreen};
use crate::widgets::{Theme, banner, status_bar};

/// Result of a command spawned from a key press.
struct Outcome {
    label: String,
    result: std::result::Result<Option<String>, TrackerError>,
}

/// Application state.
pub(crate) struct App {
    tracker: Arc<Tracker>,
    theme: Theme,
    /// Currently active screen.
    screen: ScreenId,
    sessions: SessionsScreen,
    detail: DetailScreen,
    /// Whether the app should quit.
    should_quit: bool,
    /// Status message shown in bottom bar.
    status: String,
    /// Outcome of the last command, shown next to the controls.
    notice: Option<Notice>,
    /// Whether help overlay is visible.
    show_help: bool,
    outcomes_tx: mpsc::UnboundedSender<Outcome>,
    outcomes_rx: mpsc::UnboundedReceiver<Outcome>,
}

impl App {
    pub(crate) fn new(tracker: Arc<Tracker>, theme: Theme) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            tracker,
            theme,
            screen: ScreenId::Sessions,
            sessions: SessionsScreen::new(),
            detail: DetailScreen::new(),
            should_quit: false,
            status: "Ready — press ? for help".to_string(),
            notice: None,
            show_help: false,
            outcomes_tx,
            outcomes_rx,
        }
    }

    /// Control state for the open session.
    fn controls(&self, view: &StoreView) -> Controls {
        let mut controls = Controls {
            auto_refresh: self.tracker.auto_refresh(),
            notice: self.notice.clone(),
            ..Controls::default()
        };
        let Some(session) = view.detail.as_ref() else {
            return controls;
        };
        let id = &session.session_id;

        controls.busy = self.tracker.control().is_in_flight(id);
        controls.allowed = self.tracker.control().allowed_actions(id);
        controls.startable = [StageTarget::Stage2, StageTarget::Stage3]
            .into_iter()
            .filter(|t| can_trigger_stage(session, *t))
            .collect();
        if let Some(summary) = view.error_summary() {
            controls.retrying = summary
                .recent
                .iter()
                .filter(|r| self.tracker.errors().is_retrying(&r.id))
                .map(|r| r.id.clone())
                .collect();
        }
        controls
    }

    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers, view: &StoreView) {
        // Global keybindings (always active)
        match code {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                return;
            }
            KeyCode::Char('q') => {
                self.should_quit = true;
                return;
            }
            KeyCode::Char('?') => {
                self.show_help = !self.show_help;
                return;
            }
            _ if self.show_help => {
                self.show_help = false;
                return;
            }
            KeyCode::Char('a') => {
                let enabled = !self.tracker.auto_refresh();
                self.tracker.set_auto_refresh(enabled);
                self.status = format!("Auto-refresh {}", if enabled { "on" } else { "off" });
                return;
            }
            KeyCode::Char('g') | KeyCode::F(5) => {
                self.refresh();
                return;
            }
            _ => {}
        }

        let intent = match self.screen {
            ScreenId::Sessions => self.sessions.handle_key(code, view),
            ScreenId::Detail => {
                let controls = self.controls(view);
                self.detail.handle_key(code, view, &controls)
            }
        };
        if let Some(intent) = intent {
            self.execute(intent);
        }
    }

    fn execute(&mut self, intent: Intent) {
        match intent {
            Intent::Open(id) => {
                self.tracker.select_session(id.as_str());
                self.detail.reset();
                self.notice = None;
                self.screen = ScreenId::Detail;
                self.status = format!("Session {id}");
                self.refresh();
            }
            Intent::Back => {
                self.tracker.clear_selection();
                self.notice = None;
                self.screen = ScreenId::Sessions;
                self.status = ScreenId::Sessions.to_string();
            }
            Intent::Control(action) => {
                let Some(id) = self.tracker.store().selected_id() else {
                    return;
                };
                self.spawn(action.to_string(), move |tracker| async move {
                    tracker.control().dispatch(&id, action).await.map(|a| a.message)
                });
            }
            Intent::StartStage(target) => {
                let Some(id) = self.tracker.store().selected_id() else {
                    return;
                };
                self.spawn(format!("start {target}"), move |tracker| async move {
                    tracker.control().start_stage(&id, target).await.map(|a| a.message)
                });
            }
            Intent::Retry(error_id) => {
                let Some(id) = self.tracker.store().selected_id() else {
                    return;
                };
                self.spawn(format!("retry {error_id}"), move |tracker| async move {
                    tracker.errors().retry(&id, &error_id).await.map(|a| a.message)
                });
            }
            Intent::Unavailable(reason) => {
                self.status = reason;
            }
        }
    }

    /// Run a command off the UI thread and report back through the channel.
    fn spawn<F, Fut>(&mut self, label: String, command: F)
    where
        F: FnOnce(Arc<Tracker>) -> Fut,
        Fut: Future<Output = pipetrack_shared::Result<Option<String>>> + Send + 'static,
    {
        info!(command = %label, "sending command");
        self.status = format!("Sending {label}...");
        self.notice = None;
        let fut = command(Arc::clone(&self.tracker));
        let tx = self.outcomes_tx.clone();
        tokio::spawn(async move {
            let result = fut.await;
            // The receiver only goes away when the app exits.
            let _ = tx.send(Outcome { label, result });
        });
    }

    fn refresh(&self) {
        let tracker = Arc::clone(&self.tracker);
        tokio::spawn(async move {
            if let Err(e) = tracker.refresh_all().await {
                warn!(error = %e, "manual refresh failed");
            }
        });
    }

    fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            let notice = match outcome.result {
                Ok(message) => Notice {
                    text: message.unwrap_or_else(|| format!("{} accepted", outcome.label)),
                    is_error: false,
                },
                Err(e) => {
                    let text = match e.kind() {
                        ErrorKind::Domain | ErrorKind::Local => e.to_string(),
                        ErrorKind::Transport => format!("{} failed: {e}", outcome.label),
                    };
                    Notice {
                        text,
                        is_error: true,
                    }
                }
            };
            self.status = notice.text.clone();
            self.notice = Some(notice);
        }
    }
}

/// Set up the terminal, run the event loop, then restore the terminal.
pub(crate) fn run(tracker: Arc<Tracker>, theme: Theme) -> Result<()> {
    // Setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let result = run_app(&mut terminal, App::new(tracker, theme));

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    app.refresh();

    loop {
        app.drain_outcomes();
        let view = app.tracker.view();
        terminal.draw(|f| draw(f, &app, &view))?;

        // Poll for events with 100ms timeout for responsive UI
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key.code, key.modifiers, &view);
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.tracker.set_auto_refresh(false);
    Ok(())
}

fn draw(f: &mut Frame, app: &App, view: &StoreView) {
    let banner_text = view.banner().map(|e| format!("refresh failed: {e}"));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Length(u16::from(banner_text.is_some())),
            Constraint::Min(1),    // Content
            Constraint::Length(1), // Status bar
        ])
        .split(f.area());

    let title = Paragraph::new(Line::from(vec![
        Span::styled(app.screen.to_string(), app.theme.selected()),
        Span::raw(format!(
            "  ·  {} sessions  ·  auto-refresh {}",
            view.sessions.len(),
            if app.tracker.auto_refresh() { "on" } else { "off" }
        )),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" pipetrack "),
    );
    f.render_widget(title, chunks[0]);

    if let Some(text) = banner_text {
        f.render_widget(banner(text, &app.theme), chunks[1]);
    }

    // Content area, delegated to the active screen
    match app.screen {
        ScreenId::Sessions => app.sessions.draw(f, chunks[2], view, &app.theme),
        ScreenId::Detail => {
            let controls = app.controls(view);
            app.detail.draw(f, chunks[2], view, &controls, &app.theme);
        }
    }

    // Status bar
    let bar = status_bar(&app.status, &app.theme);
    f.render_widget(bar, chunks[3]);

    // Help overlay
    if app.show_help {
        draw_help_overlay(f);
    }
}

fn draw_help_overlay(f: &mut Frame) {
    let area = centered_rect(60, 60, f.area());

    let help_text = vec![
        Line::from("Keybindings").style(Style::default().add_modifier(Modifier::BOLD)),
        Line::from(""),
        Line::from("  ↑/↓          Navigate sessions / errors"),
        Line::from("  Enter        Open session"),
        Line::from("  Esc          Back to the list"),
        Line::from("  a            Toggle auto-refresh"),
        Line::from("  g / F5       Refresh now"),
        Line::from("  ?            Toggle this help"),
        Line::from("  q / Ctrl-C   Quit"),
        Line::from(""),
        Line::from("Session:").style(Style::default().add_modifier(Modifier::BOLD)),
        Line::from("  p r s R      Pause / resume / stop / restart"),
        Line::from("  2 / 3        Start stage 2 / 3"),
        Line::from("  x            Retry highlighted error"),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help — press any key to close ")
                .style(Style::default().bg(Color::DarkGray)),
        )
        .style(Style::default().fg(Color::White).bg(Color::DarkGray));

    // Clear background
    f.render_widget(ratatui::widgets::Clear, area);
    f.render_widget(help, area);
}

/// Create a centered rectangle with percentage width and height.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
