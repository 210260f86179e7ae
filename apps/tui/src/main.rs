//! pipetrack TUI: interactive dashboard for pipeline sessions.
//!
//! Lists sessions, opens one to follow its stages, rates and errors, and
//! sends lifecycle commands, built with `ratatui` + `crossterm`.

mod app;
mod screens;
mod widgets;

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use color_eyre::eyre::Result;
use pipetrack_core::Tracker;
use pipetrack_shared::{TrackerConfig, config_dir, load_config};

use widgets::Theme;

const LOG_FILE_NAME: &str = "pipetrack-tui.log";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    let config = load_config()?;
    let base_url = std::env::var("PIPETRACK_BASE_URL").ok();
    let resolved = TrackerConfig::resolve(&config, base_url.as_deref(), None)?;
    tracing::info!(base_url = %resolved.base_url, "starting dashboard");

    let tracker = Arc::new(Tracker::from_config(&resolved)?);
    tracker.set_auto_refresh(resolved.auto_refresh);

    app::run(tracker, Theme::from_name(config.display.theme))
}

/// Log to a file in the config directory; the terminal belongs to the UI.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pipetrack=info"));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
