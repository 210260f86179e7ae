//! CLI command definitions, routing, and tracing setup.

use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pipetrack_core::{
    DerivedProgress, ETA_SENTINEL, ErrorSummary, Tracker, format_eta, format_timestamp,
};
use pipetrack_shared::{
    AppConfig, ControlAction, SessionStatus, StageId, StageTarget, TrackerConfig, init_config,
    load_config,
};
use tracing::{info, warn};

use crate::render;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// pipetrack: follow and steer pipeline sessions.
#[derive(Parser)]
#[command(
    name = "pipetrack",
    version,
    about = "Observe and control sessions of the company-data pipeline.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Backend base URL (overrides the config file).
    #[arg(long, env = "PIPETRACK_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Poll interval in milliseconds for `watch`.
    #[arg(long, global = true)]
    pub interval_ms: Option<u64>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// List sessions with status and overall progress.
    Sessions,

    /// Show one session: stages, progress, monitoring and errors.
    Show {
        /// Session ID.
        id: String,

        /// Print machine-readable JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Follow a session live until it completes or Ctrl-C.
    Watch {
        /// Session ID.
        id: String,
    },

    /// Send a lifecycle command: pause, resume, stop or restart.
    Control {
        /// Session ID.
        id: String,

        /// Action to send.
        action: ControlAction,
    },

    /// Manually start stage 2 or 3.
    StartStage {
        /// Session ID.
        id: String,

        /// Stage to start: 2 or 3.
        stage: StageTarget,
    },

    /// Retry one pipeline error.
    Retry {
        /// Session ID.
        id: String,

        /// Error ID as listed by `show`.
        error_id: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so command
/// output stays pipeable.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pipetrack=info",
        1 => "pipetrack=debug",
        _ => "pipetrack=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let tracker = || -> Result<Tracker> {
        let config = load_config()?;
        let resolved =
            TrackerConfig::resolve(&config, cli.base_url.as_deref(), cli.interval_ms)?;
        info!(base_url = %resolved.base_url, "using backend");
        Ok(Tracker::from_config(&resolved)?)
    };

    match cli.command {
        Command::Sessions => cmd_sessions(&tracker()?).await,
        Command::Show { ref id, json } => cmd_show(&tracker()?, id, json).await,
        Command::Watch { ref id } => cmd_watch(&tracker()?, id).await,
        Command::Control { ref id, action } => cmd_control(&tracker()?, id, action).await,
        Command::StartStage { ref id, stage } => cmd_start_stage(&tracker()?, id, stage).await,
        Command::Retry {
            ref id,
            ref error_id,
        } => cmd_retry(&tracker()?, id, error_id).await,
        Command::Config { ref action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&cli).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

async fn cmd_sessions(tracker: &Tracker) -> Result<()> {
    tracker.store().refresh_list().await?;
    let view = tracker.view();

    if view.sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    print!("{}", render::session_table(&view.sessions));
    Ok(())
}

/// Select `id` and load its detail and monitoring snapshot.
async fn load_session(tracker: &Tracker, id: &str) -> Result<()> {
    tracker.select_session(id);
    tracker.store().refresh_selected().await?;
    Ok(())
}

async fn cmd_show(tracker: &Tracker, id: &str, json: bool) -> Result<()> {
    load_session(tracker, id).await?;
    let view = tracker.view();
    let session = view
        .detail
        .as_ref()
        .ok_or_else(|| eyre!("session '{id}' could not be loaded"))?;
    let progress = DerivedProgress::compute(session, view.monitoring.as_ref());
    let errors = view.error_summary();

    if json {
        let violations: Vec<String> = view
            .validation
            .iter()
            .flat_map(|r| r.violations.iter().map(ToString::to_string))
            .collect();
        let doc = serde_json::json!({
            "session": session,
            "progress": progress,
            "runState": view.run_state(),
            "monitoring": view.monitoring,
            "errors": errors,
            "violations": violations,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    print!(
        "{}",
        render::session_detail(session, &progress, view.monitoring.as_ref())
    );
    if let Some(report) = view.validation.as_ref().filter(|r| !r.is_valid()) {
        println!("  Warning: backend reported stages out of order");
        for violation in &report.violations {
            println!("    - {violation}");
        }
    }
    if let Some(errors) = errors.filter(|e| !e.is_empty()) {
        print!("{}", render::error_summary(&errors));
    }
    match view.run_state() {
        Some(state) => println!("  Actions:  {}", render::action_list(&state.allowed_actions())),
        None => println!(
            "  Actions:  {} (run state not reported)",
            render::action_list(&ControlAction::ALL)
        ),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Watch mode
// ---------------------------------------------------------------------------

/// One indicatif bar per stage plus a status line.
struct WatchBars {
    header: ProgressBar,
    stages: [ProgressBar; 3],
}

impl WatchBars {
    fn new(multi: &MultiProgress) -> Result<Self> {
        let header = multi.add(ProgressBar::new_spinner());
        header.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        header.enable_steady_tick(Duration::from_millis(80));

        let style = ProgressStyle::with_template(
            "  {prefix:<13} [{bar:30.cyan/blue}] {pos:>3}% {msg}",
        )?
        .progress_chars("=> ");
        let stages = StageId::ALL.map(|id| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(id.label());
            bar
        });

        Ok(Self { header, stages })
    }

    fn update(&self, tracker: &Tracker) {
        let view = tracker.view();
        let Some(progress) = view.progress() else {
            self.header.set_message("waiting for session data...");
            return;
        };

        let current = view
            .monitoring
            .as_ref()
            .map(|m| m.status.current.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| ETA_SENTINEL.to_string());
        let mut header = format!(
            "{current} | overall {}% | updated {}",
            progress.overall,
            format_timestamp(view.selected_updated_at)
        );
        if let Some(err) = view.banner() {
            header.push_str(&format!(" | refresh failed: {err}"));
        }
        self.header.set_message(header);

        for (bar, stage) in self.stages.iter().zip(progress.stages.iter()) {
            bar.set_position(u64::from(stage.percentage));
            let counts = match stage.total {
                Some(total) => format!("{}/{total}", stage.completed),
                None => stage.completed.to_string(),
            };
            bar.set_message(format!(
                "{} {counts} eta {}",
                stage.status,
                format_eta(stage.eta_minutes)
            ));
        }
    }

    fn finish(&self) {
        for bar in &self.stages {
            bar.abandon();
        }
        self.header.finish();
    }
}

async fn cmd_watch(tracker: &Tracker, id: &str) -> Result<()> {
    tracker.select_session(id);
    if let Err(e) = tracker.store().refresh_selected().await {
        warn!(error = %e, "initial load failed, will keep polling");
    }

    let multi = MultiProgress::new();
    let bars = WatchBars::new(&multi)?;
    let mut revisions = tracker.store().subscribe();
    tracker.set_auto_refresh(true);
    info!(
        session_id = id,
        interval_ms = tracker.poll_interval().as_millis() as u64,
        "watching session"
    );

    loop {
        bars.update(tracker);
        let view = tracker.view();
        let completed = view.run_state().is_some_and(|s| s.is_completed)
            || view
                .detail
                .as_ref()
                .is_some_and(|s| s.status == SessionStatus::Completed);
        if completed {
            bars.finish();
            println!("Session {id} completed.");
            break;
        }

        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                bars.finish();
                break;
            }
        }
    }

    tracker.set_auto_refresh(false);
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands that change backend state
// ---------------------------------------------------------------------------

async fn cmd_control(tracker: &Tracker, id: &str, action: ControlAction) -> Result<()> {
    load_session(tracker, id).await?;

    let ack = tracker.control().dispatch(id, action).await?;
    println!(
        "{}",
        ack.message
            .unwrap_or_else(|| format!("{action} accepted for session {id}"))
    );
    print_status(tracker);
    Ok(())
}

async fn cmd_start_stage(tracker: &Tracker, id: &str, stage: StageTarget) -> Result<()> {
    load_session(tracker, id).await?;

    let ack = tracker.control().start_stage(id, stage).await?;
    println!(
        "{}",
        ack.message
            .unwrap_or_else(|| format!("{} started for session {id}", stage.stage().label()))
    );
    print_status(tracker);
    Ok(())
}

async fn cmd_retry(tracker: &Tracker, id: &str, error_id: &str) -> Result<()> {
    load_session(tracker, id).await?;

    let summary: Option<ErrorSummary> = tracker.errors().summary();
    match summary.as_ref().and_then(|s| s.record(error_id)) {
        Some(record) if !record.retryable => {
            return Err(eyre!("error '{error_id}' is not retryable"));
        }
        Some(_) => {}
        None => warn!(error_id, "error not in the recent list, sending retry anyway"),
    }

    let ack = tracker.errors().retry(id, error_id).await?;
    println!(
        "{}",
        ack.message
            .unwrap_or_else(|| format!("retry requested for error {error_id}"))
    );
    Ok(())
}

fn print_status(tracker: &Tracker) {
    let view = tracker.view();
    if let Some(session) = view.detail.as_ref() {
        println!("Session {} is now {}", session.session_id, session.status);
    }
    if let Some(err) = view.banner() {
        println!("Warning: could not refresh state: {err}");
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(cli: &Cli) -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    let resolved = TrackerConfig::resolve(&config, cli.base_url.as_deref(), cli.interval_ms)?;
    println!("# effective");
    println!("# base_url = \"{}\"", resolved.base_url);
    println!("# interval_ms = {}", resolved.poll_interval.as_millis());
    Ok(())
}
