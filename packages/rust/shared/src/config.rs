//! Application configuration for pipetrack.
//!
//! User config lives at `~/.pipetrack/pipetrack.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TrackerError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pipetrack.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pipetrack";

/// Polling intervals below this are clamped up.
pub const MIN_POLL_INTERVAL_MS: u64 = 250;

// ---------------------------------------------------------------------------
// Config structs (matching pipetrack.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Auto-refresh settings.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Presentation settings.
    #[serde(default)]
    pub display: DisplayConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the job-control backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[polling]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Refresh interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Whether auto-refresh starts enabled.
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            auto_refresh: true,
        }
    }
}

fn default_interval_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}

/// Dashboard colour scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeName {
    #[default]
    Default,
    Contrast,
}

/// `[display]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub theme: ThemeName,
}

// ---------------------------------------------------------------------------
// Tracker config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime tracker configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Backend base URL (validated).
    pub base_url: Url,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Poll interval.
    pub poll_interval: Duration,
    /// Whether the scheduler starts enabled.
    pub auto_refresh: bool,
}

impl TrackerConfig {
    /// Apply CLI overrides on top of the file config.
    pub fn resolve(
        config: &AppConfig,
        base_url: Option<&str>,
        interval_ms: Option<u64>,
    ) -> Result<Self> {
        let raw = base_url.unwrap_or(&config.server.base_url);
        let base_url = parse_base_url(raw)?;
        let interval_ms = interval_ms
            .unwrap_or(config.polling.interval_ms)
            .max(MIN_POLL_INTERVAL_MS);

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(config.server.timeout_secs.max(1)),
            poll_interval: Duration::from_millis(interval_ms),
            auto_refresh: config.polling.auto_refresh,
        })
    }
}

impl TryFrom<&AppConfig> for TrackerConfig {
    type Error = TrackerError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        Self::resolve(config, None, None)
    }
}

/// Parse and sanity-check a backend base URL.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| TrackerError::config(format!("invalid base URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TrackerError::config(format!(
            "base URL must be http or https, got '{other}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pipetrack/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TrackerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pipetrack/pipetrack.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TrackerError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TrackerError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TrackerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TrackerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TrackerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("interval_ms"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[server]
base_url = "https://tracker.internal:8443"

[display]
theme = "contrast"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.server.base_url, "https://tracker.internal:8443");
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.polling.interval_ms, 5_000);
        assert!(config.polling.auto_refresh);
        assert_eq!(config.display.theme, ThemeName::Contrast);
    }

    #[test]
    fn tracker_config_from_app_config() {
        let app = AppConfig::default();
        let tracker = TrackerConfig::try_from(&app).expect("resolve");
        assert_eq!(tracker.base_url.as_str(), "http://localhost:3000/");
        assert_eq!(tracker.poll_interval, Duration::from_millis(5_000));
        assert_eq!(tracker.timeout, Duration::from_secs(30));
    }

    #[test]
    fn cli_overrides_win() {
        let app = AppConfig::default();
        let tracker =
            TrackerConfig::resolve(&app, Some("https://example.com/"), Some(10)).expect("resolve");
        assert_eq!(tracker.base_url.host_str(), Some("example.com"));
        assert_eq!(
            tracker.poll_interval,
            Duration::from_millis(MIN_POLL_INTERVAL_MS)
        );
    }

    #[test]
    fn bad_base_url_rejected() {
        assert!(parse_base_url("not a url").is_err());
        let err = parse_base_url("ftp://example.com").unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }
}
