//! Shared types, error model, wire schema, and configuration for pipetrack.
//!
//! This crate is the foundation depended on by all other pipetrack crates.
//! It provides:
//! - [`TrackerError`]: the unified error type
//! - Domain types ([`Session`], [`Stage`], [`MonitoringSnapshot`], [`ErrorRecord`])
//! - [`wire`]: the validating parse step for backend payloads
//! - Configuration ([`AppConfig`], [`TrackerConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;
pub mod wire;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DisplayConfig, MIN_POLL_INTERVAL_MS, PollingConfig, ServerConfig, ThemeName,
    TrackerConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    parse_base_url,
};
pub use error::{ErrorKind, Result, TrackerError};
pub use types::{
    Ack, ControlAction, ErrorRecord, ErrorsSummary, MonitorStatus, MonitoringSnapshot, Rates,
    Session, SessionStatus, Stage, StageId, StageMonitor, StageStatus, StageTarget, Totals,
};
