//! Session tracking for the three-stage company data pipeline.
//!
//! This crate observes pipeline sessions run by the job-control backend,
//! derives progress for display, and issues lifecycle commands:
//! - [`stage`] checks stage ordering and gates manual stage starts
//! - [`progress`] turns counts and rates into percentages and ETAs
//! - [`SessionStore`] caches the list and the selected session
//! - [`PollingScheduler`] refreshes the store on a fixed interval
//! - [`ControlDispatcher`] sends pause/resume/stop/restart and stage starts
//! - [`ErrorMonitor`] summarizes pipeline errors and retries them
//!
//! [`Tracker`] wires all of these to one [`pipetrack_client::Transport`].

pub mod control;
pub mod error_monitor;
pub mod progress;
pub mod scheduler;
pub mod stage;
pub mod store;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use control::{ControlDispatcher, RunState};
pub use error_monitor::{ErrorMonitor, ErrorSummary};
pub use progress::{
    DerivedProgress, ETA_SENTINEL, StageProgress, eta, format_eta, format_timestamp,
    overall_progress, stage_percentage,
};
pub use scheduler::{PollingScheduler, SchedulerStats};
pub use stage::{StageViolation, ValidationReport, can_trigger_stage, check_stage_trigger, validate};
pub use store::{ListAvailability, Selection, SessionStore, StoreView};
pub use tracker::Tracker;
