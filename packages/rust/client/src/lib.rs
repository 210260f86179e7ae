//! Backend access for the pipeline tracker.
//!
//! [`Transport`] is the seam between the tracker core and the job-control
//! backend; [`HttpTransport`] implements it over JSON/HTTP with `reqwest`.
//! Tests elsewhere in the workspace swap in fakes.

mod http;

use async_trait::async_trait;
use pipetrack_shared::{
    Ack, ControlAction, MonitoringSnapshot, Result, Session, StageTarget,
};

pub use http::{HttpTransport, HttpTransportOptions};

/// Read and write API of the job-control backend.
///
/// Every method is one network round trip. Implementations report transport
/// failures as [`pipetrack_shared::TrackerError::Network`] or
/// [`pipetrack_shared::TrackerError::Parse`], and `success: false` answers
/// as [`pipetrack_shared::TrackerError::Domain`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET /api/sessions`
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// `GET /api/sessions/{id}`
    async fn get_session(&self, session_id: &str) -> Result<Session>;

    /// `GET /api/monitoring/dashboard?jobId={id}`
    async fn monitoring(&self, session_id: &str) -> Result<MonitoringSnapshot>;

    /// `POST /api/monitoring/control`
    async fn control(&self, session_id: &str, action: ControlAction) -> Result<Ack>;

    /// `POST /api/stages/control`
    async fn start_stage(&self, session_id: &str, stage: StageTarget) -> Result<Ack>;

    /// `POST /api/sessions/{id}/errors/{errorId}/retry`
    async fn retry_error(&self, session_id: &str, error_id: &str) -> Result<Ack>;
}
