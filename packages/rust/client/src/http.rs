//! JSON-over-HTTP implementation of [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use pipetrack_shared::{
    Ack, ControlAction, MonitoringSnapshot, Result, Session, StageTarget, TrackerConfig,
    TrackerError, wire,
};

use crate::Transport;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

/// Default timeout in seconds when none is configured.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for backend requests.
const USER_AGENT: &str = concat!("pipetrack/", env!("CARGO_PKG_VERSION"));

/// Options for building an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportOptions {
    /// Per-request timeout. A timeout is reported like any other transport failure.
    pub timeout: Duration,
}

impl Default for HttpTransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl From<&TrackerConfig> for HttpTransportOptions {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ControlRequest<'a> {
    job_id: &'a str,
    action: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StageRequest<'a> {
    session_id: &'a str,
    stage: &'a str,
    action: &'a str,
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    /// Create a transport for the backend at `base`.
    pub fn new(base: Url, opts: &HttpTransportOptions) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(TrackerError::config(format!(
                "base URL cannot carry a path: {base}"
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(opts.timeout)
            .build()
            .map_err(|e| TrackerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base })
    }

    /// Build a transport from resolved runtime config.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), &HttpTransportOptions::from(config))
    }

    /// Base URL plus percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TrackerError::config(format!("base URL cannot carry a path: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_text(&self, url: Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TrackerError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let body = read_body(&url, response).await?;
        if !status.is_success() {
            return Err(TrackerError::Network(format!("{url}: HTTP {status}")));
        }
        Ok(body)
    }

    async fn post_ack<B: Serialize + ?Sized>(&self, url: Url, body: Option<&B>) -> Result<Ack> {
        let mut request = self.client.post(url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TrackerError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let text = read_body(&url, response).await?;
        if !status.is_success() {
            return Err(non_success(&url, status, &text));
        }
        wire::parse_ack_response(&text)
    }
}

async fn read_body(url: &Url, response: reqwest::Response) -> Result<String> {
    response
        .text()
        .await
        .map_err(|e| TrackerError::Network(format!("{url}: failed to read body: {e}")))
}

/// A non-2xx command response is a domain error only if the body is an
/// explicit `success: false` envelope; otherwise it is a transport failure.
fn non_success(url: &Url, status: StatusCode, body: &str) -> TrackerError {
    match wire::rejection_message(body) {
        Some(message) => {
            debug!(%url, %status, "command rejected with non-2xx status");
            TrackerError::domain(message)
        }
        None => TrackerError::Network(format!("{url}: HTTP {status}")),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all)]
    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let url = self.endpoint(&["api", "sessions"])?;
        let body = self.get_text(url).await?;
        wire::parse_sessions_response(&body)
    }

    #[instrument(skip(self))]
    async fn get_session(&self, session_id: &str) -> Result<Session> {
        let url = self.endpoint(&["api", "sessions", session_id])?;
        let body = self.get_text(url).await?;
        wire::parse_session_response(&body)
    }

    #[instrument(skip(self))]
    async fn monitoring(&self, session_id: &str) -> Result<MonitoringSnapshot> {
        let mut url = self.endpoint(&["api", "monitoring", "dashboard"])?;
        url.query_pairs_mut().append_pair("jobId", session_id);
        let body = self.get_text(url).await?;
        wire::parse_monitoring_response(&body)
    }

    #[instrument(skip(self, action), fields(action = %action))]
    async fn control(&self, session_id: &str, action: ControlAction) -> Result<Ack> {
        let url = self.endpoint(&["api", "monitoring", "control"])?;
        let body = ControlRequest {
            job_id: session_id,
            action: action.as_str(),
        };
        self.post_ack(url, Some(&body)).await
    }

    #[instrument(skip(self, stage), fields(stage = %stage))]
    async fn start_stage(&self, session_id: &str, stage: StageTarget) -> Result<Ack> {
        let url = self.endpoint(&["api", "stages", "control"])?;
        let body = StageRequest {
            session_id,
            stage: stage.wire_value(),
            action: "start",
        };
        self.post_ack(url, Some(&body)).await
    }

    #[instrument(skip(self))]
    async fn retry_error(&self, session_id: &str, error_id: &str) -> Result<Ack> {
        let url = self.endpoint(&["api", "sessions", session_id, "errors", error_id, "retry"])?;
        self.post_ack::<()>(url, None).await
    }
}
