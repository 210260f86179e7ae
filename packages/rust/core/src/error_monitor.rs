//! Categorized error counts and per-error retries.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use pipetrack_client::Transport;
use pipetrack_shared::{Ack, ErrorRecord, ErrorsSummary, Result, TrackerError};

use crate::control::InFlightSet;
use crate::store::SessionStore;

/// Error counts grouped for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_stage: BTreeMap<String, u64>,
    pub recent: Vec<ErrorRecord>,
}

impl ErrorSummary {
    /// Use the backend's counts where it sent them, otherwise count the
    /// recent records.
    pub fn from_snapshot(errors: &ErrorsSummary) -> Self {
        let by_type = if errors.by_type.is_empty() {
            tally(&errors.recent, |r| &r.error_type)
        } else {
            errors.by_type.clone()
        };
        let by_stage = if errors.by_stage.is_empty() {
            tally(&errors.recent, |r| &r.stage)
        } else {
            errors.by_stage.clone()
        };

        Self {
            total: errors.total.max(errors.recent.len() as u64),
            by_type,
            by_stage,
            recent: errors.recent.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.recent.is_empty()
    }

    pub fn record(&self, error_id: &str) -> Option<&ErrorRecord> {
        self.recent.iter().find(|r| r.id == error_id)
    }
}

fn tally<'a>(
    records: &'a [ErrorRecord],
    key: impl Fn(&'a ErrorRecord) -> &'a String,
) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(key(record).clone()).or_insert(0) += 1;
    }
    counts
}

/// Issues retries for individual pipeline errors.
///
/// A retry never removes the error locally. It disappears only when a fresh
/// monitoring snapshot stops listing it.
#[derive(Clone)]
pub struct ErrorMonitor {
    transport: Arc<dyn Transport>,
    store: SessionStore,
    in_flight: InFlightSet,
}

impl ErrorMonitor {
    pub fn new(transport: Arc<dyn Transport>, store: SessionStore) -> Self {
        Self {
            transport,
            store,
            in_flight: InFlightSet::default(),
        }
    }

    /// Summary for the selected session, if its monitoring is loaded.
    pub fn summary(&self) -> Option<ErrorSummary> {
        self.store
            .monitoring()
            .map(|m| ErrorSummary::from_snapshot(&m.errors))
    }

    pub fn is_retrying(&self, error_id: &str) -> bool {
        self.in_flight.contains(error_id)
    }

    /// Whether the retry control for this record should be enabled.
    pub fn can_retry(&self, record: &ErrorRecord) -> bool {
        record.retryable && !self.is_retrying(&record.id)
    }

    /// Ask the backend to retry one error.
    ///
    /// A second call for the same error while the first is pending fails
    /// with [`TrackerError::RetryInFlight`] and sends nothing. On success the
    /// selected session's detail and monitoring are re-fetched.
    #[instrument(skip(self))]
    pub async fn retry(&self, session_id: &str, error_id: &str) -> Result<Ack> {
        let _guard = self
            .in_flight
            .try_acquire(error_id)
            .ok_or_else(|| TrackerError::RetryInFlight {
                error_id: error_id.to_string(),
            })?;

        let ack = self
            .transport
            .retry_error(session_id, error_id)
            .await
            .map_err(|e| {
                warn!(error = %e, "retry request failed");
                e
            })?;
        info!("retry accepted");

        if self.store.selected_id().as_deref() == Some(session_id) {
            if let Err(e) = self.store.refresh_selected().await {
                warn!(error = %e, "refresh after retry failed");
            }
        }
        Ok(ack)
    }
}
