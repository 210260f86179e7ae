//! In-memory cache of known sessions and the selected session's live state.
//!
//! The store is the single mutable resource of the tracker. Every fetch and
//! every command funnels through it:
//! - at most one fetch per resource (list, detail, monitoring) is in flight;
//!   a second caller joins the pending one instead of issuing another request
//! - responses are tagged with the selection generation and a fetch ticket;
//!   replies for an old selection, or older than what is already shown, are
//!   discarded
//! - failures keep the last-known-good data and only set an error flag

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use pipetrack_client::Transport;
use pipetrack_shared::{MonitoringSnapshot, Result, Session, TrackerError};

use crate::control::RunState;
use crate::error_monitor::ErrorSummary;
use crate::progress::DerivedProgress;
use crate::stage::{self, ValidationReport};

type SharedFetch = Shared<BoxFuture<'static, Result<()>>>;

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Public read model
// ---------------------------------------------------------------------------

/// The currently observed session and the generation it was selected in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub session_id: String,
    pub generation: u64,
}

/// Whether the session list has anything to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListAvailability {
    /// No list fetch has finished yet.
    Loading,
    /// At least one list fetch succeeded.
    Ready,
    /// List fetches have failed and none has ever succeeded.
    Unavailable,
}

/// Cloneable snapshot of everything a view needs to render.
#[derive(Debug, Clone)]
pub struct StoreView {
    pub sessions: Vec<Session>,
    pub availability: ListAvailability,
    pub list_error: Option<TrackerError>,
    pub list_updated_at: Option<DateTime<Utc>>,
    pub selected: Option<String>,
    pub detail: Option<Session>,
    pub monitoring: Option<MonitoringSnapshot>,
    pub validation: Option<ValidationReport>,
    pub detail_error: Option<TrackerError>,
    pub monitoring_error: Option<TrackerError>,
    pub selected_updated_at: Option<DateTime<Utc>>,
}

impl StoreView {
    /// Backend-reported run flags for the selected session.
    pub fn run_state(&self) -> Option<RunState> {
        self.monitoring.as_ref().map(RunState::from_monitoring)
    }

    /// Derived percentages for the selected session.
    pub fn progress(&self) -> Option<DerivedProgress> {
        self.detail
            .as_ref()
            .map(|s| DerivedProgress::compute(s, self.monitoring.as_ref()))
    }

    /// Categorized errors for the selected session.
    pub fn error_summary(&self) -> Option<ErrorSummary> {
        self.monitoring
            .as_ref()
            .map(|m| ErrorSummary::from_snapshot(&m.errors))
    }

    /// The transient error to show in the banner, if any.
    pub fn banner(&self) -> Option<&TrackerError> {
        self.list_error
            .as_ref()
            .or(self.detail_error.as_ref())
            .or(self.monitoring_error.as_ref())
    }

    /// Look a session up in the list.
    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    List,
    Detail,
    Monitoring,
}

struct Pending {
    generation: u64,
    future: SharedFetch,
}

#[derive(Default)]
struct InFlight {
    list: Option<Pending>,
    detail: Option<Pending>,
    monitoring: Option<Pending>,
}

impl InFlight {
    fn slot(&mut self, resource: Resource) -> &mut Option<Pending> {
        match resource {
            Resource::List => &mut self.list,
            Resource::Detail => &mut self.detail,
            Resource::Monitoring => &mut self.monitoring,
        }
    }
}

/// Bookkeeping for one fetched resource.
#[derive(Debug, Clone, Default)]
struct ResourceState {
    /// Ticket of the response currently displayed.
    applied_ticket: u64,
    last_success: Option<DateTime<Utc>>,
    error: Option<TrackerError>,
}

impl ResourceState {
    /// Returns false if a newer response is already applied.
    fn accept(&mut self, ticket: u64) -> bool {
        if ticket <= self.applied_ticket {
            return false;
        }
        self.applied_ticket = ticket;
        self.last_success = Some(Utc::now());
        self.error = None;
        true
    }

    /// Returns false if a newer response is already applied.
    fn fail(&mut self, ticket: u64, error: TrackerError) -> bool {
        if ticket <= self.applied_ticket {
            return false;
        }
        self.error = Some(error);
        true
    }
}

#[derive(Default)]
struct StoreState {
    sessions: Vec<Session>,
    list: ResourceState,
    selection: Option<Selection>,
    next_generation: u64,
    detail: Option<Session>,
    detail_state: ResourceState,
    monitoring: Option<MonitoringSnapshot>,
    monitoring_state: ResourceState,
    validation: Option<ValidationReport>,
}

impl StoreState {
    fn is_current(&self, generation: u64) -> bool {
        self.selection
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    fn reset_selected(&mut self) {
        self.detail = None;
        self.detail_state = ResourceState::default();
        self.monitoring = None;
        self.monitoring_state = ResourceState::default();
        self.validation = None;
    }

    fn availability(&self) -> ListAvailability {
        match (&self.list.last_success, &self.list.error) {
            (Some(_), _) => ListAvailability::Ready,
            (None, Some(_)) => ListAvailability::Unavailable,
            (None, None) => ListAvailability::Loading,
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    state: Mutex<StoreState>,
    in_flight: Mutex<InFlight>,
    tickets: AtomicU64,
    revision: watch::Sender<u64>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }

    fn notify(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().is_current(generation)
    }

    /// Return the pending fetch for `resource` if one exists for this
    /// generation, otherwise start `work` and register it.
    fn join_or_start<F, Fut>(self: &Arc<Self>, resource: Resource, generation: u64, work: F) -> SharedFetch
    where
        F: FnOnce(Arc<Inner>, u64) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut in_flight = lock(&self.in_flight);
        let slot = in_flight.slot(resource);

        if let Some(pending) = slot.as_ref().filter(|p| p.generation == generation) {
            debug!(?resource, generation, "joining in-flight fetch");
            return pending.future.clone();
        }

        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
        let fetch = work(Arc::clone(self), ticket);
        let inner = Arc::clone(self);
        let future = async move {
            let result = fetch.await;
            inner.finish(resource, generation);
            result
        }
        .boxed()
        .shared();

        *slot = Some(Pending {
            generation,
            future: future.clone(),
        });
        future
    }

    fn finish(&self, resource: Resource, generation: u64) {
        let mut in_flight = lock(&self.in_flight);
        let slot = in_flight.slot(resource);
        if slot.as_ref().is_some_and(|p| p.generation == generation) {
            *slot = None;
        }
    }

    fn apply_list(&self, ticket: u64, result: Result<Vec<Session>>) -> Result<()> {
        let mut state = self.state();
        let outcome = match result {
            Ok(sessions) => {
                if state.list.accept(ticket) {
                    debug!(count = sessions.len(), "session list refreshed");
                    state.sessions = sessions;
                } else {
                    debug!(ticket, "discarding out-of-order session list");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "session list refresh failed");
                state.list.fail(ticket, e.clone());
                Err(e)
            }
        };
        drop(state);
        self.notify();
        outcome
    }

    fn apply_detail(&self, generation: u64, ticket: u64, result: Result<Session>) -> Result<()> {
        let mut state = self.state();
        if !state.is_current(generation) {
            debug!(generation, "discarding session detail for a previous selection");
            return Ok(());
        }

        let outcome = match result {
            Ok(session) => {
                if state.detail_state.accept(ticket) {
                    let report = stage::validate(&session);
                    for violation in &report.violations {
                        warn!(
                            session_id = %session.session_id,
                            %violation,
                            "backend reported stages out of order"
                        );
                    }
                    state.validation = Some(report);
                    state.detail = Some(session);
                } else {
                    debug!(ticket, "discarding out-of-order session detail");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "session detail refresh failed");
                state.detail_state.fail(ticket, e.clone());
                Err(e)
            }
        };
        drop(state);
        self.notify();
        outcome
    }

    fn apply_monitoring(
        &self,
        generation: u64,
        ticket: u64,
        result: Result<MonitoringSnapshot>,
    ) -> Result<()> {
        let mut state = self.state();
        if !state.is_current(generation) {
            debug!(generation, "discarding monitoring snapshot for a previous selection");
            return Ok(());
        }

        let outcome = match result {
            Ok(snapshot) => {
                if state.monitoring_state.accept(ticket) {
                    // Replace wholesale so no field survives from an older snapshot.
                    state.monitoring = Some(snapshot);
                } else {
                    debug!(ticket, "discarding out-of-order monitoring snapshot");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "monitoring refresh failed");
                state.monitoring_state.fail(ticket, e.clone());
                Err(e)
            }
        };
        drop(state);
        self.notify();
        outcome
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Shared handle to the tracker's state. Cheap to clone.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                transport,
                state: Mutex::new(StoreState::default()),
                in_flight: Mutex::new(InFlight::default()),
                tickets: AtomicU64::new(0),
                revision,
            }),
        }
    }

    /// Receiver whose value changes every time the store changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Snapshot the current state for rendering.
    pub fn view(&self) -> StoreView {
        let state = self.inner.state();
        StoreView {
            sessions: state.sessions.clone(),
            availability: state.availability(),
            list_error: state.list.error.clone(),
            list_updated_at: state.list.last_success,
            selected: state.selection.as_ref().map(|s| s.session_id.clone()),
            detail: state.detail.clone(),
            monitoring: state.monitoring.clone(),
            validation: state.validation.clone(),
            detail_error: state.detail_state.error.clone(),
            monitoring_error: state.monitoring_state.error.clone(),
            selected_updated_at: state.monitoring_state.last_success.or(state.detail_state.last_success),
        }
    }

    pub fn selection(&self) -> Option<Selection> {
        self.inner.state().selection.clone()
    }

    pub fn selected_id(&self) -> Option<String> {
        self.selection().map(|s| s.session_id)
    }

    /// Observe a session. Selecting a different session starts a new
    /// generation and drops the old session's detail and monitoring data;
    /// re-selecting the current one changes nothing.
    pub fn select_session(&self, session_id: impl Into<String>) -> Selection {
        let session_id = session_id.into();
        let mut state = self.inner.state();

        if let Some(current) = state.selection.as_ref().filter(|s| s.session_id == session_id) {
            return current.clone();
        }

        state.next_generation += 1;
        let selection = Selection {
            session_id,
            generation: state.next_generation,
        };
        debug!(session_id = %selection.session_id, generation = selection.generation, "session selected");
        state.selection = Some(selection.clone());
        state.reset_selected();
        drop(state);

        self.inner.notify();
        selection
    }

    /// Stop observing any session. In-flight replies are discarded.
    pub fn clear_selection(&self) {
        let mut state = self.inner.state();
        if state.selection.take().is_none() {
            return;
        }
        state.reset_selected();
        drop(state);
        self.inner.notify();
    }

    /// Whether any fetch is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        let in_flight = lock(&self.inner.in_flight);
        in_flight.list.is_some() || in_flight.detail.is_some() || in_flight.monitoring.is_some()
    }

    /// Re-fetch the session list, or join the fetch already in flight.
    #[instrument(skip_all)]
    pub async fn refresh_list(&self) -> Result<()> {
        let fetch = self
            .inner
            .join_or_start(Resource::List, 0, |inner, ticket| async move {
                let result = inner.transport.list_sessions().await;
                inner.apply_list(ticket, result)
            });
        fetch.await
    }

    /// Re-fetch the selected session's detail, then its monitoring snapshot.
    ///
    /// Monitoring is only requested after the detail fetch succeeded.
    #[instrument(skip_all)]
    pub async fn refresh_selected(&self) -> Result<()> {
        let selection = self.selection().ok_or(TrackerError::NoSelection)?;
        self.refresh_detail(&selection).await?;
        self.refresh_monitoring(&selection).await
    }

    async fn refresh_detail(&self, selection: &Selection) -> Result<()> {
        let generation = selection.generation;
        let id = selection.session_id.clone();
        let fetch = self
            .inner
            .join_or_start(Resource::Detail, generation, move |inner, ticket| async move {
                let result = inner.transport.get_session(&id).await;
                inner.apply_detail(generation, ticket, result)
            });
        fetch.await
    }

    async fn refresh_monitoring(&self, selection: &Selection) -> Result<()> {
        let generation = selection.generation;
        if !self.inner.is_current(generation) {
            return Ok(());
        }
        let id = selection.session_id.clone();
        let fetch = self
            .inner
            .join_or_start(Resource::Monitoring, generation, move |inner, ticket| async move {
                let result = inner.transport.monitoring(&id).await;
                inner.apply_monitoring(generation, ticket, result)
            });
        fetch.await
    }

    /// Best-known state of a session: the selected detail if it is this
    /// session, otherwise its list entry.
    pub fn session_for(&self, session_id: &str) -> Option<Session> {
        let state = self.inner.state();
        let selected = state
            .selection
            .as_ref()
            .is_some_and(|s| s.session_id == session_id);
        if selected {
            if let Some(detail) = state.detail.as_ref() {
                return Some(detail.clone());
            }
        }
        state
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    /// Backend-reported run flags for a session. Only the selected session
    /// has a monitoring snapshot; for any other session this is `None`.
    pub fn run_state_for(&self, session_id: &str) -> Option<RunState> {
        let state = self.inner.state();
        let selected = state
            .selection
            .as_ref()
            .is_some_and(|s| s.session_id == session_id);
        if !selected {
            return None;
        }
        state.monitoring.as_ref().map(RunState::from_monitoring)
    }

    /// The selected session's monitoring snapshot, if loaded.
    pub fn monitoring(&self) -> Option<MonitoringSnapshot> {
        self.inner.state().monitoring.clone()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("selection", &self.selection())
            .finish_non_exhaustive()
    }
}
