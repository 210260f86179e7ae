//! TUI screen definitions.
//!
//! Screens render from a [`pipetrack_core::StoreView`] snapshot and turn
//! key presses into [`Intent`]s; the app executes intents against the
//! tracker.

mod detail;
mod sessions;

use std::fmt;

use pipetrack_shared::{ControlAction, StageTarget};

pub(crate) use detail::{Controls, DetailScreen, Notice};
pub(crate) use sessions::SessionsScreen;

/// Screen identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScreenId {
    Sessions,
    Detail,
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sessions => write!(f, "Sessions"),
            Self::Detail => write!(f, "Session"),
        }
    }
}

/// What a key press asks the app to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Intent {
    Open(String),
    Back,
    Control(ControlAction),
    StartStage(StageTarget),
    Retry(String),
    /// The key maps to a control that is currently disabled.
    Unavailable(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use pipetrack_core::{ListAvailability, StoreView};
    use pipetrack_shared::Session;

    /// A loaded list with nothing selected.
    pub(crate) fn view_with(sessions: Vec<Session>) -> StoreView {
        StoreView {
            sessions,
            availability: ListAvailability::Ready,
            list_error: None,
            list_updated_at: None,
            selected: None,
            detail: None,
            monitoring: None,
            validation: None,
            detail_error: None,
            monitoring_error: None,
            selected_updated_at: None,
        }
    }
}
