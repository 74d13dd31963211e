//! State: per-source scheduler state for dashboard-provider
//!
//! Every source registered with a [`PollingScheduler`](crate::scheduler::PollingScheduler)
//! moves through `Idle -> Scheduled -> Fetching -> (Fulfilled | Failed) -> Scheduled ...`
//! and back to `Idle` when stopped.

use std::time::Duration;

use tokio::time::Instant;

use crate::errors::FetchError;

/// Where a source is in its refresh cycle
#[derive(Clone, PartialEq, Debug)]
pub enum SourceState {
    /// Not registered, or stopped
    Idle,
    /// Waiting for the next tick
    Scheduled { due: Instant },
    /// A fetch is in flight
    Fetching { since: Instant },
    /// The last fetch succeeded; the next tick is being armed
    Fulfilled { at: Instant },
    /// The last fetch failed; the next tick is being armed
    Failed { at: Instant, error: FetchError },
}

impl SourceState {
    /// Returns true if the source is not running
    pub fn is_idle(&self) -> bool {
        matches!(self, SourceState::Idle)
    }

    /// Returns true if the source is waiting for a timer
    pub fn is_scheduled(&self) -> bool {
        matches!(self, SourceState::Scheduled { .. })
    }

    /// Returns true if a fetch is in flight
    pub fn is_fetching(&self) -> bool {
        matches!(self, SourceState::Fetching { .. })
    }

    /// Returns the failure if the last fetch failed, None otherwise
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            SourceState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Returns the instant of the next tick, if one is armed
    pub fn due(&self) -> Option<Instant> {
        match self {
            SourceState::Scheduled { due } => Some(*due),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: &SourceState) -> bool {
        use SourceState::*;
        match (self, next) {
            (_, Idle) => true,
            (Idle, Scheduled { .. }) => true,
            (Scheduled { .. }, Fetching { .. } | Scheduled { .. }) => true,
            // A fresh cache hit settles a tick without fetching.
            (Scheduled { .. }, Fulfilled { .. }) => true,
            (Fetching { .. }, Fulfilled { .. } | Failed { .. }) => true,
            (Fulfilled { .. } | Failed { .. }, Scheduled { .. }) => true,
            _ => false,
        }
    }
}

/// Point-in-time view of one running source
#[derive(Clone, PartialEq, Debug)]
pub struct SourceStatus {
    pub state: SourceState,
    /// Consecutive transport/server failures since the last success
    pub consecutive_failures: u32,
    /// Delay the next tick was (or will be) armed with
    pub current_delay: Duration,
    /// The most recent fetch failure, cleared on success
    pub last_error: Option<FetchError>,
}
