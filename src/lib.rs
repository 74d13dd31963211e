#![doc = include_str!("../README.md")]

// Core modules
pub mod cache;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod dedup;
pub mod errors;
mod log_utils;
pub mod resources;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod state;
pub mod types;

// Dioxus bridge
#[cfg(feature = "dioxus")]
pub mod hooks;

// Re-export commonly used items at crate root for convenience
pub use dashboard::Dashboard;
pub use errors::{DashboardError, FetchError};

pub mod prelude {
    //! The prelude exports the types a dashboard page needs.

    // The controller and what it renders
    pub use crate::dashboard::Dashboard;
    pub use crate::snapshot::{EntryOrigin, Snapshot, SnapshotEntry};

    // Declaring sources
    pub use crate::config::{SchedulerConfig, SourceTiming};
    pub use crate::source::{HttpClient, Method, RequestConfig, SourceDescriptor, SourceRegistry};

    // Managed visual resources
    pub use crate::resources::{ManagedHandle, ResourceKind, ResourceLifecycleManager};

    // Lower-level building blocks
    pub use crate::cache::TtlCache;
    pub use crate::dedup::RequestDeduplicator;
    pub use crate::scheduler::PollingScheduler;
    pub use crate::state::SourceState;

    // Error types
    pub use crate::errors::{DashboardError, FetchError, HttpError, ResourceError};

    // Dioxus hook
    #[cfg(feature = "dioxus")]
    pub use crate::hooks::{UseDashboard, use_dashboard};
}
