//! Dioxus bridge for [`Dashboard`]
//!
//! [`use_dashboard`] owns a dashboard for the lifetime of the calling component and
//! publishes every rendered snapshot into a [`Signal`], so components re-render when
//! any source updates. The dashboard is stopped when the component unmounts.
//!
//! ```rust,no_run
//! use dashboard_provider::prelude::*;
//! use dioxus::prelude::*;
//! use std::time::Duration;
//!
//! #[component]
//! fn Ticker() -> Element {
//!     let dashboard = use_dashboard(SchedulerConfig::default(), || {
//!         vec![SourceDescriptor::new(
//!             "idx",
//!             Duration::from_secs(5),
//!             Duration::from_secs(10),
//!             || async { Ok(100.0_f64) },
//!         )]
//!     });
//!     let _latest = dashboard.snapshot().read().value("idx").copied();
//!     rsx! {}
//! }
//! ```

use std::rc::Rc;

use dioxus::prelude::*;
use futures::{StreamExt, channel::mpsc};

use crate::{
    config::SchedulerConfig,
    dashboard::Dashboard,
    errors::DashboardError,
    resources::ResourceLifecycleManager,
    scheduler::PollingScheduler,
    snapshot::Snapshot,
    source::SourceDescriptor,
    types::SourceValueBounds,
};

/// Handle returned by [`use_dashboard`]
pub struct UseDashboard<V: SourceValueBounds> {
    snapshot: Signal<Snapshot<V>>,
    error: Signal<Option<DashboardError>>,
    dashboard: Rc<Dashboard<V>>,
}

impl<V: SourceValueBounds> Clone for UseDashboard<V> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot,
            error: self.error,
            dashboard: self.dashboard.clone(),
        }
    }
}

impl<V: SourceValueBounds> UseDashboard<V> {
    /// Signal holding the latest snapshot
    pub fn snapshot(&self) -> Signal<Snapshot<V>> {
        self.snapshot
    }

    /// Signal holding the most recent error, if any
    pub fn error(&self) -> Signal<Option<DashboardError>> {
        self.error
    }

    pub fn force_refresh(&self, key: Option<&str>) {
        self.dashboard.force_refresh(key);
    }

    pub fn dashboard(&self) -> &Dashboard<V> {
        &self.dashboard
    }
}

/// Run a dashboard over the sources returned by `sources` while the component is mounted.
///
/// `sources` is called once, on first render. An invalid `config` is reported through
/// [`UseDashboard::error`] and the defaults are used instead; a rejected source set is
/// reported the same way and nothing is started.
///
/// Requires a tokio runtime, as every desktop and server Dioxus renderer provides.
pub fn use_dashboard<V, F>(config: SchedulerConfig, sources: F) -> UseDashboard<V>
where
    V: SourceValueBounds,
    F: FnOnce() -> Vec<SourceDescriptor<V>>,
{
    let mut snapshot = use_signal(|| Snapshot::empty(0));
    let mut error = use_signal(|| None::<DashboardError>);

    let dashboard = use_hook(move || {
        // The dashboard renders from tokio tasks; signals are only touched on the UI task.
        let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded::<Snapshot<V>>();
        let (error_tx, mut error_rx) = mpsc::unbounded::<DashboardError>();

        let config = match config.validate() {
            Ok(()) => config,
            Err(err) => {
                let _ = error_tx.unbounded_send(err.into());
                SchedulerConfig::default()
            }
        };

        let dashboard = Rc::new(Dashboard::with_scheduler(
            PollingScheduler::new(config),
            move |next: &Snapshot<V>, _: &ResourceLifecycleManager| {
                let _ = snapshot_tx.unbounded_send(next.clone());
            },
        ));

        let reporter = error_tx.clone();
        dashboard.on_error(move |err| {
            let _ = reporter.unbounded_send(err.clone());
        });
        if let Err(err) = dashboard.start(sources()) {
            crate::warn_log!("dashboard failed to start: {}", err);
            let _ = error_tx.unbounded_send(err);
        }

        spawn(async move {
            while let Some(next) = snapshot_rx.next().await {
                snapshot.set(next);
            }
        });
        spawn(async move {
            while let Some(err) = error_rx.next().await {
                error.set(Some(err));
            }
        });

        dashboard
    });

    use_drop({
        let dashboard = dashboard.clone();
        move || dashboard.stop()
    });

    UseDashboard {
        snapshot,
        error,
        dashboard,
    }
}
