//! # Dashboard controller
//!
//! [`Dashboard`] is the composition root a page instantiates. It wires a
//! [`PollingScheduler`] to a render callback: every update from any source rebuilds
//! the [`Snapshot`] and hands it, together with the page's
//! [`ResourceLifecycleManager`], to the renderer.
//!
//! ```rust,no_run
//! use dashboard_provider::prelude::*;
//! use std::time::Duration;
//!
//! # async fn page() -> Result<(), DashboardError> {
//! let dashboard = Dashboard::new(|snapshot: &Snapshot<f64>, _resources| {
//!     if let Some(entry) = snapshot.get("idx") {
//!         println!("index {} (stale: {})", entry.value, entry.stale);
//!     }
//! });
//! dashboard.on_error(|err| eprintln!("{err}"));
//! dashboard.start([SourceDescriptor::new(
//!     "idx",
//!     Duration::from_secs(5),
//!     Duration::from_secs(10),
//!     || async { Ok(100.0) },
//! )])?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Lifecycle
//!
//! Each `start` opens a new generation and each `stop` closes it. Updates produced
//! under an old generation, e.g. by a fetch that was in flight during `stop`, are
//! dropped. `stop` also disposes every managed resource. Dropping the dashboard stops
//! it.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    clock::{Clock, Timer, TokioClock},
    config::SchedulerConfig,
    errors::DashboardError,
    resources::ResourceLifecycleManager,
    scheduler::{Listener, PollingScheduler, SourceEvent, SourceUpdate},
    snapshot::{Snapshot, SnapshotEntry},
    source::{SourceDescriptor, SourceRegistry},
    types::SourceValueBounds,
};

type RenderFn<V> = Box<dyn Fn(&Snapshot<V>, &ResourceLifecycleManager) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&DashboardError) + Send + Sync>;

struct ControllerState<V> {
    generation: u64,
    running: bool,
    keys: Vec<String>,
    entries: BTreeMap<String, SnapshotEntry<V>>,
    latest: Snapshot<V>,
}

struct DashboardInner<V, T> {
    scheduler: PollingScheduler<V, T>,
    resources: ResourceLifecycleManager,
    render: RenderFn<V>,
    // Serialises renders so a slower one never overwrites a newer snapshot.
    render_lock: Mutex<()>,
    error_handlers: Mutex<Vec<ErrorHandler>>,
    state: Mutex<ControllerState<V>>,
}

/// Page-level controller over a set of polled sources
pub struct Dashboard<V, T = TokioClock>
where
    V: SourceValueBounds,
    T: Clock + Timer,
{
    inner: Arc<DashboardInner<V, T>>,
}

impl<V: SourceValueBounds> Dashboard<V, TokioClock> {
    /// Create a dashboard with the default scheduler configuration
    pub fn new<R>(render: R) -> Self
    where
        R: Fn(&Snapshot<V>, &ResourceLifecycleManager) + Send + Sync + 'static,
    {
        Self::with_scheduler(PollingScheduler::new(SchedulerConfig::default()), render)
    }

    /// Create a dashboard with a custom scheduler configuration
    pub fn with_config<R>(config: SchedulerConfig, render: R) -> Result<Self, DashboardError>
    where
        R: Fn(&Snapshot<V>, &ResourceLifecycleManager) + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self::with_scheduler(PollingScheduler::new(config), render))
    }
}

impl<V, T> Dashboard<V, T>
where
    V: SourceValueBounds,
    T: Clock + Timer,
{
    /// Create a dashboard around an existing scheduler
    pub fn with_scheduler<R>(scheduler: PollingScheduler<V, T>, render: R) -> Self
    where
        R: Fn(&Snapshot<V>, &ResourceLifecycleManager) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DashboardInner {
                scheduler,
                resources: ResourceLifecycleManager::new(),
                render: Box::new(render),
                render_lock: Mutex::new(()),
                error_handlers: Mutex::new(Vec::new()),
                state: Mutex::new(ControllerState {
                    generation: 0,
                    running: false,
                    keys: Vec::new(),
                    entries: BTreeMap::new(),
                    latest: Snapshot::empty(0),
                }),
            }),
        }
    }

    /// Start polling `descriptors`, replacing whatever was running.
    ///
    /// Keys are checked for duplicates and timings validated before the previous run
    /// is stopped, so a rejected call leaves the dashboard as it was.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        &self,
        descriptors: impl IntoIterator<Item = SourceDescriptor<V>>,
    ) -> Result<(), DashboardError> {
        let registry = SourceRegistry::from_descriptors(descriptors)?;
        self.start_registry(&registry);
        Ok(())
    }

    /// Start polling every source of `registry`, replacing whatever was running
    pub fn start_registry(&self, registry: &SourceRegistry<V>) {
        if self.is_running() {
            self.stop();
        }

        let generation = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            state.running = true;
            state.keys = registry.keys().map(str::to_string).collect();
            state.entries.clear();
            state.latest = Snapshot::empty(state.generation);
            state.generation
        };

        crate::debug_log!(
            "▶️ [DASHBOARD] Starting {} sources (generation {})",
            registry.len(),
            generation
        );
        for descriptor in registry.iter() {
            let listener = self.listener(generation);
            self.inner.scheduler.start(descriptor.clone(), listener);
        }
    }

    /// Stop every source and dispose every managed resource.
    ///
    /// In-flight fetches are left to finish and fill the cache; their results are not
    /// rendered. Calling `stop` on a stopped dashboard is harmless.
    pub fn stop(&self) {
        let keys = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            state.running = false;
            state.entries.clear();
            state.latest = Snapshot::empty(state.generation);
            std::mem::take(&mut state.keys)
        };

        for key in &keys {
            self.inner.scheduler.stop(key);
        }
        self.inner.resources.dispose_all();
        if !keys.is_empty() {
            crate::debug_log!("⏹️ [DASHBOARD] Stopped {} sources", keys.len());
        }
    }

    /// Refetch `key`, or every source when `None`, ignoring cache freshness.
    ///
    /// Sources with a fetch in flight join it. Does nothing while stopped.
    pub fn force_refresh(&self, key: Option<&str>) {
        let known = {
            let state = self.inner.lock_state();
            state.running && key.is_none_or(|key| state.keys.iter().any(|k| k == key))
        };
        if !known {
            crate::debug_log!("🔄 [DASHBOARD] Ignoring refresh of {:?}", key);
            return;
        }
        self.inner.scheduler.force_refresh(key);
    }

    /// Register a handler for errors that leave a source without a value
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&DashboardError) + Send + Sync + 'static,
    {
        self.inner
            .error_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Drop the cached value of `key` so its next tick fetches
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.scheduler.cache().invalidate(key)
    }

    /// The most recently rendered snapshot
    pub fn snapshot(&self) -> Snapshot<V> {
        self.inner.lock_state().latest.clone()
    }

    pub fn resources(&self) -> &ResourceLifecycleManager {
        &self.inner.resources
    }

    pub fn scheduler(&self) -> &PollingScheduler<V, T> {
        &self.inner.scheduler
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock_state().generation
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }

    /// Keys of the sources of the current run, in registration order
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock_state().keys.clone()
    }

    fn listener(&self, generation: u64) -> Listener<V> {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |event: SourceEvent<V>| {
            if let Some(inner) = inner.upgrade() {
                inner.handle_event(generation, event);
            }
        })
    }
}

impl<V, T> Drop for Dashboard<V, T>
where
    V: SourceValueBounds,
    T: Clock + Timer,
{
    fn drop(&mut self) {
        self.stop();
    }
}

impl<V, T> DashboardInner<V, T>
where
    V: SourceValueBounds,
    T: Clock + Timer,
{
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ControllerState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, generation: u64, event: SourceEvent<V>) {
        let error = {
            let mut state = self.lock_state();
            if !state.running || state.generation != generation {
                crate::debug_log!(
                    "🚫 [DASHBOARD] Discarding update for '{}' from generation {}",
                    event.key,
                    generation
                );
                return;
            }

            let error = match event.update {
                SourceUpdate::Value(entry) => {
                    state.entries.insert(event.key, entry);
                    None
                }
                SourceUpdate::Unavailable(error) => {
                    state.entries.remove(&event.key);
                    Some(error)
                }
            };
            state.latest = Snapshot::new(generation, state.entries.clone());
            error
        };

        if let Some(error) = error {
            self.report(&error);
        }
        self.render(generation);
    }

    fn report(&self, error: &DashboardError) {
        let handlers = self
            .error_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if handlers.is_empty() {
            crate::warn_log!("unhandled dashboard error: {}", error);
        }
        for handler in handlers {
            handler(error);
        }
    }

    fn render(&self, generation: u64) {
        let _guard = self.render_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = {
            let state = self.lock_state();
            if state.generation != generation {
                return;
            }
            state.latest.clone()
        };
        (self.render)(&snapshot, &self.resources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn source(key: &str, value: u32) -> SourceDescriptor<u32> {
        SourceDescriptor::new(
            key,
            Duration::from_secs(5),
            Duration::from_secs(10),
            move || async move { Ok(value) },
        )
    }

    fn recording_dashboard() -> (Dashboard<u32>, Arc<Mutex<Vec<Snapshot<u32>>>>) {
        let renders = Arc::new(Mutex::new(Vec::new()));
        let sink = renders.clone();
        let dashboard = Dashboard::with_config(
            SchedulerConfig::new().without_jitter(),
            move |snapshot: &Snapshot<u32>, _: &ResourceLifecycleManager| {
                sink.lock().unwrap().push(snapshot.clone());
            },
        )
        .unwrap();
        (dashboard, renders)
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_update_renders_merged_snapshot() {
        let (dashboard, renders) = recording_dashboard();
        dashboard.start([source("idx", 1), source("sdr", 2)]).unwrap();
        settle().await;

        let renders = renders.lock().unwrap();
        assert_eq!(renders.len(), 2);
        let last = renders.last().unwrap();
        assert_eq!(last.value("idx"), Some(&1));
        assert_eq!(last.value("sdr"), Some(&2));
        assert_eq!(last.generation(), dashboard.generation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_keys_rejected_without_disturbing_run() {
        let (dashboard, _) = recording_dashboard();
        dashboard.start([source("idx", 1)]).unwrap();
        let generation = dashboard.generation();

        let err = dashboard
            .start([source("a", 1), source("a", 2)])
            .unwrap_err();
        assert_eq!(err, DashboardError::DuplicateSource { key: "a".into() });
        assert_eq!(dashboard.generation(), generation);
        assert_eq!(dashboard.keys(), vec!["idx".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_error_fires_once_per_exhausted_failure() {
        let (dashboard, renders) = recording_dashboard();
        let errors = Arc::new(AtomicU32::new(0));
        let counter = errors.clone();
        dashboard.on_error(move |err| {
            assert_eq!(err.source_key(), Some("sdr"));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let failing = SourceDescriptor::new(
            "sdr",
            Duration::from_secs(5),
            Duration::from_secs(10),
            || async { Err::<u32, _>(FetchError::transport("offline")) },
        );
        dashboard.start([source("idx", 1), failing]).unwrap();
        settle().await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        let last = dashboard.snapshot();
        assert_eq!(last.value("idx"), Some(&1));
        assert!(!last.contains("sdr"));
        assert_eq!(renders.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disposes_resources_and_ignores_refresh() {
        let (dashboard, renders) = recording_dashboard();
        dashboard.start([source("idx", 1)]).unwrap();
        settle().await;

        let task = tokio::spawn(std::future::pending::<()>());
        let abort = task.abort_handle();
        dashboard
            .resources()
            .create_or_update(
                "poll",
                crate::resources::ResourceKind::Timer,
                move |_: Option<&mut tokio::task::AbortHandle>| Some(abort),
            )
            .unwrap();

        dashboard.stop();
        assert!(!dashboard.is_running());
        assert!(dashboard.resources().is_empty());
        assert_eq!(dashboard.scheduler().pending_timers(), 0);
        assert!(task.await.unwrap_err().is_cancelled());

        let before = renders.lock().unwrap().len();
        dashboard.force_refresh(None);
        settle().await;
        assert_eq!(renders.lock().unwrap().len(), before);
        assert!(dashboard.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timers() {
        let (dashboard, _) = recording_dashboard();
        dashboard.start([source("idx", 1)]).unwrap();
        settle().await;

        let scheduler = dashboard.scheduler().clone();
        assert_eq!(scheduler.pending_timers(), 1);
        drop(dashboard);
        assert_eq!(scheduler.pending_timers(), 0);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Dashboard::<u32>::with_config(
            SchedulerConfig::new().with_jitter_ratio(-0.5),
            |_: &Snapshot<u32>, _: &ResourceLifecycleManager| {},
        );
        assert!(matches!(result, Err(DashboardError::Config(_))));
    }
}
