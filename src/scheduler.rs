//! Polling scheduler: drives each registered source through its refresh cycle.
//!
//! Each source owns at most one armed timer. When it fires the scheduler serves a fresh
//! cached value if there is one, otherwise it fetches through the
//! [`RequestDeduplicator`] and arms the next tick from the outcome:
//!
//! - success caches the value and waits one refresh interval
//! - transport and server failures back off exponentially (see [`Backoff`])
//! - parse failures wait one refresh interval
//!
//! Failed fetches are recovered in order: last good cached value (stale), the
//! descriptor's fallback (stale), or [`DashboardError::FallbackExhausted`].
//!
//! Every start of a source gets a new epoch. Timers and in-flight fetches remember the
//! epoch they were started under, so once a source is stopped nothing they produce is
//! delivered. Completed fetches are still written to the cache.

pub mod backoff;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use rand::Rng;
use tokio::time::Instant;

pub use backoff::Backoff;

use crate::{
    cache::TtlCache,
    clock::{CancelHandle, Clock, Timer, TokioClock},
    config::{MIN_TICK_INTERVAL, SchedulerConfig},
    dedup::RequestDeduplicator,
    errors::{DashboardError, FetchError},
    snapshot::{EntryOrigin, SnapshotEntry},
    source::SourceDescriptor,
    state::{SourceState, SourceStatus},
    types::SourceValueBounds,
};

/// Receives every update the scheduler produces for a source
pub type Listener<V> = Arc<dyn Fn(SourceEvent<V>) + Send + Sync>;

/// One update for one source
#[derive(Debug, Clone)]
pub struct SourceEvent<V> {
    pub key: String,
    pub update: SourceUpdate<V>,
}

/// What a completed tick produced
#[derive(Debug, Clone)]
pub enum SourceUpdate<V> {
    /// A value to show, fresh or stale
    Value(SnapshotEntry<V>),
    /// Nothing to show this cycle
    Unavailable(DashboardError),
}

impl<V> SourceUpdate<V> {
    pub fn entry(&self) -> Option<&SnapshotEntry<V>> {
        match self {
            Self::Value(entry) => Some(entry),
            Self::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Carries the token of the timer that fired
    Timer(u64),
    Manual,
    Forced,
}

struct SourceSlot<V> {
    descriptor: Arc<SourceDescriptor<V>>,
    listener: Listener<V>,
    state: SourceState,
    backoff: Backoff,
    last_error: Option<FetchError>,
    timer: Option<CancelHandle>,
    // Token of the armed timer; a timer whose token no longer matches was superseded.
    timer_token: u64,
    epoch: u64,
}

impl<V> SourceSlot<V> {
    fn transition(&mut self, next: SourceState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

struct SchedulerInner<V> {
    slots: HashMap<String, SourceSlot<V>>,
    next_epoch: u64,
}

/// Hands out timer tokens unique across the scheduler
#[derive(Clone, Default)]
struct TokenSource(Arc<AtomicU64>);

impl TokenSource {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Periodic refresher for a set of sources
///
/// Cloning yields another handle to the same scheduler. Timers hold a handle too, so a
/// scheduler with running sources stays alive until [`stop_all`](Self::stop_all).
#[derive(Clone)]
pub struct PollingScheduler<V, T = TokioClock> {
    inner: Arc<Mutex<SchedulerInner<V>>>,
    cache: TtlCache<V, T>,
    dedup: RequestDeduplicator<V>,
    timer: T,
    tokens: TokenSource,
    config: SchedulerConfig,
}

impl<V: SourceValueBounds> PollingScheduler<V, TokioClock> {
    /// Create a scheduler driven by the tokio clock with its own cache
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, TokioClock)
    }
}

impl<V, T> PollingScheduler<V, T>
where
    V: SourceValueBounds,
    T: Clock + Timer,
{
    /// Create a scheduler that reads time from and arms timers on `clock`
    pub fn with_clock(config: SchedulerConfig, clock: T) -> Self {
        Self::with_parts(
            config,
            TtlCache::with_clock(clock.clone()),
            RequestDeduplicator::new(),
            clock,
        )
    }

    /// Create a scheduler over an existing cache and deduplicator, e.g. to share them
    /// between dashboards
    pub fn with_parts(
        config: SchedulerConfig,
        cache: TtlCache<V, T>,
        dedup: RequestDeduplicator<V>,
        timer: T,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                slots: HashMap::new(),
                next_epoch: 0,
            })),
            cache,
            dedup,
            timer,
            tokens: TokenSource::default(),
            config,
        }
    }

    pub fn cache(&self) -> &TtlCache<V, T> {
        &self.cache
    }

    pub fn deduplicator(&self) -> &RequestDeduplicator<V> {
        &self.dedup
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Begin refreshing `descriptor`, delivering every update to `listener`.
    ///
    /// The first tick is delayed by a random jitter of up to `jitter_ratio` times the
    /// refresh interval. Starting a key that is already running restarts it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, descriptor: Arc<SourceDescriptor<V>>, listener: Listener<V>) {
        let key = descriptor.key().to_string();
        let delay = self.initial_delay(descriptor.refresh_interval());
        let backoff = Backoff::new(
            descriptor.refresh_interval(),
            self.config.max_backoff_factor(),
        );

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if let Some(previous) = inner.slots.remove(&key)
            && let Some(timer) = previous.timer
        {
            timer.cancel();
        }

        let epoch = inner.next_epoch;
        inner.next_epoch += 1;

        let mut slot = SourceSlot {
            descriptor,
            listener,
            state: SourceState::Idle,
            backoff,
            last_error: None,
            timer: None,
            timer_token: 0,
            epoch,
        };
        crate::log_schedule!("starting source '{}', first tick in {:?}", key, delay);
        self.arm(&mut slot, &key, delay);
        inner.slots.insert(key, slot);
    }

    /// Stop refreshing `key`. Returns false if it was not running.
    ///
    /// The armed timer is cancelled before this returns. A fetch already in flight is
    /// left to finish; its result is cached but not delivered.
    pub fn stop(&self, key: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        let Some(slot) = inner.slots.remove(key) else {
            return false;
        };
        if let Some(timer) = slot.timer {
            timer.cancel();
        }
        crate::debug_log!("⏹️ [SCHEDULER] Stopped source '{}'", key);
        true
    }

    /// Stop every running source
    pub fn stop_all(&self) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        let stopped = inner.slots.len();
        for (_, slot) in inner.slots.drain() {
            if let Some(timer) = slot.timer {
                timer.cancel();
            }
        }
        if stopped > 0 {
            crate::debug_log!("⏹️ [SCHEDULER] Stopped {} sources", stopped);
        }
        stopped
    }

    /// Run a tick for `key` now, honouring the cache. A no-op while a fetch is in flight.
    pub fn tick(&self, key: &str) {
        self.begin(key, Trigger::Manual);
    }

    /// Fetch `key`, or every running source when `None`, regardless of cache freshness.
    ///
    /// A source with a fetch already in flight joins it instead of fetching twice.
    pub fn force_refresh(&self, key: Option<&str>) {
        let keys: Vec<String> = match key {
            Some(key) => vec![key.to_string()],
            None => self.keys(),
        };
        for key in keys {
            self.begin(&key, Trigger::Forced);
        }
    }

    /// Current state of `key`; `Idle` if it is not running
    pub fn state(&self, key: &str) -> SourceState {
        self.with_slot(key, |slot| slot.state.clone())
            .unwrap_or(SourceState::Idle)
    }

    pub fn status(&self, key: &str) -> Option<SourceStatus> {
        self.with_slot(key, |slot| SourceStatus {
            state: slot.state.clone(),
            consecutive_failures: slot.backoff.streak(),
            current_delay: slot.backoff.current(),
            last_error: slot.last_error.clone(),
        })
    }

    /// Delay the next tick of `key` was armed with
    pub fn current_delay(&self, key: &str) -> Option<Duration> {
        self.with_slot(key, |slot| slot.backoff.current())
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.with_slot(key, |_| ()).is_some()
    }

    /// Keys of the running sources, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.slots.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of armed timers that have neither fired nor been cancelled
    pub fn pending_timers(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .slots
                    .values()
                    .filter(|slot| slot.timer.as_ref().is_some_and(|t| !t.is_finished()))
                    .count()
            })
            .unwrap_or(0)
    }

    fn with_slot<R>(&self, key: &str, f: impl FnOnce(&SourceSlot<V>) -> R) -> Option<R> {
        let inner = self.inner.lock().ok()?;
        inner.slots.get(key).map(f)
    }

    fn initial_delay(&self, interval: Duration) -> Duration {
        let ratio = self.config.jitter_ratio();
        if ratio.is_nan() || ratio <= 0.0 {
            return Duration::ZERO;
        }
        let ratio = ratio.min(1.0);
        interval.mul_f64(rand::thread_rng().gen_range(0.0..=ratio))
    }

    /// Arm the next tick of `slot`, replacing any timer it already has
    fn arm(&self, slot: &mut SourceSlot<V>, key: &str, delay: Duration) {
        if let Some(previous) = slot.timer.take() {
            previous.cancel();
        }
        let due = self.timer.now() + delay;
        let scheduler = self.clone();
        let owned_key = key.to_string();
        let token = self.tokens.next();
        let handle = self.timer.schedule(
            delay,
            async move { scheduler.begin(&owned_key, Trigger::Timer(token)) }.boxed(),
        );
        slot.timer = Some(handle);
        slot.timer_token = token;
        slot.transition(SourceState::Scheduled { due });
    }

    fn is_live(&self, key: &str, epoch: u64) -> bool {
        self.with_slot(key, |slot| slot.epoch == epoch)
            .unwrap_or(false)
    }

    fn begin(&self, key: &str, trigger: Trigger) {
        let (descriptor, epoch, started) = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            let Some(slot) = inner.slots.get_mut(key) else {
                return;
            };
            if let Trigger::Timer(token) = trigger {
                // Superseded by a re-arm or restart that raced with this timer firing.
                if slot.timer.is_none() || slot.timer_token != token {
                    return;
                }
                // This timer is the one running now; it must not cancel itself.
                slot.timer = None;
            }
            if slot.state.is_fetching() {
                crate::debug_log!(
                    "⏳ [SCHEDULER] Fetch already in flight for '{}', ignoring {:?} tick",
                    key,
                    trigger
                );
                return;
            }

            let now = self.timer.now();
            if trigger != Trigger::Forced
                && let Some(lookup) = self.cache.get_fresh_entry(key)
            {
                slot.transition(SourceState::Fulfilled { at: now });
                let delay = slot.backoff.base();
                self.arm(slot, key, delay);

                let event = SourceEvent {
                    key: key.to_string(),
                    update: SourceUpdate::Value(SnapshotEntry::new(
                        lookup.value,
                        lookup.stored_at,
                        EntryOrigin::Cached,
                    )),
                };
                let listener = slot.listener.clone();
                let epoch = slot.epoch;
                let scheduler = self.clone();
                // Delivered from a task so listeners never run inside a caller's tick.
                crate::clock::spawn(async move {
                    if scheduler.is_live(&event.key, epoch) {
                        listener(event);
                    }
                });
                return;
            }

            if let Some(previous) = slot.timer.take() {
                previous.cancel();
            }
            slot.transition(SourceState::Fetching { since: now });
            (slot.descriptor.clone(), slot.epoch, now)
        };

        let fetch = self.dedup.fetch_once(key, || descriptor.fetch());
        let scheduler = self.clone();
        crate::clock::spawn(async move {
            let result = fetch.await;
            scheduler.complete(&descriptor, epoch, started, result);
        });
    }

    fn complete(
        &self,
        descriptor: &SourceDescriptor<V>,
        epoch: u64,
        started: Instant,
        result: Result<V, FetchError>,
    ) {
        let key = descriptor.key();
        let (update, failure) = match result {
            Ok(value) => {
                let stored_at = self.cache.set(key, value.clone(), descriptor.ttl());
                crate::log_fetch_success!("fetched '{}'", key);
                let entry = SnapshotEntry::new(value, stored_at, EntryOrigin::Fetched);
                (Some(SourceUpdate::Value(entry)), None)
            }
            Err(error) => {
                crate::log_fetch_error!("fetch for '{}' failed: {}", key, error);
                (None, Some(error))
            }
        };

        if !self.is_live(key, epoch) {
            crate::debug_log!(
                "🚫 [SCHEDULER] Source '{}' stopped while fetching, result not delivered",
                key
            );
            return;
        }

        let update = match (update, &failure) {
            (Some(update), _) => update,
            (None, Some(error)) => self.recover(descriptor, error),
            (None, None) => return,
        };

        let delivery = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            let Some(slot) = inner.slots.get_mut(key) else {
                return;
            };
            if slot.epoch != epoch {
                return;
            }

            let now = self.timer.now();
            let delay = match failure {
                None => {
                    slot.last_error = None;
                    slot.transition(SourceState::Fulfilled { at: now });
                    slot.backoff.reset()
                }
                Some(error) => {
                    let delay = slot.backoff.on_failure(&error);
                    slot.last_error = Some(error.clone());
                    slot.transition(SourceState::Failed { at: now, error });
                    delay
                }
            };

            // Fixed-rate: measured from when the tick started, not from completion.
            let due = started + delay;
            let wait = if due > now {
                due - now
            } else {
                delay.max(MIN_TICK_INTERVAL)
            };
            crate::log_schedule!("next tick for '{}' in {:?}", key, wait);
            self.arm(slot, key, wait);

            (slot.listener.clone(), SourceEvent {
                key: key.to_string(),
                update,
            })
        };

        let (listener, event) = delivery;
        listener(event);
    }

    /// Pick what to show for a source whose fetch failed
    fn recover(&self, descriptor: &SourceDescriptor<V>, error: &FetchError) -> SourceUpdate<V> {
        let key = descriptor.key();
        if let Some(lookup) = self.cache.get_entry(key) {
            crate::log_fallback!("serving last good value for '{}'", key);
            return SourceUpdate::Value(SnapshotEntry::new(
                lookup.value,
                lookup.stored_at,
                EntryOrigin::StaleCache,
            ));
        }

        match descriptor.fallback() {
            Some(Ok(value)) => {
                crate::log_fallback!("serving fallback value for '{}'", key);
                SourceUpdate::Value(SnapshotEntry::new(
                    value,
                    self.timer.now(),
                    EntryOrigin::Fallback,
                ))
            }
            Some(Err(fallback_error)) => {
                #[cfg(not(feature = "tracing"))]
                let _ = &fallback_error;
                crate::warn_log!("fallback for '{}' failed: {}", key, fallback_error);
                SourceUpdate::Unavailable(DashboardError::FallbackExhausted {
                    key: key.to_string(),
                    cause: error.clone(),
                })
            }
            None => SourceUpdate::Unavailable(DashboardError::FallbackExhausted {
                key: key.to_string(),
                cause: error.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::oneshot;

    const TTL: Duration = Duration::from_secs(5);
    const INTERVAL: Duration = Duration::from_secs(10);

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn recorder() -> (Listener<u32>, Arc<Mutex<Vec<SourceEvent<u32>>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let listener: Listener<u32> = Arc::new(move |event: SourceEvent<u32>| {
            sink.lock().unwrap().push(event)
        });
        (listener, events)
    }

    /// Descriptor whose fetches return `script` in order, repeating the last result
    fn scripted(
        key: &str,
        script: Vec<Result<u32, FetchError>>,
    ) -> (Arc<SourceDescriptor<u32>>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let descriptor = SourceDescriptor::new(key, TTL, INTERVAL, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut script = script.lock().unwrap();
            let result = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            async move { result }
        });
        (Arc::new(descriptor), calls)
    }

    fn scheduler() -> PollingScheduler<u32> {
        PollingScheduler::new(SchedulerConfig::new().without_jitter())
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_jitter_stays_within_ratio() {
        let scheduler =
            PollingScheduler::<u32>::new(SchedulerConfig::new().with_jitter_ratio(0.5));
        let (listener, _) = recorder();
        let start = Instant::now();

        for n in 0..20 {
            let (descriptor, _) = scripted(&format!("src-{n}"), vec![Ok(n)]);
            scheduler.start(descriptor, listener.clone());
            let due = scheduler.state(&format!("src-{n}")).due().unwrap();
            assert!(due >= start);
            assert!(due <= start + INTERVAL / 2);
        }
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_caches_and_schedules_next_tick() {
        let scheduler = scheduler();
        let (listener, events) = recorder();
        let (descriptor, calls) = scripted("idx", vec![Ok(100)]);
        let start = Instant::now();

        scheduler.start(descriptor, listener);
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.cache().get("idx"), Some(100));
        assert_eq!(scheduler.state("idx").due(), Some(start + INTERVAL));

        let events = events.lock().unwrap();
        let entry = events[0].update.entry().unwrap();
        assert_eq!(entry.value, 100);
        assert_eq!(entry.origin, EntryOrigin::Fetched);
        assert!(!entry.stale);
        drop(events);
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cache_serves_tick_without_fetching() {
        let scheduler = scheduler();
        scheduler.cache().set("idx", 99, TTL);
        let (listener, events) = recorder();
        let (descriptor, calls) = scripted("idx", vec![Ok(100)]);

        scheduler.start(descriptor, listener);
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let events = events.lock().unwrap();
        let entry = events[0].update.entry().unwrap();
        assert_eq!((entry.value, entry.origin), (99, EntryOrigin::Cached));
        drop(events);
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_is_noop_while_fetching() {
        let scheduler = scheduler();
        let (listener, events) = recorder();
        let calls = Arc::new(AtomicU32::new(0));
        let (release, gate) = oneshot::channel::<()>();
        let gate = gate.shared();
        let counter = calls.clone();
        let descriptor = SourceDescriptor::new("slow", TTL, INTERVAL, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let gate = gate.clone();
            async move {
                let _ = gate.await;
                Ok(1)
            }
        });

        scheduler.start(Arc::new(descriptor), listener);
        settle().await;
        assert!(scheduler.state("slow").is_fetching());

        scheduler.tick("slow");
        scheduler.force_refresh(Some("slow"));
        scheduler.force_refresh(None);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        release.send(()).unwrap();
        settle().await;
        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(scheduler.state("slow").is_scheduled());
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_fetching_caches_but_does_not_deliver() {
        let scheduler = scheduler();
        let (listener, events) = recorder();
        let (release, gate) = oneshot::channel::<()>();
        let gate = gate.shared();
        let descriptor = SourceDescriptor::new("idx", TTL, INTERVAL, move || {
            let gate = gate.clone();
            async move {
                let _ = gate.await;
                Ok(7)
            }
        });

        scheduler.start(Arc::new(descriptor), listener);
        settle().await;
        assert!(scheduler.stop("idx"));
        assert_eq!(scheduler.state("idx"), SourceState::Idle);
        assert_eq!(scheduler.pending_timers(), 0);

        release.send(()).unwrap();
        settle().await;

        assert_eq!(scheduler.cache().get("idx"), Some(7));
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_then_resets_on_success() {
        let scheduler = scheduler();
        let (listener, _) = recorder();
        let offline = FetchError::transport("offline");
        let (descriptor, calls) = scripted(
            "sdr",
            vec![Err(offline.clone()), Err(offline.clone()), Ok(3)],
        );

        scheduler.start(descriptor, listener);
        settle().await;
        assert_eq!(scheduler.current_delay("sdr"), Some(INTERVAL));
        assert_eq!(scheduler.status("sdr").unwrap().consecutive_failures, 1);

        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.current_delay("sdr"), Some(INTERVAL * 2));

        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "still backing off");

        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let status = scheduler.status("sdr").unwrap();
        assert_eq!(status.current_delay, INTERVAL);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error, None);
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_failure_keeps_normal_interval() {
        let scheduler = scheduler();
        let (listener, _) = recorder();
        let (descriptor, _) = scripted("sdr", vec![Err(FetchError::parse("bad json"))]);

        scheduler.start(descriptor, listener);
        settle().await;
        assert_eq!(scheduler.current_delay("sdr"), Some(INTERVAL));
        assert_eq!(
            scheduler.state("sdr").error(),
            None,
            "failure settles back into Scheduled"
        );
        assert_eq!(
            scheduler.status("sdr").unwrap().last_error,
            Some(FetchError::parse("bad json"))
        );
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_falls_back_to_descriptor_fallback() {
        let scheduler = scheduler();
        let (listener, events) = recorder();
        let (descriptor, _) = scripted("sdr", vec![Err(FetchError::server(503, "down"))]);
        let descriptor = Arc::new((*descriptor).clone().with_fallback_value(0));

        scheduler.start(descriptor, listener);
        settle().await;

        let events = events.lock().unwrap();
        let entry = events[0].update.entry().unwrap();
        assert_eq!((entry.value, entry.origin), (0, EntryOrigin::Fallback));
        assert!(entry.stale);
        drop(events);
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_fallback_reports_error() {
        let scheduler = scheduler();
        let (listener, events) = recorder();
        let (descriptor, _) = scripted("sdr", vec![Err(FetchError::transport("offline"))]);
        let descriptor = Arc::new(
            (*descriptor)
                .clone()
                .with_fallback(|| Err(FetchError::parse("no fixture"))),
        );

        scheduler.start(descriptor, listener);
        settle().await;

        let events = events.lock().unwrap();
        match &events[0].update {
            SourceUpdate::Unavailable(DashboardError::FallbackExhausted { key, cause }) => {
                assert_eq!(key, "sdr");
                assert_eq!(cause, &FetchError::transport("offline"));
            }
            other => panic!("expected FallbackExhausted, got {other:?}"),
        }
        drop(events);
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_source() {
        let scheduler = scheduler();
        let (listener, _) = recorder();
        let (first, _) = scripted("idx", vec![Ok(1)]);
        let (second, _) = scripted("idx", vec![Ok(2)]);

        scheduler.start(first, listener.clone());
        scheduler.start(second, listener);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.pending_timers(), 1);

        assert_eq!(scheduler.stop_all(), 1);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_closure_panic_is_a_failed_tick() {
        let scheduler = scheduler();
        let (listener, events) = recorder();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let descriptor = SourceDescriptor::new("idx", TTL, INTERVAL, move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("client not ready");
            }
            async { Ok(5) }
        });

        scheduler.start(Arc::new(descriptor), listener);
        settle().await;

        assert!(matches!(
            scheduler.state("idx").error(),
            Some(FetchError::Transport(_))
        ));
        assert_eq!(scheduler.pending_timers(), 1);
        assert!(matches!(
            events.lock().unwrap()[0].update,
            SourceUpdate::Unavailable(DashboardError::FallbackExhausted { .. })
        ));

        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.cache().get("idx"), Some(5));
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_timer_neither_ticks_nor_untracks_rearm() {
        let scheduler = scheduler();
        let (listener, events) = recorder();
        let (descriptor, calls) = scripted("idx", vec![Ok(1), Ok(2)]);

        scheduler.start(descriptor, listener);
        settle().await;
        let token = |scheduler: &PollingScheduler<u32>| {
            scheduler.inner.lock().unwrap().slots["idx"].timer_token
        };
        let superseded = token(&scheduler);

        scheduler.force_refresh(Some("idx"));
        settle().await;
        let current = token(&scheduler);
        assert_ne!(superseded, current);
        assert_eq!(events.lock().unwrap().len(), 2);

        // The old timer's task got past its sleep just before the re-arm cancelled it.
        scheduler.begin("idx", Trigger::Timer(superseded));
        settle().await;

        assert_eq!(token(&scheduler), current);
        assert_eq!(scheduler.pending_timers(), 1);
        assert_eq!(events.lock().unwrap().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3, "a single tick chain");
        scheduler.stop_all();
    }
}
