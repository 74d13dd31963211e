//! Data source declarations.
//!
//! A [`SourceDescriptor`] says, for one data domain, how to fetch it, how long a result
//! stays fresh, how often to refresh, and what to show when fetching fails. Descriptors
//! are immutable once registered; a [`SourceRegistry`] holds the set a dashboard runs
//! with and guarantees unique keys.
//!
//! The HTTP client is an external collaborator. [`HttpClient`] is the narrow seam the
//! engine depends on, and [`SourceDescriptor::json`] turns a request plus a serde type
//! into a typed fetch whose malformed payloads become [`FetchError::Parse`].

use std::{fmt, future::Future, sync::Arc, time::Duration};

use futures::{FutureExt, future::BoxFuture};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    config::SourceTiming,
    errors::{DashboardError, FetchError, HttpError},
    types::{FetchFuture, SourceValueBounds},
};

type FetchFn<V> = Arc<dyn Fn() -> FetchFuture<V> + Send + Sync>;
type FallbackFn<V> = Arc<dyn Fn() -> Result<V, FetchError> + Send + Sync>;

/// HTTP method of a [`RequestConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Method {
    Get,
    Post,
}

/// Everything an [`HttpClient`] needs to issue one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Ask the client to give up after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The network client a source fetches through
///
/// Implementations map non-2xx responses to [`HttpError::Status`] and network failures
/// to [`HttpError::Transport`] or [`HttpError::Timeout`]. Any
/// `Fn(RequestConfig) -> BoxFuture<..>` closure is a client.
pub trait HttpClient: Send + Sync + 'static {
    fn request(
        &self,
        request: RequestConfig,
    ) -> BoxFuture<'static, Result<serde_json::Value, HttpError>>;
}

impl<F> HttpClient for F
where
    F: Fn(RequestConfig) -> BoxFuture<'static, Result<serde_json::Value, HttpError>>
        + Send
        + Sync
        + 'static,
{
    fn request(
        &self,
        request: RequestConfig,
    ) -> BoxFuture<'static, Result<serde_json::Value, HttpError>> {
        self(request)
    }
}

/// Declares how one data domain is fetched, cached and substituted on failure
pub struct SourceDescriptor<V> {
    key: String,
    fetch: FetchFn<V>,
    timing: SourceTiming,
    fallback: Option<FallbackFn<V>>,
}

impl<V> Clone for SourceDescriptor<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetch: self.fetch.clone(),
            timing: self.timing,
            fallback: self.fallback.clone(),
        }
    }
}

impl<V> fmt::Debug for SourceDescriptor<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("key", &self.key)
            .field("timing", &self.timing)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<V: SourceValueBounds> SourceDescriptor<V> {
    /// Create a descriptor that fetches with `fetch`
    pub fn new<F, Fut>(
        key: impl Into<String>,
        ttl: Duration,
        refresh_interval: Duration,
        fetch: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        Self::with_timing(key, SourceTiming::new(ttl, refresh_interval), fetch)
    }

    /// Create a descriptor from a pre-built [`SourceTiming`], e.g. one loaded from config
    pub fn with_timing<F, Fut>(key: impl Into<String>, timing: SourceTiming, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            fetch: Arc::new(move || fetch().boxed()),
            timing,
            fallback: None,
        }
    }

    /// Create a descriptor that issues `request` through `client` and deserialises the
    /// JSON payload into `T` before mapping it to the source value.
    ///
    /// A payload that does not match `T` fails with [`FetchError::Parse`].
    pub fn json<T, C, M>(
        key: impl Into<String>,
        timing: SourceTiming,
        client: Arc<C>,
        request: RequestConfig,
        map: M,
    ) -> Self
    where
        T: DeserializeOwned + 'static,
        C: HttpClient + ?Sized,
        M: Fn(T) -> V + Send + Sync + 'static,
    {
        let map = Arc::new(map);
        Self::with_timing(key, timing, move || {
            let client = client.clone();
            let request = request.clone();
            let map = map.clone();
            async move {
                let payload = client.request(request).await?;
                let parsed: T = serde_json::from_value(payload)?;
                Ok(map(parsed))
            }
        })
    }

    /// Substitute the result of `fallback` when fetching fails and nothing is cached.
    ///
    /// The fallback may itself fail, in which case the source is left out of the snapshot.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Result<V, FetchError> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Substitute a fixed value when fetching fails and nothing is cached
    pub fn with_fallback_value(self, value: V) -> Self {
        self.with_fallback(move || Ok(value.clone()))
    }

    /// Fail each fetch that takes longer than `timeout` with [`FetchError::Timeout`]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.timing.fetch_timeout = Some(timeout);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn timing(&self) -> SourceTiming {
        self.timing
    }

    pub fn ttl(&self) -> Duration {
        self.timing.ttl
    }

    pub fn refresh_interval(&self) -> Duration {
        self.timing.refresh_interval
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Start one fetch, bounded by the fetch timeout if one is set
    pub fn fetch(&self) -> FetchFuture<V> {
        let fetch = (self.fetch)();
        match self.timing.fetch_timeout {
            Some(limit) => async move {
                tokio::time::timeout(limit, fetch)
                    .await
                    .unwrap_or(Err(FetchError::Timeout(limit)))
            }
            .boxed(),
            None => fetch,
        }
    }

    /// Produce the fallback value, or `None` when the descriptor has no fallback
    pub fn fallback(&self) -> Option<Result<V, FetchError>> {
        self.fallback.as_ref().map(|fallback| fallback())
    }
}

/// The set of descriptors a dashboard runs with
///
/// Keys are unique; registration order is kept.
pub struct SourceRegistry<V> {
    sources: Vec<Arc<SourceDescriptor<V>>>,
}

impl<V> Clone for SourceRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            sources: self.sources.clone(),
        }
    }
}

impl<V> fmt::Debug for SourceRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.sources.iter()).finish()
    }
}

impl<V: SourceValueBounds> Default for SourceRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: SourceValueBounds> SourceRegistry<V> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Build a registry from descriptors, failing on the first duplicate key
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = SourceDescriptor<V>>,
    ) -> Result<Self, DashboardError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Add a descriptor.
    ///
    /// A refresh interval shorter than the TTL is accepted with a warning.
    pub fn register(&mut self, descriptor: SourceDescriptor<V>) -> Result<(), DashboardError> {
        if self.contains(descriptor.key()) {
            return Err(DashboardError::DuplicateSource {
                key: descriptor.key().to_string(),
            });
        }
        descriptor.timing().validate()?;

        if descriptor.timing().refresh_outpaces_ttl() {
            crate::warn_log!(
                "source '{}' refreshes every {:?} but stays fresh for {:?}; ticks will be served from cache",
                descriptor.key(),
                descriptor.refresh_interval(),
                descriptor.ttl()
            );
        }

        self.sources.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<SourceDescriptor<V>>> {
        self.sources.iter().find(|source| source.key() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|source| source.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SourceDescriptor<V>>> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
