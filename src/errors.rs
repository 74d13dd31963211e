//! Error types for dashboard-provider
//!
//! Failures are split by who has to deal with them:
//! - [`FetchError`] is what a source's fetch produces. The scheduler recovers from it
//!   locally (stale value, fallback, backoff) and it never reaches page code directly.
//! - [`DashboardError`] is what page code can observe, either from configuration calls
//!   or asynchronously through [`Dashboard::on_error`](crate::dashboard::Dashboard::on_error).
//! - [`ResourceError`] covers misuse of the resource lifecycle manager.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single upstream fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network unreachable, connection reset and similar transport failures
    #[error("transport error: {0}")]
    Transport(String),
    /// The fetch did not complete within its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Upstream answered with a non-2xx status
    #[error("server responded with status {status}: {message}")]
    Server { status: u16, message: String },
    /// Upstream answered but the payload could not be turned into a value
    #[error("malformed payload: {0}")]
    Parse(String),
}

/// How the scheduler should react to a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry with exponential backoff
    Backoff,
    /// Retry no sooner than the normal refresh interval
    NormalInterval,
}

impl FetchError {
    /// Convenience constructor for transport failures
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Convenience constructor for server failures
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Convenience constructor for parse failures
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Returns true for network-level failures, timeouts included
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Returns the retry policy for this failure.
    ///
    /// Transport and server failures are transient and back off. A malformed payload
    /// will not fix itself by asking again sooner, so it keeps the normal interval.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Server { .. } => RetryClass::Backoff,
            Self::Parse(_) => RetryClass::NormalInterval,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Failure reported by an [`HttpClient`](crate::source::HttpClient)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("HTTP status {status}")]
    Status { status: u16, body: Option<String> },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<HttpError> for FetchError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Status { status, body } => Self::Server {
                status,
                message: body.unwrap_or_default(),
            },
            HttpError::Transport(message) => Self::Transport(message),
            HttpError::Timeout(after) => Self::Timeout(after),
        }
    }
}

/// Errors surfaced to page code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    /// A fetch failed, nothing was cached for the key and no fallback could be produced
    #[error("source '{key}' failed and no fallback is available: {cause}")]
    FallbackExhausted { key: String, cause: FetchError },
    /// Two descriptors were registered under the same key
    #[error("duplicate source key '{key}'")]
    DuplicateSource { key: String },
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl DashboardError {
    /// The source key this error concerns, if any
    pub fn source_key(&self) -> Option<&str> {
        match self {
            Self::FallbackExhausted { key, .. } | Self::DuplicateSource { key } => Some(key),
            Self::Resource(err) => Some(err.id()),
            Self::Config(_) => None,
        }
    }
}

/// Misuse of the [`ResourceLifecycleManager`](crate::resources::ResourceLifecycleManager)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The builder declined to produce a handle for an id that has none yet
    #[error("builder for resource '{id}' returned no handle and none existed")]
    EmptyBuild { id: String },
    /// The stored handle is not of the type the caller asked for
    #[error("resource '{id}' holds a handle of a different type")]
    TypeMismatch { id: String },
    /// The id is already registered under a different kind
    #[error("resource '{id}' is a {existing:?}, not a {requested:?}")]
    KindMismatch {
        id: String,
        existing: crate::resources::ResourceKind,
        requested: crate::resources::ResourceKind,
    },
}

impl ResourceError {
    pub fn id(&self) -> &str {
        match self {
            Self::EmptyBuild { id } | Self::TypeMismatch { id } | Self::KindMismatch { id, .. } => {
                id
            }
        }
    }
}

/// Invalid scheduler or source timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("jitter ratio must be within 0.0..=1.0, got {0}")]
    JitterRatio(String),
    #[error("max backoff factor must be at least 1")]
    BackoffFactor,
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}
