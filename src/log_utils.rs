//! Internal logging utilities for consistent log formatting across the engine
//!
//! This module provides macros that adapt log messages based on feature flags:
//! - `tracing`: Enable/disable all logging (enabled by default)
//! - `plain-logs`: When enabled with `tracing`, uses plain text prefixes instead of emojis
//!
//! ## Usage
//!
//! ```toml
//! # Default: tracing enabled with emojis
//! dashboard-provider = "0.1"
//!
//! # Disable all logging
//! dashboard-provider = { version = "0.1", default-features = false }
//!
//! # Enable tracing with plain text (no emojis)
//! dashboard-provider = { version = "0.1", features = ["plain-logs"] }
//! ```

/// Internal debug logging macro that respects the tracing feature flag
#[macro_export]
#[doc(hidden)]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        tracing::debug!($($arg)*);
    };
}

/// Internal warning macro that respects the tracing feature flag
#[macro_export]
#[doc(hidden)]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        tracing::warn!($($arg)*);
    };
}

/// Logs a cache hit with appropriate formatting
#[macro_export]
#[doc(hidden)]
macro_rules! log_cache_hit {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::debug!("📊 [CACHE-HIT] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::debug!("[CACHE-HIT] {}", format!($($arg)*));
    };
}

/// Logs a cache store operation with appropriate formatting
#[macro_export]
#[doc(hidden)]
macro_rules! log_cache_store {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::debug!("📊 [CACHE-STORE] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::debug!("[CACHE-STORE] {}", format!($($arg)*));
    };
}

/// Logs a cache invalidation with appropriate formatting
#[macro_export]
#[doc(hidden)]
macro_rules! log_cache_invalidate {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::debug!("🗑️ [CACHE-INVALIDATE] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::debug!("[CACHE-INVALIDATE] {}", format!($($arg)*));
    };
}

/// Logs the start of an upstream fetch
#[macro_export]
#[doc(hidden)]
macro_rules! log_fetch_start {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::debug!("🔄 [FETCH] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::debug!("[FETCH] {}", format!($($arg)*));
    };
}

/// Logs a successful upstream fetch
#[macro_export]
#[doc(hidden)]
macro_rules! log_fetch_success {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::debug!("✅ [FETCH] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::debug!("[FETCH-SUCCESS] {}", format!($($arg)*));
    };
}

/// Logs a failed upstream fetch. Failures are recovered locally, so they are
/// reported at `warn` rather than `error`.
#[macro_export]
#[doc(hidden)]
macro_rules! log_fetch_error {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::warn!("❌ [FETCH] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::warn!("[FETCH-ERROR] {}", format!($($arg)*));
    };
}

/// Logs a fallback substitution with appropriate formatting
#[macro_export]
#[doc(hidden)]
macro_rules! log_fallback {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::debug!("🩹 [FALLBACK] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::debug!("[FALLBACK] {}", format!($($arg)*));
    };
}

/// Logs a scheduling decision (next tick, backoff) with appropriate formatting
#[macro_export]
#[doc(hidden)]
macro_rules! log_schedule {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::trace!("⏱️ [SCHEDULE] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::trace!("[SCHEDULE] {}", format!($($arg)*));
    };
}

/// Logs a managed resource lifecycle event with appropriate formatting
#[macro_export]
#[doc(hidden)]
macro_rules! log_resource {
    ($($arg:tt)*) => {
        #[cfg(all(feature = "tracing", not(feature = "plain-logs")))]
        tracing::debug!("🧩 [RESOURCE] {}", format!($($arg)*));
        #[cfg(all(feature = "tracing", feature = "plain-logs"))]
        tracing::debug!("[RESOURCE] {}", format!($($arg)*));
    };
}
