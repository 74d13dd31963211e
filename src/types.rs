//! Common types and aliases used throughout dashboard-provider

use std::{future::Future, pin::Pin};

use crate::errors::FetchError;

/// Common trait bounds for values produced by a data source
///
/// Values are cloned into the cache, into every snapshot and into every
/// subscriber of a deduplicated fetch, so they should be cheap to clone
/// (wrap large payloads in an `Arc`).
pub trait SourceValueBounds: Clone + Send + Sync + 'static {}
impl<T> SourceValueBounds for T where T: Clone + Send + Sync + 'static {}

/// Boxed future returned by a source's fetch function
pub type FetchFuture<V> = Pin<Box<dyn Future<Output = Result<V, FetchError>> + Send + 'static>>;
