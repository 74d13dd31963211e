//! Resource lifecycle management for rendered dashboard objects.
//!
//! Map layers, chart instances and page timers are created lazily, updated in place on
//! later renders and released exactly once. Every handle lives in one table keyed by a
//! stable id so nothing leaks across re-renders or page teardown.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::Serialize;
use tokio::task::AbortHandle;

use crate::{clock::CancelHandle, errors::ResourceError};

/// What kind of object a managed handle stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    /// A layer drawn on a map
    Layer,
    /// A chart instance
    Chart,
    /// A timer or background task owned by the page
    Timer,
}

/// Upcast helper so stored handles can be downcast back to their concrete type
pub trait AsAny: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An external object whose lifetime the manager owns
///
/// `show` and `hide` default to no-ops for handles without visibility. They run with
/// the handle taken out of the table, so they may call back into the manager.
pub trait ManagedHandle: AsAny + Send {
    fn show(&mut self) {}

    fn hide(&mut self) {}

    /// Tear the object down. Called exactly once.
    fn release(&mut self);
}

impl ManagedHandle for AbortHandle {
    fn release(&mut self) {
        self.abort();
    }
}

impl ManagedHandle for CancelHandle {
    fn release(&mut self) {
        self.cancel();
    }
}

struct ManagedResource {
    kind: ResourceKind,
    handle: Box<dyn ManagedHandle>,
    visible: bool,
}

#[derive(Default)]
struct ResourceTable {
    resources: HashMap<String, ManagedResource>,
    // Bumped by every `dispose_all`; handles taken out before a bump are not put back.
    disposals: u64,
}

impl Drop for ResourceTable {
    fn drop(&mut self) {
        for (_, mut resource) in self.resources.drain() {
            resource.handle.release();
        }
    }
}

/// Owns every managed handle of a dashboard, keyed by id
///
/// Cloning yields another handle to the same table. Handles still registered when the
/// last clone is dropped are released then.
///
/// User code (builders, `with_handle` closures, `show`/`hide`) runs with its entry
/// taken out of the table and the lock released. A [`dispose_all`](Self::dispose_all)
/// that happens meanwhile wins: the entry is released instead of being put back.
#[derive(Clone, Default)]
pub struct ResourceLifecycleManager {
    table: Arc<Mutex<ResourceTable>>,
}

impl ResourceLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the resource `id` or update it in place.
    ///
    /// `builder` receives the existing handle, if any. Returning `Some(handle)` replaces
    /// it: the new handle is stored (and shown, if the old one was visible) and only
    /// then is the old one released. Returning `None` keeps the existing handle, which
    /// the builder may have mutated.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::EmptyBuild`] if `id` is new and the builder returned `None`
    /// - [`ResourceError::KindMismatch`] if `id` exists under another kind
    /// - [`ResourceError::TypeMismatch`] if `id` holds a handle that is not an `H`
    pub fn create_or_update<H, F>(
        &self,
        id: &str,
        kind: ResourceKind,
        builder: F,
    ) -> Result<(), ResourceError>
    where
        H: ManagedHandle,
        F: FnOnce(Option<&mut H>) -> Option<H>,
    {
        let disposals = self.disposals();
        // Taken out so the builder runs without the table locked.
        let Some(mut resource) = self.take(id) else {
            let handle = builder(None).ok_or_else(|| ResourceError::EmptyBuild {
                id: id.to_string(),
            })?;
            crate::log_resource!("created {:?} '{}'", kind, id);
            self.put(
                id,
                ManagedResource {
                    kind,
                    handle: Box::new(handle),
                    visible: false,
                },
                disposals,
            );
            return Ok(());
        };

        if resource.kind != kind {
            let existing = resource.kind;
            self.put(id, resource, disposals);
            return Err(ResourceError::KindMismatch {
                id: id.to_string(),
                existing,
                requested: kind,
            });
        }

        let Some(current) = resource.handle.as_mut().as_any_mut().downcast_mut::<H>() else {
            self.put(id, resource, disposals);
            return Err(ResourceError::TypeMismatch { id: id.to_string() });
        };

        if let Some(replacement) = builder(Some(current)) {
            let mut previous = std::mem::replace(&mut resource.handle, Box::new(replacement));
            if resource.visible {
                resource.handle.show();
            }
            previous.release();
            crate::log_resource!("replaced {:?} '{}'", kind, id);
        }
        self.put(id, resource, disposals);
        Ok(())
    }

    /// Run `f` against the handle registered under `id`, if it is an `H`
    pub fn with_handle<H, R>(&self, id: &str, f: impl FnOnce(&mut H) -> R) -> Option<R>
    where
        H: ManagedHandle,
    {
        let disposals = self.disposals();
        let mut resource = self.take(id)?;
        let result = resource
            .handle
            .as_mut()
            .as_any_mut()
            .downcast_mut::<H>()
            .map(f);
        self.put(id, resource, disposals);
        result
    }

    /// Make `id` visible. Returns false if it does not exist.
    pub fn show(&self, id: &str) -> bool {
        self.set_visible(id, true)
    }

    /// Hide `id`. Returns false if it does not exist.
    pub fn hide(&self, id: &str) -> bool {
        self.set_visible(id, false)
    }

    fn set_visible(&self, id: &str, visible: bool) -> bool {
        let disposals = self.disposals();
        let Some(mut resource) = self.take(id) else {
            return false;
        };
        if resource.visible != visible {
            if visible {
                resource.handle.show();
            } else {
                resource.handle.hide();
            }
            resource.visible = visible;
        }
        self.put(id, resource, disposals);
        true
    }

    /// Release and forget `id`. Returns false if it does not exist.
    pub fn retire(&self, id: &str) -> bool {
        match self.take(id) {
            Some(mut resource) => {
                resource.handle.release();
                crate::log_resource!("retired {:?} '{}'", resource.kind, id);
                true
            }
            None => false,
        }
    }

    /// Release every handle. Safe to call repeatedly; later calls find nothing to do.
    pub fn dispose_all(&self) -> usize {
        let drained: Vec<(String, ManagedResource)> = match self.table.lock() {
            Ok(mut table) => {
                table.disposals += 1;
                table.resources.drain().collect()
            }
            Err(_) => return 0,
        };
        let released = drained.len();
        for (_, mut resource) in drained {
            resource.handle.release();
        }
        if released > 0 {
            crate::log_resource!("disposed {} resources", released);
        }
        released
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table
            .lock()
            .map(|table| table.resources.contains_key(id))
            .unwrap_or(false)
    }

    /// `Some(visible)` for a registered id
    pub fn is_visible(&self, id: &str) -> Option<bool> {
        let table = self.table.lock().ok()?;
        table.resources.get(id).map(|resource| resource.visible)
    }

    pub fn kind(&self, id: &str) -> Option<ResourceKind> {
        let table = self.table.lock().ok()?;
        table.resources.get(id).map(|resource| resource.kind)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .table
            .lock()
            .map(|table| table.resources.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .map(|table| table.resources.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn disposals(&self) -> u64 {
        self.table.lock().map(|table| table.disposals).unwrap_or(0)
    }

    fn take(&self, id: &str) -> Option<ManagedResource> {
        self.table.lock().ok()?.resources.remove(id)
    }

    /// Return `resource` to the table unless `dispose_all` ran since `disposals` was read
    fn put(&self, id: &str, resource: ManagedResource, disposals: u64) {
        let leftover = match self.table.lock() {
            Ok(mut table) if table.disposals == disposals => {
                table.resources.insert(id.to_string(), resource)
            }
            Ok(_) => {
                crate::log_resource!("'{}' finished after disposal, releasing", id);
                Some(resource)
            }
            Err(_) => Some(resource),
        };
        // Either another caller registered the same id meanwhile (the newest wins) or
        // the table was disposed.
        if let Some(mut leftover) = leftover {
            leftover.handle.release();
        }
    }
}
