//! Type-keyed registry of shared services
//!
//! Subsystems (device, command queue, thread pool, ...) are provided as
//! `Arc<T>` and looked up by type. The registry is an ordinary value owned by
//! [`Rhi`](crate::rhi::Rhi) and passed explicitly; there is no global
//! instance.

use std::any::{Any, TypeId};
use std::sync::Arc;
use rustc_hash::FxHashMap;

/// Registry of shared services keyed by [`TypeId`]
///
/// `T` may be unsized, so trait objects such as `Mutex<dyn Device>` can be
/// registered behind their `Arc`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use galaxy_rhi::rhi::ServiceRegistry;
///
/// struct FrameCounter(u32);
///
/// let mut registry = ServiceRegistry::new();
/// registry.provide(Arc::new(FrameCounter(3)));
/// assert_eq!(registry.get::<FrameCounter>().unwrap().0, 3);
/// ```
#[derive(Default)]
pub struct ServiceRegistry {
    services: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `T`, replacing any previous one
    pub fn provide<T: ?Sized + Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), Box::new(service));
    }

    /// Shared handle on the service registered under `T`
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn has<T: ?Sized + Send + Sync + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Unregister the service under `T` and return it
    pub fn remove<T: ?Sized + Send + Sync + 'static>(&mut self) -> Option<Arc<T>> {
        self.services
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<Arc<T>>().ok())
            .map(|arc| *arc)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Drop every service
    pub fn clear(&mut self) {
        self.services.clear();
    }
}

#[cfg(test)]
#[path = "service_registry_tests.rs"]
mod tests;
