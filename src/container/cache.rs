//! Per-container instance cache.
//!
//! Three tiers: `finished` holds fully-initialized singletons (lock-free
//! reads once published), `early` holds mid-construction references handed
//! out to break cycles, `failed` pins names whose singleton creation failed.
//! All early/promotion bookkeeping happens while the creation mutex is held;
//! only the `finished` fast path runs without it.

use crate::definition::{ServiceDefinition, ServiceHandle};
use crate::lifecycle::{LifecyclePhase, ServicePostProcessor};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) struct FailureRecord {
    pub(crate) phase: LifecyclePhase,
    pub(crate) message: String,
}

/// A promoted singleton, remembered in creation order for reverse-order
/// destruction. Captures the definition it was built from so later
/// re-registration cannot change its teardown.
pub(crate) struct Disposable {
    pub(crate) name: String,
    pub(crate) instance: ServiceHandle,
    pub(crate) definition: Arc<ServiceDefinition>,
}

enum EarlySlot {
    /// Raw instance published before property population; the
    /// early-reference processor pass has not run yet.
    Deferred(ServiceHandle),
    /// The reference actually handed out, memoized so every consumer within
    /// the cycle sees the same object.
    Consumed(ServiceHandle),
}

pub(crate) struct InstanceCache {
    finished: DashMap<String, ServiceHandle>,
    early: Mutex<HashMap<String, EarlySlot>>,
    failed: DashMap<String, FailureRecord>,
    products: DashMap<String, ServiceHandle>,
    disposables: Mutex<Vec<Disposable>>,
    creation_lock: Mutex<()>,
}

impl InstanceCache {
    pub(crate) fn new() -> Self {
        Self {
            finished: DashMap::new(),
            early: Mutex::new(HashMap::new()),
            failed: DashMap::new(),
            products: DashMap::new(),
            disposables: Mutex::new(Vec::new()),
            creation_lock: Mutex::new(()),
        }
    }

    pub(crate) fn finished(&self, name: &str) -> Option<ServiceHandle> {
        self.finished.get(name).map(|entry| entry.value().clone())
    }

    pub(crate) fn failure(&self, name: &str) -> Option<(LifecyclePhase, String)> {
        self.failed
            .get(name)
            .map(|entry| (entry.value().phase, entry.value().message.clone()))
    }

    /// Serializes singleton creation container-wide. Held by the outermost
    /// creating frame of a resolution chain; nested frames reuse it.
    pub(crate) fn lock_creation(&self) -> MutexGuard<'_, ()> {
        self.creation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the raw instance as an early reference, before property
    /// population.
    pub(crate) fn put_early(&self, name: &str, raw: ServiceHandle) {
        self.early
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), EarlySlot::Deferred(raw));
    }

    /// Hand out the early reference for `name`, running the proxy extension
    /// on first fetch and memoizing the result.
    pub(crate) fn fetch_early(
        &self,
        name: &str,
        processors: &[Arc<dyn ServicePostProcessor>],
    ) -> Option<ServiceHandle> {
        let raw = {
            let slots = self.early.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(name) {
                Some(EarlySlot::Consumed(handle)) => return Some(handle.clone()),
                Some(EarlySlot::Deferred(raw)) => raw.clone(),
                None => return None,
            }
        };
        // Processors run outside the slot lock; the creation mutex already
        // serializes this path, so the pass cannot run twice.
        let mut exposed = raw;
        for processor in processors {
            if let Some(replacement) = processor.early_reference(&exposed, name) {
                exposed = replacement;
            }
        }
        self.early
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), EarlySlot::Consumed(exposed.clone()));
        Some(exposed)
    }

    /// The already-handed-out early reference, if any consumer took one.
    pub(crate) fn consumed_early(&self, name: &str) -> Option<ServiceHandle> {
        let slots = self.early.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get(name) {
            Some(EarlySlot::Consumed(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub(crate) fn remove_early(&self, name: &str) {
        self.early
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Move a fully-initialized singleton into `finished` and track it for
    /// destruction. A name is never in `finished` and `early` at once.
    pub(crate) fn promote(
        &self,
        name: &str,
        definition: Arc<ServiceDefinition>,
        instance: ServiceHandle,
    ) {
        self.remove_early(name);
        self.finished.insert(name.to_string(), instance.clone());
        self.disposables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Disposable {
                name: name.to_string(),
                instance,
                definition,
            });
    }

    pub(crate) fn record_failure(&self, name: &str, phase: LifecyclePhase, message: String) {
        self.failed
            .insert(name.to_string(), FailureRecord { phase, message });
    }

    pub(crate) fn product(&self, name: &str) -> Option<ServiceHandle> {
        self.products.get(name).map(|entry| entry.value().clone())
    }

    pub(crate) fn store_product(&self, name: &str, product: ServiceHandle) {
        self.products.insert(name.to_string(), product);
    }

    /// Drain the destruction list (creation order; callers reverse it).
    pub(crate) fn take_disposables(&self) -> Vec<Disposable> {
        std::mem::take(
            &mut *self
                .disposables
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Forget everything cached under `name`. Used when a definition is
    /// re-registered: handles already given out stay valid, but future
    /// lookups see the new recipe.
    pub(crate) fn evict(&self, name: &str) {
        self.finished.remove(name);
        self.products.remove(name);
        self.failed.remove(name);
        self.remove_early(name);
        self.disposables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|disposable| disposable.name != name);
    }

    /// Drop every cached instance. Runs after the destruction pass.
    pub(crate) fn clear(&self) {
        self.finished.clear();
        self.products.clear();
        self.failed.clear();
        self.early
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ServiceDefinition;

    struct Widget;

    fn widget_definition() -> Arc<ServiceDefinition> {
        Arc::new(
            ServiceDefinition::of::<Widget>("widget")
                .constructor(|_| Ok(Widget))
                .build(),
        )
    }

    #[test]
    fn early_reference_is_memoized() {
        let cache = InstanceCache::new();
        let raw: ServiceHandle = Arc::new(Widget);
        cache.put_early("widget", raw.clone());

        let first = cache.fetch_early("widget", &[]).unwrap();
        let second = cache.fetch_early("widget", &[]).unwrap();
        assert!(Arc::ptr_eq(&first, &raw));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.consumed_early("widget").is_some());
    }

    #[test]
    fn promote_clears_early_and_publishes() {
        let cache = InstanceCache::new();
        let raw: ServiceHandle = Arc::new(Widget);
        cache.put_early("widget", raw.clone());
        cache.promote("widget", widget_definition(), raw.clone());

        assert!(cache.fetch_early("widget", &[]).is_none());
        assert!(Arc::ptr_eq(&cache.finished("widget").unwrap(), &raw));
        assert_eq!(cache.take_disposables().len(), 1);
    }

    #[test]
    fn evict_forgets_all_tiers() {
        let cache = InstanceCache::new();
        let raw: ServiceHandle = Arc::new(Widget);
        cache.promote("widget", widget_definition(), raw);
        cache.record_failure("widget", LifecyclePhase::Init, "boom".into());

        cache.evict("widget");
        assert!(cache.finished("widget").is_none());
        assert!(cache.failure("widget").is_none());
        assert!(cache.take_disposables().is_empty());
    }
}
