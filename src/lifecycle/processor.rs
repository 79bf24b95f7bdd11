//! Post-processing extension points.
//!
//! Processors run against every instance the container creates, in
//! registration order. They are the seam for cross-cutting machinery such as
//! proxy weaving; the container itself implements none of it.

use crate::definition::ServiceHandle;

/// Hook pair invoked around every instance's init phase.
///
/// Returning `Ok(Some(replacement))` substitutes the instance flowing through
/// the remaining pipeline steps and, for singletons, the instance published
/// to the cache.
pub trait ServicePostProcessor: Send + Sync {
    /// Runs after properties are populated and aware callbacks fired, before
    /// any init hook.
    fn before_init(
        &self,
        _instance: &ServiceHandle,
        _name: &str,
    ) -> anyhow::Result<Option<ServiceHandle>> {
        Ok(None)
    }

    /// Runs after the init hooks.
    fn after_init(
        &self,
        _instance: &ServiceHandle,
        _name: &str,
    ) -> anyhow::Result<Option<ServiceHandle>> {
        Ok(None)
    }

    /// Runs when a mid-construction singleton is handed out early to break a
    /// reference cycle. Returning `Some` substitutes the early reference
    /// (e.g. an eagerly woven proxy); the substitution must be identity-stable
    /// with whatever `after_init` would produce.
    fn early_reference(&self, _instance: &ServiceHandle, _name: &str) -> Option<ServiceHandle> {
        None
    }
}

/// Extension invoked for every tracked singleton before its destroy hooks.
pub trait DestructionAwareProcessor: Send + Sync {
    fn before_destruction(&self, instance: &ServiceHandle, name: &str) -> anyhow::Result<()>;
}
