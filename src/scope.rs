//! Service lifetime scopes.
//!
//! A scope decides how long a resolved service lives:
//! - [`Scope::Singleton`]: one shared instance for the container's lifetime
//! - [`Scope::Prototype`]: a fresh instance on every request
//! - [`Scope::Custom`]: sharing policy delegated to a registered [`CustomScope`]

use crate::definition::ServiceHandle;
use crate::error::Result;
use std::fmt;

/// Defines the lifetime of a service within the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One instance shared across the container, created on first resolve
    /// and torn down when the container shuts down.
    Singleton,

    /// A new instance on every resolve. The container never caches it and
    /// never tracks it for destruction.
    Prototype,

    /// Instance ownership is handed to the [`CustomScope`] registered under
    /// the given name (e.g. one instance per logical session).
    Custom(String),
}

impl Scope {
    /// Returns `true` if the container caches instances of this scope itself.
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    /// Returns `true` for the shared, container-lifetime scope.
    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    /// Returns `true` for the fresh-instance-per-request scope.
    #[inline]
    pub fn is_prototype(&self) -> bool {
        matches!(self, Scope::Prototype)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Singleton => write!(f, "singleton"),
            Scope::Prototype => write!(f, "prototype"),
            Scope::Custom(name) => write!(f, "custom({name})"),
        }
    }
}

/// Externally defined sharing policy for [`Scope::Custom`] services.
///
/// The container builds instances; the scope decides whether an existing one
/// is handed back or `create` is invoked for a fresh one. Instances held by a
/// custom scope are owned by the scope, so the container does not destroy
/// them at shutdown. [`CustomScope::remove`] is the hand-back point for hosts
/// that want to run destruction callbacks themselves.
pub trait CustomScope: Send + Sync {
    /// Return the instance cached under `name`, invoking `create` when the
    /// scope has none.
    fn get(
        &self,
        name: &str,
        create: &mut dyn FnMut() -> Result<ServiceHandle>,
    ) -> Result<ServiceHandle>;

    /// Remove and return the instance cached under `name`, if any.
    fn remove(&self, name: &str) -> Option<ServiceHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_predicates() {
        assert!(Scope::Singleton.is_cached());
        assert!(Scope::Singleton.is_singleton());
        assert!(!Scope::Prototype.is_cached());
        assert!(Scope::Prototype.is_prototype());
        assert!(!Scope::Custom("session".into()).is_cached());
    }

    #[test]
    fn scope_display() {
        assert_eq!(Scope::Singleton.to_string(), "singleton");
        assert_eq!(Scope::Custom("session".into()).to_string(), "custom(session)");
    }
}
