use crate::lifecycle::LifecyclePhase;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireboxError>;

#[derive(Debug, Error)]
pub enum WireboxError {
    #[error("Service not found: {name}")]
    ServiceNotFound { name: String },

    #[error("No service matches type: {type_name}")]
    TypeNotFound { type_name: String },

    #[error("Multiple services match type '{type_name}': {}", candidates.join(", "))]
    AmbiguousType {
        type_name: String,
        candidates: Vec<String>,
    },

    #[error("Service '{name}' cannot be viewed as: {requested}")]
    TypeMismatch { name: String, requested: String },

    #[error("Service '{name}' is not a factory-style definition")]
    NotAFactory { name: String },

    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("Scope mismatch for '{name}': {message}")]
    ScopeMismatch { name: String, message: String },

    #[error("Unknown scope '{scope}' for service '{name}'")]
    UnknownScope { name: String, scope: String },

    #[error("Invalid definition '{name}': {message}")]
    InvalidDefinition { name: String, message: String },

    #[error("Creation of service '{name}' failed during {phase}: {source}")]
    CreationFailed {
        name: String,
        phase: LifecyclePhase,
        source: anyhow::Error,
    },

    #[error("Shutdown completed with {} failure(s): {}", errors.len(), errors.join("; "))]
    ShutdownFailed { errors: Vec<String> },
}

impl WireboxError {
    /// Create a not-found error for a service name.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::ServiceNotFound { name: name.into() }
    }

    /// Create a creation failure for the given service and lifecycle phase.
    pub fn creation_failed(
        name: impl Into<String>,
        phase: LifecyclePhase,
        source: anyhow::Error,
    ) -> Self {
        Self::CreationFailed {
            name: name.into(),
            phase,
            source,
        }
    }

    /// Create an invalid-definition error.
    pub fn invalid_definition(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            message: message.into(),
        }
    }
}
