//! # Wirebox
//!
//! A lightweight inversion-of-control service container for Rust.
//!
//! Wirebox consumes declarative service definitions, then constructs, wires,
//! and manages the lifecycle of the objects an application needs. It resolves
//! dependencies transitively (including property-level reference cycles) and
//! runs a fixed-order callback pipeline around every instance it builds.
//!
//! ## Features
//!
//! - **Named and typed lookup**: resolve by service name, by required type,
//!   or through a deferred provider with optional / unique / ordered fetches
//! - **Scopes**: shared singletons, fresh-per-request prototypes, and
//!   pluggable custom scopes
//! - **Cycle resolution**: property-level reference cycles resolve with
//!   preserved identity; constructor-level cycles fail fast
//! - **Lifecycle orchestration**: capability-marker callbacks, post-processor
//!   extension points, init/destroy hooks, symmetric reverse-order teardown
//! - **Hierarchy**: child containers shadow and delegate to a shared parent
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use wirebox::{ContainerBuilder, ResolvedArgs, ServiceDefinition};
//!
//! struct Repository;
//!
//! struct Service {
//!     repository: Arc<Repository>,
//! }
//!
//! # fn main() -> wirebox::Result<()> {
//! let container = ContainerBuilder::new()
//!     .register(
//!         ServiceDefinition::of::<Repository>("repository")
//!             .constructor(|_| Ok(Repository))
//!             .build(),
//!     )
//!     .register(
//!         ServiceDefinition::of::<Service>("service")
//!             .arg_ref("repository")
//!             .constructor(|args: ResolvedArgs| {
//!                 Ok(Service {
//!                     repository: args.get::<Repository>(0)?,
//!                 })
//!             })
//!             .build(),
//!     )
//!     .build()?;
//!
//! let service = container.get_as::<Service>("service")?;
//! # let _ = service;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod definition;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod scope;

// Re-export core types
pub use config::{Environment, PlaceholderResolver, ValueResolver};
pub use container::{
    Container, ContainerBuilder, FACTORY_PREFIX, OrderedServices, ServiceProvider,
};
pub use definition::{
    DefinitionBuilder, PropertyValue, ResolvedArgs, ServiceDefinition, ServiceHandle, TypeKey,
    ValueRef,
};
pub use error::{Result, WireboxError};
pub use lifecycle::{
    AwareWiring, Capability, DestructionAwareProcessor, EventPublisher, LifecyclePhase,
    MessageSource, ResourceLoader, ServicePostProcessor,
};
pub use module::ServiceModule;
pub use scope::{CustomScope, Scope};

/// Prelude module for convenient imports
///
/// ```
/// use wirebox::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Environment, PlaceholderResolver, ValueResolver};
    pub use crate::container::{
        Container, ContainerBuilder, FACTORY_PREFIX, OrderedServices, ServiceProvider,
    };
    pub use crate::definition::{
        DefinitionBuilder, ResolvedArgs, ServiceDefinition, ServiceHandle, TypeKey, ValueRef,
    };
    pub use crate::error::{Result, WireboxError};
    pub use crate::lifecycle::{
        Capability, DestructionAwareProcessor, EventPublisher, LifecyclePhase, MessageSource,
        ResourceLoader, ServicePostProcessor,
    };
    pub use crate::module::ServiceModule;
    pub use crate::scope::{CustomScope, Scope};
    pub use std::sync::Arc;
}
