use crate::container::ContainerBuilder;
use crate::error::Result;

/// A group of related registrations.
///
/// This is the seam for definition-loading collaborators: whatever parses
/// declarative sources produces a module that feeds already-built definitions
/// into the builder.
///
/// # Example
/// ```rust,ignore
/// struct PersistenceModule;
///
/// impl ServiceModule for PersistenceModule {
///     fn register(builder: ContainerBuilder) -> Result<ContainerBuilder> {
///         Ok(builder
///             .register(datasource_definition())
///             .register(repository_definition())
///             .alias("repo", "repository"))
///     }
/// }
///
/// let container = ContainerBuilder::new()
///     .module::<PersistenceModule>()?
///     .build()?;
/// ```
pub trait ServiceModule {
    /// Apply this module's registrations to the builder.
    fn register(builder: ContainerBuilder) -> Result<ContainerBuilder>;
}
