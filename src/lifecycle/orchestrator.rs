//! The fixed-order lifecycle pipelines.
//!
//! Initialization runs on the thread that created the instance, never in
//! parallel: aware callbacks, before-init processors, the standard init hook,
//! the custom init method, after-init processors. Destruction mirrors it in
//! reverse singleton-creation order and never stops on individual failures.

use super::{Capability, LifecyclePhase};
use crate::container::Container;
use crate::definition::{ServiceDefinition, ServiceHandle};
use crate::error::{Result, WireboxError};
use strum::IntoEnumIterator;

/// Run the initialization pipeline, returning the (possibly substituted)
/// instance to publish.
pub(crate) fn initialize(
    container: &Container,
    name: &str,
    definition: &ServiceDefinition,
    instance: ServiceHandle,
) -> Result<ServiceHandle> {
    run_aware_callbacks(container, name, definition, &instance);

    let mut exposed = instance;
    for processor in container.post_processors() {
        match processor.before_init(&exposed, name) {
            Ok(Some(replacement)) => {
                tracing::debug!("Post-processor replaced '{}' before init", name);
                exposed = replacement;
            }
            Ok(None) => {}
            Err(e) => {
                return Err(WireboxError::creation_failed(
                    name,
                    LifecyclePhase::BeforeInit,
                    e,
                ));
            }
        }
    }

    if let Some(hook) = &definition.init {
        tracing::debug!("Running init hook: {}", name);
        hook(&exposed).map_err(|e| WireboxError::creation_failed(name, LifecyclePhase::Init, e))?;
    }
    if let Some((method, hook)) = &definition.init_method {
        tracing::debug!("Running custom init method '{}': {}", method, name);
        hook(&exposed).map_err(|e| {
            WireboxError::creation_failed(
                name,
                LifecyclePhase::Init,
                e.context(format!("custom init method '{method}'")),
            )
        })?;
    }

    for processor in container.post_processors() {
        match processor.after_init(&exposed, name) {
            Ok(Some(replacement)) => {
                tracing::debug!("Post-processor replaced '{}' after init", name);
                exposed = replacement;
            }
            Ok(None) => {}
            Err(e) => {
                return Err(WireboxError::creation_failed(
                    name,
                    LifecyclePhase::AfterInit,
                    e,
                ));
            }
        }
    }
    Ok(exposed)
}

/// Invoke the wired capability setters in the fixed [`Capability`] order.
///
/// A capability fires only when the definition wires it and, for
/// host-supplied collaborators, the container actually carries one; anything
/// else is silently skipped.
fn run_aware_callbacks(
    container: &Container,
    name: &str,
    definition: &ServiceDefinition,
    instance: &ServiceHandle,
) {
    let wiring = &definition.aware;
    for capability in Capability::iter() {
        let fired = match capability {
            Capability::ServiceName => match &wiring.service_name {
                Some(setter) => {
                    setter(instance, name);
                    true
                }
                None => false,
            },
            Capability::Container => match &wiring.container {
                Some(setter) => {
                    setter(instance, container.weak_handle());
                    true
                }
                None => false,
            },
            Capability::Environment => match (&wiring.environment, container.environment()) {
                (Some(setter), Some(environment)) => {
                    setter(instance, environment);
                    true
                }
                _ => false,
            },
            Capability::ValueResolver => match (&wiring.value_resolver, container.value_resolver())
            {
                (Some(setter), Some(resolver)) => {
                    setter(instance, resolver);
                    true
                }
                _ => false,
            },
            Capability::ResourceLoader => {
                match (&wiring.resource_loader, container.resource_loader()) {
                    (Some(setter), Some(loader)) => {
                        setter(instance, loader);
                        true
                    }
                    _ => false,
                }
            }
            Capability::EventPublisher => {
                match (&wiring.event_publisher, container.event_publisher()) {
                    (Some(setter), Some(publisher)) => {
                        setter(instance, publisher);
                        true
                    }
                    _ => false,
                }
            }
            Capability::MessageSource => match (&wiring.message_source, container.message_source())
            {
                (Some(setter), Some(source)) => {
                    setter(instance, source);
                    true
                }
                _ => false,
            },
            Capability::Context => match &wiring.context {
                Some(setter) => {
                    setter(instance, container.weak_handle());
                    true
                }
                None => false,
            },
        };
        if fired {
            tracing::trace!("Invoked {} awareness: {}", capability, name);
        }
    }
}

/// Run the destruction pipeline for one tracked singleton, appending any
/// failures to `errors` instead of raising them.
pub(crate) fn destroy(
    container: &Container,
    name: &str,
    definition: &ServiceDefinition,
    instance: &ServiceHandle,
    errors: &mut Vec<String>,
) {
    for processor in container.destruction_processors() {
        if let Err(e) = processor.before_destruction(instance, name) {
            tracing::error!("Destruction processor failed for '{}': {}", name, e);
            errors.push(format!("{name}: {}: {e}", LifecyclePhase::BeforeDestruction));
        }
    }
    if let Some(hook) = &definition.destroy {
        tracing::debug!("Running destroy hook: {}", name);
        if let Err(e) = hook(instance) {
            tracing::error!("Destroy hook failed for '{}': {}", name, e);
            errors.push(format!("{name}: {}: {e}", LifecyclePhase::Destroy));
        }
    }
    if let Some((method, hook)) = &definition.destroy_method {
        tracing::debug!("Running custom destroy method '{}': {}", method, name);
        if let Err(e) = hook(instance) {
            tracing::error!(
                "Custom destroy method '{}' failed for '{}': {}",
                method,
                name,
                e
            );
            errors.push(format!("{name}: destroy method '{method}': {e}"));
        }
    }
}
