//! Capability markers and the per-definition aware wiring.
//!
//! The container performs no reflection: a service "implements" a capability
//! marker exactly when its definition carries the corresponding wiring
//! closure, and a host-supplied capability fires only when the container was
//! actually configured with that collaborator.

use crate::config::{Environment, ValueResolver};
use crate::container::Container;
use crate::definition::ServiceHandle;
use std::sync::{Arc, Weak};
use strum_macros::{Display, EnumIter};

/// Loads binary resources by location. The container never calls this itself;
/// it only hands the loader to resource-loader-aware services.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, location: &str) -> anyhow::Result<Vec<u8>>;
}

/// Publishes application events. Injected into event-publisher-aware
/// services; the container itself publishes nothing.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ServiceHandle);
}

/// Resolves internationalized messages by code. Injected into
/// message-source-aware services.
pub trait MessageSource: Send + Sync {
    fn message(&self, code: &str) -> Option<String>;
}

/// The closed set of capability markers, in invocation order.
///
/// The orchestrator walks the variants in declaration order, so the sequence
/// below is the documented callback order for a service wired with several
/// capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum Capability {
    #[strum(serialize = "service-name")]
    ServiceName,
    #[strum(serialize = "container")]
    Container,
    #[strum(serialize = "environment")]
    Environment,
    #[strum(serialize = "value-resolver")]
    ValueResolver,
    #[strum(serialize = "resource-loader")]
    ResourceLoader,
    #[strum(serialize = "event-publisher")]
    EventPublisher,
    #[strum(serialize = "message-source")]
    MessageSource,
    #[strum(serialize = "context")]
    Context,
}

pub(crate) type NameAwareFn = Arc<dyn Fn(&ServiceHandle, &str) + Send + Sync>;
pub(crate) type ContainerAwareFn = Arc<dyn Fn(&ServiceHandle, Weak<Container>) + Send + Sync>;
pub(crate) type EnvironmentAwareFn = Arc<dyn Fn(&ServiceHandle, Arc<Environment>) + Send + Sync>;
pub(crate) type ValueResolverAwareFn =
    Arc<dyn Fn(&ServiceHandle, Arc<dyn ValueResolver>) + Send + Sync>;
pub(crate) type ResourceLoaderAwareFn =
    Arc<dyn Fn(&ServiceHandle, Arc<dyn ResourceLoader>) + Send + Sync>;
pub(crate) type EventPublisherAwareFn =
    Arc<dyn Fn(&ServiceHandle, Arc<dyn EventPublisher>) + Send + Sync>;
pub(crate) type MessageSourceAwareFn =
    Arc<dyn Fn(&ServiceHandle, Arc<dyn MessageSource>) + Send + Sync>;

/// Per-definition capability setters.
///
/// Each present closure receives the live instance plus the framework value
/// for its capability. The container/context handles are [`Weak`] so managed
/// instances never keep their owning container alive.
#[derive(Default, Clone)]
pub struct AwareWiring {
    pub(crate) service_name: Option<NameAwareFn>,
    pub(crate) container: Option<ContainerAwareFn>,
    pub(crate) environment: Option<EnvironmentAwareFn>,
    pub(crate) value_resolver: Option<ValueResolverAwareFn>,
    pub(crate) resource_loader: Option<ResourceLoaderAwareFn>,
    pub(crate) event_publisher: Option<EventPublisherAwareFn>,
    pub(crate) message_source: Option<MessageSourceAwareFn>,
    pub(crate) context: Option<ContainerAwareFn>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn capability_order_is_fixed() {
        let order: Vec<Capability> = Capability::iter().collect();
        assert_eq!(
            order,
            vec![
                Capability::ServiceName,
                Capability::Container,
                Capability::Environment,
                Capability::ValueResolver,
                Capability::ResourceLoader,
                Capability::EventPublisher,
                Capability::MessageSource,
                Capability::Context,
            ]
        );
    }
}
