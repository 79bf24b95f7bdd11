//! The container facade: lookup surface, registration surface, hierarchy,
//! and the startup/shutdown passes.

mod cache;
mod provider;
mod resolver;

pub use provider::{OrderedServices, ServiceProvider};
pub use resolver::FACTORY_PREFIX;

pub(crate) use cache::InstanceCache;
pub(crate) use resolver::{Resolution, strip_factory_prefix};

use crate::config::{Environment, PlaceholderResolver, ValueResolver};
use crate::definition::{
    DefinitionRegistry, ServiceDefinition, ServiceHandle, TypeKey, find_caster,
};
use crate::error::{Result, WireboxError};
use crate::lifecycle::{
    self, DestructionAwareProcessor, EventPublisher, MessageSource, ResourceLoader,
    ServicePostProcessor,
};
use crate::module::ServiceModule;
use crate::scope::CustomScope;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Host-supplied collaborators injected into aware services. All optional; a
/// missing collaborator silently disables the matching capability.
#[derive(Default, Clone)]
pub(crate) struct HostServices {
    pub(crate) environment: Option<Arc<Environment>>,
    pub(crate) value_resolver: Option<Arc<dyn ValueResolver>>,
    pub(crate) resource_loader: Option<Arc<dyn ResourceLoader>>,
    pub(crate) event_publisher: Option<Arc<dyn EventPublisher>>,
    pub(crate) message_source: Option<Arc<dyn MessageSource>>,
}

/// The inversion-of-control service container.
///
/// Thread-safe: any number of threads may resolve concurrently. Constructed
/// through [`ContainerBuilder`] (or [`Container::new`] for an empty root) and
/// always handled as `Arc<Container>`.
pub struct Container {
    registry: DefinitionRegistry,
    cache: InstanceCache,
    post_processors: Mutex<Vec<Arc<dyn ServicePostProcessor>>>,
    destruction_processors: Mutex<Vec<Arc<dyn DestructionAwareProcessor>>>,
    scopes: DashMap<String, Arc<dyn CustomScope>>,
    host: HostServices,
    parent: Option<Arc<Container>>,
    self_ref: Weak<Container>,
}

/// Record `container` in the visited set; `false` means it was already there
/// (a misconfigured delegation cycle) and the walk must stop.
fn note_visited(container: &Container, visited: &mut Vec<usize>) -> bool {
    let identity = container as *const Container as usize;
    if visited.contains(&identity) {
        return false;
    }
    visited.push(identity);
    true
}

impl Container {
    /// Create an empty root container with no host services.
    pub fn new() -> Arc<Self> {
        Self::assemble(None, HostServices::default())
    }

    pub(crate) fn assemble(parent: Option<Arc<Container>>, host: HostServices) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Container {
            registry: DefinitionRegistry::new(),
            cache: InstanceCache::new(),
            post_processors: Mutex::new(Vec::new()),
            destruction_processors: Mutex::new(Vec::new()),
            scopes: DashMap::new(),
            host,
            parent,
            self_ref: self_ref.clone(),
        })
    }

    // ---- lookup surface -------------------------------------------------

    /// Resolve a service by name.
    ///
    /// Alias-resolving and parent-delegating; a `&`-prefixed name requests
    /// the factory service itself rather than its product.
    pub fn get(&self, name: &str) -> Result<ServiceHandle> {
        self.get_guarded(name, &mut Vec::new())
    }

    fn get_guarded(&self, name: &str, visited: &mut Vec<usize>) -> Result<ServiceHandle> {
        if !note_visited(self, visited) {
            return Err(WireboxError::not_found(name));
        }
        let (stripped, wants_factory) = strip_factory_prefix(name);
        let canonical = self.registry.resolve_alias(stripped);
        match self.registry.lookup(&canonical) {
            Some(definition) => {
                let mut resolution = Resolution::new(self);
                self.resolve_definition(&canonical, &definition, wants_factory, &mut resolution)
            }
            None => match &self.parent {
                Some(parent) => parent.get_guarded(name, visited),
                None => Err(WireboxError::not_found(name)),
            },
        }
    }

    /// Resolve a service by name with a required-type check.
    pub fn get_as<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let handle = self.get(name)?;
        self.coerce::<T>(name, handle)
    }

    /// Resolve the single service matching the required type, across this
    /// container and its ancestors.
    pub fn get_by_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        let (lookup_name, handle) = {
            let mut resolution = Resolution::new(self);
            self.resolve_by_type_key(&key, None, &mut resolution)?
        };
        let wrapped = self.coerce_view(&lookup_name, &key, handle)?;
        let view = wrapped
            .downcast::<Arc<T>>()
            .map_err(|_| WireboxError::TypeMismatch {
                name: lookup_name,
                requested: key.name().to_string(),
            })?;
        Ok(view.as_ref().clone())
    }

    /// Resolve a prototype service with caller-supplied constructor
    /// arguments, bypassing the declared argument specifications.
    pub fn get_with_args(&self, name: &str, args: Vec<ServiceHandle>) -> Result<ServiceHandle> {
        self.get_with_args_guarded(name, args, &mut Vec::new())
    }

    fn get_with_args_guarded(
        &self,
        name: &str,
        args: Vec<ServiceHandle>,
        visited: &mut Vec<usize>,
    ) -> Result<ServiceHandle> {
        if !note_visited(self, visited) {
            return Err(WireboxError::not_found(name));
        }
        let (stripped, _) = strip_factory_prefix(name);
        let canonical = self.registry.resolve_alias(stripped);
        match self.registry.lookup(&canonical) {
            Some(definition) => {
                // A singleton is constructed once; per-call overrides only
                // make sense for fresh instances.
                if !definition.scope().is_prototype() {
                    return Err(WireboxError::ScopeMismatch {
                        name: canonical,
                        message: "explicit arguments require prototype scope".into(),
                    });
                }
                let mut resolution = Resolution::new(self);
                resolution.push(&canonical);
                let created = self.create_fresh(&canonical, &definition, &mut resolution, Some(args));
                resolution.pop();
                created
            }
            None => match &self.parent {
                Some(parent) => parent.get_with_args_guarded(name, args, visited),
                None => Err(WireboxError::not_found(name)),
            },
        }
    }

    /// Deferred by-type handle supporting optional, unique, and ordered
    /// fetches.
    pub fn provider<T: ?Sized + Send + Sync + 'static>(&self) -> ServiceProvider<'_, T> {
        ServiceProvider::new(self)
    }

    // ---- metadata queries -----------------------------------------------

    pub fn contains_definition(&self, name: &str) -> bool {
        self.contains_guarded(name, &mut Vec::new())
    }

    fn contains_guarded(&self, name: &str, visited: &mut Vec<usize>) -> bool {
        if !note_visited(self, visited) {
            return false;
        }
        let (stripped, _) = strip_factory_prefix(name);
        let canonical = self.registry.resolve_alias(stripped);
        if self.registry.contains(&canonical) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.contains_guarded(name, visited),
            None => false,
        }
    }

    /// Walk this container and its ancestors for the definition `name`
    /// resolves to, applying `f` in the owning container.
    fn with_definition<R>(
        &self,
        name: &str,
        visited: &mut Vec<usize>,
        f: &impl Fn(&Container, &str, bool, &Arc<ServiceDefinition>) -> R,
    ) -> Result<R> {
        if !note_visited(self, visited) {
            return Err(WireboxError::not_found(name));
        }
        let (stripped, wants_factory) = strip_factory_prefix(name);
        let canonical = self.registry.resolve_alias(stripped);
        match self.registry.lookup(&canonical) {
            Some(definition) => Ok(f(self, &canonical, wants_factory, &definition)),
            None => match &self.parent {
                Some(parent) => parent.with_definition(name, visited, f),
                None => Err(WireboxError::not_found(name)),
            },
        }
    }

    /// Whether lookups of `name` share one instance. For a factory-style
    /// definition the plain name reports on the product.
    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        self.with_definition(name, &mut Vec::new(), &|_, _, wants_factory, definition| {
            if wants_factory || !definition.is_factory() {
                definition.scope().is_singleton()
            } else {
                definition.scope().is_singleton() && definition.product_singleton
            }
        })
    }

    /// Whether lookups of `name` always build a fresh instance.
    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        self.with_definition(name, &mut Vec::new(), &|_, _, wants_factory, definition| {
            if wants_factory || !definition.is_factory() {
                definition.scope().is_prototype()
            } else {
                definition.scope().is_prototype() || !definition.product_singleton
            }
        })
    }

    /// Whether `name` resolves to something viewable as `T`.
    pub fn is_type_match<T: ?Sized + 'static>(&self, name: &str) -> Result<bool> {
        let key = TypeKey::of::<T>();
        self.with_definition(name, &mut Vec::new(), &move |_, _, wants_factory, definition| {
            let matches = definition.type_matches(&key);
            if wants_factory || !definition.is_factory() {
                matches.own
            } else {
                matches.product
            }
        })
    }

    /// The type `name` resolves to. For a factory-style definition without a
    /// statically declared product type, `allow_factory_init` permits
    /// creating the factory service to ask it.
    pub fn get_type(&self, name: &str, allow_factory_init: bool) -> Result<Option<TypeKey>> {
        self.with_definition(
            name,
            &mut Vec::new(),
            &move |owner, canonical, wants_factory, definition| {
                if wants_factory || !definition.is_factory() {
                    return Some(definition.type_key());
                }
                if let Some(product_type) = definition.product_type {
                    return Some(product_type);
                }
                if !allow_factory_init {
                    return None;
                }
                let discover = definition.discover_product_type.as_ref()?;
                let factory = owner.get(&format!("{FACTORY_PREFIX}{canonical}")).ok()?;
                discover(&factory)
            },
        )
    }

    /// All aliases registered for `name` in its owning container. Empty when
    /// the name is unknown.
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        self.with_definition(name, &mut Vec::new(), &|owner, canonical, _, _| {
            owner.registry.aliases_of(canonical)
        })
        .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<&Arc<Container>> {
        self.parent.as_ref()
    }

    // ---- registration surface -------------------------------------------
    //
    // Mutation is read-mostly-startup territory: callers serialize it
    // externally with respect to in-flight creation.

    /// Store or fully replace a definition. Overriding evicts anything cached
    /// under the name so the new recipe takes effect; handles already given
    /// out stay valid.
    pub fn register(&self, definition: ServiceDefinition) -> Result<()> {
        let name = definition.name().to_string();
        let replaced = self.registry.register(definition)?;
        if replaced {
            self.cache.evict(&name);
        }
        Ok(())
    }

    pub fn register_alias(
        &self,
        alias: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<()> {
        self.registry.register_alias(alias, target)
    }

    /// Append a post-processor; processors run in registration order.
    pub fn register_processor(&self, processor: Arc<dyn ServicePostProcessor>) {
        self.post_processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(processor);
    }

    pub fn register_destruction_processor(&self, processor: Arc<dyn DestructionAwareProcessor>) {
        self.destruction_processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(processor);
    }

    pub fn register_scope(&self, name: impl Into<String>, scope: Arc<dyn CustomScope>) {
        self.scopes.insert(name.into(), scope);
    }

    // ---- startup / shutdown ---------------------------------------------

    /// Eagerly create every non-lazy singleton, in registration order.
    /// Factory services are created; their products stay lazy.
    pub fn preinstantiate_singletons(&self) -> Result<()> {
        let names = self.registry.names();
        tracing::info!("Pre-instantiating {} definition(s)", names.len());
        for name in names {
            let Some(definition) = self.registry.lookup(&name) else {
                continue;
            };
            if definition.is_lazy() || !definition.scope().is_singleton() {
                continue;
            }
            if definition.is_factory() {
                self.get(&format!("{FACTORY_PREFIX}{name}"))?;
            } else {
                self.get(&name)?;
            }
        }
        Ok(())
    }

    /// Tear down every singleton this container created, in reverse creation
    /// order. Individual destroy failures are collected, not raised, so
    /// teardown always runs to completion.
    pub fn shutdown(&self) -> Result<()> {
        let disposables = self.cache.take_disposables();
        tracing::info!(
            "Shutting down container ({} tracked singleton(s))",
            disposables.len()
        );
        let mut errors = Vec::new();
        for disposable in disposables.iter().rev() {
            tracing::debug!("Destroying: {}", disposable.name);
            lifecycle::destroy(
                self,
                &disposable.name,
                &disposable.definition,
                &disposable.instance,
                &mut errors,
            );
        }
        self.cache.clear();
        if errors.is_empty() {
            tracing::info!("Shutdown complete");
            Ok(())
        } else {
            Err(WireboxError::ShutdownFailed { errors })
        }
    }

    // ---- internals -------------------------------------------------------

    fn coerce<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        handle: ServiceHandle,
    ) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        let wrapped = self.coerce_view(name, &key, handle)?;
        // The caster wraps the typed Arc so trait-object views stay sized;
        // unwrap the outer layer and clone the inner Arc out.
        let view = wrapped
            .downcast::<Arc<T>>()
            .map_err(|_| WireboxError::TypeMismatch {
                name: name.to_string(),
                requested: key.name().to_string(),
            })?;
        Ok(view.as_ref().clone())
    }

    /// Find the caster binding for `id` in the definition `name` resolves to
    /// (the product bindings for a plain-name factory lookup).
    pub(crate) fn binding_caster(
        &self,
        name: &str,
        id: TypeId,
    ) -> Result<Option<crate::definition::CasterFn>> {
        self.with_definition(name, &mut Vec::new(), &move |_, _, wants_factory, definition| {
            let bindings = if !wants_factory && definition.is_factory() {
                &definition.product_bindings
            } else {
                &definition.bindings
            };
            find_caster(bindings, id).cloned()
        })
    }

    pub(crate) fn cache(&self) -> &InstanceCache {
        &self.cache
    }

    pub(crate) fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub(crate) fn weak_handle(&self) -> Weak<Container> {
        self.self_ref.clone()
    }

    pub(crate) fn post_processors(&self) -> Vec<Arc<dyn ServicePostProcessor>> {
        self.post_processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn destruction_processors(&self) -> Vec<Arc<dyn DestructionAwareProcessor>> {
        self.destruction_processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn custom_scope(&self, name: &str) -> Option<Arc<dyn CustomScope>> {
        self.scopes.get(name).map(|entry| entry.value().clone())
    }

    pub(crate) fn environment(&self) -> Option<Arc<Environment>> {
        self.host.environment.clone()
    }

    pub(crate) fn value_resolver(&self) -> Option<Arc<dyn ValueResolver>> {
        self.host.value_resolver.clone()
    }

    pub(crate) fn resource_loader(&self) -> Option<Arc<dyn ResourceLoader>> {
        self.host.resource_loader.clone()
    }

    pub(crate) fn event_publisher(&self) -> Option<Arc<dyn EventPublisher>> {
        self.host.event_publisher.clone()
    }

    pub(crate) fn message_source(&self) -> Option<Arc<dyn MessageSource>> {
        self.host.message_source.clone()
    }
}

/// Builder for wholesale container assembly: definitions, aliases,
/// processors, scopes, host services, and the optional parent.
pub struct ContainerBuilder {
    definitions: Vec<ServiceDefinition>,
    aliases: Vec<(String, String)>,
    processors: Vec<Arc<dyn ServicePostProcessor>>,
    destruction_processors: Vec<Arc<dyn DestructionAwareProcessor>>,
    scopes: Vec<(String, Arc<dyn CustomScope>)>,
    host: HostServices,
    parent: Option<Arc<Container>>,
    eager: bool,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
            aliases: Vec::new(),
            processors: Vec::new(),
            destruction_processors: Vec::new(),
            scopes: Vec::new(),
            host: HostServices::default(),
            parent: None,
            eager: false,
        }
    }

    /// Queue a service definition.
    pub fn register(mut self, definition: ServiceDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Queue an alias for a definition name.
    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), target.into()));
        self
    }

    pub fn processor(mut self, processor: Arc<dyn ServicePostProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn destruction_processor(mut self, processor: Arc<dyn DestructionAwareProcessor>) -> Self {
        self.destruction_processors.push(processor);
        self
    }

    pub fn scope(mut self, name: impl Into<String>, scope: Arc<dyn CustomScope>) -> Self {
        self.scopes.push((name.into(), scope));
        self
    }

    /// Host environment. Also installs a [`PlaceholderResolver`] over it
    /// unless an explicit value resolver is configured.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.host.environment = Some(Arc::new(environment));
        self
    }

    pub fn value_resolver(mut self, resolver: Arc<dyn ValueResolver>) -> Self {
        self.host.value_resolver = Some(resolver);
        self
    }

    pub fn resource_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.host.resource_loader = Some(loader);
        self
    }

    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.host.event_publisher = Some(publisher);
        self
    }

    pub fn message_source(mut self, source: Arc<dyn MessageSource>) -> Self {
        self.host.message_source = Some(source);
        self
    }

    /// Delegate lookups that miss locally to `parent`. The parent is shared,
    /// never owned.
    pub fn parent(mut self, parent: Arc<Container>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Apply a [`ServiceModule`]'s registrations.
    pub fn module<M: ServiceModule>(self) -> Result<Self> {
        M::register(self)
    }

    /// Run the eager pre-instantiation pass as part of [`build`].
    ///
    /// [`build`]: ContainerBuilder::build
    pub fn eager_init(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn build(self) -> Result<Arc<Container>> {
        let ContainerBuilder {
            definitions,
            aliases,
            processors,
            destruction_processors,
            scopes,
            mut host,
            parent,
            eager,
        } = self;
        if host.value_resolver.is_none() {
            if let Some(environment) = &host.environment {
                host.value_resolver = Some(Arc::new(PlaceholderResolver::new(environment.clone())));
            }
        }
        let container = Container::assemble(parent, host);
        for processor in processors {
            container.register_processor(processor);
        }
        for processor in destruction_processors {
            container.register_destruction_processor(processor);
        }
        for (name, scope) in scopes {
            container.register_scope(name, scope);
        }
        for definition in definitions {
            container.register(definition)?;
        }
        for (alias, target) in aliases {
            container.register_alias(alias, target)?;
        }
        if eager {
            container.preinstantiate_singletons()?;
        }
        Ok(container)
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ServiceDefinition;
    use crate::scope::Scope;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;
    use std::thread;
    use std::time::Duration;

    struct Plain;

    fn plain(name: &str) -> ServiceDefinition {
        ServiceDefinition::of::<Plain>(name)
            .constructor(|_| Ok(Plain))
            .build()
    }

    trait Handler: Send + Sync {
        fn id(&self) -> &'static str;
    }

    struct HandlerA;

    impl Handler for HandlerA {
        fn id(&self) -> &'static str {
            "a"
        }
    }

    struct HandlerB;

    impl Handler for HandlerB {
        fn id(&self) -> &'static str {
            "b"
        }
    }

    #[test]
    fn singleton_lookups_share_one_instance() {
        let container = ContainerBuilder::new()
            .register(plain("svc"))
            .build()
            .unwrap();
        let first = container.get("svc").unwrap();
        let second = container.get("svc").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn prototype_lookups_build_fresh_instances() {
        let definition = ServiceDefinition::of::<Plain>("proto")
            .scope(Scope::Prototype)
            .constructor(|_| Ok(Plain))
            .build();
        let container = ContainerBuilder::new().register(definition).build().unwrap();
        let first = container.get("proto").unwrap();
        let second = container.get("proto").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn concurrent_first_time_lookups_construct_once() {
        struct Slow;

        let constructions = Arc::new(AtomicUsize::new(0));
        let counter = constructions.clone();
        let definition = ServiceDefinition::of::<Slow>("slow")
            .constructor(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Ok(Slow)
            })
            .build();
        let container = ContainerBuilder::new().register(definition).build().unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                thread::spawn(move || container.get("slow").unwrap())
            })
            .collect();
        let instances: Vec<ServiceHandle> =
            workers.into_iter().map(|worker| worker.join().unwrap()).collect();

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }

    #[test]
    fn unknown_name_is_not_found() {
        let container = Container::new();
        assert!(matches!(
            container.get("ghost"),
            Err(WireboxError::ServiceNotFound { .. })
        ));
    }

    #[test]
    fn aliases_resolve_to_the_canonical_service() {
        let container = ContainerBuilder::new()
            .register(plain("repository"))
            .alias("repo", "repository")
            .build()
            .unwrap();
        let by_alias = container.get("repo").unwrap();
        let by_name = container.get("repository").unwrap();
        assert!(Arc::ptr_eq(&by_alias, &by_name));
        assert_eq!(container.aliases_of("repo"), vec!["repo"]);
    }

    #[test]
    fn required_type_is_checked() {
        struct Other;

        let container = ContainerBuilder::new()
            .register(plain("svc"))
            .build()
            .unwrap();
        assert!(container.get_as::<Plain>("svc").is_ok());
        assert!(matches!(
            container.get_as::<Other>("svc"),
            Err(WireboxError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn by_type_lookup_supports_trait_views() {
        let definition = ServiceDefinition::of::<HandlerA>("handler-a")
            .constructor(|_| Ok(HandlerA))
            .implements::<dyn Handler, _>(|concrete| concrete as Arc<dyn Handler>)
            .build();
        let container = ContainerBuilder::new().register(definition).build().unwrap();

        assert!(container.get_by_type::<HandlerA>().is_ok());
        let handler = container.get_by_type::<dyn Handler>().unwrap();
        assert_eq!(handler.id(), "a");
    }

    #[test]
    fn ambiguous_by_type_lookup_needs_a_primary() {
        let make = |name: &str, primary: bool| {
            let builder = ServiceDefinition::of::<HandlerB>(name)
                .constructor(|_| Ok(HandlerB))
                .implements::<dyn Handler, _>(|concrete| concrete as Arc<dyn Handler>);
            if primary { builder.primary().build() } else { builder.build() }
        };
        let ambiguous = ContainerBuilder::new()
            .register(make("first", false))
            .register(make("second", false))
            .build()
            .unwrap();
        assert!(matches!(
            ambiguous.get_by_type::<dyn Handler>(),
            Err(WireboxError::AmbiguousType { .. })
        ));

        let with_primary = ContainerBuilder::new()
            .register(make("first", false))
            .register(make("second", true))
            .build()
            .unwrap();
        assert!(with_primary.get_by_type::<dyn Handler>().is_ok());
    }

    #[test]
    fn type_ref_name_hint_beats_primary() {
        struct Audited {
            logger: RwLock<Option<Arc<dyn Handler>>>,
        }

        let audit = ServiceDefinition::of::<HandlerA>("audit")
            .constructor(|_| Ok(HandlerA))
            .implements::<dyn Handler, _>(|concrete| concrete as Arc<dyn Handler>)
            .build();
        let console = ServiceDefinition::of::<HandlerB>("console")
            .constructor(|_| Ok(HandlerB))
            .implements::<dyn Handler, _>(|concrete| concrete as Arc<dyn Handler>)
            .primary()
            .build();
        let audited = ServiceDefinition::of::<Audited>("audited")
            .constructor(|_| {
                Ok(Audited {
                    logger: RwLock::new(None),
                })
            })
            .prop_type::<dyn Handler>("audit")
            .properties(|audited: &Audited, _property, value: ServiceHandle| {
                let view = value
                    .downcast::<Arc<dyn Handler>>()
                    .map_err(|_| anyhow!("expected a handler view"))?;
                *audited.logger.write().unwrap() = Some(view.as_ref().clone());
                Ok(())
            })
            .build();
        let container = ContainerBuilder::new()
            .register(audit)
            .register(console)
            .register(audited)
            .build()
            .unwrap();

        let audited = container.get_as::<Audited>("audited").unwrap();
        let held = audited.logger.read().unwrap().as_ref().unwrap().clone();
        assert_eq!(held.id(), "a");
    }

    #[test]
    fn hierarchy_shadowing_and_fallback() {
        let parent = ContainerBuilder::new()
            .register(
                ServiceDefinition::of::<HandlerA>("shared")
                    .constructor(|_| Ok(HandlerA))
                    .build(),
            )
            .register(plain("only-parent"))
            .build()
            .unwrap();
        let child = ContainerBuilder::new()
            .parent(parent.clone())
            .register(
                ServiceDefinition::of::<HandlerB>("shared")
                    .scope(Scope::Prototype)
                    .constructor(|_| Ok(HandlerB))
                    .build(),
            )
            .alias("sh", "shared")
            .build()
            .unwrap();

        // The child's definition shadows the parent's.
        assert!(child.get_as::<HandlerB>("shared").is_ok());
        assert!(parent.get_as::<HandlerA>("shared").is_ok());
        assert!(!child.is_singleton("shared").unwrap());
        assert!(parent.is_singleton("shared").unwrap());
        assert_eq!(child.aliases_of("shared"), vec!["sh"]);

        // Names absent locally fall back to the parent.
        assert!(child.get("only-parent").is_ok());
        assert!(child.contains_definition("only-parent"));
        assert!(!child.is_prototype("only-parent").unwrap());
    }

    #[test]
    fn factory_definitions_dereference_to_products() {
        struct Conn;
        struct ConnFactory {
            made: AtomicUsize,
        }

        let definition = ServiceDefinition::of::<ConnFactory>("conn")
            .constructor(|_| {
                Ok(ConnFactory {
                    made: AtomicUsize::new(0),
                })
            })
            .factory_of::<Conn, _>(|factory| {
                factory.made.fetch_add(1, Ordering::SeqCst);
                Ok(Conn)
            })
            .build();
        let container = ContainerBuilder::new().register(definition).build().unwrap();

        let first = container.get_as::<Conn>("conn").unwrap();
        let second = container.get_as::<Conn>("conn").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let factory = container.get_as::<ConnFactory>("&conn").unwrap();
        assert_eq!(factory.made.load(Ordering::SeqCst), 1);

        assert!(container.is_singleton("conn").unwrap());
        assert_eq!(
            container.get_type("conn", false).unwrap(),
            Some(TypeKey::of::<Conn>())
        );
        assert_eq!(
            container.get_type("&conn", false).unwrap(),
            Some(TypeKey::of::<ConnFactory>())
        );
    }

    #[test]
    fn factory_dereference_of_plain_definition_fails() {
        let container = ContainerBuilder::new()
            .register(plain("svc"))
            .build()
            .unwrap();
        assert!(matches!(
            container.get("&svc"),
            Err(WireboxError::NotAFactory { .. })
        ));
    }

    #[test]
    fn explicit_arguments_require_prototype_scope() {
        struct Greeter {
            greeting: String,
        }

        let proto = ServiceDefinition::of::<Greeter>("greeter")
            .scope(Scope::Prototype)
            .constructor(|args| {
                Ok(Greeter {
                    greeting: args.get::<String>(0)?.as_ref().clone(),
                })
            })
            .build();
        let container = ContainerBuilder::new()
            .register(proto)
            .register(plain("svc"))
            .build()
            .unwrap();

        let greeter = container
            .get_with_args("greeter", vec![Arc::new("hello".to_string())])
            .unwrap();
        let greeter = greeter.downcast::<Greeter>().unwrap();
        assert_eq!(greeter.greeting, "hello");

        assert!(matches!(
            container.get_with_args("svc", Vec::new()),
            Err(WireboxError::ScopeMismatch { .. })
        ));
    }

    #[test]
    fn custom_scope_owns_instance_caching() {
        struct SessionScope {
            instances: Mutex<HashMap<String, ServiceHandle>>,
        }

        impl CustomScope for SessionScope {
            fn get(
                &self,
                name: &str,
                create: &mut dyn FnMut() -> Result<ServiceHandle>,
            ) -> Result<ServiceHandle> {
                let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(found) = instances.get(name) {
                    return Ok(found.clone());
                }
                let created = create()?;
                instances.insert(name.to_string(), created.clone());
                Ok(created)
            }

            fn remove(&self, name: &str) -> Option<ServiceHandle> {
                self.instances
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(name)
            }
        }

        let session = Arc::new(SessionScope {
            instances: Mutex::new(HashMap::new()),
        });
        let definition = ServiceDefinition::of::<Plain>("session-svc")
            .scope(Scope::Custom("session".into()))
            .constructor(|_| Ok(Plain))
            .build();
        let container = ContainerBuilder::new()
            .scope("session", session.clone())
            .register(definition)
            .build()
            .unwrap();

        let first = container.get("session-svc").unwrap();
        let second = container.get("session-svc").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        session.remove("session-svc").unwrap();
        let third = container.get("session-svc").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn unregistered_custom_scope_is_an_error() {
        let definition = ServiceDefinition::of::<Plain>("orphan")
            .scope(Scope::Custom("missing".into()))
            .constructor(|_| Ok(Plain))
            .build();
        let container = ContainerBuilder::new().register(definition).build().unwrap();
        assert!(matches!(
            container.get("orphan"),
            Err(WireboxError::UnknownScope { .. })
        ));
    }

    #[test]
    fn eager_preinstantiation_skips_lazy_definitions() {
        struct Eager;
        struct Sleepy;

        let eager_count = Arc::new(AtomicUsize::new(0));
        let lazy_count = Arc::new(AtomicUsize::new(0));
        let eager_counter = eager_count.clone();
        let lazy_counter = lazy_count.clone();

        let container = ContainerBuilder::new()
            .register(
                ServiceDefinition::of::<Eager>("eager")
                    .constructor(move |_| {
                        eager_counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Eager)
                    })
                    .build(),
            )
            .register(
                ServiceDefinition::of::<Sleepy>("sleepy")
                    .lazy()
                    .constructor(move |_| {
                        lazy_counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Sleepy)
                    })
                    .build(),
            )
            .eager_init()
            .build()
            .unwrap();

        assert_eq!(eager_count.load(Ordering::SeqCst), 1);
        assert_eq!(lazy_count.load(Ordering::SeqCst), 0);

        container.get("sleepy").unwrap();
        assert_eq!(lazy_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_processor_replacement_flows_through() {
        struct Tagged {
            tag: &'static str,
        }

        struct Replacer;

        impl ServicePostProcessor for Replacer {
            fn after_init(
                &self,
                _instance: &ServiceHandle,
                name: &str,
            ) -> anyhow::Result<Option<ServiceHandle>> {
                if name == "tagged" {
                    Ok(Some(Arc::new(Tagged { tag: "replaced" })))
                } else {
                    Ok(None)
                }
            }
        }

        let definition = ServiceDefinition::of::<Tagged>("tagged")
            .constructor(|_| Ok(Tagged { tag: "original" }))
            .build();
        let container = ContainerBuilder::new()
            .processor(Arc::new(Replacer))
            .register(definition)
            .build()
            .unwrap();

        let tagged = container.get_as::<Tagged>("tagged").unwrap();
        assert_eq!(tagged.tag, "replaced");
    }

    #[test]
    fn replacement_after_early_exposure_fails_creation() {
        struct Selfish {
            me: RwLock<Option<Arc<Selfish>>>,
        }

        struct Replacer;

        impl ServicePostProcessor for Replacer {
            fn after_init(
                &self,
                _instance: &ServiceHandle,
                name: &str,
            ) -> anyhow::Result<Option<ServiceHandle>> {
                if name == "selfish" {
                    Ok(Some(Arc::new(Selfish {
                        me: RwLock::new(None),
                    })))
                } else {
                    Ok(None)
                }
            }
        }

        let definition = ServiceDefinition::of::<Selfish>("selfish")
            .constructor(|_| {
                Ok(Selfish {
                    me: RwLock::new(None),
                })
            })
            .prop_ref("me", "selfish")
            .properties(|selfish: &Selfish, _property, value: ServiceHandle| {
                let me = value
                    .downcast::<Selfish>()
                    .map_err(|_| anyhow!("expected a Selfish"))?;
                *selfish.me.write().unwrap() = Some(me);
                Ok(())
            })
            .build();
        let container = ContainerBuilder::new()
            .processor(Arc::new(Replacer))
            .register(definition)
            .build()
            .unwrap();

        assert!(matches!(
            container.get("selfish"),
            Err(WireboxError::CreationFailed { .. })
        ));
    }

    #[test]
    fn value_resolver_awareness_uses_the_environment() {
        struct Configured {
            url: RwLock<String>,
        }

        let environment = Environment::new();
        environment.set("DB_URL", "postgres://db.internal/app");

        let definition = ServiceDefinition::of::<Configured>("configured")
            .constructor(|_| {
                Ok(Configured {
                    url: RwLock::new(String::new()),
                })
            })
            .aware_value_resolver(|configured, resolver| {
                if let Some(resolved) = resolver.resolve("${DB_URL:sqlite://memory}") {
                    *configured.url.write().unwrap() = resolved;
                }
            })
            .build();
        let container = ContainerBuilder::new()
            .environment(environment)
            .register(definition)
            .build()
            .unwrap();

        let configured = container.get_as::<Configured>("configured").unwrap();
        assert_eq!(*configured.url.read().unwrap(), "postgres://db.internal/app");
    }

    #[test]
    fn metadata_queries_resolve_aliases_and_types() {
        struct Other;

        let container = ContainerBuilder::new()
            .register(plain("svc"))
            .alias("service", "svc")
            .build()
            .unwrap();

        assert!(container.contains_definition("service"));
        assert!(!container.contains_definition("ghost"));
        assert!(container.is_type_match::<Plain>("service").unwrap());
        assert!(!container.is_type_match::<Other>("service").unwrap());
        assert_eq!(
            container.get_type("service", false).unwrap(),
            Some(TypeKey::of::<Plain>())
        );
        assert!(matches!(
            container.is_singleton("ghost"),
            Err(WireboxError::ServiceNotFound { .. })
        ));
    }
}
