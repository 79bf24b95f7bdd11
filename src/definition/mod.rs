//! Service definitions: the declarative recipe the container constructs
//! instances from.
//!
//! The container performs no reflection. A [`ServiceDefinition`] carries
//! host-supplied closures for everything type-specific (constructing the
//! instance, applying property values, lifecycle hooks, capability setters,
//! type casts), while the container owns the wiring, caching, and ordering
//! semantics around them.

mod registry;

pub(crate) use registry::DefinitionRegistry;

use crate::config::{Environment, ValueResolver};
use crate::container::Container;
use crate::lifecycle::{AwareWiring, EventPublisher, MessageSource, ResourceLoader};
use crate::scope::Scope;
use anyhow::anyhow;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// A container-managed instance. Identity is `Arc` pointer identity.
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// Constructor closure: receives the resolved constructor arguments and
/// returns the raw instance.
pub type ConstructorFn = Arc<dyn Fn(ResolvedArgs) -> anyhow::Result<ServiceHandle> + Send + Sync>;

/// Lifecycle hook closure (init / destroy, standard or custom).
pub type HookFn = Arc<dyn Fn(&ServiceHandle) -> anyhow::Result<()> + Send + Sync>;

/// Stores one resolved property value on the instance. Receives the instance,
/// the property name, and the resolved value.
pub type PropertyApplierFn =
    Arc<dyn Fn(&ServiceHandle, &str, ServiceHandle) -> anyhow::Result<()> + Send + Sync>;

/// Manufactures a factory-style definition's product from the live factory
/// instance.
pub type ProduceFn = Arc<dyn Fn(&ServiceHandle) -> anyhow::Result<ServiceHandle> + Send + Sync>;

/// Queries a live factory instance for the type of object it produces.
pub type DiscoverTypeFn = Arc<dyn Fn(&ServiceHandle) -> Option<TypeKey> + Send + Sync>;

/// Casts a raw handle into a wrapped `Arc<T>` view. The returned handle's
/// payload is the `Arc<T>` itself so trait-object targets stay sized.
pub(crate) type CasterFn = Arc<dyn Fn(ServiceHandle) -> Option<ServiceHandle> + Send + Sync>;

/// Nominal type token. Works for concrete types and trait objects alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A dependency specification: a literal value, a reference by service name,
/// or a reference by required type (tie-broken during resolution).
#[derive(Clone)]
pub enum ValueRef {
    Value(ServiceHandle),
    Ref(String),
    TypeRef(TypeKey),
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRef::Value(_) => f.write_str("Value(..)"),
            ValueRef::Ref(name) => write!(f, "Ref({name})"),
            ValueRef::TypeRef(key) => write!(f, "TypeRef({key})"),
        }
    }
}

/// A named property dependency.
#[derive(Clone, Debug)]
pub struct PropertyValue {
    pub(crate) name: String,
    pub(crate) value: ValueRef,
}

/// The resolved constructor arguments handed to a [`ConstructorFn`], in
/// declaration order.
pub struct ResolvedArgs {
    values: Vec<ServiceHandle>,
}

impl ResolvedArgs {
    pub(crate) fn new(values: Vec<ServiceHandle>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Typed access to the argument at `index`.
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        let handle = self
            .values
            .get(index)
            .ok_or_else(|| anyhow!("constructor argument {index} is missing"))?;
        handle
            .clone()
            .downcast::<T>()
            .map_err(|_| anyhow!("constructor argument {index} is not a {}", type_name::<T>()))
    }

    /// Typed access to an argument declared with `arg_type`: those arrive as
    /// wrapped views so trait-object targets work.
    pub fn get_view<T: ?Sized + Send + Sync + 'static>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        let handle = self
            .values
            .get(index)
            .ok_or_else(|| anyhow!("constructor argument {index} is missing"))?;
        let view = handle
            .clone()
            .downcast::<Arc<T>>()
            .map_err(|_| anyhow!("constructor argument {index} is not a view of {}", type_name::<T>()))?;
        Ok(view.as_ref().clone())
    }

    /// Raw access to the argument at `index`.
    pub fn handle(&self, index: usize) -> Option<&ServiceHandle> {
        self.values.get(index)
    }
}

/// A type this service (or its factory product) can be viewed as, with the
/// cast that produces the view.
#[derive(Clone)]
pub(crate) struct TypeBinding {
    pub(crate) key: TypeKey,
    pub(crate) cast: CasterFn,
}

pub(crate) fn find_caster(bindings: &[TypeBinding], id: TypeId) -> Option<&CasterFn> {
    bindings.iter().find(|b| b.key.id() == id).map(|b| &b.cast)
}

/// How a definition satisfies a type query.
pub(crate) struct TypeMatches {
    /// The service instance itself matches (for factories: reachable via the
    /// `&`-prefixed name).
    pub(crate) own: bool,
    /// The factory product matches (reachable via the plain name).
    pub(crate) product: bool,
}

/// The declarative recipe for one container-managed service.
///
/// Built with [`ServiceDefinition::of`]; immutable once registered.
pub struct ServiceDefinition {
    pub(crate) name: String,
    pub(crate) type_key: TypeKey,
    pub(crate) scope: Scope,
    pub(crate) constructor: Option<ConstructorFn>,
    pub(crate) prebuilt: bool,
    pub(crate) constructor_args: Vec<ValueRef>,
    pub(crate) properties: Vec<PropertyValue>,
    pub(crate) apply_property: Option<PropertyApplierFn>,
    pub(crate) depends_on: Vec<String>,
    pub(crate) lazy: bool,
    pub(crate) primary: bool,
    pub(crate) order: Option<i32>,
    pub(crate) init: Option<HookFn>,
    pub(crate) init_method: Option<(String, HookFn)>,
    pub(crate) destroy: Option<HookFn>,
    pub(crate) destroy_method: Option<(String, HookFn)>,
    pub(crate) aware: AwareWiring,
    pub(crate) factory: Option<ProduceFn>,
    pub(crate) product_type: Option<TypeKey>,
    pub(crate) discover_product_type: Option<DiscoverTypeFn>,
    pub(crate) product_singleton: bool,
    pub(crate) product_bindings: Vec<TypeBinding>,
    pub(crate) bindings: Vec<TypeBinding>,
}

impl ServiceDefinition {
    /// Start building a definition for concrete type `T` under `name`.
    pub fn of<T: Send + Sync + 'static>(name: impl Into<String>) -> DefinitionBuilder<T> {
        DefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub(crate) fn is_factory(&self) -> bool {
        self.factory.is_some()
    }

    pub(crate) fn type_matches(&self, key: &TypeKey) -> TypeMatches {
        let own = self.bindings.iter().any(|b| b.key.id() == key.id());
        let product = self.is_factory()
            && (self
                .product_bindings
                .iter()
                .any(|b| b.key.id() == key.id())
                || self.product_type.is_some_and(|t| t.id() == key.id()));
        TypeMatches { own, product }
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("type", &self.type_key.name())
            .field("scope", &self.scope)
            .field("lazy", &self.lazy)
            .field("primary", &self.primary)
            .field("factory", &self.is_factory())
            .finish()
    }
}

fn typed_hook<T, F>(f: F) -> HookFn
where
    T: Any + Send + Sync,
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |handle: &ServiceHandle| {
        let typed = handle
            .clone()
            .downcast::<T>()
            .map_err(|_| anyhow!("lifecycle hook target is not a {}", type_name::<T>()))?;
        f(&typed)
    })
}

fn identity_caster<T: Any + Send + Sync>() -> CasterFn {
    Arc::new(|handle: ServiceHandle| {
        handle
            .downcast::<T>()
            .ok()
            .map(|concrete| Arc::new(concrete) as ServiceHandle)
    })
}

/// Fluent builder for a [`ServiceDefinition`] of concrete type `T`.
///
/// Validation (constructor presence, property applier coverage, scope rules)
/// happens at registration, so `build` itself is infallible.
pub struct DefinitionBuilder<T: Send + Sync + 'static> {
    definition: ServiceDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> DefinitionBuilder<T> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            definition: ServiceDefinition {
                name: name.into(),
                type_key: TypeKey::of::<T>(),
                scope: Scope::Singleton,
                constructor: None,
                prebuilt: false,
                constructor_args: Vec::new(),
                properties: Vec::new(),
                apply_property: None,
                depends_on: Vec::new(),
                lazy: false,
                primary: false,
                order: None,
                init: None,
                init_method: None,
                destroy: None,
                destroy_method: None,
                aware: AwareWiring::default(),
                factory: None,
                product_type: None,
                discover_product_type: None,
                product_singleton: true,
                product_bindings: Vec::new(),
                bindings: vec![TypeBinding {
                    key: TypeKey::of::<T>(),
                    cast: identity_caster::<T>(),
                }],
            },
            _marker: PhantomData,
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.definition.scope = scope;
        self
    }

    /// Supply the constructor closure. Its `ResolvedArgs` match the declared
    /// `arg_*` specifications in order.
    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(ResolvedArgs) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.definition.constructor = Some(Arc::new(move |args| {
            Ok(Arc::new(f(args)?) as ServiceHandle)
        }));
        self
    }

    /// Register a pre-built instance. Every resolve shares it, so this is
    /// only valid for singleton scope.
    pub fn instance(mut self, value: T) -> Self {
        let shared: Arc<T> = Arc::new(value);
        self.definition.prebuilt = true;
        self.definition.constructor =
            Some(Arc::new(move |_args| Ok(shared.clone() as ServiceHandle)));
        self
    }

    /// Declare a literal constructor argument.
    pub fn arg_value<V: Send + Sync + 'static>(mut self, value: V) -> Self {
        self.definition
            .constructor_args
            .push(ValueRef::Value(Arc::new(value)));
        self
    }

    /// Declare a constructor argument resolved by service name.
    pub fn arg_ref(mut self, target: impl Into<String>) -> Self {
        self.definition
            .constructor_args
            .push(ValueRef::Ref(target.into()));
        self
    }

    /// Declare a constructor argument resolved by required type. The
    /// resolved value arrives as a typed view; extract it with
    /// [`ResolvedArgs::get_view`].
    pub fn arg_type<U: ?Sized + 'static>(mut self) -> Self {
        self.definition
            .constructor_args
            .push(ValueRef::TypeRef(TypeKey::of::<U>()));
        self
    }

    /// Declare a literal property value.
    pub fn prop_value<V: Send + Sync + 'static>(
        mut self,
        property: impl Into<String>,
        value: V,
    ) -> Self {
        self.definition.properties.push(PropertyValue {
            name: property.into(),
            value: ValueRef::Value(Arc::new(value)),
        });
        self
    }

    /// Declare a property resolved by service name.
    pub fn prop_ref(mut self, property: impl Into<String>, target: impl Into<String>) -> Self {
        self.definition.properties.push(PropertyValue {
            name: property.into(),
            value: ValueRef::Ref(target.into()),
        });
        self
    }

    /// Declare a property resolved by required type. The property name acts
    /// as the name hint when several candidates match. The resolved value's
    /// payload is the `Arc<U>` view: extract it in the applier with
    /// `value.downcast::<Arc<U>>()`.
    pub fn prop_type<U: ?Sized + 'static>(mut self, property: impl Into<String>) -> Self {
        self.definition.properties.push(PropertyValue {
            name: property.into(),
            value: ValueRef::TypeRef(TypeKey::of::<U>()),
        });
        self
    }

    /// Supply the property applier invoked once per declared property with
    /// the resolved value.
    pub fn properties<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &str, ServiceHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.apply_property = Some(Arc::new(
            move |handle: &ServiceHandle, property: &str, value: ServiceHandle| {
                let typed = handle
                    .clone()
                    .downcast::<T>()
                    .map_err(|_| anyhow!("property target is not a {}", type_name::<T>()))?;
                f(&typed, property, value)
            },
        ));
        self
    }

    /// Services that must be fully initialized before this one is
    /// instantiated, independent of argument wiring.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definition
            .depends_on
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Skip this definition during eager pre-instantiation.
    pub fn lazy(mut self) -> Self {
        self.definition.lazy = true;
        self
    }

    /// Mark this definition as the designated candidate when a by-type query
    /// matches several services.
    pub fn primary(mut self) -> Self {
        self.definition.primary = true;
        self
    }

    /// Declared priority for ordered provider sequences (lower runs first;
    /// unordered definitions sort last).
    pub fn order(mut self, order: i32) -> Self {
        self.definition.order = Some(order);
        self
    }

    /// Standard initialize-after-properties-set hook.
    pub fn init<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.init = Some(typed_hook(f));
        self
    }

    /// Custom init method, invoked after the standard hook.
    pub fn init_method<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.init_method = Some((method.into(), typed_hook(f)));
        self
    }

    /// Standard destroy hook, invoked at container shutdown.
    pub fn destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.destroy = Some(typed_hook(f));
        self
    }

    /// Custom destroy method, invoked after the standard destroy hook.
    pub fn destroy_method<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.destroy_method = Some((method.into(), typed_hook(f)));
        self
    }

    /// Declare that this service can be viewed as `U` (typically a trait
    /// object), enabling by-type lookups for `U`.
    pub fn implements<U, F>(mut self, cast: F) -> Self
    where
        U: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<U> + Send + Sync + 'static,
    {
        let caster: CasterFn = Arc::new(move |handle: ServiceHandle| {
            let concrete = handle.downcast::<T>().ok()?;
            Some(Arc::new(cast(concrete)) as ServiceHandle)
        });
        self.definition.bindings.push(TypeBinding {
            key: TypeKey::of::<U>(),
            cast: caster,
        });
        self
    }

    /// Mark this definition as a factory of `P`: plain-name lookups yield the
    /// manufactured product, `&`-prefixed lookups the factory itself.
    pub fn factory_of<P, F>(mut self, produce: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&T) -> anyhow::Result<P> + Send + Sync + 'static,
    {
        self.definition.factory = Some(Arc::new(move |factory: &ServiceHandle| {
            let typed = factory
                .clone()
                .downcast::<T>()
                .map_err(|_| anyhow!("factory instance is not a {}", type_name::<T>()))?;
            Ok(Arc::new(produce(&typed)?) as ServiceHandle)
        }));
        self.definition.product_type = Some(TypeKey::of::<P>());
        self.definition.product_bindings.push(TypeBinding {
            key: TypeKey::of::<P>(),
            cast: identity_caster::<P>(),
        });
        self
    }

    /// Declare that the factory product `P` can be viewed as `U`.
    pub fn product_implements<P, U, F>(mut self, cast: F) -> Self
    where
        P: Send + Sync + 'static,
        U: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<P>) -> Arc<U> + Send + Sync + 'static,
    {
        let caster: CasterFn = Arc::new(move |handle: ServiceHandle| {
            let concrete = handle.downcast::<P>().ok()?;
            Some(Arc::new(cast(concrete)) as ServiceHandle)
        });
        self.definition.product_bindings.push(TypeBinding {
            key: TypeKey::of::<U>(),
            cast: caster,
        });
        self
    }

    /// Let the live factory instance report its product type when it is not
    /// statically known (consulted by lazy type discovery).
    pub fn discover_product_type<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> Option<TypeKey> + Send + Sync + 'static,
    {
        self.definition.discover_product_type =
            Some(Arc::new(move |handle: &ServiceHandle| {
                let typed = handle.clone().downcast::<T>().ok()?;
                f(&typed)
            }));
        self
    }

    /// Whether the factory product is shared (cached per factory) or
    /// manufactured per request. Defaults to shared.
    pub fn product_singleton(mut self, shared: bool) -> Self {
        self.definition.product_singleton = shared;
        self
    }

    /// Capability setter: receives this service's registered name.
    pub fn aware_service_name<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &str) + Send + Sync + 'static,
    {
        self.definition.aware.service_name = Some(Arc::new(move |handle, name| {
            if let Ok(typed) = handle.clone().downcast::<T>() {
                f(&typed, name);
            }
        }));
        self
    }

    /// Capability setter: receives a weak handle to the owning container.
    pub fn aware_container<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, Weak<Container>) + Send + Sync + 'static,
    {
        self.definition.aware.container = Some(Arc::new(move |handle, container| {
            if let Ok(typed) = handle.clone().downcast::<T>() {
                f(&typed, container);
            }
        }));
        self
    }

    /// Capability setter: receives the host environment, when configured.
    pub fn aware_environment<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, Arc<Environment>) + Send + Sync + 'static,
    {
        self.definition.aware.environment = Some(Arc::new(move |handle, environment| {
            if let Ok(typed) = handle.clone().downcast::<T>() {
                f(&typed, environment);
            }
        }));
        self
    }

    /// Capability setter: receives the embedded value resolver, when
    /// configured.
    pub fn aware_value_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, Arc<dyn ValueResolver>) + Send + Sync + 'static,
    {
        self.definition.aware.value_resolver = Some(Arc::new(move |handle, resolver| {
            if let Ok(typed) = handle.clone().downcast::<T>() {
                f(&typed, resolver);
            }
        }));
        self
    }

    /// Capability setter: receives the host resource loader, when configured.
    pub fn aware_resource_loader<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, Arc<dyn ResourceLoader>) + Send + Sync + 'static,
    {
        self.definition.aware.resource_loader = Some(Arc::new(move |handle, loader| {
            if let Ok(typed) = handle.clone().downcast::<T>() {
                f(&typed, loader);
            }
        }));
        self
    }

    /// Capability setter: receives the host event publisher, when configured.
    pub fn aware_event_publisher<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, Arc<dyn EventPublisher>) + Send + Sync + 'static,
    {
        self.definition.aware.event_publisher = Some(Arc::new(move |handle, publisher| {
            if let Ok(typed) = handle.clone().downcast::<T>() {
                f(&typed, publisher);
            }
        }));
        self
    }

    /// Capability setter: receives the host message source, when configured.
    pub fn aware_message_source<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, Arc<dyn MessageSource>) + Send + Sync + 'static,
    {
        self.definition.aware.message_source = Some(Arc::new(move |handle, source| {
            if let Ok(typed) = handle.clone().downcast::<T>() {
                f(&typed, source);
            }
        }));
        self
    }

    /// Capability setter: receives the application-context handle (the same
    /// weak container reference, fired last in the capability order).
    pub fn aware_context<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, Weak<Container>) + Send + Sync + 'static,
    {
        self.definition.aware.context = Some(Arc::new(move |handle, container| {
            if let Ok(typed) = handle.clone().downcast::<T>() {
                f(&typed, container);
            }
        }));
        self
    }

    pub fn build(self) -> ServiceDefinition {
        self.definition
    }
}
