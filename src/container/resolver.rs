//! The dependency-resolution algorithm.
//!
//! Resolution is synchronous recursion on the calling thread. The
//! [`Resolution`] value is the per-call-chain state: the in-creation chain
//! used for cycle detection and the (lazily acquired) container-wide creation
//! guard. Nested resolutions of dependencies reuse the same chain, so
//! unrelated concurrent creations never spuriously report a cycle.

use super::Container;
use super::cache::InstanceCache;
use crate::definition::{ResolvedArgs, ServiceDefinition, ServiceHandle, TypeKey, ValueRef};
use crate::error::{Result, WireboxError};
use crate::lifecycle::{self, LifecyclePhase};
use crate::scope::Scope;
use std::sync::{Arc, MutexGuard};

/// Reserved prefix requesting the factory service itself instead of its
/// manufactured product.
pub const FACTORY_PREFIX: char = '&';

/// Strip (possibly repeated) factory-dereference prefixes from a lookup name.
pub(crate) fn strip_factory_prefix(name: &str) -> (&str, bool) {
    let stripped = name.trim_start_matches(FACTORY_PREFIX);
    (stripped, stripped.len() != name.len())
}

/// Per-call-chain resolution state.
pub(crate) struct Resolution<'a> {
    cache: &'a InstanceCache,
    chain: Vec<String>,
    guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> Resolution<'a> {
    pub(crate) fn new(container: &'a Container) -> Self {
        Self {
            cache: container.cache(),
            chain: Vec::new(),
            guard: None,
        }
    }

    pub(crate) fn push(&mut self, name: &str) {
        self.chain.push(name.to_string());
    }

    pub(crate) fn pop(&mut self) {
        self.chain.pop();
    }

    fn in_chain(&self, name: &str) -> bool {
        self.chain.iter().any(|entry| entry == name)
    }

    fn cycle_display(&self, name: &str) -> String {
        let mut parts: Vec<&str> = self.chain.iter().map(String::as_str).collect();
        parts.push(name);
        parts.join(" -> ")
    }

    /// Acquire the container-wide creation lock once per chain. The fast
    /// path on `finished` never gets here; prototype-only chains get here
    /// only when they hit an uncreated singleton dependency.
    fn lock_creation(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(self.cache.lock_creation());
        }
    }
}

/// A by-type match produced by walking the definition registries.
pub(crate) struct TypeCandidate {
    /// Name to resolve; `&`-prefixed when the factory object itself matched.
    pub(crate) lookup_name: String,
    /// Canonical definition name.
    pub(crate) name: String,
    pub(crate) primary: bool,
    pub(crate) order: Option<i32>,
    depth: usize,
    index: usize,
}

impl Container {
    /// Resolve an already-located local definition, honoring its scope and
    /// the factory-dereference request.
    pub(crate) fn resolve_definition(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        wants_factory: bool,
        resolution: &mut Resolution<'_>,
    ) -> Result<ServiceHandle> {
        let instance = match &definition.scope {
            Scope::Singleton => self.resolve_singleton(name, definition, resolution)?,
            Scope::Prototype => self.resolve_prototype(name, definition, resolution)?,
            Scope::Custom(scope_name) => {
                self.resolve_custom_scoped(name, definition, scope_name, resolution)?
            }
        };
        if wants_factory {
            if !definition.is_factory() {
                return Err(WireboxError::NotAFactory {
                    name: name.to_string(),
                });
            }
            Ok(instance)
        } else if definition.is_factory() {
            self.resolve_product(name, definition, &instance, resolution)
        } else {
            Ok(instance)
        }
    }

    /// Resolve a dependency by (possibly `&`-prefixed, possibly aliased)
    /// name within the current chain, delegating to the parent container
    /// when the name is not defined locally.
    pub(crate) fn resolve_named(
        &self,
        name: &str,
        resolution: &mut Resolution<'_>,
    ) -> Result<ServiceHandle> {
        let (stripped, wants_factory) = strip_factory_prefix(name);
        let canonical = self.registry().resolve_alias(stripped);
        match self.registry().lookup(&canonical) {
            Some(definition) => {
                self.resolve_definition(&canonical, &definition, wants_factory, resolution)
            }
            None => match self.parent() {
                // Parent definitions cannot reference ours, so the parent
                // resolves on a fresh chain of its own.
                Some(parent) => parent.get(name),
                None => Err(WireboxError::not_found(name)),
            },
        }
    }

    fn resolve_singleton(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        resolution: &mut Resolution<'_>,
    ) -> Result<ServiceHandle> {
        // Fast path: published singletons are read lock-free.
        if let Some(found) = self.cache().finished(name) {
            return Ok(found);
        }
        if let Some((phase, message)) = self.cache().failure(name) {
            return Err(WireboxError::creation_failed(
                name,
                phase,
                anyhow::anyhow!(message),
            ));
        }
        if resolution.in_chain(name) {
            if let Some(early) = self.cache().fetch_early(name, &self.post_processors()) {
                tracing::debug!("Breaking cycle with early reference: {}", name);
                return Ok(early);
            }
            return Err(WireboxError::CircularDependency {
                cycle: resolution.cycle_display(name),
            });
        }
        resolution.lock_creation();
        // Re-check after winning the creation lock: another thread may have
        // published or failed this name while we waited.
        if let Some(found) = self.cache().finished(name) {
            return Ok(found);
        }
        if let Some((phase, message)) = self.cache().failure(name) {
            return Err(WireboxError::creation_failed(
                name,
                phase,
                anyhow::anyhow!(message),
            ));
        }
        tracing::debug!("Creating singleton: {}", name);
        resolution.push(name);
        let created = self.create_singleton(name, definition, resolution);
        resolution.pop();
        match created {
            Ok(instance) => Ok(instance),
            Err(error) => {
                self.cache().remove_early(name);
                if let WireboxError::CreationFailed { phase, source, .. } = &error {
                    // A failed singleton stays failed until re-registered.
                    self.cache().record_failure(name, *phase, source.to_string());
                }
                Err(error)
            }
        }
    }

    fn create_singleton(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        resolution: &mut Resolution<'_>,
    ) -> Result<ServiceHandle> {
        self.resolve_depends_on(name, definition, resolution)?;
        let args = self.resolve_constructor_args(name, definition, resolution)?;
        let raw = self.instantiate(name, definition, args)?;
        // Expose the raw instance before property population so
        // property-level cycles can close over it.
        self.cache().put_early(name, raw.clone());
        self.populate_properties(name, definition, &raw, resolution)?;
        let exposed = lifecycle::initialize(self, name, definition, raw.clone())?;
        let exposed = match self.cache().consumed_early(name) {
            Some(early) => {
                if Arc::ptr_eq(&exposed, &raw) {
                    // Init processors left the instance alone; keep the
                    // identity every cycle participant already holds.
                    early
                } else {
                    return Err(WireboxError::creation_failed(
                        name,
                        LifecyclePhase::AfterInit,
                        anyhow::anyhow!(
                            "a post-processor replaced the instance after its early \
                             reference was handed out; identity cannot be preserved"
                        ),
                    ));
                }
            }
            None => exposed,
        };
        self.cache().promote(name, definition.clone(), exposed.clone());
        tracing::debug!("Singleton ready: {}", name);
        Ok(exposed)
    }

    fn resolve_prototype(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        resolution: &mut Resolution<'_>,
    ) -> Result<ServiceHandle> {
        // Prototypes have no early reference to hand out, so any cycle
        // through one is unresolvable.
        if resolution.in_chain(name) {
            return Err(WireboxError::CircularDependency {
                cycle: resolution.cycle_display(name),
            });
        }
        tracing::trace!("Creating prototype instance: {}", name);
        resolution.push(name);
        let created = self.create_fresh(name, definition, resolution, None);
        resolution.pop();
        created
    }

    fn resolve_custom_scoped(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        scope_name: &str,
        resolution: &mut Resolution<'_>,
    ) -> Result<ServiceHandle> {
        let scope = self
            .custom_scope(scope_name)
            .ok_or_else(|| WireboxError::UnknownScope {
                name: name.to_string(),
                scope: scope_name.to_string(),
            })?;
        if resolution.in_chain(name) {
            return Err(WireboxError::CircularDependency {
                cycle: resolution.cycle_display(name),
            });
        }
        resolution.push(name);
        let created = {
            let mut create = || self.create_fresh(name, definition, resolution, None);
            scope.get(name, &mut create)
        };
        resolution.pop();
        created
    }

    /// Build and initialize an instance without publishing anything to the
    /// singleton cache. Shared by prototype, custom-scope, and explicit-args
    /// creation.
    pub(crate) fn create_fresh(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        resolution: &mut Resolution<'_>,
        explicit_args: Option<Vec<ServiceHandle>>,
    ) -> Result<ServiceHandle> {
        self.resolve_depends_on(name, definition, resolution)?;
        let args = match explicit_args {
            Some(args) => args,
            None => self.resolve_constructor_args(name, definition, resolution)?,
        };
        let raw = self.instantiate(name, definition, args)?;
        self.populate_properties(name, definition, &raw, resolution)?;
        lifecycle::initialize(self, name, definition, raw)
    }

    fn resolve_depends_on(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        resolution: &mut Resolution<'_>,
    ) -> Result<()> {
        for dependency in &definition.depends_on {
            // depends-on requires the dependency fully finished, so an early
            // reference cannot satisfy it: any chain hit is a hard cycle.
            if resolution.in_chain(dependency) {
                return Err(WireboxError::CircularDependency {
                    cycle: resolution.cycle_display(dependency),
                });
            }
            tracing::trace!("'{}' depends on '{}'", name, dependency);
            self.resolve_named(dependency, resolution)
                .map_err(|error| match error {
                    cycle @ WireboxError::CircularDependency { .. } => cycle,
                    other => WireboxError::creation_failed(
                        name,
                        LifecyclePhase::Instantiate,
                        anyhow::Error::new(other).context(format!("depends-on '{dependency}'")),
                    ),
                })?;
        }
        Ok(())
    }

    fn resolve_constructor_args(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        resolution: &mut Resolution<'_>,
    ) -> Result<Vec<ServiceHandle>> {
        let mut values = Vec::with_capacity(definition.constructor_args.len());
        for (index, spec) in definition.constructor_args.iter().enumerate() {
            let value = self
                .resolve_value_ref(spec, None, resolution)
                .map_err(|error| match error {
                    cycle @ WireboxError::CircularDependency { .. } => cycle,
                    other => WireboxError::creation_failed(
                        name,
                        LifecyclePhase::Instantiate,
                        anyhow::Error::new(other).context(format!("constructor argument {index}")),
                    ),
                })?;
            values.push(value);
        }
        Ok(values)
    }

    fn instantiate(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        args: Vec<ServiceHandle>,
    ) -> Result<ServiceHandle> {
        let constructor = definition
            .constructor
            .as_ref()
            .ok_or_else(|| WireboxError::invalid_definition(name, "definition has no constructor"))?;
        let raw = constructor(ResolvedArgs::new(args))
            .map_err(|e| WireboxError::creation_failed(name, LifecyclePhase::Instantiate, e))?;
        tracing::trace!("Instantiated: {}", name);
        Ok(raw)
    }

    fn populate_properties(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        instance: &ServiceHandle,
        resolution: &mut Resolution<'_>,
    ) -> Result<()> {
        if definition.properties.is_empty() {
            return Ok(());
        }
        let apply = definition.apply_property.as_ref().ok_or_else(|| {
            WireboxError::invalid_definition(name, "property values declared without an applier")
        })?;
        for property in &definition.properties {
            let value = self
                .resolve_value_ref(&property.value, Some(&property.name), resolution)
                .map_err(|error| match error {
                    cycle @ WireboxError::CircularDependency { .. } => cycle,
                    other => WireboxError::creation_failed(
                        name,
                        LifecyclePhase::PopulateProperties,
                        anyhow::Error::new(other)
                            .context(format!("property '{}'", property.name)),
                    ),
                })?;
            apply(instance, &property.name, value).map_err(|e| {
                WireboxError::creation_failed(name, LifecyclePhase::PopulateProperties, e)
            })?;
        }
        tracing::trace!("Populated properties: {}", name);
        Ok(())
    }

    fn resolve_value_ref(
        &self,
        spec: &ValueRef,
        hint: Option<&str>,
        resolution: &mut Resolution<'_>,
    ) -> Result<ServiceHandle> {
        match spec {
            ValueRef::Value(handle) => Ok(handle.clone()),
            ValueRef::Ref(target) => self.resolve_named(target, resolution),
            ValueRef::TypeRef(key) => {
                // By-type dependencies are delivered as typed views (payload
                // `Arc<T>`), so trait-object seams work without the consumer
                // knowing the winning concrete type.
                let (lookup_name, handle) = self.resolve_by_type_key(key, hint, resolution)?;
                self.coerce_view(&lookup_name, key, handle)
            }
        }
    }

    /// Runtime counterpart of the typed coercion: wrap `handle` into the
    /// `Arc<T>` view for `key` using the owning definition's bindings.
    pub(crate) fn coerce_view(
        &self,
        lookup_name: &str,
        key: &TypeKey,
        handle: ServiceHandle,
    ) -> Result<ServiceHandle> {
        let caster = self.binding_caster(lookup_name, key.id())?;
        let mismatch = || WireboxError::TypeMismatch {
            name: lookup_name.to_string(),
            requested: key.name().to_string(),
        };
        let caster = caster.ok_or_else(mismatch)?;
        caster(handle).ok_or_else(mismatch)
    }

    fn resolve_product(
        &self,
        name: &str,
        definition: &Arc<ServiceDefinition>,
        factory: &ServiceHandle,
        resolution: &mut Resolution<'_>,
    ) -> Result<ServiceHandle> {
        let produce = definition
            .factory
            .as_ref()
            .ok_or_else(|| WireboxError::NotAFactory {
                name: name.to_string(),
            })?;
        let cacheable = definition.scope.is_singleton() && definition.product_singleton;
        if cacheable {
            if let Some(product) = self.cache().product(name) {
                return Ok(product);
            }
            resolution.lock_creation();
            if let Some(product) = self.cache().product(name) {
                return Ok(product);
            }
        }
        tracing::debug!("Manufacturing product of factory: {}", name);
        let product = produce(factory)
            .map_err(|e| WireboxError::creation_failed(name, LifecyclePhase::Instantiate, e))?;
        let mut exposed = product;
        for processor in self.post_processors() {
            match processor.after_init(&exposed, name) {
                Ok(Some(replacement)) => exposed = replacement,
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
        if cacheable {
            self.cache().store_product(name, exposed.clone());
        }
        Ok(exposed)
    }

    /// By-type resolution with the fixed tie-break: explicit name hint, then
    /// single unambiguous match, then unique primary marker.
    pub(crate) fn resolve_by_type_key(
        &self,
        key: &TypeKey,
        hint: Option<&str>,
        resolution: &mut Resolution<'_>,
    ) -> Result<(String, ServiceHandle)> {
        let candidates = self.type_candidates(key);
        if candidates.is_empty() {
            return Err(WireboxError::TypeNotFound {
                type_name: key.name().to_string(),
            });
        }
        let chosen = self.choose_candidate(key, &candidates, hint)?;
        let lookup_name = chosen.lookup_name.clone();
        let handle = self.resolve_named(&lookup_name, resolution)?;
        Ok((lookup_name, handle))
    }

    fn choose_candidate<'c>(
        &self,
        key: &TypeKey,
        candidates: &'c [TypeCandidate],
        hint: Option<&str>,
    ) -> Result<&'c TypeCandidate> {
        if let Some(hint) = hint {
            let canonical = self.registry().resolve_alias(hint);
            let named: Vec<&TypeCandidate> = candidates
                .iter()
                .filter(|candidate| candidate.name == canonical)
                .collect();
            let preferred = named
                .iter()
                .find(|candidate| !candidate.lookup_name.starts_with(FACTORY_PREFIX))
                .or_else(|| named.first());
            if let Some(candidate) = preferred {
                return Ok(*candidate);
            }
        }
        if candidates.len() == 1 {
            return Ok(&candidates[0]);
        }
        let primaries: Vec<&TypeCandidate> = candidates
            .iter()
            .filter(|candidate| candidate.primary)
            .collect();
        if primaries.len() == 1 {
            return Ok(primaries[0]);
        }
        Err(WireboxError::AmbiguousType {
            type_name: key.name().to_string(),
            candidates: candidates
                .iter()
                .map(|candidate| candidate.lookup_name.clone())
                .collect(),
        })
    }

    /// All definitions matching `key`, local registry first, ancestors after,
    /// shadowed ancestor names excluded. Sorted by declared order, then
    /// hierarchy depth, then registration order.
    pub(crate) fn type_candidates(&self, key: &TypeKey) -> Vec<TypeCandidate> {
        let mut visited = Vec::new();
        let mut candidates = Vec::new();
        self.collect_type_candidates(key, 0, &mut visited, &mut candidates);
        candidates.sort_by_key(|candidate| {
            (
                candidate.order.unwrap_or(i32::MAX),
                candidate.depth,
                candidate.index,
            )
        });
        candidates
    }

    fn collect_type_candidates(
        &self,
        key: &TypeKey,
        depth: usize,
        visited: &mut Vec<usize>,
        out: &mut Vec<TypeCandidate>,
    ) {
        let identity = self as *const Container as usize;
        if visited.contains(&identity) {
            return;
        }
        visited.push(identity);
        for (index, (name, definition)) in self.registry().iter_ordered().enumerate() {
            let matches = definition.type_matches(key);
            if matches.product {
                out.push(TypeCandidate {
                    lookup_name: name.clone(),
                    name: name.clone(),
                    primary: definition.primary,
                    order: definition.order,
                    depth,
                    index,
                });
            }
            if matches.own {
                let lookup_name = if definition.is_factory() {
                    format!("{FACTORY_PREFIX}{name}")
                } else {
                    name.clone()
                };
                out.push(TypeCandidate {
                    lookup_name,
                    name: name.clone(),
                    primary: definition.primary,
                    order: definition.order,
                    depth,
                    index,
                });
            }
        }
        if let Some(parent) = self.parent() {
            let mut inherited = Vec::new();
            parent.collect_type_candidates(key, depth + 1, visited, &mut inherited);
            // A local definition shadows an ancestor's under the same name.
            inherited.retain(|candidate| !self.registry().contains(&candidate.name));
            out.extend(inherited);
        }
    }
}
