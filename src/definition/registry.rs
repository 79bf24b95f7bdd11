//! Definition and alias tables.
//!
//! Read-mostly after startup; re-registration is assumed to be externally
//! serialized with respect to in-flight lookups.

use super::ServiceDefinition;
use crate::error::{Result, WireboxError};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};

pub(crate) struct DefinitionRegistry {
    definitions: DashMap<String, Arc<ServiceDefinition>>,
    aliases: DashMap<String, String>,
    order: Mutex<Vec<String>>,
}

impl DefinitionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            aliases: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Store or fully replace a definition by name.
    ///
    /// Returns `true` when an existing definition was overridden. A replaced
    /// definition keeps its original registration position.
    pub(crate) fn register(&self, definition: ServiceDefinition) -> Result<bool> {
        Self::validate(&definition)?;
        let name = definition.name.clone();
        if self.aliases.contains_key(&name) {
            return Err(WireboxError::invalid_definition(
                &name,
                "name conflicts with a registered alias",
            ));
        }
        let replaced = self
            .definitions
            .insert(name.clone(), Arc::new(definition))
            .is_some();
        if replaced {
            tracing::debug!("Overriding definition: {}", name);
        } else {
            tracing::debug!("Registered definition: {}", name);
            self.order
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(name);
        }
        Ok(replaced)
    }

    fn validate(definition: &ServiceDefinition) -> Result<()> {
        let name = &definition.name;
        if name.is_empty() {
            return Err(WireboxError::invalid_definition(
                "<unnamed>",
                "definition name must not be empty",
            ));
        }
        if definition.constructor.is_none() {
            return Err(WireboxError::invalid_definition(
                name,
                "definition has neither a constructor nor an instance",
            ));
        }
        if definition.prebuilt && !definition.scope.is_singleton() {
            return Err(WireboxError::invalid_definition(
                name,
                "a pre-built instance is only valid for singleton scope",
            ));
        }
        if !definition.properties.is_empty() && definition.apply_property.is_none() {
            return Err(WireboxError::invalid_definition(
                name,
                "property values declared without a property applier",
            ));
        }
        if definition.depends_on.iter().any(|dep| dep == name) {
            return Err(WireboxError::invalid_definition(
                name,
                "definition cannot depend on itself",
            ));
        }
        if definition.factory.is_none()
            && (!definition.product_bindings.is_empty()
                || definition.discover_product_type.is_some())
        {
            return Err(WireboxError::invalid_definition(
                name,
                "product declarations require a factory definition",
            ));
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
        self.definitions.get(name).map(|entry| entry.value().clone())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Resolve an alias to its canonical name. Idempotent and total: a
    /// non-alias input comes back unchanged.
    pub(crate) fn resolve_alias(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .map(|canonical| canonical.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Register `alias` for `target`. Targets that are themselves aliases are
    /// flattened at registration time, so lookups never chase chains.
    pub(crate) fn register_alias(
        &self,
        alias: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<()> {
        let alias = alias.into();
        let canonical = self.resolve_alias(&target.into());
        if alias.is_empty() {
            return Err(WireboxError::invalid_definition(
                "<alias>",
                "alias must not be empty",
            ));
        }
        if alias == canonical {
            return Err(WireboxError::invalid_definition(
                &alias,
                "alias cannot reference itself",
            ));
        }
        if self.definitions.contains_key(&alias) {
            return Err(WireboxError::invalid_definition(
                &alias,
                "alias conflicts with a registered definition name",
            ));
        }
        if !self.definitions.contains_key(&canonical) {
            return Err(WireboxError::invalid_definition(
                &alias,
                format!("alias target '{canonical}' is not a registered definition"),
            ));
        }
        tracing::debug!("Registered alias: {} -> {}", alias, canonical);
        self.aliases.insert(alias, canonical);
        Ok(())
    }

    /// All aliases pointing at `canonical`, sorted for determinism.
    pub(crate) fn aliases_of(&self, canonical: &str) -> Vec<String> {
        let mut found: Vec<String> = self
            .aliases
            .iter()
            .filter(|entry| entry.value() == canonical)
            .map(|entry| entry.key().clone())
            .collect();
        found.sort();
        found
    }

    /// Definition names in registration order.
    pub(crate) fn names(&self) -> Vec<String> {
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lazy, restartable walk over definitions in registration order.
    pub(crate) fn iter_ordered(
        &self,
    ) -> impl Iterator<Item = (String, Arc<ServiceDefinition>)> + '_ {
        self.names()
            .into_iter()
            .filter_map(|name| self.lookup(&name).map(|definition| (name, definition)))
    }
}
