use dashmap::DashMap;
use std::env;
use std::sync::Arc;

/// Key-value property source handed to environment-aware services.
#[derive(Clone, Default)]
pub struct Environment {
    properties: Arc<DashMap<String, String>>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment seeded from the process environment variables.
    pub fn from_env() -> Self {
        let environment = Self::default();
        for (key, value) in env::vars() {
            environment.set(&key, &value);
        }
        environment
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.properties
            .insert(key.to_string(), value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }
}

/// Resolves embedded placeholders in string values.
///
/// Handed to value-resolver-aware services so they can expand configuration
/// expressions without depending on a concrete property source.
pub trait ValueResolver: Send + Sync {
    /// Resolve `value`, returning `None` when a placeholder cannot be
    /// satisfied.
    fn resolve(&self, value: &str) -> Option<String>;
}

/// [`ValueResolver`] backed by an [`Environment`].
///
/// Expands `${key}` and `${key:default}` expressions; a missing key without a
/// default makes the whole value unresolvable.
pub struct PlaceholderResolver {
    environment: Arc<Environment>,
}

impl PlaceholderResolver {
    pub fn new(environment: Arc<Environment>) -> Self {
        Self { environment }
    }
}

impl ValueResolver for PlaceholderResolver {
    fn resolve(&self, value: &str) -> Option<String> {
        let mut resolved = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            resolved.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}')?;
            let token = &after[..end];
            let (key, default) = match token.split_once(':') {
                Some((key, default)) => (key, Some(default)),
                None => (token, None),
            };
            match self.environment.get(key) {
                Some(found) => resolved.push_str(&found),
                None => resolved.push_str(default?),
            }
            rest = &after[end + 1..];
        }
        resolved.push_str(rest);
        Some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(pairs: &[(&str, &str)]) -> PlaceholderResolver {
        let environment = Environment::new();
        for (key, value) in pairs {
            environment.set(key, value);
        }
        PlaceholderResolver::new(Arc::new(environment))
    }

    #[test]
    fn plain_values_pass_through() {
        let resolver = resolver_with(&[]);
        assert_eq!(resolver.resolve("postgres://db"), Some("postgres://db".into()));
    }

    #[test]
    fn expands_placeholders() {
        let resolver = resolver_with(&[("DB_HOST", "db.internal"), ("DB_PORT", "5432")]);
        assert_eq!(
            resolver.resolve("postgres://${DB_HOST}:${DB_PORT}/app"),
            Some("postgres://db.internal:5432/app".into())
        );
    }

    #[test]
    fn falls_back_to_defaults() {
        let resolver = resolver_with(&[]);
        assert_eq!(
            resolver.resolve("${DB_HOST:localhost}"),
            Some("localhost".into())
        );
    }

    #[test]
    fn missing_key_without_default_is_unresolvable() {
        let resolver = resolver_with(&[]);
        assert_eq!(resolver.resolve("${DB_HOST}"), None);
    }
}
