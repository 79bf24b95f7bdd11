//! Deferred by-type lookup handles.

use super::Container;
use crate::definition::TypeKey;
use crate::error::{Result, WireboxError};
use std::marker::PhantomData;
use std::sync::Arc;

/// A deferred handle over every service viewable as `T`.
///
/// Obtained from [`Container::provider`]; nothing is resolved until one of
/// the fetch methods runs.
pub struct ServiceProvider<'a, T: ?Sized + Send + Sync + 'static> {
    container: &'a Container,
    key: TypeKey,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<'a, T: ?Sized + Send + Sync + 'static> ServiceProvider<'a, T> {
    pub(crate) fn new(container: &'a Container) -> Self {
        Self {
            container,
            key: TypeKey::of::<T>(),
            _marker: PhantomData,
        }
    }

    /// Unique-or-error fetch: fails when zero candidates exist or several do
    /// without a decisive tie-break.
    pub fn get(&self) -> Result<Arc<T>> {
        self.container.get_by_type::<T>()
    }

    /// Optional-presence fetch: `Ok(None)` when no candidate exists.
    /// Ambiguity is still an error.
    pub fn get_opt(&self) -> Result<Option<Arc<T>>> {
        match self.container.get_by_type::<T>() {
            Ok(found) => Ok(Some(found)),
            Err(WireboxError::TypeNotFound { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Lazy iteration over all candidates, ordered by declared priority with
    /// ties broken by registration order (ancestors after locals). Each call
    /// restarts the sequence; each element resolves on demand.
    pub fn ordered(&self) -> OrderedServices<'a, T> {
        let names: Vec<String> = self
            .container
            .type_candidates(&self.key)
            .into_iter()
            .map(|candidate| candidate.lookup_name)
            .collect();
        OrderedServices {
            container: self.container,
            names: names.into_iter(),
            _marker: PhantomData,
        }
    }
}

/// Iterator returned by [`ServiceProvider::ordered`].
pub struct OrderedServices<'a, T: ?Sized + Send + Sync + 'static> {
    container: &'a Container,
    names: std::vec::IntoIter<String>,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<'a, T: ?Sized + Send + Sync + 'static> Iterator for OrderedServices<'a, T> {
    type Item = Result<Arc<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.next()?;
        Some(self.container.get_as::<T>(&name))
    }
}

#[cfg(test)]
mod tests {
    use crate::container::ContainerBuilder;
    use crate::definition::ServiceDefinition;
    use crate::error::WireboxError;
    use std::sync::Arc;

    trait Plugin: Send + Sync {
        fn id(&self) -> &'static str;
    }

    struct Worker(&'static str);

    impl Plugin for Worker {
        fn id(&self) -> &'static str {
            self.0
        }
    }

    fn worker(name: &'static str, order: Option<i32>) -> ServiceDefinition {
        let builder = ServiceDefinition::of::<Worker>(name)
            .constructor(move |_| Ok(Worker(name)))
            .implements::<dyn Plugin, _>(|concrete| concrete as Arc<dyn Plugin>);
        match order {
            Some(order) => builder.order(order).build(),
            None => builder.build(),
        }
    }

    #[test]
    fn ordered_sequence_sorts_by_priority_then_registration() {
        let container = ContainerBuilder::new()
            .register(worker("late", Some(10)))
            .register(worker("unordered", None))
            .register(worker("early", Some(5)))
            .register(worker("tied", Some(10)))
            .build()
            .unwrap();

        let provider = container.provider::<dyn Plugin>();
        let ids: Vec<&'static str> = provider
            .ordered()
            .map(|plugin| plugin.unwrap().id())
            .collect();
        assert_eq!(ids, vec!["early", "late", "tied", "unordered"]);

        // Restartable: a fresh iteration yields the same sequence.
        let again: Vec<&'static str> = provider
            .ordered()
            .map(|plugin| plugin.unwrap().id())
            .collect();
        assert_eq!(again, ids);
    }

    #[test]
    fn optional_fetch_is_empty_when_no_candidate_exists() {
        let container = ContainerBuilder::new().build().unwrap();
        let provider = container.provider::<dyn Plugin>();
        assert!(provider.get_opt().unwrap().is_none());
        assert!(matches!(
            provider.get(),
            Err(WireboxError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn ambiguity_is_still_an_error_for_optional_fetch() {
        let container = ContainerBuilder::new()
            .register(worker("first", None))
            .register(worker("second", None))
            .build()
            .unwrap();
        let provider = container.provider::<dyn Plugin>();
        assert!(matches!(
            provider.get_opt(),
            Err(WireboxError::AmbiguousType { .. })
        ));
    }

    #[test]
    fn ordered_sequence_includes_ancestor_candidates_after_local() {
        let parent = ContainerBuilder::new()
            .register(worker("inherited", None))
            .build()
            .unwrap();
        let child = ContainerBuilder::new()
            .parent(parent)
            .register(worker("local", None))
            .build()
            .unwrap();

        let ids: Vec<&'static str> = child
            .provider::<dyn Plugin>()
            .ordered()
            .map(|plugin| plugin.unwrap().id())
            .collect();
        assert_eq!(ids, vec!["local", "inherited"]);
    }
}
