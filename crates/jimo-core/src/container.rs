//! Service container
//!
//! Providers are registered per Rust type and called on every resolve, so a
//! provider decides whether it hands out fresh values or clones of a shared
//! `Arc`. Providers may resolve other services from the container they are
//! given.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type BoxService = Box<dyn Any + Send>;
type Provider = Arc<dyn Fn(&Container) -> Result<BoxService> + Send + Sync>;

/// Thread-safe, type-keyed service container
#[derive(Clone, Default)]
pub struct Container {
    providers: Arc<RwLock<HashMap<TypeId, Provider>>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the provider for `T`
    ///
    /// Fails with [`Error::DuplicateBinding`] when `T` is already bound.
    pub fn bind<T, F>(&self, provider: F) -> Result<()>
    where
        T: Any + Send,
        F: Fn(&Container) -> Result<T> + Send + Sync + 'static,
    {
        let mut providers = self.providers.write();
        if providers.contains_key(&TypeId::of::<T>()) {
            return Err(Error::DuplicateBinding(type_name::<T>()));
        }

        let provider: Provider = Arc::new(move |c: &Container| provider(c).map(|v| Box::new(v) as BoxService));
        providers.insert(TypeId::of::<T>(), provider);
        Ok(())
    }

    /// Bind `T` to clones of a single shared value
    pub fn singleton<T>(&self, value: T) -> Result<()>
    where
        T: Any + Clone + Send + Sync,
    {
        self.bind(move |_| Ok(value.clone()))
    }

    /// Build a `T` through its provider
    pub fn resolve<T: Any + Send>(&self) -> Result<T> {
        // Providers run without the lock so they can resolve their own
        // dependencies.
        let provider = self
            .providers
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(Error::UnboundService(type_name::<T>()))?;

        let service = provider(self)?;
        service
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| Error::UnboundService(type_name::<T>()))
    }

    /// Like [`resolve`](Self::resolve), panicking on failure
    pub fn must_resolve<T: Any + Send>(&self) -> T {
        match self.resolve() {
            Ok(service) => service,
            Err(e) => panic!("{}", e),
        }
    }

    /// True when a provider is registered for `T`
    pub fn contains<T: Any>(&self) -> bool {
        self.providers.read().contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.providers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Dsn(String);

    #[derive(Debug)]
    struct Repo {
        dsn: Dsn,
    }

    #[test]
    fn test_bind_and_resolve() {
        let container = Container::new();
        container.singleton(Dsn("postgres://localhost/app".to_string())).unwrap();
        container
            .bind(|c: &Container| Ok(Repo { dsn: c.resolve()? }))
            .unwrap();

        let repo: Repo = container.resolve().unwrap();
        assert_eq!(repo.dsn, Dsn("postgres://localhost/app".to_string()));
        assert!(container.contains::<Repo>());
    }

    #[test]
    fn test_duplicate_bind() {
        let container = Container::new();
        container.singleton(1u32).unwrap();

        match container.singleton(2u32) {
            Err(Error::DuplicateBinding(name)) => assert_eq!(name, "u32"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(container.resolve::<u32>().unwrap(), 1);
    }

    #[test]
    fn test_unbound_and_failing_providers() {
        let container = Container::new();
        assert!(matches!(container.resolve::<Dsn>(), Err(Error::UnboundService(_))));

        // The dependency is missing, so building the repo fails too.
        container
            .bind(|c: &Container| Ok(Repo { dsn: c.resolve()? }))
            .unwrap();
        assert!(matches!(container.resolve::<Repo>(), Err(Error::UnboundService(_))));
    }

    #[test]
    fn test_provider_runs_per_resolve() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        container
            .bind({
                let calls = Arc::clone(&calls);
                move |_: &Container| Ok(calls.fetch_add(1, Ordering::SeqCst))
            })
            .unwrap();

        assert_eq!(container.resolve::<usize>().unwrap(), 0);
        assert_eq!(container.resolve::<usize>().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[should_panic(expected = "no provider bound")]
    fn test_must_resolve_panics_when_unbound() {
        Container::new().must_resolve::<Dsn>();
    }
}
