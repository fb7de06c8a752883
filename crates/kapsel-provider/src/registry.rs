//! Name-keyed provider registry with lazy-cached construction.
//!
//! Providers own expensive client handles (HTTP clients, daemon sockets),
//! so a constructed provider is cached and shared by every sandbox spawned
//! from the same backend name. A process-wide default registry exists for
//! convenience; tests should prefer private registries to avoid races over
//! shared names.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use kapsel_core::{ErrorKind, SandboxError};

use crate::process::ProcessProvider;
use crate::remote::RemoteProvider;
use crate::traits::Provider;

/// Builds a provider from optional backend-specific configuration.
pub type ProviderConstructor =
    Arc<dyn Fn(Option<&serde_json::Value>) -> Result<Arc<dyn Provider>, SandboxError> + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    constructors: HashMap<String, ProviderConstructor>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

/// Maintains available providers. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in backends registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("process", |config| {
            Ok(Arc::new(ProcessProvider::from_value(config)?) as Arc<dyn Provider>)
        });
        registry.register("remote", |config| {
            Ok(Arc::new(RemoteProvider::from_value(config)?) as Arc<dyn Provider>)
        });
        registry
    }

    /// Add a provider constructor under `name`.
    pub fn register<F>(&self, name: &str, constructor: F)
    where
        F: Fn(Option<&serde_json::Value>) -> Result<Arc<dyn Provider>, SandboxError>
            + Send
            + Sync
            + 'static,
    {
        let mut inner = self.inner.write().unwrap();
        inner.constructors.insert(name.to_string(), Arc::new(constructor));
    }

    /// Remove a constructor and close any cached provider under `name`.
    pub fn unregister(&self, name: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.constructors.remove(name);
        if let Some(provider) = inner.providers.remove(name) {
            if let Err(error) = provider.close() {
                tracing::warn!(provider = name, %error, "failed to close provider");
            }
        }
    }

    /// Get the cached provider for `name`, constructing and caching it on
    /// first use. A constructor error is reported and nothing is cached.
    pub fn get(
        &self,
        name: &str,
        config: Option<&serde_json::Value>,
    ) -> Result<Arc<dyn Provider>, SandboxError> {
        let mut inner = self.inner.write().unwrap();

        if let Some(provider) = inner.providers.get(name) {
            return Ok(Arc::clone(provider));
        }

        let constructor = inner.constructors.get(name).cloned().ok_or_else(|| {
            SandboxError::new("get", name, "", ErrorKind::ProviderNotRegistered)
        })?;

        let provider = constructor(config)?;
        inner.providers.insert(name.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// The constructor registered under `name`, if any.
    #[must_use]
    pub fn constructor(&self, name: &str) -> Option<ProviderConstructor> {
        self.inner.read().unwrap().constructors.get(name).cloned()
    }

    /// Whether a constructor exists for `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.read().unwrap().constructors.contains_key(name)
    }

    /// All registered provider names, sorted.
    #[must_use]
    pub fn available(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let mut names: Vec<String> = inner.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every cached provider, returning the last error seen.
    pub fn close(&self) -> Result<(), SandboxError> {
        let mut inner = self.inner.write().unwrap();
        let mut last_err = None;
        for (name, provider) in inner.providers.drain() {
            if let Err(error) = provider.close() {
                last_err = Some(SandboxError::new("close", name, "", error));
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Process-wide default registry with the built-in backends.
static DEFAULT_REGISTRY: LazyLock<ProviderRegistry> =
    LazyLock::new(ProviderRegistry::with_defaults);

/// Handle to the process-wide default registry.
#[must_use]
pub fn default_registry() -> ProviderRegistry {
    DEFAULT_REGISTRY.clone()
}

/// Register a constructor in the default registry.
pub fn register<F>(name: &str, constructor: F)
where
    F: Fn(Option<&serde_json::Value>) -> Result<Arc<dyn Provider>, SandboxError>
        + Send
        + Sync
        + 'static,
{
    DEFAULT_REGISTRY.register(name, constructor);
}

/// Remove a provider from the default registry.
pub fn unregister(name: &str) {
    DEFAULT_REGISTRY.unregister(name);
}

/// Get a provider from the default registry.
pub fn get(
    name: &str,
    config: Option<&serde_json::Value>,
) -> Result<Arc<dyn Provider>, SandboxError> {
    DEFAULT_REGISTRY.get(name, config)
}

/// All provider names in the default registry.
#[must_use]
pub fn available() -> Vec<String> {
    DEFAULT_REGISTRY.available()
}

/// Whether `name` is registered in the default registry.
#[must_use]
pub fn is_registered(name: &str) -> bool {
    DEFAULT_REGISTRY.is_registered(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn mock_constructor(
        provider: Arc<MockProvider>,
    ) -> impl Fn(Option<&serde_json::Value>) -> Result<Arc<dyn Provider>, SandboxError> {
        move |_config| Ok(Arc::clone(&provider) as Arc<dyn Provider>)
    }

    #[tokio::test]
    async fn get_caches_constructed_providers() {
        let registry = ProviderRegistry::new();
        let mock = Arc::new(MockProvider::new());
        registry.register("mock", mock_constructor(Arc::clone(&mock)));

        let a = registry.get("mock", None).unwrap();
        let b = registry.get("mock", None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn get_unknown_name_reports_not_registered() {
        let registry = ProviderRegistry::new();
        let err = registry.get("nope", None).unwrap_err();
        assert!(err.is(ErrorKind::ProviderNotRegistered));
    }

    #[tokio::test]
    async fn constructor_error_caches_nothing() {
        let registry = ProviderRegistry::new();
        registry.register("flaky", |_| {
            Err(SandboxError::new(
                "construct",
                "flaky",
                "",
                ErrorKind::InvalidConfiguration,
            ))
        });

        assert!(registry.get("flaky", None).is_err());

        // Re-register a working constructor under the same name: it runs,
        // proving the failed attempt left no cache entry behind.
        let mock = Arc::new(MockProvider::new());
        registry.register("flaky", mock_constructor(mock));
        assert!(registry.get("flaky", None).is_ok());
    }

    #[tokio::test]
    async fn unregister_removes_and_closes() {
        let registry = ProviderRegistry::new();
        let mock = Arc::new(MockProvider::new());
        registry.register("mock", mock_constructor(Arc::clone(&mock)));
        registry.get("mock", None).unwrap();

        registry.unregister("mock");
        assert!(!registry.is_registered("mock"));
        assert_eq!(mock.close_calls(), 1);
    }

    #[tokio::test]
    async fn available_is_sorted() {
        let registry = ProviderRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            let mock = Arc::new(MockProvider::new());
            registry.register(name, mock_constructor(mock));
        }
        assert_eq!(registry.available(), vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn default_registry_carries_builtins() {
        let names = available();
        assert!(names.contains(&"process".to_string()));
        assert!(names.contains(&"remote".to_string()));
    }
}
