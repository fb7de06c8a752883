//! Factory over the provider registry.

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, LazyLock};

use kapsel_core::{Capabilities, CreateOptions, ErrorKind, SandboxError};

use crate::registry::{default_registry, ProviderRegistry};
use crate::traits::{Instance, Provider};

/// The default backend name, marked in diagnostics.
const DEFAULT_PROVIDER: &str = "process";

/// Raised when a sandbox is requested from an unknown backend. Lists what
/// is actually registered so the caller can fix the name.
#[derive(Debug)]
pub struct UnknownProviderError {
    name: String,
    available: Vec<String>,
    kind: ErrorKind,
}

impl StdError for UnknownProviderError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.kind)
    }
}

impl fmt::Display for UnknownProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "provider {:?} not found", self.name)?;
        writeln!(f)?;
        writeln!(f, "Available providers:")?;
        for name in &self.available {
            if name == DEFAULT_PROVIDER {
                writeln!(f, "  - {name} (default)")?;
            } else {
                writeln!(f, "  - {name}")?;
            }
        }
        Ok(())
    }
}

/// Creates sandboxes from registered providers.
#[derive(Clone)]
pub struct SandboxFactory {
    registry: ProviderRegistry,
}

impl SandboxFactory {
    /// Factory over a custom registry.
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Factory over the process-wide default registry.
    #[must_use]
    pub fn with_default_registry() -> Self {
        Self {
            registry: default_registry(),
        }
    }

    /// The registry backing this factory.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Create a sandbox instance from the named provider.
    pub async fn create_sandbox(
        &self,
        provider_name: &str,
        provider_config: Option<&serde_json::Value>,
        opts: Option<CreateOptions>,
    ) -> Result<Arc<dyn Instance>, SandboxError> {
        if !self.registry.is_registered(provider_name) {
            return Err(SandboxError::new(
                "create",
                provider_name,
                "",
                UnknownProviderError {
                    name: provider_name.to_string(),
                    available: self.registry.available(),
                    kind: ErrorKind::ProviderNotRegistered,
                },
            ));
        }

        let provider = self.registry.get(provider_name, provider_config)?;
        provider.create(opts.unwrap_or_default()).await
    }

    /// Get (and cache) the named provider.
    pub fn provider(
        &self,
        name: &str,
        config: Option<&serde_json::Value>,
    ) -> Result<Arc<dyn Provider>, SandboxError> {
        self.registry.get(name, config)
    }

    /// All available provider names.
    #[must_use]
    pub fn list_providers(&self) -> Vec<String> {
        self.registry.available()
    }

    /// Capabilities of the named provider.
    pub fn capabilities(
        &self,
        name: &str,
        config: Option<&serde_json::Value>,
    ) -> Result<Capabilities, SandboxError> {
        Ok(self.registry.get(name, config)?.capabilities())
    }

    /// Check the named provider is reachable and configured.
    pub async fn validate_provider(
        &self,
        name: &str,
        config: Option<&serde_json::Value>,
    ) -> Result<(), SandboxError> {
        self.registry.get(name, config)?.validate().await
    }

    /// Close every provider in the backing registry.
    pub fn close(&self) -> Result<(), SandboxError> {
        self.registry.close()
    }
}

static GLOBAL_FACTORY: LazyLock<SandboxFactory> =
    LazyLock::new(SandboxFactory::with_default_registry);

/// The factory over the process-wide default registry.
#[must_use]
pub fn global_factory() -> &'static SandboxFactory {
    &GLOBAL_FACTORY
}
