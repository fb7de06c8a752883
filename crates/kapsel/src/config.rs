//! Sandbox configuration.

use std::fmt;
use std::time::Duration;

use kapsel_core::ResourceConfig;
use kapsel_events::EventHandler;
use kapsel_provider::{ProcessConfig, ProviderRegistry, RemoteConfig};

/// Configuration for creating a [`Sandbox`](crate::Sandbox).
///
/// Built with chained `with_*` methods:
///
/// ```rust
/// use std::time::Duration;
/// use kapsel::SandboxConfig;
///
/// let config = SandboxConfig::new()
///     .with_provider("process")
///     .with_runtime("Python")
///     .with_timeout(Duration::from_secs(10));
/// ```
#[derive(Clone)]
pub struct SandboxConfig {
    /// Backend name (registry key).
    pub provider: String,
    /// Backend-specific configuration.
    pub provider_config: Option<serde_json::Value>,
    /// Default execution timeout.
    pub default_timeout: Duration,
    /// Language used when detection fails; empty means "no fallback".
    pub default_language: String,
    /// Language runtime label selecting the default image (e.g. "Python").
    pub runtime: String,
    /// Specific container/VM image, overriding `runtime`.
    pub image: String,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Handler subscribed to every event of the sandbox.
    pub event_handler: Option<EventHandler>,
    /// Run the language detector when no language is specified.
    pub auto_detect_language: bool,
    /// Allow network access from the sandbox.
    pub internet_access: bool,
    pub(crate) registry: Option<ProviderRegistry>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            provider: "process".to_string(),
            provider_config: None,
            default_timeout: Duration::from_secs(30),
            default_language: String::new(),
            runtime: String::new(),
            image: String::new(),
            resources: ResourceConfig::default(),
            event_handler: None,
            auto_detect_language: true,
            internet_access: false,
            registry: None,
        }
    }
}

impl SandboxConfig {
    /// The default configuration: `process` backend, 30 second timeout,
    /// auto-detection on, internet off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the backend by registry name.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Set raw backend-specific configuration.
    #[must_use]
    pub fn with_provider_config(mut self, config: serde_json::Value) -> Self {
        self.provider_config = Some(config);
        self
    }

    /// Configure and select the process backend.
    #[must_use]
    pub fn with_process_config(mut self, config: ProcessConfig) -> Self {
        self.provider = "process".to_string();
        self.provider_config = serde_json::to_value(config).ok();
        self
    }

    /// Configure and select the remote backend.
    #[must_use]
    pub fn with_remote_config(mut self, config: RemoteConfig) -> Self {
        self.provider = "remote".to_string();
        self.provider_config = serde_json::to_value(config).ok();
        self
    }

    /// Set the language runtime label (selects the default image).
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Set a specific image, overriding the runtime selection.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the default execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Language to fall back to when detection fails.
    #[must_use]
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    /// Set resource limits.
    #[must_use]
    pub const fn with_resources(mut self, resources: ResourceConfig) -> Self {
        self.resources = resources;
        self
    }

    /// Subscribe a handler to every event of the sandbox.
    #[must_use]
    pub fn with_event_handler(mut self, handler: EventHandler) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Toggle automatic language detection.
    #[must_use]
    pub const fn with_auto_detect(mut self, enabled: bool) -> Self {
        self.auto_detect_language = enabled;
        self
    }

    /// Allow network access from the sandbox.
    #[must_use]
    pub const fn with_internet_access(mut self) -> Self {
        self.internet_access = true;
        self
    }

    /// Resolve providers from a private registry instead of the process-wide
    /// default. Tests should prefer this to avoid races over shared names.
    #[must_use]
    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl fmt::Debug for SandboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxConfig")
            .field("provider", &self.provider)
            .field("default_timeout", &self.default_timeout)
            .field("default_language", &self.default_language)
            .field("runtime", &self.runtime)
            .field("image", &self.image)
            .field("resources", &self.resources)
            .field("auto_detect_language", &self.auto_detect_language)
            .field("internet_access", &self.internet_access)
            .finish_non_exhaustive()
    }
}
