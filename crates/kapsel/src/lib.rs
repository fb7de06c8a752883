//! # kapsel
//!
//! A unified SDK for code execution across isolated environments.
//!
//! kapsel turns "here is a string of source code" into "this executed
//! safely in backend X and here is its result": it detects the language,
//! selects a runtime, hands the code to an isolation backend through one
//! contract, and surfaces results, streams and events uniformly. Backends
//! cover the whole isolation spectrum (subprocesses for development, remote
//! sandbox services, and any container/VM/WASM adapter implementing the
//! provider contract).
//!
//! ## One-shot execution
//!
//! ```rust,no_run
//! use kapsel::SandboxConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let result = kapsel::execute("print('Hello, World!')", SandboxConfig::new()).await?;
//!     println!("{}", result.stdout);
//!     Ok(())
//! }
//! ```
//!
//! ## A sandbox for multiple executions
//!
//! ```rust,no_run
//! use kapsel::{Sandbox, SandboxConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sandbox = Sandbox::create(SandboxConfig::new()).await?;
//!
//!     let result = sandbox.execute("print(1 + 1)").await?;
//!     assert_eq!(result.stdout.trim(), "2");
//!
//!     sandbox.stop().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod sandbox;

pub use config::SandboxConfig;
pub use sandbox::Sandbox;

pub use kapsel_core::{
    Artifact, BoxError, Capabilities, CommandResult, CreateOptions, ErrorKind, ExecutionError,
    ExecutionOptions, ExecutionResult, FileInfo, FileSystem, InstanceStatus, PublishedPort,
    ResourceConfig, SandboxError,
};
pub use kapsel_events::{
    Event, EventBus, EventHandler, EventType, ExecutionCompleteData, ExecutionStartedData,
    StreamError, StreamEvent, StreamEventType, StreamHandler, Subscription,
};
pub use kapsel_langdetect::{DetectMethod, DetectOptions, DetectResult, Detector, RuntimeInfo};
pub use kapsel_provider::{
    default_registry, global_factory, Instance, Network, ProcessConfig, Provider,
    ProviderRegistry, RemoteConfig, SandboxFactory,
};

use tracing::warn;

/// Create a sandbox, run one execution, and tear the sandbox down.
///
/// Stop is best-effort: a teardown failure is logged, not returned.
pub async fn execute(
    code: &str,
    config: SandboxConfig,
) -> Result<ExecutionResult, SandboxError> {
    let sandbox = Sandbox::create(config).await?;
    let result = sandbox.execute(code).await;
    if let Err(error) = sandbox.stop().await {
        warn!(%error, "failed to stop one-shot sandbox");
    }
    result
}

/// One-shot streaming execution; see [`execute`].
pub async fn execute_stream(
    code: &str,
    handler: StreamHandler,
    config: SandboxConfig,
) -> Result<(), SandboxError> {
    let sandbox = Sandbox::create(config).await?;
    let result = sandbox.execute_stream(code, handler).await;
    if let Err(error) = sandbox.stop().await {
        warn!(%error, "failed to stop one-shot sandbox");
    }
    result
}

/// Names of all providers registered in the default registry.
#[must_use]
pub fn list_providers() -> Vec<String> {
    kapsel_provider::available()
}

/// Capabilities of a provider from the default registry.
pub fn provider_capabilities(name: &str) -> Result<Capabilities, SandboxError> {
    global_factory().capabilities(name, None)
}

/// Detect the language of `code`, with every detection stage enabled.
/// Pass an empty `filename` when no hint exists.
#[must_use]
pub fn detect_language(code: &str, filename: &str) -> DetectResult {
    kapsel_langdetect::full(code, filename)
}

/// All languages with runtime support, sorted.
#[must_use]
pub fn supported_languages() -> Vec<String> {
    kapsel_langdetect::supported_languages()
}

/// Runtime details for a language name or alias.
#[must_use]
pub fn runtime_info(language: &str) -> Option<&'static RuntimeInfo> {
    kapsel_langdetect::runtime_info(language)
}
