//! # kapsel-provider
//!
//! The backend seam of the kapsel sandbox SDK: the [`Provider`] and
//! [`Instance`] contracts, the name-keyed [`ProviderRegistry`] with cached
//! construction, the [`SandboxFactory`], and the built-in backends.
//!
//! ## Built-in backends
//!
//! - `process` - local subprocess execution, full pipeline, NO isolation
//!   (development only)
//! - `remote` - a hosted sandbox service over HTTP
//! - `mock` (feature `mock`) - scriptable backend for tests
//!
//! Adapters for container/VM/WASM isolation implement the same two traits;
//! the orchestrator cannot tell them apart.

mod factory;
mod local_fs;
mod process;
mod registry;
mod remote;
mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use factory::{global_factory, SandboxFactory, UnknownProviderError};
pub use local_fs::LocalFileSystem;
pub use process::{ProcessConfig, ProcessProvider};
pub use registry::{
    available, default_registry, get, is_registered, register, unregister, ProviderConstructor,
    ProviderRegistry,
};
pub use remote::{RemoteConfig, RemoteProvider};
pub use traits::{Instance, Network, Provider};

use kapsel_core::{ErrorKind, SandboxError};

/// Error for a backend configuration blob that doesn't parse.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct ConfigParseError {
    message: String,
    #[source]
    kind: ErrorKind,
}

pub(crate) fn invalid_config(
    provider: &'static str,
    error: &dyn std::fmt::Display,
) -> SandboxError {
    SandboxError::new(
        "configure",
        provider,
        "",
        ConfigParseError {
            message: error.to_string(),
            kind: ErrorKind::InvalidConfiguration,
        },
    )
}
