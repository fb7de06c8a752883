//! The backend seam: Provider and Instance contracts.
//!
//! These traits have no notion of container, VM or HTTP. Each adapter
//! translates the operations into its own vocabulary, so the orchestrator
//! never needs to know which isolation technology is underneath.

use std::sync::Arc;

use async_trait::async_trait;

use kapsel_core::{
    Capabilities, CommandResult, CreateOptions, ExecutionOptions, ExecutionResult, FileSystem,
    InstanceStatus, PublishedPort, SandboxError,
};
use kapsel_events::StreamHandler;

/// A sandbox backend: factory of instances plus self-description.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g. `"process"`).
    fn name(&self) -> &str;

    /// Bring up a new sandbox instance.
    async fn create(&self, opts: CreateOptions) -> Result<Arc<dyn Instance>, SandboxError>;

    /// What this backend supports. Declarative only; never consulted for
    /// dispatch.
    fn capabilities(&self) -> Capabilities;

    /// Check the backend is reachable and configured.
    async fn validate(&self) -> Result<(), SandboxError>;

    /// Release cached resources. Safe to call once.
    fn close(&self) -> Result<(), SandboxError>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}

/// One sandbox instance of a specific backend.
#[async_trait]
pub trait Instance: Send + Sync {
    /// Unique instance identifier, stable from creation to teardown.
    fn id(&self) -> &str;

    /// Run code and return the collected result.
    ///
    /// The deadline is `opts.timeout`; expiry kills the workload and
    /// surfaces [`kapsel_core::ErrorKind::ExecutionTimeout`]. Callers with
    /// an outer deadline wrap the returned future, so the effective
    /// deadline is the minimum of both.
    async fn execute(
        &self,
        code: &str,
        opts: &ExecutionOptions,
    ) -> Result<ExecutionResult, SandboxError>;

    /// Run code, delivering output to `handler` as it is produced.
    ///
    /// Every backend must terminate the stream with exactly one `complete`
    /// event on the success path (including compile failures).
    async fn execute_stream(
        &self,
        code: &str,
        opts: &ExecutionOptions,
        handler: StreamHandler,
    ) -> Result<(), SandboxError>;

    /// Execute a shell command in the sandbox.
    async fn run_command(
        &self,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandResult, SandboxError>;

    /// File operations; a no-op implementation when unsupported.
    fn filesystem(&self) -> Arc<dyn FileSystem>;

    /// Network operations; `None` when unsupported.
    fn network(&self) -> Option<Arc<dyn Network>>;

    /// Terminate the instance. Idempotent.
    async fn stop(&self) -> Result<(), SandboxError>;

    /// Current status.
    async fn status(&self) -> Result<InstanceStatus, SandboxError>;
}

impl std::fmt::Debug for dyn Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").field("id", &self.id()).finish()
    }
}

/// Network operations for a sandbox.
#[async_trait]
pub trait Network: Send + Sync {
    /// Expose a port publicly.
    async fn publish_port(&self, port: u16) -> Result<PublishedPort, SandboxError>;

    /// Public URL for an exposed port.
    async fn public_url(&self, port: u16) -> Result<String, SandboxError>;

    /// All published ports.
    async fn list_ports(&self) -> Result<Vec<PublishedPort>, SandboxError>;

    /// Remove port exposure.
    async fn unpublish_port(&self, port: u16) -> Result<(), SandboxError>;
}

#[async_trait]
impl Instance for Arc<dyn Instance> {
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn execute(
        &self,
        code: &str,
        opts: &ExecutionOptions,
    ) -> Result<ExecutionResult, SandboxError> {
        (**self).execute(code, opts).await
    }

    async fn execute_stream(
        &self,
        code: &str,
        opts: &ExecutionOptions,
        handler: StreamHandler,
    ) -> Result<(), SandboxError> {
        (**self).execute_stream(code, opts, handler).await
    }

    async fn run_command(&self, cmd: &str, args: &[String]) -> Result<CommandResult, SandboxError> {
        (**self).run_command(cmd, args).await
    }

    fn filesystem(&self) -> Arc<dyn FileSystem> {
        (**self).filesystem()
    }

    fn network(&self) -> Option<Arc<dyn Network>> {
        (**self).network()
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        (**self).stop().await
    }

    async fn status(&self) -> Result<InstanceStatus, SandboxError> {
        (**self).status().await
    }
}
