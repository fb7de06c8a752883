//! Error types shared across the SDK.
//!
//! Errors come in two layers: [`ErrorKind`] is the set of sentinel
//! conditions callers match on, and [`SandboxError`] is the envelope that
//! carries the operation, backend and instance context around an underlying
//! cause. Matching is done with [`SandboxError::is`], never by comparing
//! rendered strings.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed error used as the cause slot of the envelope types.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Sentinel error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Sandbox doesn't exist.
    #[error("sandbox not found")]
    SandboxNotFound,

    /// Sandbox is not running.
    #[error("sandbox is stopped")]
    SandboxStopped,

    /// Execution exceeded its timeout.
    #[error("execution timeout")]
    ExecutionTimeout,

    /// Provider is not accessible.
    #[error("provider unavailable")]
    ProviderUnavailable,

    /// Language isn't supported by the selected runtime catalog.
    #[error("language not supported")]
    LanguageNotSupported,

    /// Detection couldn't determine a language.
    #[error("language detection failed")]
    LanguageDetectionFailed,

    /// Resource limits exceeded.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// Operation not permitted.
    #[error("permission denied")]
    PermissionDenied,

    /// Invalid configuration.
    #[error("invalid configuration")]
    InvalidConfiguration,

    /// Provider name has no registered constructor.
    #[error("provider not registered")]
    ProviderNotRegistered,

    /// The caller abandoned the operation before it finished.
    ///
    /// Distinct from [`ErrorKind::ExecutionTimeout`]: a timeout comes from
    /// the execution deadline, cancellation from the caller.
    #[error("operation cancelled")]
    Cancelled,
}

/// Error envelope carrying operation context.
///
/// Formats as `op [backend/id]: cause`, dropping the bracketed section as
/// fields are absent. The underlying cause stays reachable through
/// [`std::error::Error::source`] and [`SandboxError::kind`].
#[derive(Debug)]
pub struct SandboxError {
    op: String,
    provider: String,
    sandbox_id: String,
    source: BoxError,
}

impl SandboxError {
    /// Create a new envelope around `source`.
    pub fn new(
        op: impl Into<String>,
        provider: impl Into<String>,
        sandbox_id: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            op: op.into(),
            provider: provider.into(),
            sandbox_id: sandbox_id.into(),
            source: source.into(),
        }
    }

    /// The operation that failed (e.g. `"execute"`).
    #[must_use]
    pub fn op(&self) -> &str {
        &self.op
    }

    /// The backend involved, if known.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The sandbox instance id, if known.
    #[must_use]
    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// The sentinel kind at the bottom of the cause chain, if any.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        let mut cause: &(dyn StdError + 'static) = self.source.as_ref();
        loop {
            if let Some(kind) = cause.downcast_ref::<ErrorKind>() {
                return Some(*kind);
            }
            match cause.source() {
                Some(next) => cause = next,
                None => return None,
            }
        }
    }

    /// Whether the cause chain bottoms out at `kind`.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.sandbox_id.is_empty() {
            write!(
                f,
                "{} [{}/{}]: {}",
                self.op, self.provider, self.sandbox_id, self.source
            )
        } else if !self.provider.is_empty() {
            write!(f, "{} [{}]: {}", self.op, self.provider, self.source)
        } else {
            write!(f, "{}: {}", self.op, self.source)
        }
    }
}

impl StdError for SandboxError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Details of an execution that failed below the process level.
///
/// Carries the exit code and captured output alongside the cause so callers
/// can show diagnostics without re-running.
#[derive(Debug)]
pub struct ExecutionError {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    source: BoxError,
}

impl ExecutionError {
    /// Create a new execution error.
    pub fn new(
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stderr.is_empty() {
            write!(
                f,
                "execution failed (exit code {}): {}",
                self.exit_code, self.source
            )
        } else {
            write!(
                f,
                "execution failed (exit code {}): {}\nstderr: {}",
                self.exit_code, self.source, self.stderr
            )
        }
    }
}

impl StdError for ExecutionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_all_fields() {
        let err = SandboxError::new("execute", "docker", "abc123", ErrorKind::SandboxStopped);
        assert_eq!(err.to_string(), "execute [docker/abc123]: sandbox is stopped");
    }

    #[test]
    fn display_without_sandbox_id() {
        let err = SandboxError::new("create", "docker", "", ErrorKind::ProviderUnavailable);
        assert_eq!(err.to_string(), "create [docker]: provider unavailable");
    }

    #[test]
    fn display_op_only() {
        let err = SandboxError::new("detect", "", "", ErrorKind::LanguageDetectionFailed);
        assert_eq!(err.to_string(), "detect: language detection failed");
    }

    #[test]
    fn kind_walks_nested_envelopes() {
        let inner = SandboxError::new("execute", "process", "p-1", ErrorKind::ExecutionTimeout);
        let outer = SandboxError::new("execute_stream", "process", "p-1", inner);

        assert!(outer.is(ErrorKind::ExecutionTimeout));
        assert!(!outer.is(ErrorKind::SandboxStopped));
    }

    #[test]
    fn kind_is_none_for_opaque_cause() {
        let err = SandboxError::new("execute", "process", "p-1", "connection reset");
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn execution_error_includes_stderr() {
        let err = ExecutionError::new(1, "", "boom", ErrorKind::ResourceExhausted);
        let rendered = err.to_string();
        assert!(rendered.contains("exit code 1"));
        assert!(rendered.contains("stderr: boom"));
    }

    #[test]
    fn kind_reaches_through_execution_error() {
        let exec = ExecutionError::new(137, "", "killed", ErrorKind::ResourceExhausted);
        let err = SandboxError::new("execute", "process", "p-2", exec);
        assert!(err.is(ErrorKind::ResourceExhausted));
    }
}
