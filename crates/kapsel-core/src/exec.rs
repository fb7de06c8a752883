//! Execution result model and per-call options.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of a code execution.
///
/// A non-zero exit code is a normal result, not an error: the program ran
/// and failed on its own terms. Backend faults travel separately as
/// [`SandboxError`](crate::SandboxError); `error` is only populated when an
/// async execution folds a fault into its result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Process exit code (0 = success).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock execution time.
    pub duration: Duration,
    /// Language used to select the runtime.
    pub language: String,
    /// Generated files a backend chose to surface.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Rendered execution fault, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// Provider-specific additional data.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionResult {
    /// True when the program exited zero and no fault occurred.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

/// Outcome of a shell command run inside a sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    /// Process exit code (0 = success).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock execution time.
    pub duration: Duration,
}

impl CommandResult {
    /// True when the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A file generated during execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifact {
    /// Base name of the artifact.
    pub name: String,
    /// Path within the sandbox.
    pub path: String,
    /// Content type, when known.
    pub mime_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Inline content; `None` for large files.
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

/// Per-execution options.
///
/// Zero-valued fields (empty string, zero duration, empty map) mean "unset"
/// and are replaced by defaults during [`ExecutionOptions::merge`]; populated
/// fields always win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Language override; empty means auto-detect.
    pub language: String,
    /// Filename hint for language detection.
    pub filename: String,
    /// Execution deadline; zero means "use the default".
    pub timeout: Duration,
    /// Environment variables for the program.
    pub env: HashMap<String, String>,
    /// Working directory inside the sandbox.
    pub work_dir: String,
    /// Standard input for the program.
    pub stdin: String,
    /// Extra workspace files to materialize before running (path -> bytes).
    pub files: HashMap<String, Vec<u8>>,
    /// Preserve generated files after execution.
    pub keep_artifacts: bool,
}

impl ExecutionOptions {
    /// Options with every field unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The baseline every execution merges onto: 30 second timeout,
    /// `/workspace` working directory.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            work_dir: "/workspace".to_string(),
            ..Self::default()
        }
    }

    /// Override automatic language detection.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Provide a filename hint for detection.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Set the execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set environment variables.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<String>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Provide standard input.
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Add one extra workspace file.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Set all extra workspace files at once.
    #[must_use]
    pub fn with_files(mut self, files: HashMap<String, Vec<u8>>) -> Self {
        self.files = files;
        self
    }

    /// Preserve generated files after execution.
    #[must_use]
    pub const fn with_keep_artifacts(mut self) -> Self {
        self.keep_artifacts = true;
        self
    }

    /// Fill unset fields from `defaults`; populated fields win.
    #[must_use]
    pub fn merge(mut self, defaults: &Self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        if self.work_dir.is_empty() {
            self.work_dir.clone_from(&defaults.work_dir);
        }
        if self.env.is_empty() {
            self.env.clone_from(&defaults.env);
        }
        if self.files.is_empty() {
            self.files.clone_from(&defaults.files);
        }
        self
    }

    /// Merge optional options onto defaults; `None` yields the defaults.
    #[must_use]
    pub fn merge_opt(opts: Option<Self>, defaults: &Self) -> Self {
        match opts {
            Some(o) => o.merge(defaults),
            None => defaults.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_zero_exit_and_no_error() {
        let ok = ExecutionResult::default();
        assert!(ok.success());

        let failed = ExecutionResult {
            exit_code: 1,
            ..Default::default()
        };
        assert!(!failed.success());

        let faulted = ExecutionResult {
            error: Some("backend gone".to_string()),
            ..Default::default()
        };
        assert!(!faulted.success());
    }

    #[test]
    fn merge_of_none_yields_defaults() {
        let defaults = ExecutionOptions::defaults();
        let merged = ExecutionOptions::merge_opt(None, &defaults);

        assert_eq!(merged.timeout, defaults.timeout);
        assert_eq!(merged.work_dir, defaults.work_dir);
    }

    #[test]
    fn merge_keeps_populated_fields() {
        let defaults = ExecutionOptions::defaults();
        let merged = ExecutionOptions::new()
            .with_language("Go")
            .with_timeout(Duration::from_secs(60))
            .merge(&defaults);

        assert_eq!(merged.language, "Go");
        assert_eq!(merged.timeout, Duration::from_secs(60));
        assert_eq!(merged.work_dir, "/workspace");
    }

    #[test]
    fn merge_fills_zero_valued_fields() {
        let mut defaults = ExecutionOptions::defaults();
        defaults.env.insert("PATH".to_string(), "/usr/bin".to_string());

        let merged = ExecutionOptions::new().merge(&defaults);

        assert_eq!(merged.timeout, Duration::from_secs(30));
        assert_eq!(merged.env.get("PATH").map(String::as_str), Some("/usr/bin"));
    }
}
