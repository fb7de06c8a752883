//! Provider-facing data model: creation options, capabilities, status.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current state of a sandbox instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Backend is bringing the environment up.
    Creating,
    /// Environment is up and idle.
    Running,
    /// An execution is in flight.
    Executing,
    /// Environment is suspended.
    Paused,
    /// Terminal: the environment is gone.
    Stopped,
    /// Terminal: an unrecoverable backend fault occurred.
    Error,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Executing => "executing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Resource limits for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit in MiB.
    pub memory_mb: u32,
    /// CPU limit; fractional values are allowed.
    pub cpus: f64,
    /// Disk space limit in MiB.
    pub disk_mb: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpus: 1.0,
            disk_mb: 1024,
        }
    }
}

/// Options for creating a sandbox instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Container/VM image; empty lets the backend pick from `runtime`.
    pub image: String,
    /// Language runtime label (e.g. "Python") used to select a default image.
    pub runtime: String,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Environment variables for the whole sandbox.
    pub environment: HashMap<String, String>,
    /// Lifetime of the sandbox itself.
    pub timeout: Duration,
    /// Labels for tagging/identification.
    pub labels: HashMap<String, String>,
    /// Initial working directory.
    pub work_dir: String,
    /// Whether the sandbox may reach the network.
    pub internet_access: bool,
    /// Provider-specific configuration.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            image: String::new(),
            runtime: String::new(),
            resources: ResourceConfig::default(),
            environment: HashMap::new(),
            timeout: Duration::from_secs(300),
            labels: HashMap::new(),
            work_dir: "/workspace".to_string(),
            internet_access: false,
            metadata: HashMap::new(),
        }
    }
}

/// What a provider supports. Purely declarative: the orchestrator never
/// consults this for dispatch, callers use it for discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Real-time output streaming.
    pub supports_streaming: bool,
    /// Async execution.
    pub supports_async: bool,
    /// File operations.
    pub supports_filesystem: bool,
    /// Network/port publishing.
    pub supports_network: bool,
    /// Supported programming languages.
    pub supported_languages: Vec<String>,
    /// Maximum execution duration.
    pub max_execution_time: Duration,
    /// Maximum memory in MiB.
    pub max_memory_mb: u32,
    /// Maximum CPU count.
    pub max_cpus: u32,
    /// GPU acceleration.
    pub supports_gpu: bool,
    /// Sandbox state persistence.
    pub supports_persistence: bool,
}

/// An exposed network port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPort {
    /// Port inside the sandbox.
    pub local_port: u16,
    /// Externally accessible port.
    pub public_port: u16,
    /// Network protocol ("tcp", "udp").
    pub protocol: String,
    /// Full URL to reach the port.
    pub public_url: String,
}
