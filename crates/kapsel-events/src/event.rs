//! Sandbox events and their typed payloads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categories of sandbox events, grouped by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Sandbox lifecycle
    #[serde(rename = "sandbox.created")]
    SandboxCreated,
    #[serde(rename = "sandbox.started")]
    SandboxStarted,
    #[serde(rename = "sandbox.stopped")]
    SandboxStopped,
    #[serde(rename = "sandbox.error")]
    SandboxError,

    // Execution
    #[serde(rename = "execution.started")]
    ExecutionStarted,
    #[serde(rename = "execution.complete")]
    ExecutionComplete,
    #[serde(rename = "execution.error")]
    ExecutionError,
    #[serde(rename = "execution.timeout")]
    ExecutionTimeout,

    // Output
    #[serde(rename = "output.stdout")]
    OutputStdout,
    #[serde(rename = "output.stderr")]
    OutputStderr,

    // Files
    #[serde(rename = "file.written")]
    FileWritten,
    #[serde(rename = "file.read")]
    FileRead,
    #[serde(rename = "file.deleted")]
    FileDeleted,
    #[serde(rename = "file.uploaded")]
    FileUploaded,

    // Network
    #[serde(rename = "port.published")]
    PortPublished,
    #[serde(rename = "port.unpublished")]
    PortUnpublished,
}

impl EventType {
    /// The wire tag for this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SandboxCreated => "sandbox.created",
            Self::SandboxStarted => "sandbox.started",
            Self::SandboxStopped => "sandbox.stopped",
            Self::SandboxError => "sandbox.error",
            Self::ExecutionStarted => "execution.started",
            Self::ExecutionComplete => "execution.complete",
            Self::ExecutionError => "execution.error",
            Self::ExecutionTimeout => "execution.timeout",
            Self::OutputStdout => "output.stdout",
            Self::OutputStderr => "output.stderr",
            Self::FileWritten => "file.written",
            Self::FileRead => "file.read",
            Self::FileDeleted => "file.deleted",
            Self::FileUploaded => "file.uploaded",
            Self::PortPublished => "port.published",
            Self::PortUnpublished => "port.unpublished",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sandbox event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event category.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The sandbox that generated the event.
    pub sandbox_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Rendered error, for error events.
    #[serde(default)]
    pub error: Option<String>,
    /// Additional context.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Create an event with no payload.
    pub fn new(event_type: EventType, sandbox_id: impl Into<String>) -> Self {
        Self {
            event_type,
            sandbox_id: sandbox_id.into(),
            timestamp: Utc::now(),
            data: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Create an event carrying a typed payload.
    pub fn with_payload<T: Serialize>(
        event_type: EventType,
        sandbox_id: impl Into<String>,
        payload: &T,
    ) -> Self {
        let mut event = Self::new(event_type, sandbox_id);
        event.data = serde_json::to_value(payload).ok();
        event
    }

    /// Create an error event.
    pub fn from_error(
        event_type: EventType,
        sandbox_id: impl Into<String>,
        error: &dyn fmt::Display,
    ) -> Self {
        let mut event = Self::new(event_type, sandbox_id);
        event.error = Some(error.to_string());
        event
    }

    /// Attach a metadata entry, chaining.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Deserialize the payload into a typed struct.
    #[must_use]
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Callback invoked for each delivered event.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Payload for `execution.started`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStartedData {
    /// Language selected for the run.
    pub language: String,
    /// Size of the submitted code in bytes.
    pub code_size: usize,
}

/// Payload for `execution.complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCompleteData {
    /// Process exit code.
    pub exit_code: i32,
    /// Wall-clock execution time.
    pub duration: Duration,
    /// Language used for the run.
    pub language: String,
}

/// Payload for `output.*` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputData {
    /// Output chunk.
    pub content: String,
    /// Line number, when the backend tracks it.
    pub line: u64,
}

/// Payload for `file.*` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEventData {
    /// Affected path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
}

/// Payload for `port.*` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEventData {
    /// Published port.
    pub port: u16,
    /// Public URL for the port.
    pub public_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_round_trip() {
        let json = serde_json::to_string(&EventType::ExecutionComplete).unwrap();
        assert_eq!(json, "\"execution.complete\"");

        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::ExecutionComplete);
        assert_eq!(back.as_str(), "execution.complete");
    }

    #[test]
    fn typed_payload_round_trips_through_event() {
        let event = Event::with_payload(
            EventType::ExecutionStarted,
            "sb-1",
            &ExecutionStartedData {
                language: "Python".to_string(),
                code_size: 42,
            },
        );

        let data: ExecutionStartedData = event.payload().unwrap();
        assert_eq!(data.language, "Python");
        assert_eq!(data.code_size, 42);
    }

    #[test]
    fn error_event_captures_message() {
        let err = std::io::Error::other("daemon gone");
        let event = Event::from_error(EventType::SandboxError, "sb-1", &err);
        assert_eq!(event.error.as_deref(), Some("daemon gone"));
        assert!(event.data.is_none());
    }
}
