//! File system abstraction for sandbox environments.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SandboxError;

/// File operations within a sandbox.
///
/// Backends that cannot expose files return a [`NoopFileSystem`].
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents.
    async fn read(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    /// Write data to a file, creating parent directories as needed.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), SandboxError>;

    /// Remove a file or directory.
    async fn delete(&self, path: &str) -> Result<(), SandboxError>;

    /// List entries in a directory.
    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, SandboxError>;

    /// Whether a path exists.
    async fn exists(&self, path: &str) -> Result<bool, SandboxError>;

    /// File metadata.
    async fn stat(&self, path: &str) -> Result<FileInfo, SandboxError>;

    /// Upload a local file into the sandbox.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), SandboxError>;

    /// Upload content from a reader into the sandbox.
    async fn upload_reader(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        remote_path: &str,
    ) -> Result<(), SandboxError>;

    /// Download a sandbox file into a writer.
    async fn download(
        &self,
        remote_path: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), SandboxError>;

    /// Create a directory, including parents.
    async fn mkdir(&self, path: &str) -> Result<(), SandboxError>;

    /// Copy a file within the sandbox.
    async fn copy(&self, src: &str, dst: &str) -> Result<(), SandboxError>;

    /// Move/rename a file within the sandbox.
    async fn rename(&self, src: &str, dst: &str) -> Result<(), SandboxError>;
}

/// File metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
    /// Base name of the file.
    pub name: String,
    /// Full path within the sandbox.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether this is a directory.
    pub is_dir: bool,
    /// Modification time.
    pub mod_time: Option<DateTime<Utc>>,
    /// Unix mode bits; 0 when the backend doesn't track them.
    pub mode: u32,
    /// Detected content type, when known.
    pub mime_type: String,
}

/// A file system change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    /// What happened.
    pub event_type: WatchEventType,
    /// Affected path.
    pub path: String,
    /// Previous path, for renames.
    pub old_path: Option<String>,
    /// When the change occurred.
    pub timestamp: DateTime<Utc>,
}

/// Kinds of file system change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventType {
    Create,
    Modify,
    Delete,
    Rename,
}

/// File system watching, for backends that support it.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Start watching a path. Events arrive on the returned channel until
    /// the receiver is dropped.
    async fn watch(
        &self,
        path: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<WatchEvent>, SandboxError>;
}

/// File system stub for backends without file support.
///
/// Every operation fails with an explanatory error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFileSystem {
    provider: &'static str,
}

impl NoopFileSystem {
    /// Stub attributed to `provider` in error messages.
    #[must_use]
    pub const fn new(provider: &'static str) -> Self {
        Self { provider }
    }

    fn unsupported(&self, op: &str) -> SandboxError {
        SandboxError::new(
            op,
            self.provider,
            "",
            "file operations are not supported by this backend",
        )
    }
}

#[async_trait]
impl FileSystem for NoopFileSystem {
    async fn read(&self, _path: &str) -> Result<Vec<u8>, SandboxError> {
        Err(self.unsupported("fs.read"))
    }

    async fn write(&self, _path: &str, _data: &[u8]) -> Result<(), SandboxError> {
        Err(self.unsupported("fs.write"))
    }

    async fn delete(&self, _path: &str) -> Result<(), SandboxError> {
        Err(self.unsupported("fs.delete"))
    }

    async fn list(&self, _path: &str) -> Result<Vec<FileInfo>, SandboxError> {
        Err(self.unsupported("fs.list"))
    }

    async fn exists(&self, _path: &str) -> Result<bool, SandboxError> {
        Err(self.unsupported("fs.exists"))
    }

    async fn stat(&self, _path: &str) -> Result<FileInfo, SandboxError> {
        Err(self.unsupported("fs.stat"))
    }

    async fn upload(&self, _local_path: &Path, _remote_path: &str) -> Result<(), SandboxError> {
        Err(self.unsupported("fs.upload"))
    }

    async fn upload_reader(
        &self,
        _reader: &mut (dyn AsyncRead + Send + Unpin),
        _remote_path: &str,
    ) -> Result<(), SandboxError> {
        Err(self.unsupported("fs.upload"))
    }

    async fn download(
        &self,
        _remote_path: &str,
        _writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), SandboxError> {
        Err(self.unsupported("fs.download"))
    }

    async fn mkdir(&self, _path: &str) -> Result<(), SandboxError> {
        Err(self.unsupported("fs.mkdir"))
    }

    async fn copy(&self, _src: &str, _dst: &str) -> Result<(), SandboxError> {
        Err(self.unsupported("fs.copy"))
    }

    async fn rename(&self, _src: &str, _dst: &str) -> Result<(), SandboxError> {
        Err(self.unsupported("fs.rename"))
    }
}
