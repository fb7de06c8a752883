//! Workspace-rooted filesystem for host-local backends.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};

use kapsel_core::{ErrorKind, FileInfo, FileSystem, SandboxError};

/// File operations confined to one directory tree.
///
/// Paths are interpreted relative to the root; absolute paths are re-rooted
/// and parent traversal is rejected.
pub struct LocalFileSystem {
    root: PathBuf,
    provider: &'static str,
}

impl LocalFileSystem {
    /// Filesystem rooted at `root`, attributed to `provider` in errors.
    #[must_use]
    pub fn new(root: PathBuf, provider: &'static str) -> Self {
        Self { root, provider }
    }

    fn resolve(&self, op: &'static str, path: &str) -> Result<PathBuf, SandboxError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(SandboxError::new(
                op,
                self.provider,
                "",
                ErrorKind::PermissionDenied,
            ));
        }
        Ok(self.root.join(relative))
    }

    fn wrap(&self, op: &'static str, error: std::io::Error) -> SandboxError {
        SandboxError::new(op, self.provider, "", error)
    }

    async fn info_for(&self, op: &'static str, path: &str) -> Result<FileInfo, SandboxError> {
        let full = self.resolve(op, path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| self.wrap(op, e))?;

        let mod_time = meta
            .modified()
            .ok()
            .map(|time| DateTime::<Utc>::from(time));

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = 0;

        Ok(FileInfo {
            name: full
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.trim_start_matches('/').to_string(),
            size: meta.len(),
            is_dir: meta.is_dir(),
            mod_time,
            mode,
            mime_type: String::new(),
        })
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let full = self.resolve("fs.read", path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| self.wrap("fs.read", e))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), SandboxError> {
        let full = self.resolve("fs.write", path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.wrap("fs.write", e))?;
        }
        tokio::fs::write(&full, data)
            .await
            .map_err(|e| self.wrap("fs.write", e))
    }

    async fn delete(&self, path: &str) -> Result<(), SandboxError> {
        let full = self.resolve("fs.delete", path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| self.wrap("fs.delete", e))?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&full)
                .await
                .map_err(|e| self.wrap("fs.delete", e))
        } else {
            tokio::fs::remove_file(&full)
                .await
                .map_err(|e| self.wrap("fs.delete", e))
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, SandboxError> {
        let full = self.resolve("fs.list", path)?;
        let mut entries = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| self.wrap("fs.list", e))?;

        let base = path.trim_start_matches('/').trim_end_matches('/');
        let mut infos = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.wrap("fs.list", e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = if base.is_empty() {
                name
            } else {
                format!("{base}/{name}")
            };
            infos.push(self.info_for("fs.list", &child).await?);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        let full = self.resolve("fs.exists", path)?;
        Ok(tokio::fs::try_exists(&full).await.unwrap_or(false))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, SandboxError> {
        self.info_for("fs.stat", path).await
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), SandboxError> {
        let full = self.resolve("fs.upload", remote_path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.wrap("fs.upload", e))?;
        }
        tokio::fs::copy(local_path, &full)
            .await
            .map(|_| ())
            .map_err(|e| self.wrap("fs.upload", e))
    }

    async fn upload_reader(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        remote_path: &str,
    ) -> Result<(), SandboxError> {
        let full = self.resolve("fs.upload", remote_path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.wrap("fs.upload", e))?;
        }
        let mut file = tokio::fs::File::create(&full)
            .await
            .map_err(|e| self.wrap("fs.upload", e))?;
        tokio::io::copy(reader, &mut file)
            .await
            .map(|_| ())
            .map_err(|e| self.wrap("fs.upload", e))
    }

    async fn download(
        &self,
        remote_path: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), SandboxError> {
        let full = self.resolve("fs.download", remote_path)?;
        let mut file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| self.wrap("fs.download", e))?;
        tokio::io::copy(&mut file, writer)
            .await
            .map(|_| ())
            .map_err(|e| self.wrap("fs.download", e))
    }

    async fn mkdir(&self, path: &str) -> Result<(), SandboxError> {
        let full = self.resolve("fs.mkdir", path)?;
        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|e| self.wrap("fs.mkdir", e))
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), SandboxError> {
        let from = self.resolve("fs.copy", src)?;
        let to = self.resolve("fs.copy", dst)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.wrap("fs.copy", e))?;
        }
        tokio::fs::copy(&from, &to)
            .await
            .map(|_| ())
            .map_err(|e| self.wrap("fs.copy", e))
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), SandboxError> {
        let from = self.resolve("fs.rename", src)?;
        let to = self.resolve("fs.rename", dst)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.wrap("fs.rename", e))?;
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| self.wrap("fs.rename", e))
    }
}
