//! Remote sandbox-service backend.
//!
//! Talks to a hosted sandbox API: one HTTP session per instance, created
//! on demand and deleted on stop. The service buffers output, so streaming
//! replays the collected result as chunks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use kapsel_core::{
    Artifact, Capabilities, CommandResult, CreateOptions, ErrorKind, ExecutionOptions,
    ExecutionResult, FileSystem, InstanceStatus, NoopFileSystem, SandboxError,
};
use kapsel_events::{StreamEvent, StreamHandler};
use kapsel_langdetect::supported_languages;

use crate::traits::{Instance, Network, Provider};

const PROVIDER: &str = "remote";

/// Configuration for the remote backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the sandbox service (e.g. `https://sandboxes.example.com`).
    pub base_url: String,
    /// Bearer token, when the service requires one.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries for failed executions.
    pub max_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    image: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    runtime: &'a str,
    memory_mb: u32,
    timeout_ms: u64,
    internet_access: bool,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    language: &'a str,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "str::is_empty")]
    stdin: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    env: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    stdout: String,
    stderr: String,
    exit_code: i32,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    artifacts: Vec<ArtifactResponse>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtifactResponse {
    path: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
    args: &'a [String],
}

/// Health probe response from the sandbox service.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    /// Service status, `"ok"` or `"healthy"` when operational.
    pub status: String,
}

/// Remote sandbox-service provider. Owns the shared HTTP client.
#[derive(Debug)]
pub struct RemoteProvider {
    config: RemoteConfig,
    client: Client,
}

impl RemoteProvider {
    /// Provider with explicit configuration.
    pub fn new(config: RemoteConfig) -> Result<Self, SandboxError> {
        // Leave headroom above the execution timeout for transport overhead.
        let http_timeout = config.timeout + Duration::from_secs(30);
        let client = Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| SandboxError::new("configure", PROVIDER, "", e))?;

        Ok(Self { config, client })
    }

    /// Provider from the registry's JSON configuration slot.
    pub fn from_value(config: Option<&serde_json::Value>) -> Result<Self, SandboxError> {
        let config = match config {
            None => RemoteConfig::default(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| crate::invalid_config(PROVIDER, &e))?,
        };
        Self::new(config)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    /// Check service health.
    pub async fn health(&self) -> Result<HealthResponse, SandboxError> {
        let url = format!("{}/health", self.config.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| SandboxError::new("validate", PROVIDER, "", e))?;

        if !response.status().is_success() {
            return Err(SandboxError::new(
                "validate",
                PROVIDER,
                "",
                ErrorKind::ProviderUnavailable,
            ));
        }

        response
            .json::<HealthResponse>()
            .await
            .map_err(|e| SandboxError::new("validate", PROVIDER, "", e))
    }
}

#[async_trait]
impl Provider for RemoteProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self, opts), fields(sandbox = "remote", url = %self.config.base_url))]
    async fn create(&self, opts: CreateOptions) -> Result<Arc<dyn Instance>, SandboxError> {
        let url = format!("{}/v1/sandboxes", self.config.base_url);
        let body = CreateSessionRequest {
            image: &opts.image,
            runtime: &opts.runtime,
            memory_mb: opts.resources.memory_mb,
            timeout_ms: opts.timeout.as_millis() as u64,
            internet_access: opts.internet_access,
        };

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| SandboxError::new("create", PROVIDER, "", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SandboxError::new(
                "create",
                PROVIDER,
                "",
                format!("session create failed: {status} - {detail}"),
            ));
        }

        let session: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::new("create", PROVIDER, "", e))?;

        info!(sandbox_id = %session.id, "remote session created");

        Ok(Arc::new(RemoteInstance {
            id: session.id,
            base_url: self.config.base_url.clone(),
            api_key: self.config.api_key.clone(),
            max_retries: self.config.max_retries,
            client: self.client.clone(),
            stopped: RwLock::new(false),
        }))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_streaming: false,
            supports_async: true,
            supports_filesystem: false,
            supports_network: false,
            supported_languages: supported_languages(),
            max_execution_time: self.config.timeout,
            max_memory_mb: 0,
            max_cpus: 0,
            supports_gpu: false,
            supports_persistence: false,
        }
    }

    async fn validate(&self) -> Result<(), SandboxError> {
        let health = self.health().await?;
        if health.status == "ok" || health.status == "healthy" {
            Ok(())
        } else {
            Err(SandboxError::new(
                "validate",
                PROVIDER,
                "",
                ErrorKind::ProviderUnavailable,
            ))
        }
    }

    fn close(&self) -> Result<(), SandboxError> {
        // The HTTP client drops with the provider; sessions are owned by
        // their instances.
        Ok(())
    }
}

/// One remote sandbox session.
pub struct RemoteInstance {
    id: String,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    client: Client,
    stopped: RwLock<bool>,
}

impl RemoteInstance {
    fn check_running(&self, op: &'static str) -> Result<(), SandboxError> {
        if *self.stopped.read().unwrap() {
            return Err(SandboxError::new(
                op,
                PROVIDER,
                &self.id,
                ErrorKind::SandboxStopped,
            ));
        }
        Ok(())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    fn classify_status(&self, op: &'static str, status: StatusCode) -> Option<SandboxError> {
        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::PermissionDenied,
            StatusCode::NOT_FOUND => ErrorKind::SandboxNotFound,
            StatusCode::REQUEST_TIMEOUT => ErrorKind::ExecutionTimeout,
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::ResourceExhausted,
            _ => return None,
        };
        Some(SandboxError::new(op, PROVIDER, &self.id, kind))
    }

    async fn execute_once(
        &self,
        code: &str,
        opts: &ExecutionOptions,
    ) -> Result<ExecutionResult, SandboxError> {
        let url = format!("{}/v1/sandboxes/{}/execute", self.base_url, self.id);
        let body = ExecuteRequest {
            code,
            language: &opts.language,
            timeout_ms: opts.timeout.as_millis() as u64,
            stdin: &opts.stdin,
            env: &opts.env,
        };

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| SandboxError::new("execute", PROVIDER, &self.id, e))?;

        if let Some(err) = self.classify_status("execute", response.status()) {
            return Err(err);
        }
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SandboxError::new(
                "execute",
                PROVIDER,
                &self.id,
                format!("server error {status}: {detail}"),
            ));
        }

        let payload: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::new("execute", PROVIDER, &self.id, e))?;

        if let Some(error) = payload.error {
            return Err(SandboxError::new("execute", PROVIDER, &self.id, error));
        }

        let artifacts = payload
            .artifacts
            .into_iter()
            .map(|a| Artifact {
                name: a.path.rsplit('/').next().unwrap_or_default().to_string(),
                path: a.path,
                mime_type: String::new(),
                size: a.size,
                data: None,
            })
            .collect();

        Ok(ExecutionResult {
            exit_code: payload.exit_code,
            stdout: payload.stdout,
            stderr: payload.stderr,
            duration: Duration::from_millis(payload.duration_ms),
            language: opts.language.clone(),
            artifacts,
            error: None,
            metadata: HashMap::new(),
        })
    }
}

#[async_trait]
impl Instance for RemoteInstance {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, code, opts), fields(sandbox = "remote", id = %self.id))]
    async fn execute(
        &self,
        code: &str,
        opts: &ExecutionOptions,
    ) -> Result<ExecutionResult, SandboxError> {
        self.check_running("execute")?;
        debug!(code_size = code.len(), "executing via remote service");

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(attempt, "retrying execution");
                tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            }
            match self.execute_once(code, opts).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    // Deadline expiry is authoritative; retrying would
                    // double the caller's wait.
                    if error.is(ErrorKind::ExecutionTimeout) {
                        return Err(error);
                    }
                    warn!(attempt, %error, "execution attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SandboxError::new("execute", PROVIDER, &self.id, ErrorKind::ProviderUnavailable)
        }))
    }

    async fn execute_stream(
        &self,
        code: &str,
        opts: &ExecutionOptions,
        handler: StreamHandler,
    ) -> Result<(), SandboxError> {
        self.check_running("execute_stream")?;

        // The service buffers output; replay it as chunks.
        match self.execute(code, opts).await {
            Ok(result) => {
                if !result.stdout.is_empty() {
                    let _ = handler(&StreamEvent::stdout(result.stdout.clone()));
                }
                if !result.stderr.is_empty() {
                    let _ = handler(&StreamEvent::stderr(result.stderr.clone()));
                }
                let _ = handler(&StreamEvent::complete(result.exit_code));
                Ok(())
            }
            Err(error) => {
                let _ = handler(&StreamEvent::from_error(&error));
                Err(error)
            }
        }
    }

    async fn run_command(&self, cmd: &str, args: &[String]) -> Result<CommandResult, SandboxError> {
        self.check_running("run_command")?;

        let url = format!("{}/v1/sandboxes/{}/commands", self.base_url, self.id);
        let body = CommandRequest { command: cmd, args };

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| SandboxError::new("run_command", PROVIDER, &self.id, e))?;

        if let Some(err) = self.classify_status("run_command", response.status()) {
            return Err(err);
        }

        let payload: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::new("run_command", PROVIDER, &self.id, e))?;

        Ok(CommandResult {
            exit_code: payload.exit_code,
            stdout: payload.stdout,
            stderr: payload.stderr,
            duration: Duration::from_millis(payload.duration_ms),
        })
    }

    fn filesystem(&self) -> Arc<dyn FileSystem> {
        Arc::new(NoopFileSystem::new(PROVIDER))
    }

    fn network(&self) -> Option<Arc<dyn Network>> {
        None
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        {
            let mut stopped = self.stopped.write().unwrap();
            if *stopped {
                return Ok(());
            }
            *stopped = true;
        }

        let url = format!("{}/v1/sandboxes/{}", self.base_url, self.id);
        match self.authorize(self.client.delete(&url)).send().await {
            Ok(response) if response.status().is_success() => {
                info!(sandbox_id = %self.id, "remote session deleted");
            }
            Ok(response) => {
                warn!(sandbox_id = %self.id, status = %response.status(), "session delete rejected");
            }
            Err(error) => {
                warn!(sandbox_id = %self.id, %error, "session delete failed");
            }
        }
        // Teardown problems are logged, not surfaced; the session expires
        // server-side regardless.
        Ok(())
    }

    async fn status(&self) -> Result<InstanceStatus, SandboxError> {
        if *self.stopped.read().unwrap() {
            Ok(InstanceStatus::Stopped)
        } else {
            Ok(InstanceStatus::Running)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_localhost() {
        let config = RemoteConfig::default();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert!(config.api_key.is_none());
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn config_parses_from_json() {
        let value = serde_json::json!({
            "base_url": "https://sandboxes.example.com",
            "api_key": "secret",
            "timeout": { "secs": 10, "nanos": 0 },
            "max_retries": 5,
        });
        let provider = RemoteProvider::from_value(Some(&value)).unwrap();
        assert_eq!(provider.config.base_url, "https://sandboxes.example.com");
        assert_eq!(provider.config.max_retries, 5);
    }

    #[test]
    fn malformed_config_is_invalid_configuration() {
        let value = serde_json::json!({ "base_url": 7 });
        let err = RemoteProvider::from_value(Some(&value)).unwrap_err();
        assert!(err.is(ErrorKind::InvalidConfiguration));
    }

    #[test]
    fn capabilities_declare_no_streaming() {
        let provider = RemoteProvider::new(RemoteConfig::default()).unwrap();
        let caps = provider.capabilities();
        assert!(!caps.supports_streaming);
        assert!(caps.supports_async);
    }
}
