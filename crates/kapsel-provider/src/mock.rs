//! Scriptable mock backend for tests.
//!
//! The mock records every execution and command for assertions, and its
//! behavior is scriptable through hooks. The default behavior is a
//! successful empty result; `execute_stream` replays the configured result
//! as stdout/stderr chunks followed by `complete`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use kapsel_core::{
    Capabilities, CommandResult, CreateOptions, ErrorKind, ExecutionOptions, ExecutionResult,
    FileInfo, FileSystem, InstanceStatus, PublishedPort, SandboxError,
};
use kapsel_events::{StreamEvent, StreamHandler};
use kapsel_langdetect::supported_languages;

use crate::traits::{Instance, Network, Provider};

const PROVIDER: &str = "mock";

type ExecuteHook =
    Arc<dyn Fn(&str, &ExecutionOptions) -> Result<ExecutionResult, SandboxError> + Send + Sync>;
type StreamHook = Arc<
    dyn Fn(&str, &ExecutionOptions, &StreamHandler) -> Result<(), SandboxError> + Send + Sync,
>;
type CommandHook =
    Arc<dyn Fn(&str, &[String]) -> Result<CommandResult, SandboxError> + Send + Sync>;
type StopHook = Arc<dyn Fn() -> Result<(), SandboxError> + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_execute: Option<ExecuteHook>,
    on_execute_stream: Option<StreamHook>,
    on_run_command: Option<CommandHook>,
    on_stop: Option<StopHook>,
}

/// One recorded execution.
#[derive(Clone)]
pub struct ExecutionRecord {
    /// Submitted code.
    pub code: String,
    /// Options the orchestrator passed down.
    pub options: ExecutionOptions,
}

/// One recorded command invocation.
#[derive(Clone)]
pub struct CommandRecord {
    /// Command name.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
}

/// Mock provider: hands out [`MockInstance`]s that share its hook table.
pub struct MockProvider {
    hooks: Arc<Mutex<Hooks>>,
    instances: Mutex<Vec<Arc<MockInstance>>>,
    created: AtomicUsize,
    close_calls: AtomicUsize,
    next_instance: AtomicUsize,
}

impl MockProvider {
    /// A provider with default (successful, empty) behavior.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hooks: Arc::new(Mutex::new(Hooks::default())),
            instances: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            next_instance: AtomicUsize::new(0),
        }
    }

    /// Script every future instance's `execute`.
    pub fn on_execute<F>(&self, hook: F)
    where
        F: Fn(&str, &ExecutionOptions) -> Result<ExecutionResult, SandboxError>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.lock().unwrap().on_execute = Some(Arc::new(hook));
    }

    /// Script every future instance's `execute_stream`.
    pub fn on_execute_stream<F>(&self, hook: F)
    where
        F: Fn(&str, &ExecutionOptions, &StreamHandler) -> Result<(), SandboxError>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.lock().unwrap().on_execute_stream = Some(Arc::new(hook));
    }

    /// Script every future instance's `run_command`.
    pub fn on_run_command<F>(&self, hook: F)
    where
        F: Fn(&str, &[String]) -> Result<CommandResult, SandboxError> + Send + Sync + 'static,
    {
        self.hooks.lock().unwrap().on_run_command = Some(Arc::new(hook));
    }

    /// Script every future instance's `stop`.
    pub fn on_stop<F>(&self, hook: F)
    where
        F: Fn() -> Result<(), SandboxError> + Send + Sync + 'static,
    {
        self.hooks.lock().unwrap().on_stop = Some(Arc::new(hook));
    }

    /// Make executions return this fixed result.
    pub fn set_execute_result(&self, stdout: &str, stderr: &str, exit_code: i32) {
        let stdout = stdout.to_string();
        let stderr = stderr.to_string();
        self.on_execute(move |_code, opts| {
            Ok(ExecutionResult {
                exit_code,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
                duration: Duration::from_millis(10),
                language: opts.language.clone(),
                ..ExecutionResult::default()
            })
        });
    }

    /// Make executions fail with the given sentinel.
    pub fn set_execute_error(&self, kind: ErrorKind) {
        self.on_execute(move |_code, _opts| {
            Err(SandboxError::new("execute", PROVIDER, "", kind))
        });
    }

    /// Instances created so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Times `close` has been called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Instances handed out so far.
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<MockInstance>> {
        self.instances.lock().unwrap().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn create(&self, _opts: CreateOptions) -> Result<Arc<dyn Instance>, SandboxError> {
        let n = self.next_instance.fetch_add(1, Ordering::SeqCst);
        let instance = Arc::new(MockInstance {
            id: format!("mock-{n}"),
            hooks: Arc::clone(&self.hooks),
            status: RwLock::new(InstanceStatus::Running),
            executions: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
            fs: Arc::new(MockFileSystem::default()),
            network: Arc::new(MockNetwork::default()),
        });

        self.created.fetch_add(1, Ordering::SeqCst);
        self.instances.lock().unwrap().push(Arc::clone(&instance));
        Ok(instance)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_streaming: true,
            supports_async: true,
            supports_filesystem: true,
            supports_network: true,
            supported_languages: supported_languages(),
            max_execution_time: Duration::from_secs(300),
            max_memory_mb: 4096,
            max_cpus: 4,
            supports_gpu: false,
            supports_persistence: false,
        }
    }

    async fn validate(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    fn close(&self) -> Result<(), SandboxError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Configurable mock instance.
pub struct MockInstance {
    id: String,
    hooks: Arc<Mutex<Hooks>>,
    status: RwLock<InstanceStatus>,
    executions: Mutex<Vec<ExecutionRecord>>,
    commands: Mutex<Vec<CommandRecord>>,
    stop_calls: AtomicUsize,
    fs: Arc<MockFileSystem>,
    network: Arc<MockNetwork>,
}

impl MockInstance {
    /// Recorded executions, oldest first.
    #[must_use]
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions.lock().unwrap().clone()
    }

    /// Recorded commands, oldest first.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandRecord> {
        self.commands.lock().unwrap().clone()
    }

    /// Times the backend `stop` actually ran.
    #[must_use]
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Force a status, for tests exercising status projections.
    pub fn set_status(&self, status: InstanceStatus) {
        *self.status.write().unwrap() = status;
    }

    fn default_result(start: Instant, opts: &ExecutionOptions) -> ExecutionResult {
        ExecutionResult {
            exit_code: 0,
            duration: start.elapsed(),
            language: opts.language.clone(),
            ..ExecutionResult::default()
        }
    }
}

#[async_trait]
impl Instance for MockInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        code: &str,
        opts: &ExecutionOptions,
    ) -> Result<ExecutionResult, SandboxError> {
        let start = Instant::now();
        self.executions.lock().unwrap().push(ExecutionRecord {
            code: code.to_string(),
            options: opts.clone(),
        });

        let hook = self.hooks.lock().unwrap().on_execute.clone();
        match hook {
            Some(hook) => hook(code, opts),
            None => Ok(Self::default_result(start, opts)),
        }
    }

    async fn execute_stream(
        &self,
        code: &str,
        opts: &ExecutionOptions,
        handler: StreamHandler,
    ) -> Result<(), SandboxError> {
        let hook = self.hooks.lock().unwrap().on_execute_stream.clone();
        if let Some(hook) = hook {
            return hook(code, opts, &handler);
        }

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
        let start = Instant::now();
        self.commands.lock().unwrap().push(CommandRecord {
            command: cmd.to_string(),
            args: args.to_vec(),
        });

        let hook = self.hooks.lock().unwrap().on_run_command.clone();
        match hook {
            Some(hook) => hook(cmd, args),
            None => Ok(CommandResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: start.elapsed(),
            }),
        }
    }

    fn filesystem(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.fs) as Arc<dyn FileSystem>
    }

    fn network(&self) -> Option<Arc<dyn Network>> {
        Some(Arc::clone(&self.network) as Arc<dyn Network>)
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.hooks.lock().unwrap().on_stop.clone();
        if let Some(hook) = hook {
            hook()?;
        }
        *self.status.write().unwrap() = InstanceStatus::Stopped;
        Ok(())
    }

    async fn status(&self) -> Result<InstanceStatus, SandboxError> {
        Ok(*self.status.read().unwrap())
    }
}

/// In-memory filesystem for the mock backend.
#[derive(Default)]
pub struct MockFileSystem {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockFileSystem {
    fn normalize(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    fn missing(op: &'static str, path: &str) -> SandboxError {
        SandboxError::new(op, PROVIDER, "", format!("no such file: {path}"))
    }
}

#[async_trait]
impl FileSystem for MockFileSystem {
    async fn read(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        self.files
            .lock()
            .unwrap()
            .get(&Self::normalize(path))
            .cloned()
            .ok_or_else(|| Self::missing("fs.read", path))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), SandboxError> {
        self.files
            .lock()
            .unwrap()
            .insert(Self::normalize(path), data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), SandboxError> {
        let key = Self::normalize(path);
        let mut files = self.files.lock().unwrap();
        let prefix = format!("{key}/");
        let before = files.len();
        files.retain(|k, _| k != &key && !k.starts_with(&prefix));
        if files.len() == before {
            return Err(Self::missing("fs.delete", path));
        }
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, SandboxError> {
        let base = Self::normalize(path);
        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{base}/")
        };

        let files = self.files.lock().unwrap();
        let mut infos: Vec<FileInfo> = files
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| FileInfo {
                name: k.rsplit('/').next().unwrap_or_default().to_string(),
                path: k.clone(),
                size: v.len() as u64,
                is_dir: false,
                mod_time: None,
                mode: 0o644,
                mime_type: String::new(),
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }

    async fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .contains_key(&Self::normalize(path)))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, SandboxError> {
        let key = Self::normalize(path);
        let files = self.files.lock().unwrap();
        let data = files
            .get(&key)
            .ok_or_else(|| Self::missing("fs.stat", path))?;
        Ok(FileInfo {
            name: key.rsplit('/').next().unwrap_or_default().to_string(),
            path: key.clone(),
            size: data.len() as u64,
            is_dir: false,
            mod_time: None,
            mode: 0o644,
            mime_type: String::new(),
        })
    }

    async fn upload(
        &self,
        local_path: &std::path::Path,
        remote_path: &str,
    ) -> Result<(), SandboxError> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| SandboxError::new("fs.upload", PROVIDER, "", e))?;
        self.write(remote_path, &data).await
    }

    async fn upload_reader(
        &self,
        reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        remote_path: &str,
    ) -> Result<(), SandboxError> {
        use tokio::io::AsyncReadExt;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| SandboxError::new("fs.upload", PROVIDER, "", e))?;
        self.write(remote_path, &data).await
    }

    async fn download(
        &self,
        remote_path: &str,
        writer: &mut (dyn tokio::io::AsyncWrite + Send + Unpin),
    ) -> Result<(), SandboxError> {
        use tokio::io::AsyncWriteExt;
        let data = self.read(remote_path).await?;
        writer
            .write_all(&data)
            .await
            .map_err(|e| SandboxError::new("fs.download", PROVIDER, "", e))
    }

    async fn mkdir(&self, _path: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), SandboxError> {
        let data = self.read(src).await?;
        self.write(dst, &data).await
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), SandboxError> {
        let data = self.read(src).await?;
        self.files.lock().unwrap().remove(&Self::normalize(src));
        self.write(dst, &data).await
    }
}

/// In-memory network for the mock backend.
#[derive(Default)]
pub struct MockNetwork {
    ports: Mutex<HashMap<u16, PublishedPort>>,
}

#[async_trait]
impl Network for MockNetwork {
    async fn publish_port(&self, port: u16) -> Result<PublishedPort, SandboxError> {
        let published = PublishedPort {
            local_port: port,
            public_port: port,
            protocol: "tcp".to_string(),
            public_url: format!("http://localhost:{port}"),
        };
        self.ports.lock().unwrap().insert(port, published.clone());
        Ok(published)
    }

    async fn public_url(&self, port: u16) -> Result<String, SandboxError> {
        self.ports
            .lock()
            .unwrap()
            .get(&port)
            .map(|p| p.public_url.clone())
            .ok_or_else(|| {
                SandboxError::new("network", PROVIDER, "", format!("port {port} not published"))
            })
    }

    async fn list_ports(&self) -> Result<Vec<PublishedPort>, SandboxError> {
        let mut ports: Vec<PublishedPort> =
            self.ports.lock().unwrap().values().cloned().collect();
        ports.sort_by_key(|p| p.local_port);
        Ok(ports)
    }

    async fn unpublish_port(&self, port: u16) -> Result<(), SandboxError> {
        self.ports.lock().unwrap().remove(&port);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kapsel_events::StreamEventType;

    #[tokio::test]
    async fn default_execute_succeeds_with_the_given_language() {
        let provider = MockProvider::new();
        let instance = provider.create(CreateOptions::default()).await.unwrap();

        let opts = ExecutionOptions::new().with_language("Python");
        let result = instance.execute("print(1)", &opts).await.unwrap();
        assert!(result.success());
        assert_eq!(result.language, "Python");
    }

    #[tokio::test]
    async fn scripted_result_is_returned_and_recorded() {
        let provider = MockProvider::new();
        provider.set_execute_result("Hello, World!\n", "", 0);
        let instance = provider.create(CreateOptions::default()).await.unwrap();

        let result = instance
            .execute("print('hi')", &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(result.stdout, "Hello, World!\n");

        let records = provider.instances()[0].executions();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "print('hi')");
    }

    #[tokio::test]
    async fn default_stream_replays_the_result() {
        let provider = MockProvider::new();
        provider.set_execute_result("Hello", "warnings", 0);
        let instance = provider.create(CreateOptions::default()).await.unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        instance
            .execute_stream(
                "code",
                &ExecutionOptions::default(),
                Arc::new(move |event| {
                    sink.lock().unwrap().push(event.clone());
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let kinds: Vec<StreamEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                StreamEventType::Stdout,
                StreamEventType::Stderr,
                StreamEventType::Complete
            ]
        );
        assert_eq!(events[2].exit_code, Some(0));
    }

    #[tokio::test]
    async fn execute_error_hook_propagates() {
        let provider = MockProvider::new();
        provider.set_execute_error(ErrorKind::ResourceExhausted);
        let instance = provider.create(CreateOptions::default()).await.unwrap();

        let err = instance
            .execute("code", &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::ResourceExhausted));
    }

    #[tokio::test]
    async fn filesystem_round_trips() {
        let provider = MockProvider::new();
        let instance = provider.create(CreateOptions::default()).await.unwrap();
        let fs = instance.filesystem();

        fs.write("/data/x.txt", b"payload").await.unwrap();
        assert_eq!(fs.read("data/x.txt").await.unwrap(), b"payload");
        assert!(fs.exists("data/x.txt").await.unwrap());

        let listed = fs.list("data").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "x.txt");
    }

    #[tokio::test]
    async fn network_publishes_and_lists_ports() {
        let provider = MockProvider::new();
        let instance = provider.create(CreateOptions::default()).await.unwrap();
        let network = instance.network().unwrap();

        let published = network.publish_port(8080).await.unwrap();
        assert_eq!(published.public_url, "http://localhost:8080");
        assert_eq!(network.list_ports().await.unwrap().len(), 1);

        network.unpublish_port(8080).await.unwrap();
        assert!(network.list_ports().await.unwrap().is_empty());
    }
}
