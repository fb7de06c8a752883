//! Local subprocess backend.
//!
//! **Warning**: this backend provides NO isolation and should only be used
//! for development with trusted code. It implements the full execution
//! pipeline (workspace materialization, compile-then-run, streaming) so the
//! orchestrator can be exercised end-to-end without a container runtime.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use kapsel_core::{
    Artifact, Capabilities, CommandResult, CreateOptions, ErrorKind, ExecutionOptions,
    ExecutionResult, FileSystem, InstanceStatus, SandboxError,
};
use kapsel_events::{MultiStreamWriter, OutputStream, StreamEvent, StreamHandler};
use kapsel_langdetect::{runtime_info, supported_languages, RuntimeInfo};

use crate::local_fs::LocalFileSystem;
use crate::traits::{Instance, Network, Provider};

const PROVIDER: &str = "process";
const STREAM_BUFFER: usize = 64;
const INLINE_ARTIFACT_LIMIT: u64 = 256 * 1024;

/// Configuration for the process backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Timeout applied when an execution doesn't set one.
    pub default_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Local subprocess provider.
pub struct ProcessProvider {
    config: ProcessConfig,
    instances: RwLock<HashMap<String, Arc<ProcessInstance>>>,
}

impl ProcessProvider {
    /// Provider with explicit configuration.
    #[must_use]
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Provider from the registry's JSON configuration slot.
    pub fn from_value(config: Option<&serde_json::Value>) -> Result<Self, SandboxError> {
        let config = match config {
            None => ProcessConfig::default(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| crate::invalid_config(PROVIDER, &e))?,
        };
        Ok(Self::new(config))
    }
}

impl Default for ProcessProvider {
    fn default() -> Self {
        Self::new(ProcessConfig::default())
    }
}

#[async_trait]
impl Provider for ProcessProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn create(&self, opts: CreateOptions) -> Result<Arc<dyn Instance>, SandboxError> {
        let id = format!("process-{}", Uuid::new_v4());

        let root = tempfile::Builder::new()
            .prefix("kapsel-")
            .tempdir()
            .map_err(|e| SandboxError::new("create", PROVIDER, &id, e))?;
        let work_dir = root.path().join("workspace");
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| SandboxError::new("create", PROVIDER, &id, e))?;

        let instance = Arc::new(ProcessInstance {
            fs: Arc::new(LocalFileSystem::new(work_dir.clone(), PROVIDER)),
            id: id.clone(),
            work_dir,
            workspace: Mutex::new(Some(root)),
            env: opts.environment,
            default_timeout: self.config.default_timeout,
            stopped: RwLock::new(false),
        });

        self.instances
            .write()
            .unwrap()
            .insert(id, Arc::clone(&instance));

        Ok(instance)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_streaming: true,
            supports_async: true,
            supports_filesystem: true,
            supports_network: false,
            supported_languages: supported_languages(),
            max_execution_time: self.config.default_timeout,
            max_memory_mb: 0,
            max_cpus: 0,
            supports_gpu: false,
            supports_persistence: false,
        }
    }

    async fn validate(&self) -> Result<(), SandboxError> {
        // Subprocesses are always available on the host.
        Ok(())
    }

    fn close(&self) -> Result<(), SandboxError> {
        let mut instances = self.instances.write().unwrap();
        for instance in instances.values() {
            instance.shutdown();
        }
        instances.clear();
        Ok(())
    }
}

/// One process-backed sandbox: a temp workspace plus subprocess execution.
pub struct ProcessInstance {
    id: String,
    work_dir: PathBuf,
    workspace: Mutex<Option<TempDir>>,
    env: HashMap<String, String>,
    default_timeout: Duration,
    stopped: RwLock<bool>,
    fs: Arc<LocalFileSystem>,
}

impl ProcessInstance {
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

    /// Flip the stopped flag and drop the workspace. Idempotent; used by
    /// both `stop` and provider close.
    fn shutdown(&self) {
        let mut stopped = self.stopped.write().unwrap();
        if *stopped {
            return;
        }
        *stopped = true;
        drop(stopped);
        // Dropping the TempDir removes the directory tree.
        self.workspace.lock().unwrap().take();
    }

    fn runtime_for(
        &self,
        op: &'static str,
        language: &str,
    ) -> Result<&'static RuntimeInfo, SandboxError> {
        runtime_info(language).ok_or_else(|| {
            SandboxError::new(op, PROVIDER, &self.id, ErrorKind::LanguageNotSupported)
        })
    }

    /// Write `main<ext>` and any extra files into the workspace; returns
    /// the code path.
    async fn materialize(
        &self,
        op: &'static str,
        code: &str,
        info: &RuntimeInfo,
        opts: &ExecutionOptions,
    ) -> Result<PathBuf, SandboxError> {
        let code_path = self.work_dir.join(format!("main{}", info.file_ext));
        tokio::fs::write(&code_path, code)
            .await
            .map_err(|e| SandboxError::new(op, PROVIDER, &self.id, e))?;

        for (path, content) in &opts.files {
            let full = self.resolve(op, path)?;
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SandboxError::new(op, PROVIDER, &self.id, e))?;
            }
            tokio::fs::write(&full, content)
                .await
                .map_err(|e| SandboxError::new(op, PROVIDER, &self.id, e))?;
        }

        Ok(code_path)
    }

    /// Confine a user-supplied path to the workspace.
    fn resolve(&self, op: &'static str, path: &str) -> Result<PathBuf, SandboxError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(SandboxError::new(
                op,
                PROVIDER,
                &self.id,
                ErrorKind::PermissionDenied,
            ));
        }
        Ok(self.work_dir.join(relative))
    }

    /// Compile and run commands for one execution. Interpreted languages
    /// get the source path appended to the run command; compiled languages
    /// run the artifact baked into the catalog entry.
    fn build_commands(info: &RuntimeInfo, code_path: &Path) -> (Option<Vec<String>>, Vec<String>) {
        let code = code_path.to_string_lossy().into_owned();
        match &info.compile_command {
            Some(compile) => {
                let mut compile = compile.clone();
                compile.push(code);
                (Some(compile), info.run_command.clone())
            }
            None => {
                let mut run = info.run_command.clone();
                run.push(code);
                (None, run)
            }
        }
    }

    fn command(&self, argv: &[String], opts: &ExecutionOptions) -> Result<Command, SandboxError> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            SandboxError::new("execute", PROVIDER, &self.id, ErrorKind::InvalidConfiguration)
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.work_dir)
            .envs(&self.env)
            .envs(&opts.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command.stdin(if opts.stdin.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        });
        Ok(command)
    }

    /// Spawn, feed stdin, and wait for collected output under the timeout.
    async fn run_collected(
        &self,
        op: &'static str,
        argv: &[String],
        opts: &ExecutionOptions,
    ) -> Result<std::process::Output, SandboxError> {
        let mut child = self
            .command(argv, opts)?
            .spawn()
            .map_err(|e| SandboxError::new(op, PROVIDER, &self.id, e))?;

        if !opts.stdin.is_empty() {
            if let Some(mut stdin) = child.stdin.take() {
                let data = opts.stdin.clone().into_bytes();
                tokio::spawn(async move {
                    let _ = stdin.write_all(&data).await;
                });
            }
        }

        let wait = child.wait_with_output();
        let output = if opts.timeout.is_zero() {
            wait.await
        } else {
            tokio::time::timeout(opts.timeout, wait).await.map_err(|_| {
                SandboxError::new(op, PROVIDER, &self.id, ErrorKind::ExecutionTimeout)
            })?
        };
        output.map_err(|e| SandboxError::new(op, PROVIDER, &self.id, e))
    }

    /// Collect workspace files generated during execution.
    async fn collect_artifacts(
        &self,
        code_path: &Path,
        opts: &ExecutionOptions,
    ) -> Vec<Artifact> {
        let mut artifacts = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.work_dir).await else {
            return artifacts;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path == code_path {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if opts.files.contains_key(&name) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let data = if meta.len() <= INLINE_ARTIFACT_LIMIT {
                tokio::fs::read(&path).await.ok()
            } else {
                None
            };
            artifacts.push(Artifact {
                name: name.clone(),
                path: name,
                mime_type: String::new(),
                size: meta.len(),
                data,
            });
        }
        artifacts
    }
}

#[async_trait]
impl Instance for ProcessInstance {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, code, opts), fields(sandbox = "process", id = %self.id))]
    async fn execute(
        &self,
        code: &str,
        opts: &ExecutionOptions,
    ) -> Result<ExecutionResult, SandboxError> {
        self.check_running("execute")?;
        warn!("process backend provides NO security isolation");

        let info = self.runtime_for("execute", &opts.language)?;
        let code_path = self.materialize("execute", code, info, opts).await?;
        let (compile, run) = Self::build_commands(info, &code_path);

        let start = Instant::now();

        if let Some(compile) = compile {
            debug!(command = ?compile, "compiling");
            let output = self.run_collected("execute", &compile, opts).await?;
            if !output.status.success() {
                let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
                diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));
                // Compiler diagnostics travel through the normal result
                // pathway, not an error.
                return Ok(ExecutionResult {
                    exit_code: output.status.code().unwrap_or(1),
                    stderr: diagnostics,
                    duration: start.elapsed(),
                    language: opts.language.clone(),
                    ..ExecutionResult::default()
                });
            }
        }

        debug!(command = ?run, "running");
        let output = self.run_collected("execute", &run, opts).await?;
        let duration = start.elapsed();

        let artifacts = if opts.keep_artifacts {
            self.collect_artifacts(&code_path, opts).await
        } else {
            Vec::new()
        };

        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
            language: opts.language.clone(),
            artifacts,
            error: None,
            metadata: HashMap::new(),
        })
    }

    #[instrument(skip(self, code, opts, handler), fields(sandbox = "process", id = %self.id))]
    async fn execute_stream(
        &self,
        code: &str,
        opts: &ExecutionOptions,
        handler: StreamHandler,
    ) -> Result<(), SandboxError> {
        self.check_running("execute_stream")?;

        let info = self.runtime_for("execute_stream", &opts.language)?;
        let code_path = self.materialize("execute_stream", code, info, opts).await?;
        let (compile, run) = Self::build_commands(info, &code_path);

        if let Some(compile) = compile {
            let output = self.run_collected("execute_stream", &compile, opts).await?;
            if !output.status.success() {
                let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
                diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));
                let _ = handler(&StreamEvent::stderr(diagnostics));
                let _ = handler(&StreamEvent::complete(output.status.code().unwrap_or(1)));
                return Ok(());
            }
        }

        let mut child = self
            .command(&run, opts)?
            .spawn()
            .map_err(|e| SandboxError::new("execute_stream", PROVIDER, &self.id, e))?;

        if !opts.stdin.is_empty() {
            if let Some(mut stdin) = child.stdin.take() {
                let data = opts.stdin.clone().into_bytes();
                tokio::spawn(async move {
                    let _ = stdin.write_all(&data).await;
                });
            }
        }

        let streams = MultiStreamWriter::new(STREAM_BUFFER);
        streams.on_event(Arc::clone(&handler));

        let stdout_pump = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(pump(pipe, streams.stdout())));
        let stderr_pump = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(pump(pipe, streams.stderr())));

        let status = if opts.timeout.is_zero() {
            child.wait().await
        } else {
            match tokio::time::timeout(opts.timeout, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    let _ = child.start_kill();
                    streams.close();
                    return Err(SandboxError::new(
                        "execute_stream",
                        PROVIDER,
                        &self.id,
                        ErrorKind::ExecutionTimeout,
                    ));
                }
            }
        }
        .map_err(|e| SandboxError::new("execute_stream", PROVIDER, &self.id, e))?;

        // Drain both pipes before the terminal event.
        if let Some(pump) = stdout_pump {
            let _ = pump.await;
        }
        if let Some(pump) = stderr_pump {
            let _ = pump.await;
        }

        let _ = handler(&StreamEvent::complete(status.code().unwrap_or(-1)));
        streams.close();
        Ok(())
    }

    async fn run_command(&self, cmd: &str, args: &[String]) -> Result<CommandResult, SandboxError> {
        self.check_running("run_command")?;

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(cmd.to_string());
        argv.extend_from_slice(args);

        let opts = ExecutionOptions {
            timeout: self.default_timeout,
            ..ExecutionOptions::default()
        };

        let start = Instant::now();
        let output = self.run_collected("run_command", &argv, &opts).await?;

        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        })
    }

    fn filesystem(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.fs) as Arc<dyn FileSystem>
    }

    fn network(&self) -> Option<Arc<dyn Network>> {
        None
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        self.shutdown();
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

/// Read chunks from a child pipe into an output stream until EOF.
async fn pump<R>(mut pipe: R, sink: Arc<OutputStream>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if sink.write(&buf[..n]).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use kapsel_events::StreamEventType;

    async fn instance() -> Arc<dyn Instance> {
        let provider = ProcessProvider::default();
        provider.create(CreateOptions::default()).await.unwrap()
    }

    fn shell_options() -> ExecutionOptions {
        ExecutionOptions::new()
            .with_language("Shell")
            .merge(&ExecutionOptions::defaults())
    }

    #[tokio::test]
    async fn executes_shell_code() {
        let sandbox = instance().await;
        let result = sandbox
            .execute("echo hello", &shell_options())
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.stdout.contains("hello"));
        assert_eq!(result.language, "Shell");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_result_not_an_error() {
        let sandbox = instance().await;
        let result = sandbox.execute("exit 42", &shell_options()).await.unwrap();
        assert_eq!(result.exit_code, 42);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn stdin_reaches_the_program() {
        let sandbox = instance().await;
        let opts = shell_options().with_stdin("ping\n".to_string());
        let result = sandbox.execute("read line; echo got:$line", &opts).await.unwrap();
        assert!(result.stdout.contains("got:ping"));
    }

    #[tokio::test]
    async fn env_reaches_the_program() {
        let sandbox = instance().await;
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "bonjour".to_string());
        let opts = shell_options().with_env(env);
        let result = sandbox.execute("echo $GREETING", &opts).await.unwrap();
        assert!(result.stdout.contains("bonjour"));
    }

    #[tokio::test]
    async fn timeout_surfaces_the_sentinel() {
        let sandbox = instance().await;
        let opts = shell_options().with_timeout(Duration::from_millis(100));
        let err = sandbox.execute("sleep 5", &opts).await.unwrap_err();
        assert!(err.is(ErrorKind::ExecutionTimeout));
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected() {
        let sandbox = instance().await;
        let opts = ExecutionOptions::new()
            .with_language("Befunge")
            .merge(&ExecutionOptions::defaults());
        let err = sandbox.execute("@", &opts).await.unwrap_err();
        assert!(err.is(ErrorKind::LanguageNotSupported));
    }

    #[tokio::test]
    async fn extra_files_are_materialized() {
        let sandbox = instance().await;
        let opts = shell_options().with_file("data/input.txt", b"payload".to_vec());
        let result = sandbox
            .execute("cat data/input.txt", &opts)
            .await
            .unwrap();
        assert!(result.stdout.contains("payload"));
    }

    #[tokio::test]
    async fn stream_delivers_chunks_then_complete() {
        let sandbox = instance().await;
        let events: Arc<StdMutex<Vec<StreamEvent>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        sandbox
            .execute_stream(
                "echo chunk-one; echo chunk-two >&2",
                &shell_options(),
                Arc::new(move |event| {
                    sink.lock().unwrap().push(event.clone());
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, StreamEventType::Complete);
        assert_eq!(last.exit_code, Some(0));
        assert!(events
            .iter()
            .any(|e| e.event_type == StreamEventType::Stdout && e.data.contains("chunk-one")));
        assert!(events
            .iter()
            .any(|e| e.event_type == StreamEventType::Stderr && e.data.contains("chunk-two")));
    }

    #[tokio::test]
    async fn run_command_is_direct() {
        let sandbox = instance().await;
        let result = sandbox
            .run_command("echo", &["direct".to_string()])
            .await
            .unwrap();
        assert!(result.success());
        assert!(result.stdout.contains("direct"));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_terminal() {
        let sandbox = instance().await;
        sandbox.stop().await.unwrap();
        sandbox.stop().await.unwrap();

        assert_eq!(sandbox.status().await.unwrap(), InstanceStatus::Stopped);
        let err = sandbox
            .execute("echo nope", &shell_options())
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::SandboxStopped));
    }

    #[tokio::test]
    async fn workspace_files_round_trip_through_the_filesystem() {
        let sandbox = instance().await;
        let fs = sandbox.filesystem();
        fs.write("notes.txt", b"remember").await.unwrap();

        let result = sandbox.execute("cat notes.txt", &shell_options()).await.unwrap();
        assert!(result.stdout.contains("remember"));

        let read_back = fs.read("notes.txt").await.unwrap();
        assert_eq!(read_back, b"remember");
    }

    #[tokio::test]
    async fn keep_artifacts_surfaces_generated_files() {
        let sandbox = instance().await;
        let opts = shell_options().with_keep_artifacts();
        let result = sandbox
            .execute("echo out > generated.txt", &opts)
            .await
            .unwrap();

        let artifact = result
            .artifacts
            .iter()
            .find(|a| a.name == "generated.txt")
            .expect("generated file should be surfaced");
        assert_eq!(artifact.data.as_deref(), Some(&b"out\n"[..]));
    }
}
