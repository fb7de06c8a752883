//! The sandbox orchestrator.

use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, instrument, warn};

use kapsel_core::{
    CommandResult, CreateOptions, ErrorKind, ExecutionOptions, ExecutionResult, FileSystem,
    InstanceStatus, SandboxError,
};
use kapsel_events::{
    Event, EventBus, EventType, ExecutionCompleteData, ExecutionStartedData, StreamEvent,
    StreamHandler, Subscription,
};
use kapsel_langdetect::{DetectOptions, Detector};
use kapsel_provider::{global_factory, Instance, Network, SandboxFactory};

use crate::config::SandboxConfig;

struct SandboxInner {
    instance: Arc<dyn Instance>,
    config: SandboxConfig,
    detector: Detector,
    bus: EventBus,
    stopped: RwLock<bool>,
    provider_name: String,
}

/// An isolated code execution environment.
///
/// The primary user-facing type: owns one backend instance and an event
/// bus, and runs the detect/execute/stream pipeline. Cloning is cheap and
/// yields another handle to the same sandbox.
#[derive(Clone)]
pub struct Sandbox {
    inner: Arc<SandboxInner>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("provider_name", &self.inner.provider_name)
            .finish()
    }
}

impl Sandbox {
    /// Create a sandbox from the given configuration.
    ///
    /// # Errors
    ///
    /// Fails when the provider is unknown (the error lists the registered
    /// backends) or backend creation fails.
    pub async fn create(config: SandboxConfig) -> Result<Self, SandboxError> {
        let create_opts = CreateOptions {
            image: config.image.clone(),
            runtime: config.runtime.clone(),
            resources: config.resources,
            timeout: config.default_timeout,
            internet_access: config.internet_access,
            ..CreateOptions::default()
        };

        let factory = match &config.registry {
            Some(registry) => SandboxFactory::new(registry.clone()),
            None => global_factory().clone(),
        };

        let instance = factory
            .create_sandbox(&config.provider, config.provider_config.as_ref(), Some(create_opts))
            .await?;

        let bus = EventBus::new();
        if let Some(handler) = &config.event_handler {
            // The global handler stays subscribed for the sandbox lifetime.
            let _ = bus.subscribe_all(Arc::clone(handler));
        }

        let provider_name = config.provider.clone();
        bus.emit(Event::new(EventType::SandboxCreated, instance.id()));

        Ok(Self {
            inner: Arc::new(SandboxInner {
                instance,
                config,
                detector: Detector::new(),
                bus,
                stopped: RwLock::new(false),
                provider_name,
            }),
        })
    }

    /// Create a sandbox, panicking on failure.
    ///
    /// For initialization paths where a missing backend is fatal. Everything
    /// else should use [`Sandbox::create`].
    pub async fn must_create(config: SandboxConfig) -> Self {
        match Self::create(config).await {
            Ok(sandbox) => sandbox,
            Err(error) => panic!("kapsel: failed to create sandbox: {error}"),
        }
    }

    /// Unique identifier of the underlying instance.
    #[must_use]
    pub fn id(&self) -> &str {
        self.inner.instance.id()
    }

    /// Name of the backend this sandbox runs on.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.inner.provider_name
    }

    async fn check_running(&self, op: &'static str) -> Result<(), SandboxError> {
        if *self.inner.stopped.read().await {
            return Err(self.error(op, ErrorKind::SandboxStopped));
        }
        Ok(())
    }

    fn error(&self, op: &'static str, kind: ErrorKind) -> SandboxError {
        SandboxError::new(op, &self.inner.provider_name, self.id(), kind)
    }

    /// Resolve the language for one execution. An explicit override always
    /// wins. With auto-detection on, an empty language goes through the
    /// detector, then the configured fallback, then fails. With
    /// auto-detection off, the option passes through verbatim (including
    /// empty) and the backend decides.
    fn resolve_language(
        &self,
        op: &'static str,
        code: &str,
        opts: &ExecutionOptions,
    ) -> Result<String, SandboxError> {
        if !opts.language.is_empty() || !self.inner.config.auto_detect_language {
            return Ok(opts.language.clone());
        }

        let detected = self.inner.detector.detect(
            code,
            &DetectOptions {
                filename: opts.filename.clone(),
                ..DetectOptions::default()
            },
        );
        if !detected.language.is_empty() {
            debug!(
                language = %detected.language,
                method = %detected.method,
                confidence = detected.confidence,
                "language detected"
            );
            return Ok(detected.language);
        }
        if !self.inner.config.default_language.is_empty() {
            return Ok(self.inner.config.default_language.clone());
        }
        Err(self.error(op, ErrorKind::LanguageDetectionFailed))
    }

    fn merged_options(&self, opts: ExecutionOptions) -> ExecutionOptions {
        let defaults = ExecutionOptions {
            timeout: self.inner.config.default_timeout,
            ..ExecutionOptions::defaults()
        };
        opts.merge(&defaults)
    }

    fn emit_failure(&self, error: &SandboxError) {
        let event_type = if error.is(ErrorKind::ExecutionTimeout) {
            EventType::ExecutionTimeout
        } else {
            EventType::ExecutionError
        };
        self.inner
            .bus
            .emit(Event::from_error(event_type, self.id(), error));
    }

    /// Run code and block until the result is in.
    pub async fn execute(&self, code: &str) -> Result<ExecutionResult, SandboxError> {
        self.execute_with(code, ExecutionOptions::new()).await
    }

    /// Run code with explicit options.
    #[instrument(skip(self, code, opts), fields(sandbox = %self.id(), provider = %self.provider()))]
    pub async fn execute_with(
        &self,
        code: &str,
        opts: ExecutionOptions,
    ) -> Result<ExecutionResult, SandboxError> {
        self.check_running("execute").await?;

        let mut merged = self.merged_options(opts);
        let language = self.resolve_language("execute", code, &merged)?;
        merged.language.clone_from(&language);

        self.inner.bus.emit(Event::with_payload(
            EventType::ExecutionStarted,
            self.id(),
            &ExecutionStartedData {
                language: language.clone(),
                code_size: code.len(),
            },
        ));

        let start = std::time::Instant::now();
        let mut result = match self.inner.instance.execute(code, &merged).await {
            Ok(result) => result,
            Err(error) => {
                self.emit_failure(&error);
                return Err(error);
            }
        };

        // Backends may leave timing and language blank.
        if result.duration.is_zero() {
            result.duration = start.elapsed();
        }
        result.language.clone_from(&language);

        self.inner.bus.emit(Event::with_payload(
            EventType::ExecutionComplete,
            self.id(),
            &ExecutionCompleteData {
                exit_code: result.exit_code,
                duration: result.duration,
                language,
            },
        ));

        Ok(result)
    }

    /// Run code asynchronously. The returned channel yields exactly one
    /// result; failures are folded into `ExecutionResult::error`.
    pub async fn execute_async(
        &self,
        code: &str,
        opts: ExecutionOptions,
    ) -> Result<oneshot::Receiver<ExecutionResult>, SandboxError> {
        self.check_running("execute_async").await?;

        let (tx, rx) = oneshot::channel();
        let sandbox = self.clone();
        let code = code.to_string();
        tokio::spawn(async move {
            let result = match sandbox.execute_with(&code, opts).await {
                Ok(result) => result,
                Err(error) => ExecutionResult {
                    error: Some(error.to_string()),
                    ..ExecutionResult::default()
                },
            };
            let _ = tx.send(result);
        });

        Ok(rx)
    }

    /// Run code, streaming output to `handler` as it is produced.
    ///
    /// The handler receives `start` first; the backend delivers chunks and
    /// the terminal `complete` (or `error`) event.
    pub async fn execute_stream(
        &self,
        code: &str,
        handler: StreamHandler,
    ) -> Result<(), SandboxError> {
        self.execute_stream_with(code, ExecutionOptions::new(), handler)
            .await
    }

    /// Streaming execution with explicit options.
    #[instrument(skip(self, code, opts, handler), fields(sandbox = %self.id(), provider = %self.provider()))]
    pub async fn execute_stream_with(
        &self,
        code: &str,
        opts: ExecutionOptions,
        handler: StreamHandler,
    ) -> Result<(), SandboxError> {
        self.check_running("execute_stream").await?;

        let mut merged = self.merged_options(opts);
        let language = self.resolve_language("execute_stream", code, &merged)?;
        merged.language.clone_from(&language);

        let _ = handler(&StreamEvent::start());

        self.inner.bus.emit(Event::with_payload(
            EventType::ExecutionStarted,
            self.id(),
            &ExecutionStartedData {
                language,
                code_size: code.len(),
            },
        ));

        match self
            .inner
            .instance
            .execute_stream(code, &merged, handler)
            .await
        {
            Ok(()) => Ok(()),
            Err(error) => {
                self.emit_failure(&error);
                Err(error)
            }
        }
    }

    /// Execute a shell command in the sandbox.
    pub async fn run_command(
        &self,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandResult, SandboxError> {
        self.check_running("run_command").await?;
        self.inner.instance.run_command(cmd, args).await
    }

    /// File operations for this sandbox.
    #[must_use]
    pub fn files(&self) -> Arc<dyn FileSystem> {
        self.inner.instance.filesystem()
    }

    /// Network operations, when the backend supports them.
    #[must_use]
    pub fn network(&self) -> Option<Arc<dyn Network>> {
        self.inner.instance.network()
    }

    /// Register an event callback; the returned handle unsubscribes it.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(event_type, handler)
    }

    /// Terminate the sandbox and release backend resources.
    ///
    /// Idempotent: the first call flips the stopped flag and invokes the
    /// backend exactly once; later calls return `Ok` without touching it.
    pub async fn stop(&self) -> Result<(), SandboxError> {
        {
            let mut stopped = self.inner.stopped.write().await;
            if *stopped {
                return Ok(());
            }
            *stopped = true;
        }

        match self.inner.instance.stop().await {
            Ok(()) => {
                self.inner
                    .bus
                    .emit(Event::new(EventType::SandboxStopped, self.id()));
                Ok(())
            }
            Err(error) => {
                self.inner
                    .bus
                    .emit(Event::from_error(EventType::SandboxError, self.id(), &error));
                Err(error)
            }
        }
    }

    /// Current status; `Stopped` as soon as [`Sandbox::stop`] has run,
    /// regardless of what the backend reports.
    pub async fn status(&self) -> Result<InstanceStatus, SandboxError> {
        if *self.inner.stopped.read().await {
            return Ok(InstanceStatus::Stopped);
        }
        self.inner.instance.status().await
    }
}

impl Drop for SandboxInner {
    fn drop(&mut self) {
        if let Ok(stopped) = self.stopped.try_read() {
            if !*stopped {
                warn!(
                    sandbox = %self.instance.id(),
                    provider = %self.provider_name,
                    "sandbox dropped without stop; backend resources may leak"
                );
            }
        }
    }
}
