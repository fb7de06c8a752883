//! End-to-end orchestrator tests over the mock backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kapsel::{
    ErrorKind, Event, EventType, ExecutionCompleteData, ExecutionOptions, ExecutionResult,
    InstanceStatus, Provider, ProviderRegistry, Sandbox, SandboxConfig, SandboxError, StreamEvent,
    StreamEventType,
};
use kapsel_provider::mock::MockProvider;

fn mock_registry() -> (ProviderRegistry, Arc<MockProvider>) {
    let registry = ProviderRegistry::new();
    let provider = Arc::new(MockProvider::new());
    let handle = Arc::clone(&provider);
    registry.register("mock", move |_| {
        Ok(Arc::clone(&handle) as Arc<dyn Provider>)
    });
    (registry, provider)
}

fn mock_config(registry: ProviderRegistry) -> SandboxConfig {
    SandboxConfig::new()
        .with_provider("mock")
        .with_registry(registry)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within one second");
}

#[tokio::test]
async fn one_shot_execute_detects_python_and_returns_stdout() {
    let (registry, provider) = mock_registry();
    provider.set_execute_result("Hello, World!\n", "", 0);

    let result = kapsel::execute("print(\"Hello\")", mock_config(registry))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "Hello, World!\n");
    assert_eq!(result.language, "Python");
    assert!(result.success());

    // The resolved language was handed to the backend, and the one-shot
    // stopped its sandbox.
    let instance = &provider.instances()[0];
    assert_eq!(instance.executions()[0].options.language, "Python");
    assert_eq!(instance.stop_calls(), 1);
}

#[tokio::test]
async fn execute_after_stop_fails_with_the_sentinel() {
    let (registry, _provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();
    sandbox.stop().await.unwrap();

    let err = sandbox.execute("print('x')").await.unwrap_err();
    assert!(err.is(ErrorKind::SandboxStopped));
    assert_eq!(err.op(), "execute");
    assert_eq!(err.provider(), "mock");

    let err = sandbox
        .execute_stream("print('x')", Arc::new(|_| Ok(())))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::SandboxStopped));

    let err = sandbox.run_command("ls", &[]).await.unwrap_err();
    assert!(err.is(ErrorKind::SandboxStopped));
}

#[tokio::test]
async fn unknown_provider_error_lists_available_backends() {
    let (registry, _provider) = mock_registry();
    let config = SandboxConfig::new()
        .with_provider("nope")
        .with_registry(registry);

    let err = Sandbox::create(config).await.unwrap_err();
    assert!(err.is(ErrorKind::ProviderNotRegistered));

    let message = err.to_string();
    assert!(message.contains("\"nope\" not found"), "{message}");
    assert!(message.contains("- mock"), "{message}");
}

#[tokio::test]
async fn stop_invokes_the_backend_exactly_once() {
    let (registry, provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    for _ in 0..5 {
        sandbox.stop().await.unwrap();
    }

    assert_eq!(provider.instances()[0].stop_calls(), 1);
    assert_eq!(sandbox.status().await.unwrap(), InstanceStatus::Stopped);
}

#[tokio::test]
async fn status_short_circuits_after_stop() {
    let (registry, provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();
    assert_eq!(sandbox.status().await.unwrap(), InstanceStatus::Running);

    // Even if the backend claims otherwise, a stopped orchestrator reports
    // stopped.
    provider.instances()[0].set_status(InstanceStatus::Executing);
    sandbox.stop().await.unwrap();
    assert_eq!(sandbox.status().await.unwrap(), InstanceStatus::Stopped);
}

#[tokio::test]
async fn completion_event_carries_exit_code_and_duration() {
    let (registry, provider) = mock_registry();
    provider.on_execute(|_code, opts| {
        Ok(ExecutionResult {
            exit_code: 0,
            duration: Duration::from_millis(120),
            language: opts.language.clone(),
            ..ExecutionResult::default()
        })
    });

    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    let deliveries = Arc::new(Mutex::new(Vec::<Event>::new()));
    let sink = Arc::clone(&deliveries);
    let _sub = sandbox.subscribe(EventType::ExecutionComplete, move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    sandbox.execute("print('x')").await.unwrap();

    let events = Arc::clone(&deliveries);
    wait_for(move || !events.lock().unwrap().is_empty()).await;

    let events = deliveries.lock().unwrap();
    assert_eq!(events.len(), 1);
    let data: ExecutionCompleteData = events[0].payload().unwrap();
    assert_eq!(data.exit_code, 0);
    assert!(data.duration >= Duration::from_millis(100));
    assert_eq!(data.language, "Python");

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn unsubscribed_handlers_receive_nothing() {
    let (registry, _provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let sub = sandbox.subscribe(EventType::ExecutionComplete, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    sub.unsubscribe();

    sandbox.execute("print('x')").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn streaming_delivers_start_chunks_complete_in_order() {
    let (registry, provider) = mock_registry();
    provider.set_execute_result("Hello", "", 0);

    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    let events: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    sandbox
        .execute_stream(
            "print(\"Hello\")",
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
            StreamEventType::Start,
            StreamEventType::Stdout,
            StreamEventType::Complete
        ]
    );
    assert_eq!(events[1].data, "Hello");
    assert_eq!(events[2].exit_code, Some(0));

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn execute_async_delivers_one_result() {
    let (registry, provider) = mock_registry();
    provider.set_execute_result("later\n", "", 0);

    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();
    let rx = sandbox
        .execute_async("print('later')", ExecutionOptions::new())
        .await
        .unwrap();

    let result = rx.await.unwrap();
    assert_eq!(result.stdout, "later\n");
    assert!(result.success());

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn execute_async_folds_failures_into_the_result() {
    let (registry, provider) = mock_registry();
    provider.set_execute_error(ErrorKind::ProviderUnavailable);

    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();
    let rx = sandbox
        .execute_async("print('x')", ExecutionOptions::new())
        .await
        .unwrap();

    let result = rx.await.unwrap();
    assert!(!result.success());
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("provider unavailable"));

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn backend_timeout_surfaces_the_timeout_event() {
    let (registry, provider) = mock_registry();
    provider.set_execute_error(ErrorKind::ExecutionTimeout);

    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let _sub = sandbox.subscribe(EventType::ExecutionTimeout, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = sandbox.execute("while True: pass").await.unwrap_err();
    assert!(err.is(ErrorKind::ExecutionTimeout));

    let counted = Arc::clone(&count);
    wait_for(move || counted.load(Ordering::SeqCst) == 1).await;

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn explicit_language_override_wins_over_detection() {
    let (registry, provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    sandbox
        .execute_with(
            "print('looks like python')",
            ExecutionOptions::new().with_language("Ruby"),
        )
        .await
        .unwrap();

    let record = &provider.instances()[0].executions()[0];
    assert_eq!(record.options.language, "Ruby");

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn filename_hint_drives_detection() {
    let (registry, provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    sandbox
        .execute_with(
            "puts 'hi'",
            ExecutionOptions::new().with_filename("script.rb"),
        )
        .await
        .unwrap();

    let record = &provider.instances()[0].executions()[0];
    assert_eq!(record.options.language, "Ruby");

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn undetectable_code_without_fallback_fails() {
    let (registry, _provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    let err = sandbox.execute("zzz qqq").await.unwrap_err();
    assert!(err.is(ErrorKind::LanguageDetectionFailed));

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn auto_detect_off_passes_the_language_through_verbatim() {
    let (registry, provider) = mock_registry();
    // The fallback language is only consulted by the detection path; with
    // auto-detection off the option goes to the backend as-is.
    let config = mock_config(registry)
        .with_auto_detect(false)
        .with_default_language("Python");
    let sandbox = Sandbox::create(config).await.unwrap();

    sandbox.execute("print('x')").await.unwrap();
    sandbox
        .execute_with("print('x')", ExecutionOptions::new().with_language("Go"))
        .await
        .unwrap();

    let records = provider.instances()[0].executions();
    assert_eq!(records[0].options.language, "");
    assert_eq!(records[1].options.language, "Go");

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn undetectable_code_uses_the_configured_fallback() {
    let (registry, provider) = mock_registry();
    let config = mock_config(registry).with_default_language("Python");
    let sandbox = Sandbox::create(config).await.unwrap();

    sandbox.execute("zzz qqq").await.unwrap();

    let record = &provider.instances()[0].executions()[0];
    assert_eq!(record.options.language, "Python");

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn merged_options_fill_defaults_and_keep_overrides() {
    let (registry, provider) = mock_registry();
    let config = mock_config(registry).with_timeout(Duration::from_secs(30));
    let sandbox = Sandbox::create(config).await.unwrap();

    sandbox
        .execute_with(
            "print('x')",
            ExecutionOptions::new()
                .with_language("Go")
                .with_timeout(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    let record = &provider.instances()[0].executions()[0];
    assert_eq!(record.options.language, "Go");
    assert_eq!(record.options.timeout, Duration::from_secs(60));
    assert_eq!(record.options.work_dir, "/workspace");

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn global_event_handler_sees_the_lifecycle() {
    let (registry, _provider) = mock_registry();

    let seen = Arc::new(Mutex::new(Vec::<EventType>::new()));
    let sink = Arc::clone(&seen);
    let config = mock_config(registry).with_event_handler(Arc::new(move |event: &Event| {
        sink.lock().unwrap().push(event.event_type);
    }));

    let sandbox = Sandbox::create(config).await.unwrap();
    sandbox.execute("print('x')").await.unwrap();
    sandbox.stop().await.unwrap();

    let events = Arc::clone(&seen);
    wait_for(move || {
        let events = events.lock().unwrap();
        events.contains(&EventType::SandboxCreated)
            && events.contains(&EventType::ExecutionStarted)
            && events.contains(&EventType::ExecutionComplete)
            && events.contains(&EventType::SandboxStopped)
    })
    .await;
}

#[tokio::test]
async fn backend_error_is_wrapped_with_context() {
    let (registry, provider) = mock_registry();
    provider.on_execute(|_code, _opts| {
        Err(SandboxError::new(
            "execute",
            "mock",
            "mock-0",
            ErrorKind::ResourceExhausted,
        ))
    });

    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();
    let err = sandbox.execute("print('x')").await.unwrap_err();

    assert!(err.is(ErrorKind::ResourceExhausted));
    assert_eq!(err.op(), "execute");
    assert_eq!(err.provider(), "mock");

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn run_command_passes_through() {
    let (registry, provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    sandbox
        .run_command("ls", &["-la".to_string()])
        .await
        .unwrap();

    let commands = provider.instances()[0].commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command, "ls");
    assert_eq!(commands[0].args, vec!["-la".to_string()]);

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn duration_is_backfilled_when_the_backend_leaves_it_zero() {
    let (registry, provider) = mock_registry();
    provider.on_execute(|_code, opts| {
        Ok(ExecutionResult {
            exit_code: 0,
            language: opts.language.clone(),
            ..ExecutionResult::default()
        })
    });

    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();
    let result = sandbox.execute("print('x')").await.unwrap();
    assert!(!result.duration.is_zero());

    sandbox.stop().await.unwrap();
}

#[tokio::test]
async fn mock_filesystem_and_network_are_reachable_through_the_facade() {
    let (registry, _provider) = mock_registry();
    let sandbox = Sandbox::create(mock_config(registry)).await.unwrap();

    let files = sandbox.files();
    files.write("report.txt", b"done").await.unwrap();
    assert_eq!(files.read("report.txt").await.unwrap(), b"done");

    let network = sandbox.network().expect("mock supports networking");
    let port = network.publish_port(3000).await.unwrap();
    assert_eq!(port.local_port, 3000);

    sandbox.stop().await.unwrap();
}
