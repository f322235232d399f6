///
/// Runtime Lifecycle Integration Tests
///
/// The runtime, the lifecycle flag and the diagnostic sink are process-wide,
/// so every test here takes LIFECYCLE_LOCK first.
///

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tessel_runtime::{
    CaptureOutput, Hook, OutputNode, Runtime, RuntimeConfig, RuntimeError, lifecycle, sink,
};

static LIFECYCLE_LOCK: Mutex<()> = Mutex::new(());

fn quiet_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.log.console = false;
    config
}

#[test]
fn sink_is_synchronous_outside_runtime() {
    let _lock = LIFECYCLE_LOCK.lock().unwrap();
    let capture = OutputNode::new(CaptureOutput::new());
    sink().add_output(&capture);

    assert!(!sink().is_threaded());
    sink().output_str("before init\n");
    assert!(capture.text().contains("before init\n"));

    let runtime = Runtime::init(quiet_config()).unwrap();
    assert!(lifecycle::is_initialized());
    assert!(sink().is_threaded());
    sink().output_str("while running\n");
    sink().flush();
    assert!(capture.text().contains("while running\n"));

    runtime.shutdown();
    assert!(!lifecycle::is_initialized());
    assert!(!sink().is_threaded());
    assert!(sink().has_output(&capture));
    sink().output_str("after shutdown\n");
    assert!(capture.text().contains("after shutdown\n"));

    sink().remove_output(&capture, true);
}

#[test]
fn outputs_survive_repeated_cycles() {
    let _lock = LIFECYCLE_LOCK.lock().unwrap();
    let capture = OutputNode::new(CaptureOutput::new());
    sink().add_output(&capture);

    for cycle in 0..3 {
        let runtime = Runtime::init(quiet_config()).unwrap();
        assert!(sink().has_output(&capture));
        sink().output_str(&format!("cycle {cycle}\n"));
        drop(runtime);
    }

    let text = capture.text();
    for cycle in 0..3 {
        assert!(text.contains(&format!("cycle {cycle}\n")));
    }
    sink().remove_output(&capture, true);
}

#[test]
fn second_runtime_is_rejected() {
    let _lock = LIFECYCLE_LOCK.lock().unwrap();
    let runtime = Runtime::init(quiet_config()).unwrap();
    assert!(Runtime::is_active());
    assert!(matches!(
        Runtime::init(quiet_config()),
        Err(RuntimeError::AlreadyInitialized)
    ));
    drop(runtime);
    assert!(!Runtime::is_active());
}

#[test]
fn invalid_config_leaves_process_stopped() {
    let _lock = LIFECYCLE_LOCK.lock().unwrap();
    let mut config = quiet_config();
    config.router.buffer_capacity = 0;

    assert!(matches!(Runtime::init(config), Err(RuntimeError::Config(_))));
    assert!(!Runtime::is_active());
    assert!(!lifecycle::is_initialized());
}

static SINK_UP_AT_INIT: AtomicBool = AtomicBool::new(false);
static SINK_UP_AT_SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn app_init() {
    SINK_UP_AT_INIT.store(sink().is_threaded(), Ordering::SeqCst);
}

fn app_shutdown() {
    SINK_UP_AT_SHUTDOWN.store(sink().is_threaded(), Ordering::SeqCst);
}

#[test]
fn subsystem_hooks_run_inside_core_hooks() {
    let _lock = LIFECYCLE_LOCK.lock().unwrap();
    lifecycle::register(
        Hook::new("app.subsystem", 100)
            .on_init(app_init)
            .on_shutdown(app_shutdown),
    );

    let runtime = Runtime::init(quiet_config()).unwrap();
    drop(runtime);
    lifecycle::unregister("app.subsystem");

    assert!(SINK_UP_AT_INIT.load(Ordering::SeqCst));
    assert!(SINK_UP_AT_SHUTDOWN.load(Ordering::SeqCst));
}

#[test]
fn tracing_reaches_log_file() {
    let _lock = LIFECYCLE_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tessel.log");

    let mut config = quiet_config();
    config.log.file = Some(path.clone());
    let runtime = Runtime::init(config).unwrap();
    tracing::warn!(frame = 42, "dropped a frame");
    drop(runtime);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("dropped a frame"));
    assert!(text.contains("frame=42"));
}
