//! Behavioural tests covering the daemon's singleton lock and lifecycle files.

use std::cell::RefCell;
use std::fs;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;

use crate::fabric::FabricError;
use crate::health::HealthReporter;
use crate::process::{LaunchError, LaunchPlan, ShutdownError, ShutdownSignal, run_daemon_with};
use crate::supervisor::SystemLauncher;
use crate::tests::support::{RecordingHealthReporter, TestConfigLoader};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<ProcessTestWorld> {
    RefCell::new(ProcessTestWorld::new())
}

#[given("a fresh daemon process world")]
fn given_world(world: &RefCell<ProcessTestWorld>) {
    let _ = world;
}

#[when("the daemon starts in the background")]
fn when_daemon_starts(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world.borrow_mut().start_background()?;
    world.borrow().wait_for_ready()
}

#[when("shutdown is triggered")]
fn when_shutdown_triggered(world: &RefCell<ProcessTestWorld>) {
    world.borrow().shutdown.trigger();
}

#[when("the daemon run completes")]
fn when_daemon_completes(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world.borrow_mut().join_background()
}

#[when("stale runtime artefacts exist")]
fn when_stale_runtime(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world.borrow().write_stale_runtime()
}

#[when("a leftover registration socket exists")]
fn when_leftover_socket(world: &RefCell<ProcessTestWorld>) -> StepResult {
    let path = world.borrow().socket_path();
    UnixListener::bind(&path)
        .map(drop)
        .map_err(|error| error.to_string())
}

#[then("starting the daemon fails because the socket is in use")]
fn then_socket_in_use(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    let shutdown = TestShutdownSignal::new();
    shutdown.trigger();
    let error = run_daemon_with(world.plan(shutdown)).expect_err("leftover socket blocks startup");
    match error {
        LaunchError::Fabric {
            source: FabricError::Listener { socket, source },
        } => {
            assert_eq!(socket, "registration");
            assert!(source.is_address_in_use(), "unexpected listener error: {source}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[then("the leftover socket is kept")]
fn then_socket_kept(world: &RefCell<ProcessTestWorld>) {
    let path = world.borrow().socket_path();
    assert!(path.exists(), "{} should be left for the operator", path.display());
}

#[then("the daemon wrote the lock file")]
fn then_lock_file_exists(world: &RefCell<ProcessTestWorld>) {
    assert!(
        world.borrow().lock_path().exists(),
        "lock file should exist whilst daemon is running"
    );
}

#[then("the daemon wrote the pid file")]
fn then_pid_file_exists(world: &RefCell<ProcessTestWorld>) {
    let content = fs::read_to_string(world.borrow().pid_path()).expect("pid file readable");
    let pid: u32 = content.trim().parse().expect("pid file holds an integer");
    assert_eq!(pid, std::process::id());
}

#[then("the daemon wrote the ready health snapshot")]
fn then_health_ready(world: &RefCell<ProcessTestWorld>) {
    let snapshot = world.borrow().read_health().expect("health snapshot parses");
    assert_eq!(snapshot_status(&snapshot), Some("ready"));
    assert_eq!(
        snapshot.get("pid").and_then(Value::as_u64),
        Some(u64::from(std::process::id()))
    );
    assert!(snapshot.get("timestamp").is_some_and(Value::is_u64));
}

#[then("the runtime artefacts are removed")]
fn then_runtime_removed(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    for path in [world.lock_path(), world.pid_path(), world.health_path()] {
        assert!(!path.exists(), "{} should be removed", path.display());
    }
}

#[then("starting the daemon again fails with already running")]
fn then_duplicate_start_fails(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    let shutdown = TestShutdownSignal::new();
    shutdown.trigger();
    let error = run_daemon_with(world.plan(shutdown)).expect_err("second daemon should fail");
    match error {
        LaunchError::AlreadyRunning { pid } => assert_eq!(pid, std::process::id()),
        other => panic!("unexpected error: {other}"),
    }
}

#[then("the daemon run succeeds")]
fn then_daemon_succeeds(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    let result = world.result.as_ref().expect("daemon result recorded");
    assert!(result.is_ok(), "daemon run should succeed: {result:?}");
}

fn snapshot_status(snapshot: &Value) -> Option<&str> {
    snapshot.get("status").and_then(Value::as_str)
}

struct ProcessTestWorld {
    loader: TestConfigLoader,
    reporter: Arc<RecordingHealthReporter>,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
}

impl ProcessTestWorld {
    fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            shutdown: TestShutdownSignal::new(),
            handle: None,
            result: None,
        }
    }

    fn plan(&self, shutdown: TestShutdownSignal) -> LaunchPlan<TestConfigLoader, TestShutdownSignal> {
        LaunchPlan {
            loader: self.loader.clone(),
            reporter: Arc::clone(&self.reporter) as Arc<dyn HealthReporter>,
            launcher: Arc::new(SystemLauncher),
            shutdown,
        }
    }

    fn start_background(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err("daemon already running".to_owned());
        }
        let plan = self.plan(self.shutdown.clone());
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
        Ok(())
    }

    fn wait_for_ready(&self) -> StepResult {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            let ready = self
                .read_health()
                .is_ok_and(|snapshot| snapshot_status(&snapshot) == Some("ready"));
            if ready {
                return Ok(());
            }
            if self.handle.as_ref().is_some_and(thread::JoinHandle::is_finished) {
                return Err("daemon exited before becoming ready".to_owned());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err("daemon did not publish ready health snapshot".to_owned())
    }

    fn join_background(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "daemon not running".to_owned())?;
        let result = handle
            .join()
            .map_err(|_| "daemon thread panicked".to_owned())?;
        self.result = Some(result);
        Ok(())
    }

    fn socket_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("registration.sock")
    }

    fn lock_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("parkerd.lock")
    }

    fn pid_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("parkerd.pid")
    }

    fn health_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("parkerd.health")
    }

    fn read_health(&self) -> Result<Value, String> {
        let content = fs::read_to_string(self.health_path()).map_err(|error| error.to_string())?;
        serde_json::from_str(&content).map_err(|error| error.to_string())
    }

    fn write_stale_runtime(&self) -> StepResult {
        fs::write(self.lock_path(), b"").map_err(|error| error.to_string())?;
        fs::write(self.pid_path(), b"0\n").map_err(|error| error.to_string())
    }
}

impl Drop for ProcessTestWorld {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Clone)]
struct TestShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        *triggered = true;
        cvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        while !*triggered {
            triggered = cvar.wait(triggered).expect("shutdown mutex poisoned");
        }
        Ok(())
    }
}

#[scenario(path = "tests/features/daemon_process.feature")]
fn daemon_process(#[from(world)] _: RefCell<ProcessTestWorld>) -> Result<(), String> {
    Ok(())
}
