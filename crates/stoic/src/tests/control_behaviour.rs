//! Behavioural tests covering the control socket start and stop sequence.

use std::cell::RefCell;
use std::io::Read;
use std::os::fd::RawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use stoic_config::{Config, RuntimePaths, SocketPath};

use crate::daemon::{
    self, ControlPlan, DaemonError, DaemonStatus, DaemonizeError, Daemonizer, Detached, HookError,
    LaunchMode, Service, StartOutcome,
};
use crate::log::test_support::RecordedLoggers;
use crate::runner::Runner;
use crate::service::SupervisedService;
use crate::tests::support::{StepResult, shell, wait_for};

type Events = Arc<Mutex<Vec<&'static str>>>;
type DaemonRun = Result<StartOutcome, DaemonError>;

/// Service that only records which hooks ran.
#[derive(Debug, Clone, Default)]
struct RecordingService {
    events: Events,
}

impl RecordingService {
    fn events(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    fn push(&self, event: &'static str) {
        self.events
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(event);
    }
}

impl Service for RecordingService {
    fn setup(&mut self) -> Result<(), HookError> {
        self.push("setup");
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), HookError> {
        self.push("teardown");
        Ok(())
    }
}

/// Daemonizer that records the descriptors it was asked to keep and stays
/// in the invoking process.
#[derive(Debug, Clone, Default)]
struct RecordingDaemonizer {
    calls: Arc<Mutex<Vec<Vec<RawFd>>>>,
}

impl Daemonizer for RecordingDaemonizer {
    fn daemonize(&self, keep_fds: &[RawFd]) -> Result<Detached, DaemonizeError> {
        self.calls
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(keep_fds.to_vec());
        Ok(Detached::Parent)
    }
}

struct ControlWorld {
    _temp_dir: TempDir,
    paths: RuntimePaths,
    service: RecordingService,
    second_service: RecordingService,
    daemonizer: RecordingDaemonizer,
    loggers: RecordedLoggers,
    supervised: Option<SupervisedService>,
    daemon: Option<JoinHandle<DaemonRun>>,
    outcome: Option<DaemonRun>,
    second_outcome: Option<DaemonRun>,
    stop_result: Option<Result<(), DaemonError>>,
    stop_took: Option<Duration>,
    silent_client: Option<UnixStream>,
}

impl ControlWorld {
    fn new() -> Self {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        let socket = match Utf8PathBuf::from_path_buf(temp_dir.path().join("svc.sock")) {
            Ok(path) => path,
            Err(path) => panic!("temporary path is not UTF-8: {}", path.display()),
        };
        let mut config = Config::named("svc");
        config.socket = SocketPath::new(socket);
        let paths = match RuntimePaths::from_config(&config) {
            Ok(paths) => paths,
            Err(error) => panic!("runtime paths should resolve: {error}"),
        };
        Self {
            _temp_dir: temp_dir,
            paths,
            service: RecordingService::default(),
            second_service: RecordingService::default(),
            daemonizer: RecordingDaemonizer::default(),
            loggers: RecordedLoggers::default(),
            supervised: None,
            daemon: None,
            outcome: None,
            second_outcome: None,
            stop_result: None,
            stop_took: None,
            silent_client: None,
        }
    }

    fn plan(&self, mode: LaunchMode, preserved_fds: Vec<RawFd>) -> ControlPlan<RecordingDaemonizer> {
        ControlPlan {
            paths: self.paths.clone(),
            mode,
            daemonizer: self.daemonizer.clone(),
            preserved_fds,
        }
    }

    fn spawn_daemon<S>(&mut self, mut service: S)
    where
        S: Service + Send + 'static,
    {
        let plan = self.plan(LaunchMode::Foreground, Vec::new());
        self.daemon = Some(thread::spawn(move || daemon::start(plan, &mut service)));
    }

    fn wait_until_running(&self) -> StepResult {
        let Some(handle) = self.daemon.as_ref() else {
            return Err("daemon thread was not started".to_owned());
        };
        wait_for("the control socket to accept", || {
            handle.is_finished()
                || matches!(
                    daemon::status(self.paths.socket_path()),
                    Ok(DaemonStatus::Running)
                )
        })?;
        if handle.is_finished() {
            return Err("daemon exited before accepting connections".to_owned());
        }
        Ok(())
    }

    fn join_daemon(&mut self) -> StepResult {
        let handle = self
            .daemon
            .take()
            .ok_or_else(|| "daemon thread was not started".to_owned())?;
        let outcome = handle
            .join()
            .map_err(|_| "daemon thread panicked".to_owned())?;
        self.outcome = Some(outcome);
        Ok(())
    }
}

impl Drop for ControlWorld {
    fn drop(&mut self) {
        if let Some(handle) = self.daemon.take() {
            let _ = daemon::stop(self.paths.socket_path());
            let _ = handle.join();
        }
    }
}

#[fixture]
fn world() -> RefCell<ControlWorld> {
    RefCell::new(ControlWorld::new())
}

#[given("no control socket")]
fn given_no_socket(world: &RefCell<ControlWorld>) {
    assert!(!world.borrow().paths.socket_path().exists());
}

#[given("a stale control socket")]
fn given_stale_socket(world: &RefCell<ControlWorld>) -> StepResult {
    let world = world.borrow();
    let listener = UnixListener::bind(world.paths.socket_path())
        .map_err(|error| format!("failed to bind stale socket: {error}"))?;
    drop(listener);
    if world.paths.socket_path().exists() {
        Ok(())
    } else {
        Err("stale socket file should remain after the listener closes".to_owned())
    }
}

#[given("a supervised child that sleeps for {seconds} seconds")]
fn given_supervised_child(world: &RefCell<ControlWorld>, seconds: u64) {
    let mut world = world.borrow_mut();
    let runner = Runner::new(
        shell(&format!("exec sleep {seconds}"), &[]),
        world.loggers.bundle(),
        Duration::from_secs(1),
    );
    let socket = world.paths.socket_path().to_path_buf();
    world.supervised = Some(SupervisedService::new(runner, socket).with_signal_forwarding(false));
}

#[when("the daemon starts in the foreground")]
fn when_daemon_starts_foreground(world: &RefCell<ControlWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let supervised = world.supervised.take();
    match supervised {
        Some(service) => world.spawn_daemon(service),
        None => {
            let service = world.service.clone();
            world.spawn_daemon(service);
        }
    }
    world.wait_until_running()
}

#[when("a second instance starts in the foreground")]
fn when_second_instance_starts(world: &RefCell<ControlWorld>) {
    let mut world = world.borrow_mut();
    let plan = world.plan(LaunchMode::Foreground, Vec::new());
    let mut service = world.second_service.clone();
    world.second_outcome = Some(daemon::start(plan, &mut service));
}

#[when("the daemon starts in the background keeping descriptor {fd}")]
fn when_daemon_starts_background(world: &RefCell<ControlWorld>, fd: RawFd) {
    let mut world = world.borrow_mut();
    let plan = world.plan(LaunchMode::Background, vec![fd]);
    let mut service = world.service.clone();
    world.outcome = Some(daemon::start(plan, &mut service));
}

#[when("the supervised child has started")]
fn when_supervised_child_started(world: &RefCell<ControlWorld>) -> StepResult {
    let world = world.borrow();
    wait_for("the supervised child to spawn", || {
        world.loggers.process.count_containing("starting") >= 1
    })
}

#[when("the daemon is stopped")]
fn when_daemon_stopped(world: &RefCell<ControlWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let started = Instant::now();
    daemon::stop(world.paths.socket_path()).map_err(|error| error.to_string())?;
    world.stop_took = Some(started.elapsed());
    world.join_daemon()
}

#[when("a client connects and stays silent")]
fn when_silent_client(world: &RefCell<ControlWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let stream = UnixStream::connect(world.paths.socket_path())
        .map_err(|error| format!("silent client failed to connect: {error}"))?;
    world.silent_client = Some(stream);
    Ok(())
}

#[when("stopping the daemon is attempted")]
fn when_stop_attempted(world: &RefCell<ControlWorld>) {
    let mut world = world.borrow_mut();
    world.stop_result = Some(daemon::stop(world.paths.socket_path()));
}

#[then("the daemon run stopped cleanly")]
fn then_stopped_cleanly(world: &RefCell<ControlWorld>) {
    match world.borrow().outcome.as_ref() {
        Some(Ok(StartOutcome::Stopped)) => {}
        other => panic!("unexpected daemon outcome: {other:?}"),
    }
}

#[then("stopping took less than {seconds} seconds")]
fn then_stop_bounded(world: &RefCell<ControlWorld>, seconds: u64) {
    let took = world
        .borrow()
        .stop_took
        .expect("stop should have been timed");
    assert!(took < Duration::from_secs(seconds), "stop took {took:?}");
}

#[then("the silent client was disconnected")]
fn then_silent_disconnected(world: &RefCell<ControlWorld>) {
    let mut world = world.borrow_mut();
    let stream = world
        .silent_client
        .as_mut()
        .expect("a silent client should be connected");
    stream
        .set_read_timeout(Some(Duration::from_secs(1)))
        .expect("set read timeout");
    let mut byte = [0_u8; 1];
    assert_eq!(
        stream.read(&mut byte).expect("closed connection reads end-of-stream"),
        0
    );
}

#[then("the control socket is removed")]
fn then_socket_removed(world: &RefCell<ControlWorld>) {
    assert!(
        !world.borrow().paths.socket_path().exists(),
        "socket file should be removed after shutdown"
    );
}

#[then("the startup lock is removed")]
fn then_lock_removed(world: &RefCell<ControlWorld>) {
    assert!(
        !world.borrow().paths.lock_path().exists(),
        "startup lock should be removed once the socket is bound"
    );
}

#[then("the service saw setup then teardown")]
fn then_service_hooks_ran(world: &RefCell<ControlWorld>) {
    assert_eq!(world.borrow().service.events(), vec!["setup", "teardown"]);
}

#[then("the second instance failed because the daemon is already running")]
fn then_second_refused(world: &RefCell<ControlWorld>) {
    let world = world.borrow();
    match world.second_outcome.as_ref() {
        Some(Err(DaemonError::AlreadyRunning { socket })) => {
            assert_eq!(socket, world.paths.socket_path());
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
}

#[then("the second service was never set up")]
fn then_second_untouched(world: &RefCell<ControlWorld>) {
    assert!(world.borrow().second_service.events().is_empty());
}

#[then("stopping failed because nothing is running")]
fn then_stop_not_running(world: &RefCell<ControlWorld>) {
    match world.borrow().stop_result.as_ref() {
        Some(Err(DaemonError::NotRunning { .. })) => {}
        other => panic!("expected NotRunning, got {other:?}"),
    }
}

#[then("the start outcome is detached")]
fn then_detached(world: &RefCell<ControlWorld>) {
    match world.borrow().outcome.as_ref() {
        Some(Ok(StartOutcome::Detached)) => {}
        other => panic!("unexpected start outcome: {other:?}"),
    }
}

#[then("the daemonizer kept descriptor {fd} and the listener")]
fn then_descriptors_kept(world: &RefCell<ControlWorld>, fd: RawFd) {
    let world = world.borrow();
    let calls = world
        .daemonizer
        .calls
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .clone();
    assert_eq!(calls.len(), 1, "daemonize should run exactly once");
    let kept = &calls[0];
    assert_eq!(kept.len(), 2, "expected the extra fd plus the listener: {kept:?}");
    assert_eq!(kept[0], fd);
    assert_ne!(kept[1], fd);
}

#[then("the service was never set up")]
fn then_service_untouched(world: &RefCell<ControlWorld>) {
    assert!(world.borrow().service.events().is_empty());
}

#[then("the supervised child was spawned once")]
fn then_spawned_once(world: &RefCell<ControlWorld>) {
    assert_eq!(
        world.borrow().loggers.process.count_containing("starting"),
        1
    );
}

#[then("the supervised child was stopped by signal 15")]
fn then_supervised_sigterm(world: &RefCell<ControlWorld>) {
    let world = world.borrow();
    assert_eq!(
        world.loggers.process.count_containing("signal 15"),
        1,
        "unexpected lifecycle log: {:?}",
        world.loggers.process.messages()
    );
}

#[scenario(
    path = "tests/features/control_socket.feature",
    name = "A stale socket is replaced and stop tears the service down"
)]
fn stale_socket_replaced(world: RefCell<ControlWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/control_socket.feature",
    name = "A second instance is refused while the first is live"
)]
fn second_instance_refused(world: RefCell<ControlWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/control_socket.feature",
    name = "Stopping without a daemon reports not running"
)]
fn stop_without_daemon(world: RefCell<ControlWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/control_socket.feature",
    name = "Background start detaches the invoking process"
)]
fn background_start_detaches(world: RefCell<ControlWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/control_socket.feature",
    name = "A silent client cannot wedge the accept loop"
)]
fn silent_client_times_out(world: RefCell<ControlWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/control_socket.feature",
    name = "Stop terminates the supervised child"
)]
fn stop_terminates_child(world: RefCell<ControlWorld>) {
    drop(world);
}
