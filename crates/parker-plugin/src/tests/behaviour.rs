//! Behavioural tests for the registration client.

use std::cell::RefCell;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parker_protocol::{AckFrame, MasterFrame, Namespace, PluginFrame, RejectReason, read_frame, write_frame};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::{ClientError, ClientSettings, Phase, RegistrationHandle, RegistrationSocket, spawn};

const WAIT: Duration = Duration::from_secs(5);

type StepResult = Result<(), String>;

#[derive(Default)]
struct ClientWorld {
    socket: Option<RegistrationSocket>,
    heartbeats: Arc<AtomicUsize>,
    master: Option<thread::JoinHandle<()>>,
    handle: Option<RegistrationHandle>,
    outcome: Option<Result<(), ClientError>>,
}

impl ClientWorld {
    fn start_master(&mut self, ack: AckFrame) -> StepResult {
        let listener = TcpListener::bind("127.0.0.1:0").map_err(|error| error.to_string())?;
        let port = listener
            .local_addr()
            .map_err(|error| error.to_string())?
            .port();
        self.socket = Some(RegistrationSocket::Tcp {
            host: "127.0.0.1".to_owned(),
            port,
        });
        let heartbeats = Arc::clone(&self.heartbeats);
        self.master = Some(thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            if stream.set_read_timeout(Some(WAIT)).is_err() {
                return;
            }
            if !matches!(read_frame::<PluginFrame, _>(&mut stream), Ok(PluginFrame::Register(_))) {
                return;
            }
            if write_frame(&mut stream, &MasterFrame::Ack(ack)).is_err() {
                return;
            }
            while let Ok(PluginFrame::Heartbeat) = read_frame::<PluginFrame, _>(&mut stream) {
                heartbeats.fetch_add(1, Ordering::SeqCst);
            }
        }));
        Ok(())
    }

    fn handle(&self) -> &RegistrationHandle {
        self.handle.as_ref().expect("client not started")
    }
}

impl Drop for ClientWorld {
    fn drop(&mut self) {
        drop(self.handle.take());
        if let Some(master) = self.master.take() {
            let _ = master.join();
        }
    }
}

#[fixture]
fn world() -> RefCell<ClientWorld> {
    RefCell::new(ClientWorld::default())
}

#[given("a master that accepts registrations")]
fn given_accepting_master(world: &RefCell<ClientWorld>) -> StepResult {
    world
        .borrow_mut()
        .start_master(AckFrame::accepted(7, Duration::from_millis(90)))
}

#[given("a master that refuses registrations")]
fn given_refusing_master(world: &RefCell<ClientWorld>) -> StepResult {
    world
        .borrow_mut()
        .start_master(AckFrame::rejected(RejectReason::NamespaceConflict))
}

#[when("the weather client starts")]
fn when_client_starts(world: &RefCell<ClientWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let socket = world
        .socket
        .clone()
        .ok_or_else(|| "no master running".to_owned())?;
    let namespace = Namespace::new("weather").map_err(|error| error.to_string())?;
    let settings = ClientSettings::new(socket, namespace, "127.0.0.1:8080").with_actions(["get"]);
    world.handle = Some(spawn(settings).map_err(|error| error.to_string())?);
    Ok(())
}

#[when("the client is stopped")]
fn when_client_stopped(world: &RefCell<ClientWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let handle = world
        .handle
        .take()
        .ok_or_else(|| "client not started".to_owned())?;
    world.outcome = Some(handle.stop());
    Ok(())
}

#[then("the client reaches the heartbeat loop with generation {generation}")]
fn then_heartbeat_loop(world: &RefCell<ClientWorld>, generation: String) {
    let world = world.borrow();
    assert!(world.handle().wait_for_phase(Phase::HeartbeatLoop, WAIT));
    let expected: u64 = generation.parse().expect("numeric generation");
    assert_eq!(world.handle().generation(), Some(expected));
}

#[then("the master receives heartbeats")]
fn then_master_receives_heartbeats(world: &RefCell<ClientWorld>) {
    let heartbeats = Arc::clone(&world.borrow().heartbeats);
    let deadline = Instant::now() + WAIT;
    while heartbeats.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(heartbeats.load(Ordering::SeqCst) >= 2);
}

#[then("the client closed cleanly")]
fn then_closed_cleanly(world: &RefCell<ClientWorld>) {
    let world = world.borrow();
    let outcome = world.outcome.as_ref().expect("client stopped");
    assert!(outcome.is_ok(), "{outcome:?}");
}

#[then("the client closes with a \"{reason}\" rejection")]
fn then_rejected(world: &RefCell<ClientWorld>, reason: String) {
    let mut world = world.borrow_mut();
    let handle = world.handle.take().expect("client not started");
    match handle.join() {
        Err(ClientError::Rejected { reason: actual }) => assert_eq!(actual.as_str(), reason),
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[then("the master received no heartbeats")]
fn then_no_heartbeats(world: &RefCell<ClientWorld>) {
    let mut world = world.borrow_mut();
    if let Some(master) = world.master.take() {
        master.join().expect("master thread panicked");
    }
    assert_eq!(world.heartbeats.load(Ordering::SeqCst), 0);
}

#[scenario(path = "tests/features/registration_client.feature")]
fn registration_client(#[from(world)] _: RefCell<ClientWorld>) -> Result<(), String> {
    Ok(())
}
