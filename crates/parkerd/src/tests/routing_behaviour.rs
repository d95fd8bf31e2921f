//! Behavioural tests for registration and command routing across a running
//! fabric.

use std::cell::RefCell;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mockito::{Matcher, Mock, Server, ServerGuard};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use parker_config::{Config, SocketEndpoint};
use parker_protocol::{
    AckFrame, AckStatus, MasterFrame, Namespace, RejectReason, read_frame, write_frame,
};

use crate::fabric::Fabric;
use crate::health::HealthReporter;
use crate::supervisor::SystemLauncher;
use crate::tests::support::RecordingHealthReporter;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

type StepResult = Result<(), String>;

#[derive(Default)]
struct RoutingWorld {
    fabric: Option<Fabric>,
    service: Option<(ServerGuard, Mock)>,
    plugins: Vec<TcpStream>,
    generation: Option<u64>,
    last_ack: Option<AckFrame>,
    last_reply: Option<Value>,
}

impl RoutingWorld {
    fn fabric(&self) -> Result<&Fabric, String> {
        self.fabric
            .as_ref()
            .ok_or_else(|| "fabric is not running".to_owned())
    }

    fn service_address(&self) -> Result<String, String> {
        self.service
            .as_ref()
            .map(|(server, _)| server.host_with_port())
            .ok_or_else(|| "no weather service".to_owned())
    }

    fn connect(endpoint: &SocketEndpoint) -> Result<TcpStream, String> {
        let SocketEndpoint::Tcp { host, port } = endpoint else {
            return Err(format!("expected a TCP endpoint, found {endpoint}"));
        };
        let stream =
            TcpStream::connect((host.as_str(), *port)).map_err(|error| error.to_string())?;
        stream
            .set_read_timeout(Some(CLIENT_TIMEOUT))
            .map_err(|error| error.to_string())?;
        Ok(stream)
    }

    fn handshake(&mut self, frame: &Value) -> StepResult {
        let mut stream = Self::connect(self.fabric()?.registration_endpoint())?;
        write_frame(&mut stream, frame).map_err(|error| error.to_string())?;
        let MasterFrame::Ack(ack) =
            read_frame::<MasterFrame, _>(&mut stream).map_err(|error| error.to_string())?;
        if ack.status() == AckStatus::Ok {
            self.generation = ack.generation();
            self.plugins.push(stream);
        }
        self.last_ack = Some(ack);
        Ok(())
    }

    fn send(&mut self, command: &str) -> StepResult {
        let mut stream = Self::connect(self.fabric()?.command_endpoint())?;
        let request = json!({"command": command, "payload": {"locationName": "Loughborough"}});
        let mut line = serde_json::to_vec(&request).map_err(|error| error.to_string())?;
        line.push(b'\n');
        stream.write_all(&line).map_err(|error| error.to_string())?;

        let mut reply = String::new();
        BufReader::new(stream)
            .read_line(&mut reply)
            .map_err(|error| error.to_string())?;
        self.last_reply = Some(serde_json::from_str(&reply).map_err(|error| error.to_string())?);
        Ok(())
    }

    fn reply(&self) -> &Value {
        self.last_reply.as_ref().expect("no reply recorded")
    }

    fn ack(&self) -> &AckFrame {
        self.last_ack.as_ref().expect("no acknowledgement recorded")
    }
}

impl Drop for RoutingWorld {
    fn drop(&mut self) {
        self.plugins.clear();
        if let Some(fabric) = self.fabric.take() {
            let _ = fabric.shutdown();
        }
    }
}

fn register_frame(endpoint: &str) -> Value {
    json!({
        "type": "register",
        "namespace": "weather",
        "endpoint": endpoint,
        "actions": ["get"]
    })
}

#[fixture]
fn world() -> RefCell<RoutingWorld> {
    RefCell::new(RoutingWorld::default())
}

#[given("a running plugin fabric")]
fn given_fabric(world: &RefCell<RoutingWorld>) -> StepResult {
    let config = Config {
        registration_socket: SocketEndpoint::tcp("127.0.0.1", 0),
        command_socket: SocketEndpoint::tcp("127.0.0.1", 0),
        forward_timeout_ms: 2_000,
        forward_retry_backoff_ms: 20,
        ..Config::default()
    };
    let reporter = Arc::new(RecordingHealthReporter::default()) as Arc<dyn HealthReporter>;
    let fabric = Fabric::start(&config, Vec::new(), reporter, Arc::new(SystemLauncher))
        .map_err(|error| error.to_string())?;
    world.borrow_mut().fabric = Some(fabric);
    Ok(())
}

#[given("a weather service over HTTP")]
fn given_weather_service(world: &RefCell<RoutingWorld>) {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/weather.get")
        .match_body(Matcher::Json(json!({"locationName": "Loughborough"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"forecast":"light rain","temperature":12}"#)
        .create();
    world.borrow_mut().service = Some((server, mock));
}

#[when("the weather plugin registers")]
fn when_weather_registers(world: &RefCell<RoutingWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let endpoint = world.service_address()?;
    world.handshake(&register_frame(&endpoint))
}

#[when("a second weather plugin registers")]
fn when_second_weather_registers(world: &RefCell<RoutingWorld>) -> StepResult {
    world.borrow_mut().handshake(&register_frame("127.0.0.1:9"))
}

#[when("the weather plugin reclaims its registration")]
fn when_weather_reclaims(world: &RefCell<RoutingWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let endpoint = world.service_address()?;
    let generation = world
        .generation
        .ok_or_else(|| "weather plugin never registered".to_owned())?;
    let mut frame = register_frame(&endpoint);
    frame["generation"] = json!(generation);
    world.handshake(&frame)
}

#[when("a weather plugin registers at an unreachable address")]
fn when_unreachable_registers(world: &RefCell<RoutingWorld>) -> StepResult {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").map_err(|error| error.to_string())?;
        listener.local_addr().map_err(|error| error.to_string())?.port()
    };
    world
        .borrow_mut()
        .handshake(&register_frame(&format!("127.0.0.1:{port}")))
}

#[when("the weather plugin disconnects")]
fn when_weather_disconnects(world: &RefCell<RoutingWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    world.plugins.clear();
    let namespace = Namespace::new("weather").map_err(|error| error.to_string())?;
    let registry = Arc::clone(world.fabric()?.registry());
    let deadline = Instant::now() + CLIENT_TIMEOUT;
    while registry.lookup(&namespace).is_some() {
        if Instant::now() >= deadline {
            return Err("registration outlived its connection".to_owned());
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

#[when("a plugin sends a malformed handshake")]
fn when_malformed_handshake(world: &RefCell<RoutingWorld>) -> StepResult {
    world.borrow_mut().handshake(&json!({"type": "heartbeat"}))
}

#[when("the command \"{command}\" is sent")]
fn when_command_sent(world: &RefCell<RoutingWorld>, command: String) -> StepResult {
    world.borrow_mut().send(&command)
}

#[then("the registration is accepted with generation {generation}")]
fn then_registration_accepted(world: &RefCell<RoutingWorld>, generation: String) {
    let world = world.borrow();
    let expected: u64 = generation.parse().expect("numeric generation");
    assert_eq!(world.ack().status(), AckStatus::Ok);
    assert_eq!(world.ack().generation(), Some(expected));
}

#[then("the handshake is rejected as \"{reason}\"")]
fn then_handshake_rejected(world: &RefCell<RoutingWorld>, reason: String) {
    let world = world.borrow();
    assert_eq!(world.ack().status(), AckStatus::Rejected);
    assert_eq!(world.ack().reason().map(RejectReason::as_str), Some(reason.as_str()));
}

#[then("the reply is a response with status {status}")]
fn then_reply_status(world: &RefCell<RoutingWorld>, status: String) {
    let world = world.borrow();
    let reply = world.reply();
    assert_eq!(reply["kind"], "response", "unexpected reply {reply}");
    let expected: u64 = status.parse().expect("numeric status");
    assert_eq!(reply["status"].as_u64(), Some(expected));
}

#[then("the reply body carries the forecast")]
fn then_reply_body(world: &RefCell<RoutingWorld>) {
    let world = world.borrow();
    assert_eq!(
        world.reply()["body"],
        json!({"forecast": "light rain", "temperature": 12})
    );
    if let Some((_, mock)) = world.service.as_ref() {
        mock.assert();
    }
}

#[then("the reply is an error of kind \"{kind}\"")]
fn then_reply_error(world: &RefCell<RoutingWorld>, kind: String) {
    let world = world.borrow();
    let reply = world.reply();
    assert_eq!(reply["kind"], "error", "unexpected reply {reply}");
    assert_eq!(reply["error"], Value::String(kind));
}

#[then("the status report lists no plugins")]
fn then_status_empty(world: &RefCell<RoutingWorld>) {
    let world = world.borrow();
    let reply = world.reply();
    assert_eq!(reply["kind"], "response", "unexpected reply {reply}");
    assert_eq!(reply["body"]["plugins"], json!([]));
    assert!(
        world
            .fabric()
            .expect("fabric running")
            .registry()
            .snapshot()
            .is_empty()
    );
}

#[scenario(path = "tests/features/plugin_routing.feature")]
fn plugin_routing(#[from(world)] _: RefCell<RoutingWorld>) -> Result<(), String> {
    Ok(())
}
