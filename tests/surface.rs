use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tandem::{
    parse_command, CommandVerb, LaunchConfig, LifecycleState, RuntimeBuilder, SurfaceError,
    WebApiAddress,
};
use tempfile::TempDir;

#[test]
fn command_lines_parse_into_verbs() {
    assert_eq!(parse_command("status").unwrap(), CommandVerb::Status);
    assert_eq!(parse_command("pause").unwrap(), CommandVerb::Pause);
    assert_eq!(parse_command("resume").unwrap(), CommandVerb::Resume);
    assert_eq!(parse_command("shutdown").unwrap(), CommandVerb::Shutdown);
    assert_eq!(
        parse_command("save_state").unwrap(),
        CommandVerb::SaveState(None)
    );
    assert_eq!(
        parse_command("save_state /tmp/records").unwrap(),
        CommandVerb::SaveState(Some(PathBuf::from("/tmp/records")))
    );
}

#[test]
fn malformed_command_lines_are_rejected() {
    assert_eq!(parse_command("").unwrap_err(), SurfaceError::Empty);
    assert!(matches!(
        parse_command("reboot").unwrap_err(),
        SurfaceError::UnknownCommand(_)
    ));
    assert!(matches!(
        parse_command("pause now").unwrap_err(),
        SurfaceError::UnexpectedArgument { .. }
    ));
    assert!(matches!(
        parse_command("save_state a b").unwrap_err(),
        SurfaceError::UnexpectedArgument { .. }
    ));
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    fn send(&mut self, line: &str) -> Value {
        self.writer.write_all(line.as_bytes()).unwrap();
        self.writer.write_all(b"\n").unwrap();
        self.writer.flush().unwrap();
        let mut response = String::new();
        self.reader.read_line(&mut response).unwrap();
        serde_json::from_str(response.trim()).unwrap()
    }
}

#[test]
fn tcp_round_trip_drives_the_lifecycle() {
    let root = TempDir::new().unwrap();
    let mut config = LaunchConfig::with_states_dir(root.path().join("states"));
    config.web_api_address = Some(WebApiAddress {
        host: "127.0.0.1".to_string(),
        port: 0,
    });
    config.pause_timeout_seconds = 2.0;
    let builder = RuntimeBuilder::new(config).unwrap();
    let orchestrator = builder.build().unwrap();
    let handle = orchestrator.handle();
    let runner = thread::spawn(move || orchestrator.run());

    assert!(handle.wait_for_state(LifecycleState::Running, Duration::from_secs(5)));
    let addr = {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(addr) = handle.control_addr() {
                break addr;
            }
            assert!(Instant::now() < deadline, "control surface never bound");
            thread::sleep(Duration::from_millis(5));
        }
    };

    let mut client = Client::connect(addr);

    let status = client.send("status");
    assert_eq!(status["status"], "active");
    assert!(status["fatal"].is_null());
    assert!(status["threads"]["control-api"]["ready"].as_bool().unwrap());

    let ack = client.send("pause");
    assert_eq!(ack["result"], "ok");
    assert!(handle.wait_for_state(LifecycleState::Paused, Duration::from_secs(5)));

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let status = client.send("status");
        if status["status"] == "paused" {
            break;
        }
        assert!(Instant::now() < deadline, "never reached paused status");
        thread::sleep(Duration::from_millis(10));
    }

    let ack = client.send("resume");
    assert_eq!(ack["result"], "ok");
    assert!(handle.wait_for_state(LifecycleState::Running, Duration::from_secs(5)));

    let bad = client.send("reboot");
    assert!(bad["error"].as_str().unwrap().contains("unknown command"));

    let ack = client.send("shutdown");
    assert_eq!(ack["result"], "ok");
    runner.join().unwrap().unwrap();
    assert_eq!(handle.state(), LifecycleState::Stopped);
}

#[test]
fn save_state_command_writes_a_record() {
    let root = TempDir::new().unwrap();
    let states = root.path().join("states");
    let mut config = LaunchConfig::with_states_dir(&states);
    config.web_api_address = Some(WebApiAddress {
        host: "127.0.0.1".to_string(),
        port: 0,
    });
    let builder = RuntimeBuilder::new(config).unwrap();
    let orchestrator = builder.build().unwrap();
    let handle = orchestrator.handle();
    let runner = thread::spawn(move || orchestrator.run());

    assert!(handle.wait_for_state(LifecycleState::Running, Duration::from_secs(5)));
    let addr = {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(addr) = handle.control_addr() {
                break addr;
            }
            assert!(Instant::now() < deadline, "control surface never bound");
            thread::sleep(Duration::from_millis(5));
        }
    };
    let mut client = Client::connect(addr);

    let override_root = root.path().join("extra");
    let ack = client.send(&format!("save_state {}", override_root.display()));
    assert_eq!(ack["result"], "ok");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let saved = std::fs::read_dir(&override_root)
            .map(|entries| entries.count() > 0)
            .unwrap_or(false);
        if saved {
            break;
        }
        assert!(Instant::now() < deadline, "save_state never materialized");
        thread::sleep(Duration::from_millis(10));
    }

    client.send("shutdown");
    runner.join().unwrap().unwrap();
}
