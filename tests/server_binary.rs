//! Integration tests for the jataka-log server binary lifecycle.
//!
//! These tests start the real `jataka-log` binary on an ephemeral port with a
//! tempdir-backed `JATAKA_DATA`, drive it over raw HTTP/1.1, deliver a
//! termination signal, and check the exit status and the rewritten log.
#![cfg(unix)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use jataka_log::{EventRecord, Store};
use serde_json::json;

/// How long the binary may take to start serving or to exit after a signal.
const DEADLINE: Duration = Duration::from_secs(10);

/// Handle to a running server process. Kills the process if dropped while alive.
struct ServerProcess {
    child: Child,
    addr: SocketAddr,
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl ServerProcess {
    /// Deliver `signal` (e.g. `"-INT"`) to the process.
    fn signal(&self, signal: &str) {
        let status = Command::new("kill")
            .arg(signal)
            .arg(self.child.id().to_string())
            .status()
            .expect("failed to run kill");
        assert!(status.success(), "kill {signal} failed");
    }

    /// Wait for the process to exit, panicking if it outlives `DEADLINE`.
    fn wait_for_exit(&mut self) -> ExitStatus {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait().expect("try_wait should succeed") {
                return status;
            }
            assert!(
                start.elapsed() < DEADLINE,
                "server still running {DEADLINE:?} after signal"
            );
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

/// Reserve an ephemeral loopback port by binding and immediately releasing it.
fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    listener.local_addr().expect("should have local addr")
}

/// Start the binary against `data_path` and wait until `GET /health` answers.
fn start_server(data_path: &Path, shutdown_timeout_ms: u64) -> ServerProcess {
    let addr = free_addr();
    let child = Command::new(env!("CARGO_BIN_EXE_jataka-log"))
        .env("JATAKA_DATA", data_path.as_os_str())
        .env("JATAKA_LISTEN", addr.to_string())
        .env("JATAKA_SHUTDOWN_TIMEOUT_MS", shutdown_timeout_ms.to_string())
        .env_remove("JATAKA_METRICS_LISTEN")
        .env_remove("JATAKA_WRITER_CAPACITY")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn jataka-log");
    let server = ServerProcess { child, addr };

    let start = Instant::now();
    loop {
        if let Ok((200, _)) = try_request(addr, "GET", "/health", "") {
            return server;
        }
        assert!(start.elapsed() < DEADLINE, "server did not start serving");
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Send one HTTP/1.1 request and return the status code and full response text.
fn try_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: &str,
) -> std::io::Result<(u16, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(DEADLINE))?;
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes())?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    Ok((status, response))
}

fn post_log(addr: SocketAddr, body: &str) {
    let (status, response) = try_request(addr, "POST", "/log", body).expect("request failed");
    assert_eq!(status, 200, "unexpected response: {response}");
    assert!(response.contains("Data received!"), "got: {response}");
}

fn event(job_id: &str, time: &str) -> EventRecord {
    EventRecord::try_from(json!({"job_id": job_id, "time": time})).expect("valid event")
}

#[test]
fn sigint_flushes_and_exits_zero() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let data_path = dir.path().join("_data").join("all_data.jsonl");

    let mut server = start_server(&data_path, 5000);
    post_log(server.addr, r#"{"job_id":"J1","time":"t0"}"#);
    post_log(server.addr, r#"{"job_id":"J2","time":"t1"}"#);
    post_log(server.addr, r#"{"job_id":"J1","time":"t2"}"#);

    server.signal("-INT");
    let status = server.wait_for_exit();
    assert!(status.success(), "expected exit 0, got {status:?}");

    let reopened = Store::open(&data_path).expect("rewritten log should open");
    assert_eq!(reopened.job_ids(), vec!["J1", "J2"]);
    assert_eq!(
        reopened.records_for("J1"),
        vec![event("J1", "t0"), event("J1", "t2")]
    );
    assert_eq!(reopened.records_for("J2"), vec![event("J2", "t1")]);
}

#[test]
fn sigterm_flushes_and_exits_zero() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let data_path = dir.path().join("all_data.jsonl");

    let mut server = start_server(&data_path, 5000);
    post_log(server.addr, r#"{"job_id":"A","time":1,"loss":0.25}"#);

    server.signal("-TERM");
    let status = server.wait_for_exit();
    assert!(status.success(), "expected exit 0, got {status:?}");

    let reopened = Store::open(&data_path).expect("rewritten log should open");
    assert_eq!(reopened.record_count(), 1);
    assert_eq!(
        reopened.records_for("A")[0].field("loss"),
        Some(&json!(0.25))
    );
}

#[test]
fn stalled_connection_does_not_block_shutdown() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let data_path = dir.path().join("all_data.jsonl");

    let mut server = start_server(&data_path, 300);
    post_log(server.addr, r#"{"job_id":"J1","time":"t0"}"#);

    // A client that sends half a request head and then goes quiet.
    let mut stalled = TcpStream::connect(server.addr).expect("connect should succeed");
    stalled
        .write_all(b"POST /log HTTP/1.1\r\nHost: x\r\n")
        .expect("partial write should succeed");
    std::thread::sleep(Duration::from_millis(100));

    server.signal("-INT");
    let status = server.wait_for_exit();
    assert!(status.success(), "expected exit 0, got {status:?}");
    drop(stalled);

    let reopened = Store::open(&data_path).expect("rewritten log should open");
    assert_eq!(reopened.job_ids(), vec!["J1"]);
    assert_eq!(reopened.records_for("J1"), vec![event("J1", "t0")]);
}

#[test]
fn invalid_config_exits_nonzero() {
    let output = Command::new(env!("CARGO_BIN_EXE_jataka-log"))
        .env("JATAKA_WRITER_CAPACITY", "0")
        .output()
        .expect("failed to run jataka-log");

    assert!(!output.status.success(), "expected non-zero exit");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("JATAKA_WRITER_CAPACITY"),
        "stderr should mention JATAKA_WRITER_CAPACITY, got: {stderr}"
    );
}
