//! JSON control channel.
//!
//! Line-delimited JSON over TCP on port 5742, used by companion tooling to
//! switch output modes, push HDR metadata and request simple patterns
//! without speaking a calibration protocol. One client at a time; the
//! listener stays open across client sessions.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use pattern_core::{HdrMetadata, PatternCommand, PatternState};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::join_with_timeout;

pub const CONTROL_PORT: u16 = 5742;
pub const PROTOCOL_VERSION: &str = "1.0";

const ACCEPT_POLL: Duration = Duration::from_millis(200);
const READ_POLL: Duration = Duration::from_millis(500);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control bind on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
}

/// Side effects the channel raises beyond the shared pattern state. All
/// methods default to no-ops so implementors pick what they care about.
pub trait ControlObserver: Send + Sync {
    fn mode_changed(&self, hdr: bool, bit_depth: u8) {
        let _ = (hdr, bit_depth);
    }
    fn hdr_metadata(&self, metadata: HdrMetadata) {
        let _ = metadata;
    }
    fn status(&self, message: &str) {
        let _ = message;
    }
}

/// No-op observer for callers that only want the pattern state driven.
pub struct NullObserver;

impl ControlObserver for NullObserver {}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub port: u16,
    /// Device name reported in the hello event.
    pub device_name: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: CONTROL_PORT,
            device_name: "cal-agent".to_string(),
        }
    }
}

pub struct ControlHandle {
    running: Arc<AtomicBool>,
    client: Arc<Mutex<Option<TcpStream>>>,
    port: u16,
    thread: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.client.lock().unwrap().is_some()
    }

    /// Push an unsolicited event to the connected client, if any.
    pub fn send_event(&self, event: &str, fields: Value) {
        let mut message = json!({ "event": event });
        if let (Some(obj), Some(extra)) = (message.as_object_mut(), fields.as_object()) {
            for (key, value) in extra {
                obj.insert(key.clone(), value.clone());
            }
        }
        let mut guard = self.client.lock().unwrap();
        if let Some(stream) = guard.as_mut() {
            if write_line(stream, &message).is_err() {
                guard.take();
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(client) = self.client.lock().unwrap().take() {
            let _ = client.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.thread.take() {
            join_with_timeout(handle, "control", JOIN_TIMEOUT);
        }
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bind the control port and serve clients on a background thread.
pub fn spawn_control_server(
    config: ControlConfig,
    state: Arc<PatternState>,
    observer: Arc<dyn ControlObserver>,
) -> Result<ControlHandle, ControlError> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).map_err(|source| {
        ControlError::Bind {
            port: config.port,
            source,
        }
    })?;
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(config.port);

    let running = Arc::new(AtomicBool::new(true));
    let client = Arc::new(Mutex::new(None));

    let thread = {
        let running = Arc::clone(&running);
        let client = Arc::clone(&client);
        std::thread::spawn(move || serve(config, listener, state, observer, client, running))
    };

    Ok(ControlHandle {
        running,
        client,
        port,
        thread: Some(thread),
    })
}

fn serve(
    config: ControlConfig,
    listener: TcpListener,
    state: Arc<PatternState>,
    observer: Arc<dyn ControlObserver>,
    client_slot: Arc<Mutex<Option<TcpStream>>>,
    running: Arc<AtomicBool>,
) {
    listener.set_nonblocking(true).ok();
    info!("control channel listening on port {}", config.port);

    while running.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok((stream, peer)) => {
                info!("control client connected from {peer}");
                stream
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("control accept: {e}");
                }
                break;
            }
        };

        stream.set_nonblocking(false).ok();
        stream.set_read_timeout(Some(READ_POLL)).ok();
        *client_slot.lock().unwrap() = stream.try_clone().ok();

        handle_client(stream, &config, &state, &observer, &client_slot, &running);

        client_slot.lock().unwrap().take();
        info!("control client disconnected");
    }

    info!("control channel stopped");
}

fn handle_client(
    stream: TcpStream,
    config: &ControlConfig,
    state: &PatternState,
    observer: &Arc<dyn ControlObserver>,
    writer: &Arc<Mutex<Option<TcpStream>>>,
    running: &Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stream);

    let (bit_depth, hdr) = state.mode();
    let hello = json!({
        "event": "hello",
        "version": PROTOCOL_VERSION,
        "device": config.device_name,
        "hdr": hdr,
        "bitDepth": bit_depth,
    });
    if write_shared(writer, &hello).is_err() {
        return;
    }

    let mut line = String::new();
    while running.load(Ordering::SeqCst) {
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // A timeout can land mid-request; whatever arrived so far is
                // already in `line` and the next read appends the rest.
                continue;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("control client read: {e}");
                }
                break;
            }
        }

        let request = std::mem::take(&mut line);
        let trimmed = request.trim();
        if trimmed.is_empty() {
            continue;
        }
        debug!("control request: {trimmed}");

        let (response, disconnect) = process_line(trimmed, state, observer, running);
        if write_shared(writer, &response).is_err() {
            break;
        }
        if disconnect {
            break;
        }
    }
}

/// Responses and unsolicited events share one writer behind the mutex; the
/// lock is held for a whole line so the two never interleave on the wire.
fn write_shared(writer: &Mutex<Option<TcpStream>>, message: &Value) -> std::io::Result<()> {
    let mut guard = writer.lock().unwrap();
    match guard.as_mut() {
        Some(stream) => write_line(stream, message),
        None => Err(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no control client",
        )),
    }
}

fn write_line(stream: &mut TcpStream, message: &Value) -> std::io::Result<()> {
    stream.write_all(message.to_string().as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()
}

fn ok(fields: Value) -> Value {
    let mut message = json!({ "status": "ok" });
    if let (Some(obj), Some(extra)) = (message.as_object_mut(), fields.as_object()) {
        for (key, value) in extra {
            obj.insert(key.clone(), value.clone());
        }
    }
    message
}

fn err(message: impl std::fmt::Display) -> Value {
    json!({ "status": "error", "message": message.to_string() })
}

fn mode_string(bit_depth: u8, hdr: bool) -> String {
    if hdr {
        format!("{bit_depth}_hdr")
    } else {
        format!("{bit_depth}")
    }
}

/// Handle one request line. Returns the response plus whether the server
/// should shut down afterwards.
pub fn process_line(
    line: &str,
    state: &PatternState,
    observer: &Arc<dyn ControlObserver>,
    running: &Arc<AtomicBool>,
) -> (Value, bool) {
    let request: Value = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return (err(format!("Parse error: {e}")), false),
    };

    let cmd = match request.get("cmd").and_then(Value::as_str) {
        Some(cmd) => cmd,
        None => return (err("Missing 'cmd' field"), false),
    };

    match cmd {
        "ping" => (ok(json!({ "pong": true })), false),
        "get_status" => {
            let (bit_depth, hdr) = state.mode();
            let metadata = state.hdr_metadata();
            (
                ok(json!({
                    "hdr": hdr,
                    "bitDepth": bit_depth,
                    "maxCLL": metadata.max_cll,
                    "maxFALL": metadata.max_fall,
                    "maxDML": metadata.max_dml,
                    "mode": mode_string(bit_depth, hdr),
                })),
                false,
            )
        }
        "set_mode" => {
            let (current_depth, current_hdr) = state.mode();
            let hdr = request
                .get("hdr")
                .and_then(Value::as_bool)
                .unwrap_or(current_hdr);
            let bit_depth = request
                .get("bitDepth")
                .and_then(Value::as_u64)
                .map(|v| v as u8)
                .unwrap_or(current_depth);

            state.set_mode(bit_depth, hdr);
            observer.mode_changed(hdr, bit_depth);
            observer.status(&format!(
                "Mode: {bit_depth}-bit {}",
                if hdr { "HDR" } else { "SDR" }
            ));
            (ok(json!({ "hdr": hdr, "bitDepth": bit_depth })), false)
        }
        "set_hdr_metadata" => {
            let field = |name: &str| {
                request
                    .get(name)
                    .and_then(Value::as_i64)
                    .map(|v| v as i32)
                    .unwrap_or(-1)
            };
            let metadata = HdrMetadata {
                max_cll: field("maxCLL"),
                max_fall: field("maxFALL"),
                max_dml: field("maxDML"),
            };
            state.set_hdr_metadata(metadata);
            observer.hdr_metadata(metadata);
            (ok(json!({})), false)
        }
        "pattern_fullfield" => {
            let code = |name: &str| {
                request
                    .get(name)
                    .and_then(Value::as_i64)
                    .map(|v| v as i32)
                    .unwrap_or(0)
            };
            state.set_commands(vec![PatternCommand::full_field_from_code(
                code("r"),
                code("g"),
                code("b"),
                state.max_value(),
            )]);
            (ok(json!({})), false)
        }
        "pattern_window" => {
            let max = state.max_value();
            let code = |name: &str, default: i64| {
                request.get(name).and_then(Value::as_i64).unwrap_or(default) as i32
            };
            let percent = request
                .get("windowPercent")
                .and_then(Value::as_f64)
                .unwrap_or(10.0) as f32;

            state.set_commands(vec![
                PatternCommand::full_field_from_code(
                    code("bgR", 0),
                    code("bgG", 0),
                    code("bgB", 0),
                    max,
                ),
                PatternCommand::window_from_code(
                    percent,
                    code("r", 255),
                    code("g", 255),
                    code("b", 255),
                    max,
                ),
            ]);
            (ok(json!({})), false)
        }
        "pattern_black" => {
            state.set_commands(vec![PatternCommand::full_field_from_code(
                0,
                0,
                0,
                state.max_value(),
            )]);
            (ok(json!({})), false)
        }
        "pattern_white" => {
            let max = state.max_value();
            state.set_commands(vec![PatternCommand::full_field_from_code(
                max as i32, max as i32, max as i32, max,
            )]);
            (ok(json!({})), false)
        }
        "pattern_clear" => {
            state.set_commands(Vec::new());
            (ok(json!({})), false)
        }
        "disconnect" => {
            running.store(false, Ordering::SeqCst);
            (ok(json!({})), true)
        }
        other => (err(format!("Unknown command: {other}")), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn setup() -> (Arc<PatternState>, Arc<dyn ControlObserver>, Arc<AtomicBool>) {
        (
            Arc::new(PatternState::new()),
            Arc::new(NullObserver),
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[test]
    fn test_ping() {
        let (state, observer, running) = setup();
        let (response, stop) = process_line(r#"{"cmd":"ping"}"#, &state, &observer, &running);
        assert_eq!(response["status"], "ok");
        assert_eq!(response["pong"], true);
        assert!(!stop);
    }

    #[test]
    fn test_parse_error_keeps_connection() {
        let (state, observer, running) = setup();
        let (response, stop) = process_line("not json", &state, &observer, &running);
        assert_eq!(response["status"], "error");
        assert!(response["message"]
            .as_str()
            .unwrap()
            .starts_with("Parse error"));
        assert!(!stop);
    }

    #[test]
    fn test_missing_cmd() {
        let (state, observer, running) = setup();
        let (response, _) = process_line(r#"{"foo":1}"#, &state, &observer, &running);
        assert_eq!(response["message"], "Missing 'cmd' field");
    }

    #[test]
    fn test_unknown_command() {
        let (state, observer, running) = setup();
        let (response, _) = process_line(r#"{"cmd":"reboot"}"#, &state, &observer, &running);
        assert_eq!(response["message"], "Unknown command: reboot");
    }

    #[test]
    fn test_set_mode_defaults_to_current() {
        let (state, observer, running) = setup();
        state.set_mode(10, true);
        state.take_mode_change();

        let (response, _) =
            process_line(r#"{"cmd":"set_mode","hdr":false}"#, &state, &observer, &running);
        assert_eq!(response["status"], "ok");
        assert_eq!(response["bitDepth"], 10);
        assert_eq!(response["hdr"], false);
        assert_eq!(state.mode(), (10, false));
        assert!(state.take_mode_change().is_some());
    }

    #[test]
    fn test_set_mode_notifies_observer() {
        struct Recorder {
            calls: AtomicI32,
        }
        impl ControlObserver for Recorder {
            fn mode_changed(&self, hdr: bool, bit_depth: u8) {
                assert!(hdr);
                assert_eq!(bit_depth, 10);
                self.calls.fetch_add(1, Ordering::SeqCst);
            }
        }

        let state = Arc::new(PatternState::new());
        let recorder = Arc::new(Recorder {
            calls: AtomicI32::new(0),
        });
        let observer: Arc<dyn ControlObserver> = recorder.clone();
        let running = Arc::new(AtomicBool::new(true));

        process_line(
            r#"{"cmd":"set_mode","hdr":true,"bitDepth":10}"#,
            &state,
            &observer,
            &running,
        );
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_status_mode_string() {
        let (state, observer, running) = setup();
        state.set_mode(10, true);
        let (response, _) = process_line(r#"{"cmd":"get_status"}"#, &state, &observer, &running);
        assert_eq!(response["mode"], "10_hdr");
        assert_eq!(response["maxCLL"], -1);
    }

    #[test]
    fn test_set_hdr_metadata_defaults() {
        let (state, observer, running) = setup();
        let (response, _) = process_line(
            r#"{"cmd":"set_hdr_metadata","maxCLL":1000}"#,
            &state,
            &observer,
            &running,
        );
        assert_eq!(response["status"], "ok");
        let metadata = state.hdr_metadata();
        assert_eq!(metadata.max_cll, 1000);
        assert_eq!(metadata.max_fall, -1);
        assert_eq!(metadata.max_dml, -1);
    }

    #[test]
    fn test_pattern_window_scenario() {
        let (state, observer, running) = setup();
        let (response, _) = process_line(
            r#"{"cmd":"pattern_window","r":255,"g":255,"b":255,"windowPercent":10}"#,
            &state,
            &observer,
            &running,
        );
        assert_eq!(response["status"], "ok");

        let commands = state.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].top_left, [0.0, 0.0, 0.0]);
        assert_eq!(commands[1].top_left, [1.0, 1.0, 1.0]);
        let extent = (0.1f64).sqrt() as f32;
        assert!((commands[1].x2 - extent).abs() < 1e-6);
        assert!(state.is_pending());
    }

    #[test]
    fn test_pattern_white_uses_mode_max() {
        let (state, observer, running) = setup();
        state.set_mode(10, false);
        process_line(r#"{"cmd":"pattern_white"}"#, &state, &observer, &running);
        let commands = state.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].top_left, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_pattern_clear_publishes_empty_batch() {
        let (state, observer, running) = setup();
        state.set_commands(vec![PatternCommand::default()]);
        state.clear_pending();
        process_line(r#"{"cmd":"pattern_clear"}"#, &state, &observer, &running);
        assert!(state.commands().is_empty());
        assert!(state.is_pending());
    }

    #[test]
    fn test_disconnect_stops_server() {
        let (state, observer, running) = setup();
        let (response, stop) =
            process_line(r#"{"cmd":"disconnect"}"#, &state, &observer, &running);
        assert_eq!(response["status"], "ok");
        assert!(stop);
        assert!(!running.load(Ordering::SeqCst));
    }
}
