//! PGenerator protocol emulation.
//!
//! Presents this device as a PGenerator to HCFR/Calman-style calibration
//! software: a UDP discovery responder plus a single-client TCP command
//! server. The TCP side is a single-tenant rendezvous: the listening socket
//! is closed once a client connects and rebound after it disconnects.
//!
//! Framing: requests are byte streams terminated by `0x02 0x0D` (terminator
//! stripped); a stream that fills the 1024-byte buffer without a terminator
//! is taken as-is. Responses are ASCII followed by a single `0x00`.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use pattern_core::{PatternCommand, PatternState, REFERENCE_HEIGHT, REFERENCE_WIDTH};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::join_with_timeout;

/// Exact UDP broadcast payload calibration software uses to find us.
pub const DISCOVERY_REQUEST: &str = "Who is a PGenerator";
/// Identity string returned to the discovery sender.
pub const DISCOVERY_REPLY: &str = "This is cal-agent :)";

const MAX_BUFFER_SIZE: usize = 1024;
/// The PGen wire protocol always speaks 8-bit video codes.
const PGEN_MAX_VALUE: f32 = 255.0;
const ACCEPT_POLL: Duration = Duration::from_millis(200);
const READ_POLL: Duration = Duration::from_millis(500);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors surfaced when starting the server.
#[derive(Debug, Error)]
pub enum PGenError {
    #[error("udp bind on port {port}: {source}")]
    UdpBind { port: u16, source: std::io::Error },
    #[error("tcp bind on port {port}: {source}")]
    TcpBind { port: u16, source: std::io::Error },
}

/// PGen server configuration.
#[derive(Debug, Clone)]
pub struct PGenConfig {
    /// UDP discovery port (protocol-fixed 1977).
    pub udp_port: u16,
    /// TCP command port (protocol-fixed 85; 0 picks an ephemeral port).
    pub tcp_port: u16,
    /// HDR output for this session.
    pub hdr: bool,
    /// Idle pattern shown while no command is active (8-bit codes).
    pub passive: Option<[i32; 3]>,
}

impl Default for PGenConfig {
    fn default() -> Self {
        Self {
            udp_port: 1977,
            tcp_port: 85,
            hdr: false,
            passive: None,
        }
    }
}

/// Handle controlling a running PGen server.
pub struct PGenHandle {
    running: Arc<AtomicBool>,
    state: Arc<PatternState>,
    client: Arc<Mutex<Option<TcpStream>>>,
    tcp_port: u16,
    udp_port: u16,
    threads: Vec<JoinHandle<()>>,
}

impl PGenHandle {
    /// Actually bound TCP port (useful when configured with port 0).
    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    /// Actually bound UDP discovery port.
    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop both loops and join their threads. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(client) = self.client.lock().unwrap().take() {
            let _ = client.shutdown(Shutdown::Both);
        }
        // Unblock a handler parked in wait_pending.
        self.state.clear_pending();
        for handle in self.threads.drain(..) {
            join_with_timeout(handle, "pgen", JOIN_TIMEOUT);
        }
    }
}

impl Drop for PGenHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the discovery and command loops on their own threads.
pub fn spawn_pgen_server(
    config: PGenConfig,
    state: Arc<PatternState>,
) -> Result<PGenHandle, PGenError> {
    let udp = UdpSocket::bind(("0.0.0.0", config.udp_port)).map_err(|source| {
        PGenError::UdpBind {
            port: config.udp_port,
            source,
        }
    })?;
    udp.set_read_timeout(Some(READ_POLL)).ok();
    let udp_port = udp.local_addr().map(|a| a.port()).unwrap_or(config.udp_port);

    // First session bind happens here so startup errors surface to the
    // caller and the ephemeral port is known before any client connects.
    let listener = TcpListener::bind(("0.0.0.0", config.tcp_port)).map_err(|source| {
        PGenError::TcpBind {
            port: config.tcp_port,
            source,
        }
    })?;
    let tcp_port = listener.local_addr().map(|a| a.port()).unwrap_or(config.tcp_port);

    let running = Arc::new(AtomicBool::new(true));
    let client = Arc::new(Mutex::new(None));
    let mut threads = Vec::new();

    {
        let running = Arc::clone(&running);
        threads.push(std::thread::spawn(move || discovery_loop(udp, running)));
    }
    {
        let running = Arc::clone(&running);
        let state = Arc::clone(&state);
        let client = Arc::clone(&client);
        let config = config.clone();
        threads.push(std::thread::spawn(move || {
            command_loop(config, tcp_port, listener, state, client, running)
        }));
    }

    Ok(PGenHandle {
        running,
        state,
        client,
        tcp_port,
        udp_port,
        threads,
    })
}

fn passive_pattern(config: &PGenConfig) -> Vec<PatternCommand> {
    match config.passive {
        Some([r, g, b]) => vec![PatternCommand::full_field_from_code(r, g, b, PGEN_MAX_VALUE)],
        None => Vec::new(),
    }
}

fn discovery_loop(udp: UdpSocket, running: Arc<AtomicBool>) {
    let mut buffer = [0u8; MAX_BUFFER_SIZE];
    while running.load(Ordering::SeqCst) {
        match udp.recv_from(&mut buffer) {
            Ok((len, peer)) => {
                if &buffer[..len] == DISCOVERY_REQUEST.as_bytes() {
                    if let Err(e) = udp.send_to(DISCOVERY_REPLY.as_bytes(), peer) {
                        error!("discovery reply to {peer}: {e}");
                    } else {
                        info!("sent discovery response to {peer}");
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("udp discovery error: {e}");
                }
            }
        }
    }
}

fn command_loop(
    config: PGenConfig,
    tcp_port: u16,
    first_listener: TcpListener,
    state: Arc<PatternState>,
    client_slot: Arc<Mutex<Option<TcpStream>>>,
    running: Arc<AtomicBool>,
) {
    let passive = passive_pattern(&config);
    let mut switched_mode = false;
    let mut listener = Some(first_listener);

    while running.load(Ordering::SeqCst) {
        let listener = match listener.take() {
            Some(l) => l,
            // Single-tenant rendezvous: fresh bind+listen for every session.
            None => match TcpListener::bind(("0.0.0.0", tcp_port)) {
                Ok(l) => l,
                Err(e) => {
                    error!("pgen rebind on port {tcp_port}: {e}");
                    state.set_connection_status(format!("PGen error: {e}"));
                    std::thread::sleep(ACCEPT_POLL);
                    continue;
                }
            },
        };

        state.wait_pending();

        if !switched_mode {
            state.set_mode(8, config.hdr);
            info!(
                "switching to 8 bit {} output",
                if config.hdr { "HDR" } else { "SDR" }
            );
            switched_mode = true;
        }

        state.set_commands(passive.clone());
        state.set_connection_status(format!("PGen: Waiting on port {tcp_port}..."));
        info!("waiting for incoming connection on port {tcp_port}");

        let stream = match accept_with_polling(&listener, &running) {
            Some(stream) => stream,
            None => break,
        };

        info!("client connected; closing listening socket");
        state.set_connection_status("PGen: Client connected");
        drop(listener);

        stream.set_read_timeout(Some(READ_POLL)).ok();
        *client_slot.lock().unwrap() = stream.try_clone().ok();
        handle_client(stream, &passive, &state, &running);
        client_slot.lock().unwrap().take();

        info!("client disconnected; reopening listening socket");
    }

    cleanup(switched_mode, &state, &running);
}

fn accept_with_polling(listener: &TcpListener, running: &AtomicBool) -> Option<TcpStream> {
    listener.set_nonblocking(true).ok();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).ok();
                return Some(stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("pgen accept: {e}");
                }
                return None;
            }
        }
    }
    None
}

fn handle_client(
    mut stream: TcpStream,
    passive: &[PatternCommand],
    state: &PatternState,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        // Ingestion is paced to the consumer's draw rate.
        state.wait_pending();

        let message = match read_message(&mut stream, running) {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("pgen client read: {e}");
                }
                break;
            }
        };

        debug!("pgen request: {message}");
        let response = handle_message(&message, passive, state);

        state.set_pending();

        if let Some(response) = response {
            if let Err(e) = write_response(&mut stream, &response) {
                error!("pgen client write: {e}");
                break;
            }
        }
    }
}

/// Read one framed request: bytes up to `0x02 0x0D` (stripped), or the raw
/// buffer contents if it fills without a terminator. `None` means EOF.
pub fn read_message<R: Read>(
    input: &mut R,
    running: &AtomicBool,
) -> std::io::Result<Option<String>> {
    let mut buffer = [0u8; MAX_BUFFER_SIZE];
    let mut pos = 0;
    let mut byte = [0u8; 1];

    while pos < MAX_BUFFER_SIZE - 1 {
        match input.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if !running.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                continue;
            }
            Err(e) => return Err(e),
        }
        buffer[pos] = byte[0];

        if pos > 0 && buffer[pos] == 0x0D && buffer[pos - 1] == 0x02 {
            return Ok(Some(
                String::from_utf8_lossy(&buffer[..pos - 1]).into_owned(),
            ));
        }
        pos += 1;
    }

    Ok(Some(String::from_utf8_lossy(&buffer[..pos]).into_owned()))
}

fn write_response(output: &mut impl Write, response: &str) -> std::io::Result<()> {
    output.write_all(response.as_bytes())?;
    output.write_all(&[0u8])?;
    output.flush()
}

/// Dispatch one request. Returns the response string when the command has
/// one; pattern commands publish into the state and answer nothing.
pub fn handle_message(
    message: &str,
    passive: &[PatternCommand],
    state: &PatternState,
) -> Option<String> {
    match message {
        "CMD:GET_RESOLUTION" => Some(format!(
            "OK:{}x{}",
            REFERENCE_WIDTH as u32, REFERENCE_HEIGHT as u32
        )),
        "CMD:GET_GPU_MEMORY" => Some("OK:192".to_string()),
        // The numeric fields are never interpreted by real peers; this only
        // restores the idle pattern.
        "TESTTEMPLATE:PatternDynamic:0,0,0" => {
            state.set_commands(passive.to_vec());
            None
        }
        _ if message.starts_with("RGB=RECTANGLE") => {
            match parse_rectangle(message) {
                Some(commands) => state.set_commands(commands),
                None => error!("invalid RGB=RECTANGLE command: {message}"),
            }
            None
        }
        _ if message.starts_with("RGB=TEXT") || message.starts_with("RGB=IMAGE") => None,
        _ => {
            state.set_commands(Vec::new());
            None
        }
    }
}

/// Decode `RGB=RECTANGLE;w;h;depth;r;g;b;bgR;bgG;bgB` into a background
/// full-field plus a centered rectangle on the 3840x2160 reference canvas.
pub fn parse_rectangle(message: &str) -> Option<Vec<PatternCommand>> {
    let fields: Vec<&str> = message.split_once(';')?.1.split(';').collect();
    if fields.len() < 9 {
        return None;
    }

    let value = |i: usize| fields[i].trim().parse::<i32>().ok();
    let width = value(0)?;
    let height = value(1)?;
    // fields[2] is a bit-depth placeholder the protocol never acts on.
    let r = value(3)?;
    let g = value(4)?;
    let b = value(5)?;
    let bg_r = value(6)?;
    let bg_g = value(7)?;
    let bg_b = value(8)?;

    let x = width as f32 / REFERENCE_WIDTH;
    let y = height as f32 / REFERENCE_HEIGHT;
    let color = [
        r as f32 / PGEN_MAX_VALUE,
        g as f32 / PGEN_MAX_VALUE,
        b as f32 / PGEN_MAX_VALUE,
    ];

    Some(vec![
        PatternCommand::full_field_from_code(bg_r, bg_g, bg_b, PGEN_MAX_VALUE),
        PatternCommand::solid(-x, y, x, -y, color),
    ])
}

fn cleanup(switched_mode: bool, state: &PatternState, running: &AtomicBool) {
    if switched_mode {
        // During a stop there may be no consumer left to drain the batch the
        // session loop just published, so waiting for it would never return.
        if running.load(Ordering::SeqCst) {
            state.wait_pending();
        }
        state.set_commands(Vec::new());
    }
    state.set_connection_status("PGen: Stopped");
    info!("pgen server stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn running() -> AtomicBool {
        AtomicBool::new(true)
    }

    #[test]
    fn test_read_message_strips_terminator() {
        let mut input = Cursor::new(b"CMD:GET_RESOLUTION\x02\x0D".to_vec());
        let message = read_message(&mut input, &running()).unwrap().unwrap();
        assert_eq!(message, "CMD:GET_RESOLUTION");
    }

    #[test]
    fn test_read_message_without_terminator_yields_buffered_bytes() {
        let mut input = Cursor::new(vec![b'A'; 2048]);
        let message = read_message(&mut input, &running()).unwrap().unwrap();
        assert_eq!(message.len(), MAX_BUFFER_SIZE - 1);
        assert!(message.bytes().all(|b| b == b'A'));
    }

    #[test]
    fn test_read_message_eof_before_any_byte() {
        let mut input = Cursor::new(Vec::new());
        assert!(read_message(&mut input, &running()).unwrap().is_none());
    }

    #[test]
    fn test_terminator_must_be_the_two_byte_sequence() {
        // A lone 0x0D is payload, not a terminator.
        let mut input = Cursor::new(b"AB\x0DCD\x02\x0D".to_vec());
        let message = read_message(&mut input, &running()).unwrap().unwrap();
        assert_eq!(message.as_bytes(), b"AB\x0DCD");
    }

    #[test]
    fn test_parse_rectangle_scenario() {
        let commands = parse_rectangle("RGB=RECTANGLE;100;100;8;255;0;0;0;0;0").unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0],
            PatternCommand::full_field_from_code(0, 0, 0, 255.0)
        );
        let rect = &commands[1];
        assert_eq!(rect.top_left, [1.0, 0.0, 0.0]);
        assert!((rect.x1 + 100.0 / 3840.0).abs() < 1e-6);
        assert!((rect.y1 - 100.0 / 2160.0).abs() < 1e-6);
        assert!((rect.x2 - 100.0 / 3840.0).abs() < 1e-6);
        assert!((rect.y2 + 100.0 / 2160.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_rectangle_rejects_short_commands() {
        assert!(parse_rectangle("RGB=RECTANGLE;100;100;8;255;0;0").is_none());
        assert!(parse_rectangle("RGB=RECTANGLE").is_none());
    }

    #[test]
    fn test_handle_message_queries() {
        let state = PatternState::new();
        assert_eq!(
            handle_message("CMD:GET_RESOLUTION", &[], &state).as_deref(),
            Some("OK:3840x2160")
        );
        assert_eq!(
            handle_message("CMD:GET_GPU_MEMORY", &[], &state).as_deref(),
            Some("OK:192")
        );
    }

    #[test]
    fn test_handle_message_testtemplate_restores_passive() {
        let state = PatternState::new();
        let config = PGenConfig {
            passive: Some([16, 16, 16]),
            ..Default::default()
        };
        let passive = passive_pattern(&config);
        state.set_commands(vec![PatternCommand::default(); 3]);

        let response = handle_message("TESTTEMPLATE:PatternDynamic:0,0,0", &passive, &state);
        assert!(response.is_none());
        assert_eq!(state.commands(), passive);
    }

    #[test]
    fn test_handle_message_short_rectangle_leaves_state_unchanged() {
        let state = PatternState::new();
        state.set_commands(vec![PatternCommand::default()]);

        handle_message("RGB=RECTANGLE;1;2;3", &[], &state);
        assert_eq!(state.commands().len(), 1);
    }

    #[test]
    fn test_handle_message_text_and_image_are_noops() {
        let state = PatternState::new();
        state.set_commands(vec![PatternCommand::default()]);

        assert!(handle_message("RGB=TEXT;whatever", &[], &state).is_none());
        assert!(handle_message("RGB=IMAGE;whatever", &[], &state).is_none());
        assert_eq!(state.commands().len(), 1);
    }

    #[test]
    fn test_handle_message_unknown_blanks_the_screen() {
        let state = PatternState::new();
        state.set_commands(vec![PatternCommand::default()]);

        handle_message("CMD:SOMETHING_ELSE", &[], &state);
        assert!(state.commands().is_empty());
    }
}
