//! Calibration-feed client.
//!
//! Connects out to grading software (Resolve-style) that streams patch
//! requests as length-prefixed XML: a 4-byte big-endian length followed by
//! that many bytes of UTF-8. Each frame replaces the active pattern batch.

use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use pattern_core::{PatternCommand, PatternState};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::join_with_timeout;
use crate::xml::{self, CalibrationFrame};

pub const FEED_PORT: u16 = 20002;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("resolve address {host}:{port}")]
    Resolve { host: String, port: u16 },
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    /// HDR output requested when the feed switches modes.
    pub hdr: bool,
    /// When nonzero, render every patch as a centered window of this size
    /// in percent instead of the geometry the feed asked for.
    pub window_override: f32,
}

impl FeedConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: FEED_PORT,
            hdr: false,
            window_override: 0.0,
        }
    }
}

pub struct FeedHandle {
    running: Arc<AtomicBool>,
    state: Arc<PatternState>,
    socket: Arc<Mutex<Option<TcpStream>>>,
    thread: Option<JoinHandle<()>>,
}

impl FeedHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(socket) = self.socket.lock().unwrap().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.state.clear_pending();
        if let Some(handle) = self.thread.take() {
            join_with_timeout(handle, "feed", JOIN_TIMEOUT);
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Connect to the feed and stream frames on a background thread. The
/// connection is made before returning so address errors surface here.
pub fn spawn_feed_client(
    config: FeedConfig,
    state: Arc<PatternState>,
) -> Result<FeedHandle, FeedError> {
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| FeedError::Resolve {
            host: config.host.clone(),
            port: config.port,
        })?;

    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|source| FeedError::Connect { addr, source })?;

    info!("connected to calibration feed at {addr}");
    state.set_connection_status(format!("Connected to {}:{}", config.host, config.port));
    state.set_commands(Vec::new());

    let running = Arc::new(AtomicBool::new(true));
    let socket = Arc::new(Mutex::new(stream.try_clone().ok()));

    let thread = {
        let running = Arc::clone(&running);
        let state = Arc::clone(&state);
        std::thread::spawn(move || stream_frames(config, stream, state, running))
    };

    Ok(FeedHandle {
        running,
        state,
        socket,
        thread: Some(thread),
    })
}

fn stream_frames(
    config: FeedConfig,
    mut stream: TcpStream,
    state: Arc<PatternState>,
    running: Arc<AtomicBool>,
) {
    let mut first_pattern = true;

    while running.load(Ordering::SeqCst) {
        // Paced by the consumer: never read ahead of the displayed frame.
        state.wait_pending();
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let payload = match read_frame(&mut stream) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!("calibration feed closed the connection");
                break;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("calibration feed read: {e}");
                }
                break;
            }
        };

        debug!("feed frame: {payload}");
        let frame = match xml::parse(&payload) {
            Some(frame) => frame,
            None => {
                error!("unparseable feed frame: {payload}");
                continue;
            }
        };
        if frame.bits != 8 && frame.bits != 10 {
            error!("unsupported feed bit depth {}", frame.bits);
            continue;
        }

        state.set_commands(frame_commands(&frame, config.window_override));

        let (current_depth, _) = state.mode();
        if first_pattern || frame.bits as u8 != current_depth {
            info!(
                "feed switching to {} bit {} output",
                frame.bits,
                if config.hdr { "HDR" } else { "SDR" }
            );
            state.set_mode(frame.bits as u8, config.hdr);
            first_pattern = false;
        }
    }

    state.set_commands(Vec::new());
    state.set_connection_status("Disconnected");
    info!("calibration feed client stopped");
}

/// Read one length-prefixed frame. `None` on orderly close (EOF on the
/// length word, or a non-positive length).
fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut length = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut length) {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e);
    }
    let length = i32::from_be_bytes(length);
    if length <= 0 {
        return Ok(None);
    }

    let mut payload = vec![0u8; length as usize];
    stream.read_exact(&mut payload)?;
    Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
}

/// Map a feed frame to a pattern batch: optional background full field,
/// then the patch itself either at the requested geometry or as a centered
/// window when an override is set.
pub fn frame_commands(frame: &CalibrationFrame, window_override: f32) -> Vec<PatternCommand> {
    let mut commands = Vec::with_capacity(2);

    if !frame.is_full_field() && frame.background != [0.0, 0.0, 0.0] {
        commands.push(PatternCommand::solid(
            -1.0,
            1.0,
            1.0,
            -1.0,
            frame.background,
        ));
    }

    if window_override == 0.0 || frame.is_full_field() {
        let x1 = -1.0 + 2.0 * frame.x;
        let y1 = 1.0 - 2.0 * frame.y;
        commands.push(PatternCommand::solid(
            x1,
            y1,
            x1 + 2.0 * frame.cx,
            y1 - 2.0 * frame.cy,
            frame.color,
        ));
    } else {
        commands.push(PatternCommand::window(window_override, frame.color));
    }

    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(x: f32, y: f32, cx: f32, cy: f32) -> CalibrationFrame {
        CalibrationFrame {
            color: [0.5, 0.5, 0.5],
            background: [0.0, 0.0, 0.0],
            x,
            y,
            cx,
            cy,
            bits: 10,
        }
    }

    #[test]
    fn test_full_field_frame_is_single_command() {
        let commands = frame_commands(&frame(0.0, 0.0, 1.0, 1.0), 0.0);
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            PatternCommand::solid(-1.0, 1.0, 1.0, -1.0, [0.5, 0.5, 0.5])
        );
    }

    #[test]
    fn test_patch_geometry_maps_to_clip_space() {
        let commands = frame_commands(&frame(0.25, 0.25, 0.5, 0.5), 0.0);
        assert_eq!(commands.len(), 1);
        let patch = &commands[0];
        assert!((patch.x1 + 0.5).abs() < 1e-6);
        assert!((patch.y1 - 0.5).abs() < 1e-6);
        assert!((patch.x2 - 0.5).abs() < 1e-6);
        assert!((patch.y2 + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_background_emitted_for_patch_frames() {
        let mut f = frame(0.25, 0.25, 0.5, 0.5);
        f.background = [0.1, 0.1, 0.1];
        let commands = frame_commands(&f, 0.0);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].top_left, [0.1, 0.1, 0.1]);
    }

    #[test]
    fn test_black_background_is_skipped() {
        let commands = frame_commands(&frame(0.25, 0.25, 0.5, 0.5), 0.0);
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_window_override_replaces_patch_geometry() {
        let commands = frame_commands(&frame(0.25, 0.25, 0.5, 0.5), 10.0);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0], PatternCommand::window(10.0, [0.5, 0.5, 0.5]));
    }

    #[test]
    fn test_window_override_ignored_for_full_field() {
        let commands = frame_commands(&frame(0.0, 0.0, 1.0, 1.0), 10.0);
        assert_eq!(
            commands[0],
            PatternCommand::solid(-1.0, 1.0, 1.0, -1.0, [0.5, 0.5, 0.5])
        );
    }
}
