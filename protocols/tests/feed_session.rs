//! End-to-end calibration feed session: the test plays the grading
//! software, streaming length-prefixed XML frames to the client.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pattern_core::PatternState;
use protocols::feed::{spawn_feed_client, FeedConfig};

fn send_frame(stream: &mut TcpStream, xml: &str) {
    stream
        .write_all(&(xml.len() as i32).to_be_bytes())
        .unwrap();
    stream.write_all(xml.as_bytes()).unwrap();
    stream.flush().unwrap();
}

fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn feed_session_streams_frames_and_switches_mode_once() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let state = Arc::new(PatternState::new());
    let config = FeedConfig {
        host: "127.0.0.1".to_string(),
        port,
        hdr: false,
        window_override: 0.0,
    };
    let mut handle = spawn_feed_client(config, Arc::clone(&state)).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    // Connect publishes an empty batch; drain it so the client can read.
    wait_for("connect batch", || state.is_pending());
    assert!(state.commands().is_empty());
    state.clear_pending();

    send_frame(
        &mut peer,
        r#"<color red="1.0" green="0.0" blue="0.0" bits="10"/>"#,
    );
    wait_for("first frame", || state.is_pending());

    let commands = state.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].top_left, [1.0, 0.0, 0.0]);
    assert_eq!(commands[0].x1, -1.0);
    assert_eq!(commands[0].x2, 1.0);
    wait_for("mode switch", || state.mode() == (10, false));
    assert!(state.take_mode_change().is_some());
    state.clear_pending();

    // Second frame at the same depth: no further mode change.
    send_frame(
        &mut peer,
        r#"<color red="0.0" green="1.0" blue="0.0" bits="10"/>"#,
    );
    wait_for("second frame", || state.is_pending());
    assert!(state.take_mode_change().is_none());
    assert_eq!(state.commands()[0].top_left, [0.0, 1.0, 0.0]);
    state.clear_pending();

    handle.stop();
}

#[test]
fn feed_session_patch_with_background() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let state = Arc::new(PatternState::new());
    let config = FeedConfig {
        host: "127.0.0.1".to_string(),
        port,
        hdr: false,
        window_override: 0.0,
    };
    let mut handle = spawn_feed_client(config, Arc::clone(&state)).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    wait_for("connect batch", || state.is_pending());
    state.clear_pending();

    send_frame(
        &mut peer,
        r#"<calibration>
            <color red="0.5" green="0.5" blue="0.5" bits="8"/>
            <background red="0.1" green="0.1" blue="0.1"/>
            <geometry x="0.25" y="0.25" cx="0.5" cy="0.5"/>
        </calibration>"#,
    );
    wait_for("patch frame", || state.is_pending());

    let commands = state.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].top_left, [0.1, 0.1, 0.1]);
    assert!((commands[1].x1 + 0.5).abs() < 1e-6);
    assert!((commands[1].y1 - 0.5).abs() < 1e-6);
    state.clear_pending();

    handle.stop();
}

#[test]
fn feed_session_invalid_frames_are_skipped() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let state = Arc::new(PatternState::new());
    let config = FeedConfig {
        host: "127.0.0.1".to_string(),
        port,
        hdr: false,
        window_override: 0.0,
    };
    let mut handle = spawn_feed_client(config, Arc::clone(&state)).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    wait_for("connect batch", || state.is_pending());
    state.clear_pending();

    // No color element, then an unsupported depth: both skipped.
    send_frame(&mut peer, r#"<background red="0.1"/>"#);
    send_frame(
        &mut peer,
        r#"<color red="1.0" green="1.0" blue="1.0" bits="12"/>"#,
    );
    send_frame(
        &mut peer,
        r#"<color red="1.0" green="1.0" blue="1.0" bits="8"/>"#,
    );
    wait_for("valid frame", || state.is_pending());
    assert_eq!(state.commands()[0].top_left, [1.0, 1.0, 1.0]);
    wait_for("mode switch", || state.mode() == (8, false));
    state.clear_pending();

    handle.stop();
}

#[test]
fn feed_session_peer_close_clears_the_screen() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let state = Arc::new(PatternState::new());
    let config = FeedConfig {
        host: "127.0.0.1".to_string(),
        port,
        hdr: false,
        window_override: 0.0,
    };
    let mut handle = spawn_feed_client(config, Arc::clone(&state)).unwrap();
    let (peer, _) = listener.accept().unwrap();

    wait_for("connect batch", || state.is_pending());
    state.clear_pending();

    drop(peer);
    wait_for("disconnect status", || {
        state.connection_status() == "Disconnected"
    });
    assert!(state.commands().is_empty());

    handle.stop();
}
