//! Protocol servers and clients that feed the pattern mailbox.
//!
//! Exactly one component is active as the pattern source at a time:
//! - [`pgen`]: PGenerator emulation (UDP discovery + single-client TCP)
//!   for HCFR/Calman-style calibration software.
//! - [`control`]: newline-delimited JSON control channel for the companion
//!   desktop application.
//! - [`feed`]: outbound client for the Resolve-style length-prefixed XML
//!   calibration protocol, with the narrow attribute scanner in [`xml`].
//!
//! Each component runs on its own thread for the life of a session and
//! publishes into a shared [`pattern_core::PatternState`].

pub mod control;
pub mod feed;
pub mod pgen;
pub mod xml;

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::warn;

/// Join a worker thread with a bounded wait.
///
/// A thread stuck in a blocking syscall after its sockets were closed is
/// logged and abandoned rather than hanging shutdown.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, name: &str, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} thread did not stop within {timeout:?}; abandoning join");
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        warn!("{name} thread panicked");
    }
}
