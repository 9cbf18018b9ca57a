//! Shared pattern state between protocol threads and the renderer.
//!
//! [`PatternState`] is a bounded-1 mailbox: a protocol thread publishes one
//! command batch and marks it pending; the rendering consumer polls
//! [`PatternState::is_pending`], reads the batch, and acknowledges with
//! [`PatternState::clear_pending`]. Producers that must pace themselves to
//! the consumer's draw rate block on [`PatternState::wait_pending`] before
//! publishing the next batch.
//!
//! One instance is created per pattern session and shared by `Arc` with every
//! protocol component that needs it.

use std::sync::{Condvar, Mutex};

use crate::command::PatternCommand;

/// HDR static metadata fields. `-1` means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdrMetadata {
    /// Maximum content light level (nits).
    pub max_cll: i32,
    /// Maximum frame-average light level (nits).
    pub max_fall: i32,
    /// Maximum display mastering luminance (nits).
    pub max_dml: i32,
}

impl Default for HdrMetadata {
    fn default() -> Self {
        Self {
            max_cll: -1,
            max_fall: -1,
            max_dml: -1,
        }
    }
}

#[derive(Debug)]
struct Inner {
    bit_depth: u8,
    hdr: bool,
    flicker: i32,
    metadata: HdrMetadata,
    commands: Vec<PatternCommand>,
    pending: bool,
    mode_changed: bool,
    connection_status: String,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            bit_depth: 8,
            hdr: false,
            flicker: 0,
            metadata: HdrMetadata::default(),
            commands: Vec::new(),
            pending: false,
            mode_changed: false,
            connection_status: "Idle".to_string(),
        }
    }
}

/// Thread-safe pattern mailbox and display-mode state.
#[derive(Debug, Default)]
pub struct PatternState {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl PatternState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the command batch wholesale and mark it pending.
    ///
    /// The batch is never mutated in place, so a concurrent reader can never
    /// observe a partially written batch.
    pub fn set_commands(&self, commands: Vec<PatternCommand>) {
        let mut inner = self.inner.lock().unwrap();
        inner.commands = commands;
        inner.pending = true;
        self.cond.notify_all();
    }

    /// Read the current batch (cloned out under the lock).
    pub fn commands(&self) -> Vec<PatternCommand> {
        self.inner.lock().unwrap().commands.clone()
    }

    /// Mark the current batch pending without replacing it.
    pub fn set_pending(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = true;
        self.cond.notify_all();
    }

    /// Consumer acknowledgment: the batch has been observed.
    pub fn clear_pending(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = false;
        self.cond.notify_all();
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().unwrap().pending
    }

    /// Block the calling thread until the pending batch has been consumed.
    pub fn wait_pending(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.pending {
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Switch display mode and raise the mode-changed flag for observers.
    pub fn set_mode(&self, bit_depth: u8, hdr: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.bit_depth = bit_depth;
        inner.hdr = hdr;
        inner.mode_changed = true;
    }

    /// Current `(bit_depth, hdr)` mode.
    pub fn mode(&self) -> (u8, bool) {
        let inner = self.inner.lock().unwrap();
        (inner.bit_depth, inner.hdr)
    }

    /// Consume the mode-changed flag, returning the mode if it was raised.
    pub fn take_mode_change(&self) -> Option<(u8, bool)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.mode_changed {
            inner.mode_changed = false;
            Some((inner.bit_depth, inner.hdr))
        } else {
            None
        }
    }

    /// Maximum video code for the active bit depth (`2^bits - 1`).
    pub fn max_value(&self) -> f32 {
        let inner = self.inner.lock().unwrap();
        ((1u32 << inner.bit_depth) - 1) as f32
    }

    pub fn set_flicker(&self, flicker: i32) {
        self.inner.lock().unwrap().flicker = flicker;
    }

    pub fn flicker(&self) -> i32 {
        self.inner.lock().unwrap().flicker
    }

    pub fn set_hdr_metadata(&self, metadata: HdrMetadata) {
        self.inner.lock().unwrap().metadata = metadata;
    }

    pub fn hdr_metadata(&self) -> HdrMetadata {
        self.inner.lock().unwrap().metadata
    }

    pub fn set_connection_status(&self, status: impl Into<String>) {
        self.inner.lock().unwrap().connection_status = status.into();
    }

    pub fn connection_status(&self) -> String {
        self.inner.lock().unwrap().connection_status.clone()
    }

    /// Apply a mode string: `"8"`, `"8_hdr"`, `"10"`, or `"10_hdr"`.
    ///
    /// Returns false (state unchanged) for anything else.
    pub fn parse_mode_string(&self, mode: &str) -> bool {
        match mode.trim().to_ascii_lowercase().as_str() {
            "8" => self.set_mode(8, false),
            "8_hdr" => self.set_mode(8, true),
            "10" => self.set_mode(10, false),
            "10_hdr" => self.set_mode(10, true),
            _ => return false,
        }
        true
    }

    /// Restore initial values; called when a pattern session ends.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::default();
        self.cond.notify_all();
    }
}
