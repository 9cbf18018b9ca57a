//! Core pattern types for the display-calibration agent.
//!
//! This crate holds everything the protocol layer and the rendering consumer
//! share: the [`PatternCommand`] value type, the [`PatternState`] mailbox
//! that hands batches from network threads to the renderer, and the
//! [`generator`] functions for built-in test patterns.

pub mod command;
pub mod generator;
pub mod state;

pub use command::PatternCommand;
pub use state::{HdrMetadata, PatternState};

/// Reference canvas width used by pattern geometry (4K UHD).
pub const REFERENCE_WIDTH: f32 = 3840.0;
/// Reference canvas height used by pattern geometry (4K UHD).
pub const REFERENCE_HEIGHT: f32 = 2160.0;
