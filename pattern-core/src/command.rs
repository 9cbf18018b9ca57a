//! Draw commands for the pattern renderer.
//!
//! Coordinates use normalized device coordinates: `(x1, y1)` is the top-left
//! corner (`(-1, 1)` for the screen top-left), `(x2, y2)` the bottom-right
//! (`(1, -1)` for the screen bottom-right). Colors are normalized floats in
//! `[0, 1]`, one triple per corner so gradients are expressible. `quant`
//! controls quantization stepping in the shader (0 = no quantization).

use serde::{Deserialize, Serialize};

/// Half-extent of an area-proportional square window in NDC.
///
/// A window covering `percent`% of the screen area has side
/// `sqrt(percent / 100)` in each normalized axis.
pub fn window_extent(percent: f32) -> f32 {
    (percent as f64 / 100.0).sqrt() as f32
}

/// A single rectangle for the renderer, with per-corner colors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCommand {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Top-left corner color.
    pub top_left: [f32; 3],
    /// Top-right corner color.
    pub top_right: [f32; 3],
    /// Bottom-left corner color.
    pub bottom_left: [f32; 3],
    /// Bottom-right corner color.
    pub bottom_right: [f32; 3],
    /// Quantization divisor, 0 disables quantization.
    pub quant: f32,
}

impl Default for PatternCommand {
    fn default() -> Self {
        Self::solid(-1.0, 1.0, 1.0, -1.0, [0.0, 0.0, 0.0])
    }
}

impl PatternCommand {
    /// Fully specified rectangle with independent corner colors.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        top_left: [f32; 3],
        top_right: [f32; 3],
        bottom_left: [f32; 3],
        bottom_right: [f32; 3],
        quant: f32,
    ) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            top_left,
            top_right,
            bottom_left,
            bottom_right,
            quant,
        }
    }

    /// Solid rectangle: one color on all four corners, no quantization.
    pub fn solid(x1: f32, y1: f32, x2: f32, y2: f32, color: [f32; 3]) -> Self {
        Self::new(x1, y1, x2, y2, color, color, color, color, 0.0)
    }

    /// Centered square window covering `percent`% of the screen area.
    pub fn window(percent: f32, color: [f32; 3]) -> Self {
        let e = window_extent(percent);
        Self::solid(-e, e, e, -e, color)
    }

    /// Window from integer video codes against a bit-depth maximum.
    pub fn window_from_code(percent: f32, r: i32, g: i32, b: i32, max_value: f32) -> Self {
        Self::window(
            percent,
            [
                r as f32 / max_value,
                g as f32 / max_value,
                b as f32 / max_value,
            ],
        )
    }

    /// Full-field rectangle from integer video codes.
    pub fn full_field_from_code(r: i32, g: i32, b: i32, max_value: f32) -> Self {
        Self::window_from_code(100.0, r, g, b, max_value)
    }

    /// Pack the rectangle as interleaved vertex data for the renderer:
    /// `[x, y, r, g, b, quant]` for top-left, top-right, bottom-left,
    /// bottom-right (triangle-strip order).
    pub fn vertex_data(&self) -> [f32; 24] {
        let c = |color: &[f32; 3]| (color[0], color[1], color[2]);
        let (r1, g1, b1) = c(&self.top_left);
        let (r2, g2, b2) = c(&self.top_right);
        let (r3, g3, b3) = c(&self.bottom_left);
        let (r4, g4, b4) = c(&self.bottom_right);
        [
            self.x1, self.y1, r1, g1, b1, self.quant, //
            self.x2, self.y1, r2, g2, b2, self.quant, //
            self.x1, self.y2, r3, g3, b3, self.quant, //
            self.x2, self.y2, r4, g4, b4, self.quant,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_extent() {
        assert!((window_extent(100.0) - 1.0).abs() < 1e-6);
        assert!((window_extent(25.0) - 0.5).abs() < 1e-6);
        assert!((window_extent(10.0) - 0.1_f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_full_field_equals_hundred_percent_window() {
        let window = PatternCommand::window_from_code(100.0, 128, 64, 32, 255.0);
        let full = PatternCommand::full_field_from_code(128, 64, 32, 255.0);
        assert_eq!(window, full);
        assert_eq!(full.x1, -1.0);
        assert_eq!(full.y1, 1.0);
        assert_eq!(full.x2, 1.0);
        assert_eq!(full.y2, -1.0);
    }

    #[test]
    fn test_window_from_code_normalizes_colors() {
        let cmd = PatternCommand::window_from_code(10.0, 255, 0, 0, 255.0);
        assert_eq!(cmd.top_left, [1.0, 0.0, 0.0]);
        assert_eq!(cmd.bottom_right, [1.0, 0.0, 0.0]);
        let e = window_extent(10.0);
        assert_eq!(cmd.x1, -e);
        assert_eq!(cmd.y2, -e);
    }

    #[test]
    fn test_vertex_data_layout() {
        let cmd = PatternCommand::new(
            -0.5,
            0.5,
            0.5,
            -0.5,
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            0.25,
        );
        let v = cmd.vertex_data();
        // Top-left vertex
        assert_eq!(&v[0..6], &[-0.5, 0.5, 1.0, 0.0, 0.0, 0.25]);
        // Top-right vertex shares y1
        assert_eq!(&v[6..12], &[0.5, 0.5, 0.0, 1.0, 0.0, 0.25]);
        // Bottom-left vertex shares x1
        assert_eq!(&v[12..18], &[-0.5, -0.5, 0.0, 0.0, 1.0, 0.25]);
        // Bottom-right vertex
        assert_eq!(&v[18..24], &[0.5, -0.5, 1.0, 1.0, 1.0, 0.25]);
    }

    #[test]
    fn test_serialization_round_trip() {
        let cmd = PatternCommand::window(10.0, [0.5, 0.25, 0.125]);
        let json = serde_json::to_string(&cmd).unwrap();
        let parsed: PatternCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, parsed);
    }
}
