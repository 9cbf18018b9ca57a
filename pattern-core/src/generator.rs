//! Built-in test pattern generators.
//!
//! All patterns are defined against fixed reference grids and emitted as
//! [`PatternCommand`] batches. The PLUGE (BT.814-4) and color-bar (BT.2111-2)
//! coordinate and code tables are literal references: they encode the
//! standard layouts and are reproduced exactly, not derived.

use crate::command::{window_extent, PatternCommand};
use crate::{REFERENCE_HEIGHT, REFERENCE_WIDTH};

/// PLUGE horizontal cut points on the 4K reference grid.
const PLUGE_HORZ: [i32; 8] = [0, 624, 1199, 1776, 2063, 2640, 3215, 3839];
/// PLUGE vertical cut points on the 4K reference grid.
const PLUGE_VERT: [i32; 10] = [0, 648, 690, 935, 936, 1223, 1224, 1469, 1511, 2159];

/// Cell-size table for the BT.2111 bar layout (indices addressed a..k).
const BAR_VALS: [i32; 11] = [1920, 1080, 240, 206, 204, 136, 70, 68, 238, 438, 282];

fn bar(c: char) -> i32 {
    BAR_VALS[(c as u8 - b'a') as usize]
}

/// PLUGE-style black-level pattern (BT.814-4 layout).
///
/// `hdr` selects the bright reference level (399 vs 940); `ten_bit` selects
/// the code scale (10-bit codes used directly, 8-bit codes divided by 4).
pub fn pluge(hdr: bool, ten_bit: bool) -> Vec<PatternCommand> {
    let max_value: f32 = if ten_bit { 1023.0 } else { 255.0 };
    let divisor: f32 = if ten_bit { 1.0 } else { 4.0 };

    let higher: i32 = if hdr { 399 } else { 940 };
    let black: i32 = 64;
    let lighter: i32 = 80;
    let darker: i32 = 48;

    let mut commands = Vec::new();

    let mut rect = |x1: i32, y1: i32, x2: i32, y2: i32, code: i32| {
        let level = (code as f32 / divisor) / max_value;
        commands.push(PatternCommand::solid(
            -1.0 + 2.0 * x1 as f32 / REFERENCE_WIDTH,
            1.0 - 2.0 * y1 as f32 / REFERENCE_HEIGHT,
            -1.0 + 2.0 * (x2 + 1) as f32 / REFERENCE_WIDTH,
            1.0 - 2.0 * (y2 + 1) as f32 / REFERENCE_HEIGHT,
            [level, level, level],
        ));
    };

    let h = |c: char| PLUGE_HORZ[(c as u8 - b'a') as usize];
    let v = |c: char| PLUGE_VERT[(c as u8 - b'a') as usize];

    rect(h('a'), v('a'), h('h'), v('j'), black);
    rect(h('d'), v('e'), h('e'), v('f'), higher);
    rect(h('f'), v('b'), h('g'), v('d'), lighter);
    rect(h('f'), v('g'), h('g'), v('i'), darker);

    // Alternating sub-black ladder: 20 bars of height 19 on a 40-row stride.
    for i in 0..20 {
        let y1 = v('c') + 2 * 20 * i;
        let code = if i < 10 { lighter } else { darker };
        rect(h('b'), y1, h('c'), y1 + 19, code);
    }

    commands
}

/// BT.2111-2 HDR color bars on the 1920x1080 cell grid.
///
/// `limited` selects limited-range (64..940) vs full-range (0..1023) codes.
pub fn bars(limited: bool) -> Vec<PatternCommand> {
    let max_value: f32 = 1023.0;
    let width = bar('a') as f32;
    let height = bar('b') as f32;

    let mut commands = Vec::new();

    let mut rect = |x1: i32, y1: i32, x2: i32, y2: i32, rgb: [i32; 3]| {
        let color = [
            rgb[0] as f32 / max_value,
            rgb[1] as f32 / max_value,
            rgb[2] as f32 / max_value,
        ];
        commands.push(PatternCommand::solid(
            -1.0 + 2.0 * x1 as f32 / width,
            1.0 - 2.0 * y1 as f32 / height,
            -1.0 + 2.0 * x2 as f32 / width,
            1.0 - 2.0 * y2 as f32 / height,
            color,
        ));
    };

    let colors: [[i32; 3]; 15] = if limited {
        [
            [940, 940, 940],
            [940, 940, 64],
            [64, 940, 940],
            [64, 940, 64],
            [940, 64, 940],
            [940, 64, 64],
            [64, 64, 940],
            [572, 572, 572],
            [572, 572, 64],
            [64, 572, 572],
            [64, 572, 64],
            [572, 64, 572],
            [572, 64, 64],
            [64, 64, 572],
            [414, 414, 414],
        ]
    } else {
        [
            [1023, 1023, 1023],
            [1023, 1023, 0],
            [0, 1023, 1023],
            [0, 1023, 0],
            [1023, 0, 1023],
            [1023, 0, 0],
            [0, 0, 1023],
            [594, 594, 594],
            [594, 594, 0],
            [0, 594, 594],
            [0, 594, 0],
            [594, 0, 594],
            [594, 0, 0],
            [0, 0, 594],
            [390, 390, 390],
        ]
    };

    // Row 1: seven 75%-style bars.
    let mut x = 0;
    let h1 = bar('c');
    for color in colors.iter().take(7) {
        let w = bar('c');
        rect(x, 0, x + w, h1, *color);
        x += w;
    }

    // Row 2: eight dimmer bars.
    x = 0;
    let y2 = h1;
    let h2 = bar('d');
    for color in colors.iter().take(15).skip(7) {
        let w = bar('c');
        rect(x, y2, x + w, y2 + h2, *color);
        x += w;
    }

    let ramp_colors: [[i32; 3]; 6] = if limited {
        [
            [568, 571, 381],
            [484, 566, 571],
            [474, 564, 368],
            [536, 361, 564],
            [530, 350, 256],
            [317, 236, 562],
        ]
    } else {
        [
            [589, 593, 370],
            [491, 586, 592],
            [479, 585, 355],
            [552, 348, 584],
            [545, 335, 225],
            [296, 201, 582],
        ]
    };

    // Row 3: ramp edges, gray/near-black segments, ramp edges.
    let y3 = y2 + h2;
    let h3 = bar('e');
    x = 0;
    for color in ramp_colors.iter().take(3) {
        let w = bar('c') / 3;
        rect(x, y3, x + w, y3 + h3, *color);
        x += w;
    }

    let grays: [i32; 9] = if limited {
        [64, 48, 64, 80, 64, 99, 64, 572, 64]
    } else {
        [0, 0, 0, 19, 0, 41, 0, 594, 0]
    };
    let gray_widths = ['f', 'g', 'h', 'g', 'h', 'g', 'i', 'j', 'k'];
    for (gray, width_char) in grays.iter().zip(gray_widths.iter()) {
        let w = bar(*width_char);
        rect(x, y3, x + w, y3 + h3, [*gray, *gray, *gray]);
        x += w;
    }

    for color in ramp_colors.iter().take(6).skip(3) {
        let w = bar('c') / 3;
        rect(x, y3, x + w, y3 + h3, *color);
        x += w;
    }

    // Row 4: 15-step luma ladder.
    let y4 = y3 + h3;
    let h4 = bar('b') - y4;
    x = 0;

    let levels: [i32; 15] = if limited {
        [572, 4, 64, 152, 239, 327, 414, 502, 590, 677, 765, 852, 940, 1019, 572]
    } else {
        [594, 0, 0, 102, 205, 307, 409, 512, 614, 716, 818, 921, 1023, 1023, 594]
    };

    for (i, level) in levels.iter().enumerate() {
        let w = if i == 0 || i == levels.len() - 1 {
            bar('e')
        } else {
            bar('c') - bar('e') * 2 / (levels.len() as i32 - 2)
        };
        rect(x, y4, x + w, y4 + h4, [*level, *level, *level]);
        x += w;
    }

    commands
}

/// Window pattern: optional background full-field, then either an
/// area-proportional window or (at 100%) a full-field foreground.
pub fn window(
    percent: f32,
    r: i32,
    g: i32,
    b: i32,
    max_value: f32,
    bg: [i32; 3],
) -> Vec<PatternCommand> {
    let mut commands = Vec::new();

    if bg != [0, 0, 0] {
        commands.push(PatternCommand::full_field_from_code(
            bg[0], bg[1], bg[2], max_value,
        ));
    }

    if percent < 100.0 {
        commands.push(PatternCommand::window_from_code(percent, r, g, b, max_value));
    } else {
        commands.push(PatternCommand::full_field_from_code(r, g, b, max_value));
    }

    commands
}

/// Parse a draw-string batch: `;`-separated commands, each either
/// `window <percent> <r> <g> <b>` or
/// `draw <x1> <y1> <x2> <y2> <r g b | 12 corner codes + quant>`.
///
/// A single malformed command fails the entire batch (all-or-nothing).
/// Blank input yields an empty batch.
pub fn parse_draw_string(draw_string: &str, bit_depth: u8) -> Option<Vec<PatternCommand>> {
    let max_value = ((1u32 << bit_depth) - 1) as f32;
    let mut commands = Vec::new();

    if draw_string.trim().is_empty() {
        return Some(commands);
    }

    for part in draw_string.split(';') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        commands.push(parse_command(trimmed, max_value)?);
    }
    Some(commands)
}

fn parse_command(text: &str, max_value: f32) -> Option<PatternCommand> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.first()? {
        &"window" => parse_window(&tokens, max_value),
        &"draw" => parse_draw(&tokens, max_value),
        _ => None,
    }
}

fn parse_window(tokens: &[&str], max_value: f32) -> Option<PatternCommand> {
    if tokens.len() < 5 {
        return None;
    }
    let percent: f32 = tokens[1].parse().ok()?;
    if percent <= 0.0 || percent > 100.0 {
        return None;
    }
    let r: i32 = tokens[2].parse().ok()?;
    let g: i32 = tokens[3].parse().ok()?;
    let b: i32 = tokens[4].parse().ok()?;
    let max = max_value as i32;
    if !(0..=max).contains(&r) || !(0..=max).contains(&g) || !(0..=max).contains(&b) {
        return None;
    }
    Some(PatternCommand::window_from_code(percent, r, g, b, max_value))
}

fn parse_draw(tokens: &[&str], max_value: f32) -> Option<PatternCommand> {
    if tokens.len() < 8 {
        return None;
    }
    let x1: f32 = tokens[1].parse().ok()?;
    let y1: f32 = tokens[2].parse().ok()?;
    let x2: f32 = tokens[3].parse().ok()?;
    let y2: f32 = tokens[4].parse().ok()?;

    if tokens.len() == 8 {
        let r: i32 = tokens[5].parse().ok()?;
        let g: i32 = tokens[6].parse().ok()?;
        let b: i32 = tokens[7].parse().ok()?;
        let color = [
            r as f32 / max_value,
            g as f32 / max_value,
            b as f32 / max_value,
        ];
        Some(PatternCommand::solid(x1, y1, x2, y2, color))
    } else if tokens.len() == 18 {
        let mut values = [0i32; 13];
        for (slot, token) in values.iter_mut().zip(&tokens[5..18]) {
            *slot = token.parse().ok()?;
        }
        let corner = |base: usize| {
            [
                values[base] as f32 / max_value,
                values[base + 1] as f32 / max_value,
                values[base + 2] as f32 / max_value,
            ]
        };
        Some(PatternCommand::new(
            x1,
            y1,
            x2,
            y2,
            corner(0),
            corner(3),
            corner(6),
            corner(9),
            values[12] as f32 / max_value,
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }

    #[test]
    fn test_pluge_sdr_reference_fixture() {
        let commands = pluge(false, false);
        assert_eq!(commands.len(), 24);

        // Background: full-field at video black (code 64, 8-bit scale).
        let bg = &commands[0];
        assert_close(bg.x1, -1.0);
        assert_close(bg.y1, 1.0);
        assert_close(bg.x2, 1.0);
        assert_close(bg.y2, -1.0);
        assert_close(bg.top_left[0], (64.0 / 4.0) / 255.0);

        // Bright reference patch: code 940, centered column d..e, rows e..f.
        let bright = &commands[1];
        assert_close(bright.top_left[0], (940.0 / 4.0) / 255.0);
        assert_close(bright.x1, -1.0 + 2.0 * 1776.0 / 3840.0);
        assert_close(bright.y1, 1.0 - 2.0 * 936.0 / 2160.0);
        assert_close(bright.x2, -1.0 + 2.0 * 2064.0 / 3840.0);
        assert_close(bright.y2, 1.0 - 2.0 * 1224.0 / 2160.0);

        // Lighter and darker sub-black bars.
        assert_close(commands[2].top_left[0], (80.0 / 4.0) / 255.0);
        assert_close(commands[3].top_left[0], (48.0 / 4.0) / 255.0);

        // Ladder: first ten lighter, last ten darker, 40-row stride.
        for (i, cmd) in commands[4..].iter().enumerate() {
            let expected = if i < 10 { 80.0 } else { 48.0 };
            assert_close(cmd.top_left[0], (expected / 4.0) / 255.0);
            assert_close(cmd.x1, -1.0 + 2.0 * 624.0 / 3840.0);
            let y1 = 690.0 + 40.0 * i as f32;
            assert_close(cmd.y1, 1.0 - 2.0 * y1 / 2160.0);
            assert_close(cmd.y2, 1.0 - 2.0 * (y1 + 20.0) / 2160.0);
        }
    }

    #[test]
    fn test_pluge_hdr_uses_ten_bit_codes() {
        let commands = pluge(true, true);
        assert_eq!(commands.len(), 24);
        assert_close(commands[0].top_left[0], 64.0 / 1023.0);
        assert_close(commands[1].top_left[0], 399.0 / 1023.0);
    }

    #[test]
    fn test_bars_row_structure() {
        let commands = bars(true);
        // 7 + 8 + (3 + 9 + 3) + 15 rectangles.
        assert_eq!(commands.len(), 45);

        // First bar: limited-range white over the first 240-cell column.
        let white = &commands[0];
        assert_close(white.top_left[0], 940.0 / 1023.0);
        assert_close(white.x1, -1.0);
        assert_close(white.x2, -1.0 + 2.0 * 240.0 / 1920.0);
        assert_close(white.y1, 1.0);
        assert_close(white.y2, 1.0 - 2.0 * 240.0 / 1080.0);

        // Row 2 starts below row 1.
        assert_close(commands[7].y1, 1.0 - 2.0 * 240.0 / 1080.0);
        assert_close(commands[7].top_left[0], 572.0 / 1023.0);

        // Luma ladder: first step at the mid gray, bottom row.
        let ladder = &commands[30];
        assert_close(ladder.top_left[0], 572.0 / 1023.0);
        assert_close(ladder.y2, -1.0);
    }

    #[test]
    fn test_bars_full_range_codes() {
        let commands = bars(false);
        assert_eq!(commands.len(), 45);
        assert_close(commands[0].top_left[0], 1.0);
        assert_close(commands[1].top_left[2], 0.0);
    }

    #[test]
    fn test_window_with_background() {
        let commands = window(10.0, 255, 255, 255, 255.0, [16, 16, 16]);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], PatternCommand::full_field_from_code(16, 16, 16, 255.0));
        let e = window_extent(10.0);
        assert_close(commands[1].x1, -e);
        assert_close(commands[1].y1, e);
    }

    #[test]
    fn test_window_hundred_percent_is_full_field() {
        let windowed = window(100.0, 200, 100, 50, 1023.0, [0, 0, 0]);
        assert_eq!(windowed.len(), 1);
        assert_eq!(
            windowed[0],
            PatternCommand::full_field_from_code(200, 100, 50, 1023.0)
        );
    }

    #[test]
    fn test_parse_window_command() {
        let commands = parse_draw_string("window 25 255 128 0", 8).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            PatternCommand::window_from_code(25.0, 255, 128, 0, 255.0)
        );
    }

    #[test]
    fn test_parse_draw_simple_and_gradient() {
        let commands =
            parse_draw_string("draw -0.5 0.5 0.5 -0.5 255 0 0", 8).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].top_left, [1.0, 0.0, 0.0]);

        let gradient = parse_draw_string(
            "draw -1 1 1 -1 255 0 0 0 255 0 0 0 255 255 255 255 128",
            8,
        )
        .unwrap();
        assert_eq!(gradient.len(), 1);
        assert_eq!(gradient[0].top_right, [0.0, 1.0, 0.0]);
        assert_eq!(gradient[0].bottom_right, [1.0, 1.0, 1.0]);
        assert_close(gradient[0].quant, 128.0 / 255.0);
    }

    #[test]
    fn test_parse_multiple_commands() {
        let commands =
            parse_draw_string("window 100 0 0 0; draw -1 1 1 -1 64 64 64", 10).unwrap();
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn test_parse_rejects_whole_batch_on_one_bad_command() {
        assert!(parse_draw_string("window 10 255 0 0; draw 1 2", 8).is_none());
        assert!(parse_draw_string("window 0 255 0 0", 8).is_none());
        assert!(parse_draw_string("window 10 999 0 0", 8).is_none());
        assert!(parse_draw_string("circle 1 2 3", 8).is_none());
        // Token count between the two draw forms is invalid.
        assert!(parse_draw_string("draw -1 1 1 -1 255 0 0 0", 8).is_none());
    }

    #[test]
    fn test_parse_blank_is_empty_batch() {
        assert_eq!(parse_draw_string("   ", 8).unwrap().len(), 0);
        assert_eq!(parse_draw_string("window 10 1 1 1;;", 8).unwrap().len(), 1);
    }
}
