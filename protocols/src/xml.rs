//! Attribute scanner for the calibration XML dialects.
//!
//! This is deliberately not a general-purpose XML parser. The calibration
//! peers (DisplayCAL, Calman, ColourSpace) emit small, flat documents with
//! irregular whitespace, and the contract is to tolerate anything a strict
//! parser might reject: attributes are located by scanning for `name="` and
//! the following quote, first occurrence wins, and unknown content is
//! ignored. Do not replace this with a real parser.

use tracing::error;

/// One decoded calibration frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationFrame {
    /// Foreground color, normalized.
    pub color: [f32; 3],
    /// Background color, normalized (0,0,0 when absent).
    pub background: [f32; 3],
    /// Geometry as fractions of the full screen: top-left offset.
    pub x: f32,
    pub y: f32,
    /// Geometry extents as fractions of the full screen.
    pub cx: f32,
    pub cy: f32,
    /// Requested output bit depth.
    pub bits: i32,
}

impl CalibrationFrame {
    /// True when the geometry exactly covers the whole screen.
    pub fn is_full_field(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.cx == 1.0 && self.cy == 1.0
    }
}

/// Parse either dialect, selected by the presence of a `<rectangle` element.
pub fn parse(xml: &str) -> Option<CalibrationFrame> {
    if xml.contains("<rectangle") {
        parse_nested(xml)
    } else {
        parse_generic(xml)
    }
}

/// Generic dialect: top-level `<color>`, optional `<background>` and
/// `<geometry>` elements.
pub fn parse_generic(xml: &str) -> Option<CalibrationFrame> {
    let color_section = match extract_element(xml, "color") {
        Some(section) => section,
        None => {
            error!("calibration XML is missing the <color> element");
            return None;
        }
    };
    Some(frame_from_sections(
        color_section,
        extract_element(xml, "background"),
        extract_element(xml, "geometry"),
        extract_int_attribute(color_section, "bits").unwrap_or(8),
    ))
}

/// Nested dialect: the same elements wrapped in `<rectangle bits="..">`.
/// Falls back to the generic dialect when no `<rectangle>` is found.
pub fn parse_nested(xml: &str) -> Option<CalibrationFrame> {
    let rect = match extract_element(xml, "rectangle") {
        Some(rect) => rect,
        None => return parse_generic(xml),
    };
    let bits = extract_int_attribute(rect, "bits").unwrap_or(8);

    let color_section = match extract_element(rect, "color") {
        Some(section) => section,
        None => {
            error!("calibration XML is missing <color> inside <rectangle>");
            return None;
        }
    };
    Some(frame_from_sections(
        color_section,
        extract_element(rect, "background"),
        extract_element(rect, "geometry"),
        bits,
    ))
}

fn frame_from_sections(
    color: &str,
    background: Option<&str>,
    geometry: Option<&str>,
    bits: i32,
) -> CalibrationFrame {
    let attr = |section: Option<&str>, name: &str, default: f32| {
        section
            .and_then(|s| extract_attribute(s, name))
            .unwrap_or(default)
    };

    CalibrationFrame {
        color: [
            extract_attribute(color, "red").unwrap_or(0.0),
            extract_attribute(color, "green").unwrap_or(0.0),
            extract_attribute(color, "blue").unwrap_or(0.0),
        ],
        background: [
            attr(background, "red", 0.0),
            attr(background, "green", 0.0),
            attr(background, "blue", 0.0),
        ],
        x: attr(geometry, "x", 0.0),
        y: attr(geometry, "y", 0.0),
        cx: attr(geometry, "cx", 1.0),
        cy: attr(geometry, "cy", 1.0),
        bits,
    }
}

/// Extract the raw text of an element: a self-closing `<name .../>` anywhere
/// in the input wins; otherwise the span from the first `<name` to its
/// closing tag, or just the open tag if no closing tag exists.
fn extract_element<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}");

    // Self-closing form first, scanning every occurrence.
    let mut search_from = 0;
    while let Some(rel) = xml[search_from..].find(&open) {
        let start = search_from + rel;
        let after = start + open.len();
        let next = xml[after..].chars().next();
        if next.is_some_and(|c| c.is_whitespace()) {
            if let Some(gt) = xml[after..].find('>') {
                let end = after + gt;
                if xml[..end].ends_with('/') {
                    return Some(&xml[start..=end]);
                }
            }
        }
        search_from = after;
    }

    let start = xml.find(&open)?;
    let close = format!("</{name}>");
    match xml[start..].find(&close) {
        Some(rel) => Some(&xml[start..start + rel + close.len()]),
        None => {
            let gt = xml[start..].find('>')?;
            Some(&xml[start..=start + gt])
        }
    }
}

/// Locate `name="value"` by plain substring search; first occurrence wins.
fn extract_attribute(section: &str, name: &str) -> Option<f32> {
    let pattern = format!("{name}=\"");
    let start = section.find(&pattern)? + pattern.len();
    let end = section[start..].find('"')?;
    section[start..start + end].parse().ok()
}

fn extract_int_attribute(section: &str, name: &str) -> Option<i32> {
    extract_attribute(section, name).map(|v| v as i32)
}
