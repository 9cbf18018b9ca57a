//! Picture-control facade over the SSAP client.
//!
//! Maps calibration operations (white balance, CMS, processing toggles)
//! onto webOS `picture` settings writes. All numeric values go over the
//! wire as strings; that is what the settings service expects.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info};

use crate::ssap::{ResponseCallback, SsapClient, SsapResult};

pub const PICTURE_MODES: &[&str] = &[
    "cinema",
    "expert1",
    "expert2",
    "filmMaker",
    "game",
    "normal",
    "sports",
    "vivid",
    "hdrCinema",
    "hdrCinemaBright",
    "hdrFilmMaker",
    "hdrGame",
    "hdrStandard",
    "hdrVivid",
];

pub const COLOR_GAMUTS: &[&str] = &[
    "auto", "extended", "wide", "srgb", "native", "adobe", "bt2020",
];

pub const GAMMA_OPTIONS: &[&str] = &[
    "low", "medium", "high1", "high2", "1.9", "2.0", "2.1", "2.2", "2.4", "2.6", "bt1886",
];

pub const COLOR_TEMPS: &[&str] = &["warm50", "warm40", "warm30", "warm20", "warm10", "0",
    "cool10", "cool20", "cool30", "cool40", "cool50"];

/// Channels addressable through the color management system.
pub const CMS_COLORS: &[&str] = &["Red", "Green", "Blue", "Cyan", "Magenta", "Yellow"];

const CATEGORY_PICTURE: &str = "picture";

/// High-level calibration controls for one TV.
///
/// Clones share the underlying SSAP connection.
#[derive(Clone)]
pub struct TvController {
    client: Arc<SsapClient>,
}

impl TvController {
    pub fn new(client: Arc<SsapClient>) -> Self {
        Self { client }
    }

    fn set(&self, operation: &str, settings: Value, callback: ResponseCallback) {
        self.client.set_system_settings(
            CATEGORY_PICTURE,
            settings,
            wrap_callback(operation, callback),
        );
    }

    pub fn set_picture_mode(&self, mode: &str, callback: ResponseCallback) {
        self.set("picture mode", json!({ "pictureMode": mode }), callback);
    }

    pub fn set_backlight(&self, value: i32, callback: ResponseCallback) {
        self.set("backlight", json!({ "backlight": value.to_string() }), callback);
    }

    pub fn set_contrast(&self, value: i32, callback: ResponseCallback) {
        self.set("contrast", json!({ "contrast": value.to_string() }), callback);
    }

    pub fn set_brightness(&self, value: i32, callback: ResponseCallback) {
        self.set("brightness", json!({ "brightness": value.to_string() }), callback);
    }

    pub fn set_color(&self, value: i32, callback: ResponseCallback) {
        self.set("color", json!({ "color": value.to_string() }), callback);
    }

    pub fn set_sharpness(&self, value: i32, callback: ResponseCallback) {
        self.set("sharpness", json!({ "sharpness": value.to_string() }), callback);
    }

    /// One write for the basic picture sliders.
    pub fn apply_picture_settings(
        &self,
        backlight: i32,
        contrast: i32,
        brightness: i32,
        color: i32,
        callback: ResponseCallback,
    ) {
        self.set(
            "picture settings",
            json!({
                "backlight": backlight.to_string(),
                "contrast": contrast.to_string(),
                "brightness": brightness.to_string(),
                "color": color.to_string(),
            }),
            callback,
        );
    }

    pub fn set_color_gamut(&self, gamut: &str, callback: ResponseCallback) {
        self.set("color gamut", json!({ "colorGamut": gamut }), callback);
    }

    pub fn set_gamma(&self, gamma: &str, callback: ResponseCallback) {
        self.set("gamma", json!({ "gamma": gamma }), callback);
    }

    pub fn set_color_temperature(&self, temperature: &str, callback: ResponseCallback) {
        self.set(
            "color temperature",
            json!({ "colorTemperature": temperature }),
            callback,
        );
    }

    /// One write for gamut, gamma and temperature together.
    pub fn apply_color_settings(
        &self,
        gamut: &str,
        gamma: &str,
        temperature: &str,
        callback: ResponseCallback,
    ) {
        self.set(
            "color settings",
            json!({
                "colorGamut": gamut,
                "gamma": gamma,
                "colorTemperature": temperature,
            }),
            callback,
        );
    }

    pub fn set_dynamic_contrast(&self, enabled: bool, callback: ResponseCallback) {
        self.set(
            "dynamic contrast",
            json!({ "dynamicContrast": on_off(enabled) }),
            callback,
        );
    }

    pub fn set_hdr_dynamic_tone_mapping(&self, enabled: bool, callback: ResponseCallback) {
        self.set(
            "dynamic tone mapping",
            json!({ "hdrDynamicToneMapping": on_off(enabled) }),
            callback,
        );
    }

    pub fn set_black_level(&self, level: &str, callback: ResponseCallback) {
        self.set("black level", json!({ "blackLevel": level }), callback);
    }

    /// Turn off every enhancement that would distort measurements.
    pub fn disable_all_processing(&self, callback: ResponseCallback) {
        self.set(
            "disable processing",
            json!({
                "dynamicContrast": "off",
                "hdrDynamicToneMapping": "off",
                "sharpness": "0",
                "noiseReduction": "off",
                "mpegNoiseReduction": "off",
                "smoothGradation": "off",
                "realCinema": "off",
            }),
            callback,
        );
    }

    /// 2-point white balance: RGB gains (high end) and offsets (low end).
    pub fn set_white_balance_2pt(
        &self,
        gains: [i32; 3],
        offsets: [i32; 3],
        callback: ResponseCallback,
    ) {
        self.set(
            "2pt white balance",
            json!({
                "whiteBalanceMethod": "2",
                "whiteBalanceColorTemperature": "warm50",
                "whiteBalanceRedGain": gains[0].to_string(),
                "whiteBalanceGreenGain": gains[1].to_string(),
                "whiteBalanceBlueGain": gains[2].to_string(),
                "whiteBalanceRedOffset": offsets[0].to_string(),
                "whiteBalanceGreenOffset": offsets[1].to_string(),
                "whiteBalanceBlueOffset": offsets[2].to_string(),
            }),
            callback,
        );
    }

    /// One point of the 20-point white balance ladder. `index` 0..=19 maps
    /// to 5% IRE steps.
    pub fn set_white_balance_20pt_point(
        &self,
        index: u8,
        r: i32,
        g: i32,
        b: i32,
        callback: ResponseCallback,
    ) {
        self.set(
            "20pt white balance",
            json!({
                "whiteBalanceMethod": "20",
                "whiteBalancePoint": index.to_string(),
                "whiteBalanceIre": (index as i32 * 5).to_string(),
                "whiteBalanceRed": r.to_string(),
                "whiteBalanceGreen": g.to_string(),
                "whiteBalanceBlue": b.to_string(),
            }),
            callback,
        );
    }

    /// Hue/saturation/luminance for one CMS channel; see [`CMS_COLORS`].
    pub fn set_cms_color(
        &self,
        color: &str,
        hue: i32,
        saturation: i32,
        luminance: i32,
        callback: ResponseCallback,
    ) {
        let mut settings = serde_json::Map::new();
        settings.insert(format!("colorManagement{color}Hue"), json!(hue.to_string()));
        settings.insert(
            format!("colorManagement{color}Saturation"),
            json!(saturation.to_string()),
        );
        settings.insert(
            format!("colorManagement{color}Luminance"),
            json!(luminance.to_string()),
        );
        self.set("cms", Value::Object(settings), callback);
    }

    /// Zero every CMS channel.
    pub fn reset_cms(&self, callback: ResponseCallback) {
        let mut settings = serde_json::Map::new();
        for color in CMS_COLORS {
            settings.insert(format!("colorManagement{color}Hue"), json!("0"));
            settings.insert(format!("colorManagement{color}Saturation"), json!("0"));
            settings.insert(format!("colorManagement{color}Luminance"), json!("0"));
        }
        self.set("reset cms", Value::Object(settings), callback);
    }

    /// Neutral gains and zero offsets on the 2-point controls.
    pub fn reset_white_balance(&self, callback: ResponseCallback) {
        self.set_white_balance_2pt([0, 0, 0], [0, 0, 0], callback);
    }

    /// Read the current picture settings back.
    pub fn read_picture_settings(&self, callback: ResponseCallback) {
        self.client.get_system_settings(
            CATEGORY_PICTURE,
            &[
                "pictureMode",
                "backlight",
                "contrast",
                "brightness",
                "color",
                "sharpness",
                "colorGamut",
                "gamma",
                "colorTemperature",
                "dynamicContrast",
                "hdrDynamicToneMapping",
                "blackLevel",
            ],
            wrap_callback("read picture settings", callback),
        );
    }

    pub fn show_toast(&self, message: &str, callback: ResponseCallback) {
        self.client.show_toast(message, callback);
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Log the outcome of a settings write before handing it to the caller.
fn wrap_callback(operation: &str, callback: ResponseCallback) -> ResponseCallback {
    let operation = operation.to_string();
    Arc::new(move |result| {
        match &result {
            SsapResult::Response(payload) => {
                if payload.get("returnValue") == Some(&Value::Bool(true)) {
                    info!("{operation}: ok");
                } else if let Some(text) = payload.get("errorText").and_then(Value::as_str) {
                    error!("{operation}: {text}");
                } else {
                    info!("{operation}: {payload}");
                }
            }
            SsapResult::Error(message) => error!("{operation}: {message}"),
        }
        callback(result);
    })
}
