//! Process-wide watermark settings
//!
//! Persisted under the `watermark` key as
//! `{text, enabled, fontSize, opacity, position, color, includeUserId, includeTimestamp}`.
//! Out-of-range values are clamped when the record is built, never at use.

use serde::{Deserialize, Serialize};

pub const MIN_OPACITY: f32 = 0.05;
pub const MAX_OPACITY: f32 = 0.5;
pub const MIN_FONT_SIZE: f32 = 6.0;
pub const MAX_FONT_SIZE: f32 = 96.0;

const DEFAULT_COLOR: &str = "#808080";

/// Placement of the primary watermark mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPosition {
    Diagonal,
    Center,
    Footer,
    Tiled,
}

/// Wire shape of the settings record, before clamping
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRecord {
    text: String,
    enabled: bool,
    font_size: f32,
    opacity: f32,
    position: WatermarkPosition,
    color: String,
    include_user_id: bool,
    include_timestamp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SettingsRecord")]
pub struct WatermarkSettings {
    pub text: String,
    pub enabled: bool,
    font_size: f32,
    opacity: f32,
    pub position: WatermarkPosition,
    color: String,
    pub include_user_id: bool,
    pub include_timestamp: bool,
}

impl From<SettingsRecord> for WatermarkSettings {
    fn from(record: SettingsRecord) -> Self {
        let mut settings = WatermarkSettings::with_text(record.text);
        settings.enabled = record.enabled;
        settings.set_font_size(record.font_size);
        settings.set_opacity(record.opacity);
        settings.position = record.position;
        settings.set_color(&record.color);
        settings.include_user_id = record.include_user_id;
        settings.include_timestamp = record.include_timestamp;
        settings
    }
}

impl WatermarkSettings {
    /// Defaults with the given institution text
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            enabled: true,
            font_size: 14.0,
            opacity: 0.15,
            position: WatermarkPosition::Diagonal,
            color: DEFAULT_COLOR.to_string(),
            include_user_id: true,
            include_timestamp: true,
        }
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() {
            MIN_OPACITY
        } else {
            opacity.clamp(MIN_OPACITY, MAX_OPACITY)
        };
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    pub fn set_font_size(&mut self, font_size: f32) {
        self.font_size = if font_size.is_nan() {
            MIN_FONT_SIZE
        } else {
            font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
        };
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    /// Accepts `#rrggbb`; anything else resets to the default grey
    pub fn set_color(&mut self, color: &str) {
        self.color = if parse_hex_color(color).is_some() {
            color.to_ascii_lowercase()
        } else {
            DEFAULT_COLOR.to_string()
        };
    }

    /// Color as RGB components
    pub fn rgb(&self) -> [u8; 3] {
        parse_hex_color(&self.color).unwrap_or([0x80, 0x80, 0x80])
    }
}

fn parse_hex_color(color: &str) -> Option<[u8; 3]> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

/// Partial update submitted by an admin
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkSettingsUpdate {
    pub text: Option<String>,
    pub enabled: Option<bool>,
    pub font_size: Option<f32>,
    pub opacity: Option<f32>,
    pub position: Option<WatermarkPosition>,
    pub color: Option<String>,
    pub include_user_id: Option<bool>,
    pub include_timestamp: Option<bool>,
}

impl WatermarkSettingsUpdate {
    /// Merge onto the current settings, clamping as the record is built
    pub fn apply(self, mut current: WatermarkSettings) -> WatermarkSettings {
        if let Some(text) = self.text {
            current.text = text;
        }
        if let Some(enabled) = self.enabled {
            current.enabled = enabled;
        }
        if let Some(font_size) = self.font_size {
            current.set_font_size(font_size);
        }
        if let Some(opacity) = self.opacity {
            current.set_opacity(opacity);
        }
        if let Some(position) = self.position {
            current.position = position;
        }
        if let Some(color) = self.color {
            current.set_color(&color);
        }
        if let Some(include_user_id) = self.include_user_id {
            current.include_user_id = include_user_id;
        }
        if let Some(include_timestamp) = self.include_timestamp {
            current.include_timestamp = include_timestamp;
        }
        current
    }
}
