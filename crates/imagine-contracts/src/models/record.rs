use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::AspectRatio;

/// How the edit endpoint should apply the prompt to the reference image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    #[default]
    StyleTransfer,
    Upscale,
    Inpainting,
    BackgroundReplace,
}

impl EditMode {
    pub const ALL: [EditMode; 4] = [
        EditMode::StyleTransfer,
        EditMode::Upscale,
        EditMode::Inpainting,
        EditMode::BackgroundReplace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EditMode::StyleTransfer => "style_transfer",
            EditMode::Upscale => "upscale",
            EditMode::Inpainting => "inpainting",
            EditMode::BackgroundReplace => "background_replace",
        }
    }
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EditMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        EditMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| format!("unknown edit mode '{}'", raw.trim()))
    }
}

/// One generated image kept in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub url: String,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<EditMode>,
    pub timestamp: i64,
    pub duration: f64,
    #[serde(default, alias = "isImageToImage")]
    pub is_edit: bool,
}

impl ImageRecord {
    pub fn new(
        url: impl Into<String>,
        prompt: impl Into<String>,
        aspect_ratio: AspectRatio,
        mode: Option<EditMode>,
        duration: f64,
    ) -> Self {
        let timestamp = Utc::now().timestamp_millis();
        Self {
            id: record_id(timestamp),
            url: url.into(),
            prompt: prompt.into(),
            aspect_ratio,
            is_edit: mode.is_some(),
            mode,
            timestamp,
            duration,
        }
    }
}

fn record_id(timestamp: i64) -> String {
    let jitter = Uuid::new_v4().simple().to_string();
    format!("{timestamp}-{}", &jitter[..8])
}

// Older galleries stored the id as a float (millis plus random fraction).
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "image id must be a string or number, got {other}"
        ))),
    }
}
