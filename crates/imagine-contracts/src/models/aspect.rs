use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Width:height presets accepted by the generation endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[default]
    #[serde(rename = "2:3")]
    Portrait,
    #[serde(rename = "3:2")]
    Landscape,
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    PhonePortrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Widescreen,
        AspectRatio::PhonePortrait,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "2:3",
            AspectRatio::Landscape => "3:2",
            AspectRatio::Widescreen => "16:9",
            AspectRatio::PhonePortrait => "9:16",
        }
    }

    pub fn dims(&self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (1024, 1024),
            AspectRatio::Portrait => (1024, 1536),
            AspectRatio::Landscape => (1536, 1024),
            AspectRatio::Widescreen => (1792, 1024),
            AspectRatio::PhonePortrait => (1024, 1792),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AspectRatio::Square => "square",
            AspectRatio::Portrait => "portrait",
            AspectRatio::Landscape => "landscape",
            AspectRatio::Widescreen => "widescreen",
            AspectRatio::PhonePortrait => "phone portrait",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| {
                let known = AspectRatio::ALL
                    .iter()
                    .map(AspectRatio::as_str)
                    .collect::<Vec<&str>>()
                    .join(", ");
                format!("unknown aspect ratio '{trimmed}' (expected one of {known})")
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickPreset {
    pub name: &'static str,
    pub aspect_ratio: AspectRatio,
    pub count: u32,
    pub description: &'static str,
}

pub const QUICK_PRESETS: [QuickPreset; 4] = [
    QuickPreset {
        name: "social",
        aspect_ratio: AspectRatio::Square,
        count: 1,
        description: "Square post for social feeds",
    },
    QuickPreset {
        name: "phone-wallpaper",
        aspect_ratio: AspectRatio::PhonePortrait,
        count: 1,
        description: "Tall phone lock screen",
    },
    QuickPreset {
        name: "desktop-wallpaper",
        aspect_ratio: AspectRatio::Widescreen,
        count: 1,
        description: "Widescreen desktop background",
    },
    QuickPreset {
        name: "batch",
        aspect_ratio: AspectRatio::Portrait,
        count: 4,
        description: "Four portrait images in one request",
    },
];

impl QuickPreset {
    pub fn find(name: &str) -> Option<&'static QuickPreset> {
        let lowered = name.trim().to_ascii_lowercase();
        QUICK_PRESETS.iter().find(|preset| preset.name == lowered)
    }
}
