//! Shared types used across the refresh pipeline.
//!
//! These cross module boundaries (config → scheduler → plugins → imaging →
//! sink) and some are persisted, so they carry serde derives.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Plugin settings: string keys mapped to scalar or structured values.
pub type Settings = serde_json::Map<String, serde_json::Value>;

/// Panel resolution in the device's native frame.
///
/// Serialized as a `[width, height]` pair, matching how it is written in
/// `config.toml` and in the persisted device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both edges are non-zero.
    pub fn is_valid(self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn swapped(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

impl Default for Resolution {
    /// 800×480, the most common small e-paper panel.
    fn default() -> Self {
        Self::new(800, 480)
    }
}

impl From<[u32; 2]> for Resolution {
    fn from([width, height]: [u32; 2]) -> Self {
        Self { width, height }
    }
}

impl From<Resolution> for [u32; 2] {
    fn from(r: Resolution) -> Self {
        [r.width, r.height]
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How the panel is mounted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Horizontal,
    Vertical,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Horizontal => f.write_str("horizontal"),
            Orientation::Vertical => f.write_str("vertical"),
        }
    }
}

/// Enhancement multipliers, applied in field order.
///
/// Every factor defaults to 1.0, which leaves the image untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StyleProfile {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub sharpness: f32,
}

impl Default for StyleProfile {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            sharpness: 1.0,
        }
    }
}

impl StyleProfile {
    /// Factors in application order, labelled for diagnostics.
    pub fn factors(&self) -> [(&'static str, f32); 4] {
        [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
            ("sharpness", self.sharpness),
        ]
    }
}

/// What a plugin is told about the device it is drawing for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Native panel resolution.
    pub resolution: Resolution,
    pub orientation: Orientation,
    pub inverted: bool,
}

impl DeviceProfile {
    /// Dimensions a plugin should lay its content out at.
    ///
    /// A vertically mounted panel shows portrait content, which the
    /// transform pipeline later rotates into the native frame.
    pub fn content_dimensions(&self) -> Resolution {
        match self.orientation {
            Orientation::Horizontal => self.resolution,
            Orientation::Vertical => self.resolution.swapped(),
        }
    }
}

/// Everything one cycle needs to turn a source into a displayable image.
///
/// Built fresh at the start of each cycle and only ever shared by reference
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub source_id: String,
    pub plugin: String,
    pub settings: Settings,
    pub resolution: Resolution,
    pub orientation: Orientation,
    pub inverted: bool,
    /// Never crop horizontally (see [`crate::imaging`]).
    pub keep_width: bool,
    pub style: StyleProfile,
}

impl RenderRequest {
    pub fn device_profile(&self) -> DeviceProfile {
        DeviceProfile {
            resolution: self.resolution,
            orientation: self.orientation,
            inverted: self.inverted,
        }
    }
}

/// An HTML document produced by a plugin, waiting to be rasterized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDocument {
    pub markup: String,
    /// Directory relative asset references resolve against.
    pub base_dir: Option<PathBuf>,
}

impl HtmlDocument {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }
}

/// Raw plugin output, owned by the cycle that requested it.
#[derive(Debug, Clone)]
pub enum RawArtifact {
    Image(image::DynamicImage),
    Html(HtmlDocument),
}

/// Why a cycle was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Scheduled,
    Manual,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Scheduled => f.write_str("scheduled"),
            Priority::Manual => f.write_str("manual"),
        }
    }
}
