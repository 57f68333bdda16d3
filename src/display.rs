//! Display sinks.
//!
//! A [`DisplaySink`] receives a [`NormalizedImage`] that is already at the
//! panel's native resolution and orientation; sinks never crop or rotate.
//!
//! The configured `device.display_type` selects the sink:
//!
//! | `display_type` | Kind | Sink |
//! |---|---|---|
//! | `local` | [`DisplayKind::Local`] | [`LocalSink`] |
//! | `inky` | [`DisplayKind::Inky`] | local (no driver built in) |
//! | `epd*in*` | [`DisplayKind::Waveshare`] | local (no driver built in) |
//! | anything else | [`DisplayKind::Unsupported`] | local |
//!
//! Falling back never fails startup: a device without its panel driver still
//! produces images, just as PNG files.

use crate::config::DeviceConfig;
use crate::imaging::NormalizedImage;
use crate::state::DeviceState;
use crate::types::Resolution;
use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name the local sink writes the current image to.
pub const CURRENT_IMAGE: &str = "current_image.png";
/// Subdirectory of the output dir holding timestamped copies.
pub const HISTORY_DIR: &str = "local_outputs";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image encode error: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Display rejected image: {0}")]
    Rejected(String),
}

/// Capability interface every display backend implements.
pub trait DisplaySink: Send {
    /// Short name persisted in the device state (`local`, …).
    fn kind(&self) -> &str;

    /// Prepare the backend. Fills in the sink's default resolution when the
    /// device state has none.
    fn initialize(&mut self, state: &mut DeviceState) -> Result<(), SinkError>;

    /// Show `image` on the panel.
    fn display(&mut self, image: &NormalizedImage) -> Result<(), SinkError>;
}

/// Parsed `device.display_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayKind {
    Local,
    Inky,
    /// Waveshare e-paper HAT, e.g. `epd7in3f`.
    Waveshare { model: String },
    Unsupported(String),
}

impl DisplayKind {
    pub fn parse(display_type: &str) -> Self {
        match display_type {
            "local" => DisplayKind::Local,
            "inky" => DisplayKind::Inky,
            t if is_waveshare_model(t) => DisplayKind::Waveshare {
                model: t.to_string(),
            },
            other => DisplayKind::Unsupported(other.to_string()),
        }
    }
}

impl fmt::Display for DisplayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayKind::Local => f.write_str("local"),
            DisplayKind::Inky => f.write_str("inky"),
            DisplayKind::Waveshare { model } => write!(f, "waveshare ({model})"),
            DisplayKind::Unsupported(t) => write!(f, "unsupported ({t})"),
        }
    }
}

/// Matches the `epd*in*` model naming (`epd7in3f`, `epd2in13_V4`, …).
fn is_waveshare_model(display_type: &str) -> bool {
    display_type
        .strip_prefix("epd")
        .is_some_and(|rest| rest.contains("in"))
}

/// Build the sink for the configured display type.
pub fn resolve_sink(device: &DeviceConfig) -> Box<dyn DisplaySink> {
    let kind = DisplayKind::parse(&device.display_type);
    match &kind {
        DisplayKind::Local => {}
        DisplayKind::Inky | DisplayKind::Waveshare { .. } => {
            log::warn!("no {kind} driver in this build, falling back to local display");
        }
        DisplayKind::Unsupported(t) => {
            log::warn!("unsupported display type {t:?}, using local display");
        }
    }
    Box::new(LocalSink::new(&device.output_dir, device.keep_history))
}

/// Writes images to PNG files instead of driving hardware.
#[derive(Debug, Clone)]
pub struct LocalSink {
    output_dir: PathBuf,
    keep_history: bool,
}

impl LocalSink {
    pub fn new(output_dir: impl Into<PathBuf>, keep_history: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            keep_history,
        }
    }

    pub fn current_image_path(&self) -> PathBuf {
        self.output_dir.join(CURRENT_IMAGE)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.output_dir.join(HISTORY_DIR)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl DisplaySink for LocalSink {
    fn kind(&self) -> &str {
        "local"
    }

    fn initialize(&mut self, state: &mut DeviceState) -> Result<(), SinkError> {
        if state.resolution.is_none() {
            state.resolution = Some(Resolution::default());
        }
        std::fs::create_dir_all(&self.output_dir)?;
        log::info!(
            "local display ready at {} ({})",
            self.output_dir.display(),
            state.resolution.unwrap_or_default()
        );
        Ok(())
    }

    fn display(&mut self, image: &NormalizedImage) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let current = self.current_image_path();
        image.as_rgb().save(&current)?;
        log::info!("image saved to {}", current.display());

        if self.keep_history {
            let dir = self.history_dir();
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(format!("display_output_{}.png", Utc::now().timestamp()));
            image.as_rgb().save(&path)?;
            log::debug!("history copy saved to {}", path.display());
        }
        Ok(())
    }
}
