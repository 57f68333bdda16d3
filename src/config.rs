//! Application configuration module.
//!
//! Handles loading, validating, and merging the `inkrefresh.toml` file. Stock
//! defaults are overridden by whatever the user file specifies; everything is
//! optional except the `id` and `plugin` of each source.
//!
//! ## Configuration Options
//!
//! ```toml
//! [device]
//! display_type = "local"        # local | inky | epd7in3f … (unknown → local)
//! resolution = [800, 480]       # native panel size; omit to let the sink decide
//! orientation = "horizontal"    # horizontal | vertical
//! inverted = false              # panel mounted upside down
//! state_file = "state/device.json"
//! output_dir = "output"         # where the local sink writes PNGs
//! keep_history = true           # also keep timestamped copies
//! startup_image = true          # test card on a device that has shown nothing yet
//!
//! [device.style]
//! brightness = 1.0
//! contrast = 1.0
//! saturation = 1.0
//! sharpness = 1.0
//!
//! [renderer]
//! candidates = ["chromium-headless-shell", "chromium", "google-chrome-stable", "google-chrome"]
//! timeout_ms = 30000
//!
//! [scheduler]
//! plugin_timeout_secs = 60
//! degraded_after = 3
//!
//! [[sources]]
//! id = "notes"
//! plugin = "markdown"
//! interval_minutes = 30
//! keep_width = false
//! [sources.settings]
//! title = "Today"
//! text = "- water the plants"
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse — override just the values you want:
//!
//! ```toml
//! [device]
//! orientation = "vertical"
//! ```
//!
//! Unknown keys are rejected to catch typos early. Plugin `settings` tables
//! are the exception: they are passed through to the plugin untouched.

use crate::types::{Orientation, Settings, StyleProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Application configuration loaded from `inkrefresh.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// The panel and where its output goes.
    pub device: DeviceConfig,
    /// Headless browser used to rasterize HTML plugin output.
    pub renderer: RendererConfig,
    /// Timing budgets and failure thresholds.
    pub scheduler: SchedulerConfig,
    /// Sources shown on the display, each on its own interval.
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some([w, h]) = self.device.resolution
            && (w == 0 || h == 0)
        {
            return Err(ConfigError::Validation(
                "device.resolution values must be non-zero".into(),
            ));
        }
        validate_style("device.style", &self.device.style)?;

        if self.renderer.candidates.is_empty() {
            return Err(ConfigError::Validation(
                "renderer.candidates must not be empty".into(),
            ));
        }
        for candidate in &self.renderer.candidates {
            match shell_words::split(candidate) {
                Ok(words) if !words.is_empty() => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "renderer.candidates entry {candidate:?} is not a valid command line"
                    )));
                }
            }
        }
        if self.renderer.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "renderer.timeout_ms must be positive".into(),
            ));
        }
        if self.scheduler.plugin_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "scheduler.plugin_timeout_secs must be positive".into(),
            ));
        }
        if self.scheduler.degraded_after == 0 {
            return Err(ConfigError::Validation(
                "scheduler.degraded_after must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(ConfigError::Validation("sources.id must not be empty".into()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate source id {:?}",
                    source.id
                )));
            }
            if source.plugin.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "source {:?} has an empty plugin name",
                    source.id
                )));
            }
            if source.interval_minutes == 0 {
                return Err(ConfigError::Validation(format!(
                    "source {:?}: interval_minutes must be positive",
                    source.id
                )));
            }
            if source.interval_minutes > MAX_INTERVAL_MINUTES {
                return Err(ConfigError::Validation(format!(
                    "source {:?}: interval_minutes must be at most {MAX_INTERVAL_MINUTES} (one year)",
                    source.id
                )));
            }
            if let Some(style) = &source.style {
                validate_style(&format!("sources.{}.style", source.id), style)?;
            }
        }
        Ok(())
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }
}

fn validate_style(section: &str, style: &StyleProfile) -> Result<(), ConfigError> {
    for (name, factor) in style.factors() {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{section}.{name} must be a positive number (got {factor})"
            )));
        }
    }
    Ok(())
}

/// The display panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Display sink discriminant. Unknown values fall back to `local`.
    pub display_type: String,
    /// Native resolution `[width, height]`. When absent, the persisted state
    /// or the sink's default is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<[u32; 2]>,
    pub orientation: Orientation,
    pub inverted: bool,
    /// Where the last displayed fingerprint and device settings persist.
    pub state_file: PathBuf,
    /// Output directory for the local file sink.
    pub output_dir: PathBuf,
    /// Keep a timestamped copy of every displayed image.
    pub keep_history: bool,
    /// Show a test card before the first cycle on a device with no display
    /// history.
    pub startup_image: bool,
    /// Enhancement applied to every source unless it brings its own.
    pub style: StyleProfile,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            display_type: "local".to_string(),
            resolution: None,
            orientation: Orientation::Horizontal,
            inverted: false,
            state_file: PathBuf::from("state/device.json"),
            output_dir: PathBuf::from("output"),
            keep_history: true,
            startup_image: true,
            style: StyleProfile::default(),
        }
    }
}

/// HTML rasterizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Browser invocations to try, in order. Each entry is a shell-style
    /// command line; the first whose program exists is used.
    pub candidates: Vec<String>,
    /// Budget for one screenshot, in milliseconds.
    pub timeout_ms: u64,
    /// Parent directory for transient render files (system temp if unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                "chromium-headless-shell".to_string(),
                "chromium".to_string(),
                "google-chrome-stable".to_string(),
                "google-chrome".to_string(),
            ],
            timeout_ms: 30_000,
            work_dir: None,
        }
    }
}

impl RendererConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Scheduler budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Budget for one plugin invocation, in seconds.
    pub plugin_timeout_secs: u64,
    /// Consecutive failures after which a source is reported as degraded.
    pub degraded_after: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            plugin_timeout_secs: 60,
            degraded_after: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }
}

/// One entry of the display rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Unique name, used in logs, status and manual triggers.
    pub id: String,
    /// Registered plugin id (`image`, `markdown`, `html`, …).
    pub plugin: String,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Never crop horizontally when fitting to the panel.
    #[serde(default)]
    pub keep_width: bool,
    /// Overrides `device.style` for this source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleProfile>,
    /// Passed to the plugin as-is.
    #[serde(default)]
    pub settings: Settings,
}

/// Longest accepted refresh interval.
pub const MAX_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

fn default_interval_minutes() -> u64 {
    60
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plugin: plugin.into(),
            interval_minutes: default_interval_minutes(),
            keep_width: false,
            style: None,
            settings: Settings::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(AppConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely (so a user's
///   `[[sources]]` list replaces the stock one instead of appending).
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<AppConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: AppConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the stock defaults.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    if overlay.is_none() {
        log::info!("{} not found, using stock defaults", path.display());
    }
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `inkrefresh.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# inkrefresh configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Display panel
# ---------------------------------------------------------------------------
[device]
# Display backend: "local" writes PNG files. Hardware families ("inky",
# "epd7in3f", ...) fall back to "local" when their driver is not built in.
display_type = "local"

# Native panel resolution as [width, height]. When omitted, the last
# persisted resolution is used, or the display backend's default (800x480).
# resolution = [800, 480]

# "horizontal" or "vertical". Vertical panels get portrait content rotated
# into the panel's native frame.
orientation = "horizontal"

# Panel mounted upside down: rotate everything an extra 180 degrees.
inverted = false

# Where the last displayed image fingerprint is remembered across restarts.
state_file = "state/device.json"

# Output directory for the local display backend.
output_dir = "output"

# Also keep a timestamped copy of every displayed image.
keep_history = true

# On a device that has never displayed anything, show a test card (frame,
# title bars and a gray ramp) before the first refresh.
startup_image = true

# Enhancement multipliers, applied in this order. 1.0 leaves the image as is.
[device.style]
brightness = 1.0
contrast = 1.0
saturation = 1.0
sharpness = 1.0

# ---------------------------------------------------------------------------
# HTML renderer (headless Chromium)
# ---------------------------------------------------------------------------
[renderer]
# Browser command lines to try, in order. The first one whose program is
# found (absolute path, or name on PATH) is used.
candidates = ["chromium-headless-shell", "chromium", "google-chrome-stable", "google-chrome"]

# Budget for one screenshot, in milliseconds. The browser is killed when it
# runs over.
timeout_ms = 30000

# Directory for transient render files (defaults to the system temp dir).
# work_dir = "/var/tmp/inkrefresh"

# ---------------------------------------------------------------------------
# Scheduler
# ---------------------------------------------------------------------------
[scheduler]
# Budget for one plugin invocation, in seconds.
plugin_timeout_secs = 60

# Consecutive failures after which a source is reported as degraded.
# Degraded sources keep being scheduled.
degraded_after = 3

# ---------------------------------------------------------------------------
# Sources
# ---------------------------------------------------------------------------
# Each source names a plugin, a refresh interval and plugin settings.
#
# [[sources]]
# id = "photos"
# plugin = "image"              # image | markdown | html
# interval_minutes = 60
# keep_width = false            # never crop horizontally
# [sources.settings]
# path = "/home/pi/photos"      # a file, or a directory shown in rotation
#
# [[sources]]
# id = "notes"
# plugin = "markdown"
# interval_minutes = 15
# [sources.style]
# contrast = 1.4
# [sources.settings]
# title = "Today"
# file = "/home/pi/notes.md"    # or: text = "inline markdown"
"##
}
