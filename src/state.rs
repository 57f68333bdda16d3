//! Persisted device state.
//!
//! The device remembers what it last showed so a restart does not force a
//! redundant full refresh of the panel. The state is a small JSON file,
//! written after every successful display and read once at startup.
//!
//! ## Storage
//!
//! ```json
//! {
//!   "version": 1,
//!   "resolution": [800, 480],
//!   "orientation": "horizontal",
//!   "inverted": false,
//!   "display_type": "local",
//!   "last_fingerprint": "3f1c…",
//!   "last_displayed_at": "2026-10-19T08:30:00Z",
//!   "last_source": "weather"
//! }
//! ```
//!
//! A missing, unreadable, or version-mismatched file loads as an empty
//! state: the next cycle simply displays unconditionally.
//!
//! ## Configuration changes
//!
//! The fingerprint describes pixels *after* orientation and resizing, so
//! when the configured resolution, orientation, inversion, or display type
//! differs from what was persisted, [`DeviceState::sync_with`] clears it and
//! the next cycle redraws.

use crate::config::DeviceConfig;
use crate::fingerprint::ContentFingerprint;
use crate::types::{Orientation, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version of the state file format. Bump to discard old state files when
/// the format or fingerprint computation changes.
const STATE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceState {
    pub version: u32,
    /// Unset until configuration or the sink's `initialize` provides one.
    pub resolution: Option<Resolution>,
    pub orientation: Orientation,
    pub inverted: bool,
    pub display_type: String,
    pub last_fingerprint: Option<ContentFingerprint>,
    pub last_displayed_at: Option<DateTime<Utc>>,
    pub last_source: Option<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            resolution: None,
            orientation: Orientation::default(),
            inverted: false,
            display_type: String::new(),
            last_fingerprint: None,
            last_displayed_at: None,
            last_source: None,
        }
    }
}

impl DeviceState {
    /// Adopt the configured device settings.
    ///
    /// Returns `true` if anything that shapes the displayed pixels changed,
    /// in which case the stored fingerprint is dropped.
    pub fn sync_with(&mut self, device: &DeviceConfig, display_type: &str) -> bool {
        let resolution = device.resolution.map(Resolution::from).or(self.resolution);
        let changed = resolution != self.resolution
            || device.orientation != self.orientation
            || device.inverted != self.inverted
            || display_type != self.display_type;

        if changed {
            log::info!(
                "device settings changed ({} {} inverted={} on {}); next cycle redraws",
                resolution.map(|r| r.to_string()).unwrap_or_else(|| "unset".into()),
                device.orientation,
                device.inverted,
                display_type
            );
            self.resolution = resolution;
            self.orientation = device.orientation;
            self.inverted = device.inverted;
            self.display_type = display_type.to_string();
            self.last_fingerprint = None;
        }
        changed
    }

    /// Record a successful display.
    pub fn record_display(
        &mut self,
        fingerprint: ContentFingerprint,
        source_id: &str,
        at: DateTime<Utc>,
    ) {
        self.last_fingerprint = Some(fingerprint);
        self.last_displayed_at = Some(at);
        self.last_source = Some(source_id.to_string());
    }
}

/// Reads and writes [`DeviceState`] at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. Returns an empty state if the file doesn't
    /// exist or can't be parsed (version mismatch, corruption).
    pub fn load(&self) -> DeviceState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return DeviceState::default(),
            Err(e) => {
                log::warn!("cannot read {}: {e}; starting fresh", self.path.display());
                return DeviceState::default();
            }
        };
        let state: DeviceState = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("ignoring corrupt {}: {e}", self.path.display());
                return DeviceState::default();
            }
        };
        if state.version != STATE_VERSION {
            log::warn!(
                "ignoring {} (format version {}, expected {STATE_VERSION})",
                self.path.display(),
                state.version
            );
            return DeviceState::default();
        }
        state
    }

    /// Write the state, replacing the previous file atomically.
    pub fn save(&self, state: &DeviceState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
