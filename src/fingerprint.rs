//! Change detection for normalized images.
//!
//! E-paper panels take seconds to refresh and wear with every write, so a
//! cycle whose output is pixel-identical to what is already on the panel is
//! dropped before it reaches the sink.
//!
//! # Fingerprints
//!
//! A [`ContentFingerprint`] is the SHA-256 of the normalized image's raw
//! RGB8 bytes, prefixed with its width and height, stored as lowercase hex. It is computed *after* orientation,
//! cropping and enhancement, so a change to any of those settings also counts
//! as a change even when the plugin output is the same.
//!
//! The comparison is exact, not perceptual: one differing byte forces a
//! redisplay. Fingerprints are only ever compared for equality.

use crate::imaging::NormalizedImage;
use crate::state::DeviceState;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 over a normalized image's pixel bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn of(image: &NormalizedImage) -> Self {
        let mut hasher = Sha256::new();
        // Dimensions are part of the content: the same bytes at 800x480 and
        // 480x800 are different pictures.
        hasher.update(image.width().to_le_bytes());
        hasher.update(image.height().to_le_bytes());
        hasher.update(image.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decide whether `candidate` is worth sending to the display.
///
/// Returns `false` only when the device already shows exactly this content.
/// A device with no recorded fingerprint (first run, or state reset after a
/// configuration change) always displays.
pub fn should_display(candidate: &NormalizedImage, state: &DeviceState) -> bool {
    is_new_content(&ContentFingerprint::of(candidate), state)
}

/// [`should_display`] for an already computed fingerprint.
pub fn is_new_content(candidate: &ContentFingerprint, state: &DeviceState) -> bool {
    state.last_fingerprint.as_ref() != Some(candidate)
}
