//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the pure [`calculations`](super::calculations) (which
//! decide rotation and crop geometry) and the
//! [`operations`](super::operations) that move pixels.
//!
//! ## Types
//!
//! - [`Rotation`] — Counter-clockwise quarter turn applied before cropping.
//! - [`CropRegion`] — Rectangle kept from the oriented image.
//! - [`TransformParams`] — Full specification for normalizing one image.

use crate::types::{Orientation, RenderRequest, Resolution, StyleProfile};

/// Counter-clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Ccw90,
    Ccw180,
    Ccw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Self {
        match degrees % 360 {
            90 => Rotation::Ccw90,
            180 => Rotation::Ccw180,
            270 => Rotation::Ccw270,
            _ => Rotation::None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Ccw90 => 90,
            Rotation::Ccw180 => 180,
            Rotation::Ccw270 => 270,
        }
    }

    /// Quarter turns swap the canvas edges.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Ccw90 | Rotation::Ccw270)
    }
}

/// Rectangle (in source pixels) kept by the aspect-fit crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Parameters for normalizing one image to a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    /// Native device resolution; output is always exactly this size.
    pub resolution: Resolution,
    pub orientation: Orientation,
    pub inverted: bool,
    pub keep_width: bool,
    pub style: StyleProfile,
}

impl From<&RenderRequest> for TransformParams {
    fn from(request: &RenderRequest) -> Self {
        Self {
            resolution: request.resolution,
            orientation: request.orientation,
            inverted: request.inverted,
            keep_width: request.keep_width,
            style: request.style,
        }
    }
}
