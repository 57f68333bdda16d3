//! Image normalization — pure, deterministic, side-effect free.
//!
//! | Step | Crate / function |
//! |---|---|
//! | **Orient** | `image::imageops::rotate{90,180,270}` |
//! | **Crop** | [`crop_region`] + `imageops::crop_imm` |
//! | **Resize** | `imageops::resize` with `Lanczos3` |
//! | **Enhance** | brightness → contrast → saturation → sharpness blends |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for rotation and crop geometry (unit testable)
//! - **Parameters**: Data structures describing a transform
//! - **Tone**: Per-pixel enhancement blends
//! - **Operations**: [`normalize`] and the steps it is built from

mod calculations;
pub mod operations;
mod params;
mod tone;

pub use calculations::{crop_region, rotated_dimensions, rotation_for};
pub use operations::{NormalizedImage, TransformError, enhance, fit, normalize, orient};
pub use params::{CropRegion, Rotation, TransformParams};
