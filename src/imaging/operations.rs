//! High-level image operations.
//!
//! These functions combine calculations with pixel work. [`normalize`] is
//! the whole pipeline: orient → aspect-fit crop → resize → enhance.

use super::calculations::{crop_region, rotation_for};
use super::params::{Rotation, TransformParams};
use super::tone;
use crate::types::{Resolution, StyleProfile};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransformError {
    #[error("Target resolution {0} has a zero edge")]
    InvalidResolution(Resolution),
    #[error("Source image is empty ({0}x{1})")]
    EmptySource(u32, u32),
}

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// An RGB8 bitmap at exactly the device's native resolution.
///
/// Only [`normalize`] creates these, so holding one means the image has been
/// oriented, fitted and enhanced for the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage(RgbImage);

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.0.width(), self.0.height())
    }

    /// Raw interleaved RGB bytes, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_raw()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.0
    }

    pub fn into_rgb(self) -> RgbImage {
        self.0
    }
}

/// Rotate counter-clockwise, expanding the canvas to fit.
pub fn orient(img: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::None => img,
        // imageops rotates clockwise
        Rotation::Ccw90 => imageops::rotate270(&img),
        Rotation::Ccw180 => imageops::rotate180(&img),
        Rotation::Ccw270 => imageops::rotate90(&img),
    }
}

/// Crop to the target aspect ratio, then resize to exactly `target`.
pub fn fit(img: &RgbImage, target: Resolution, keep_width: bool) -> RgbImage {
    let cropped = match crop_region(img.dimensions(), target, keep_width) {
        Some(region) => {
            imageops::crop_imm(img, region.x, region.y, region.width, region.height).to_image()
        }
        None => img.clone(),
    };

    if cropped.dimensions() == (target.width, target.height) {
        return cropped;
    }
    imageops::resize(&cropped, target.width, target.height, FilterType::Lanczos3)
}

/// Apply the style profile's factors in their fixed order.
pub fn enhance(img: &mut RgbImage, style: &StyleProfile) {
    tone::brightness(img, style.brightness);
    tone::contrast(img, style.contrast);
    tone::saturation(img, style.saturation);
    tone::sharpness(img, style.sharpness);
}

/// Normalize a raw image for the device described by `params`.
///
/// The output is always exactly `params.resolution`: the source is first
/// rotated into the panel's native frame, then cropped to its aspect ratio
/// and resampled, then enhanced. Alpha is discarded.
pub fn normalize(source: &DynamicImage, params: &TransformParams) -> Result<NormalizedImage> {
    if !params.resolution.is_valid() {
        return Err(TransformError::InvalidResolution(params.resolution));
    }
    if source.width() == 0 || source.height() == 0 {
        return Err(TransformError::EmptySource(source.width(), source.height()));
    }

    let rotation = rotation_for(params.orientation, params.inverted);
    let oriented = orient(source.to_rgb8(), rotation);
    let mut fitted = fit(&oriented, params.resolution, params.keep_width);
    enhance(&mut fitted, &params.style);

    log::debug!(
        "normalized {}x{} source → {} (rotation {}°)",
        source.width(),
        source.height(),
        params.resolution,
        rotation.degrees()
    );
    Ok(NormalizedImage(fitted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Orientation;
    use image::Rgb;

    fn params(w: u32, h: u32, orientation: Orientation, inverted: bool) -> TransformParams {
        TransformParams {
            resolution: Resolution::new(w, h),
            orientation,
            inverted,
            keep_width: false,
            style: StyleProfile::default(),
        }
    }

    fn test_image(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    #[test]
    fn output_always_matches_resolution() {
        let sources = [(1600, 1200), (800, 480), (300, 2000), (2000, 300), (7, 3), (1, 1)];
        for (sw, sh) in sources {
            for orientation in [Orientation::Horizontal, Orientation::Vertical] {
                for inverted in [false, true] {
                    let out = normalize(&test_image(sw, sh), &params(80, 48, orientation, inverted))
                        .unwrap();
                    assert_eq!(
                        (out.width(), out.height()),
                        (80, 48),
                        "source {sw}x{sh}, {orientation}, inverted={inverted}"
                    );
                }
            }
        }
    }

    #[test]
    fn output_matches_extreme_and_odd_resolutions() {
        let targets = [(1, 1), (1, 1000), (1000, 1), (81, 47), (3, 997)];
        let sources = [(160, 120), (30, 200), (200, 30), (7, 3), (1, 1)];
        for (tw, th) in targets {
            for (sw, sh) in sources {
                for orientation in [Orientation::Horizontal, Orientation::Vertical] {
                    for keep_width in [false, true] {
                        let mut p = params(tw, th, orientation, true);
                        p.keep_width = keep_width;
                        let out = normalize(&test_image(sw, sh), &p).unwrap();
                        assert_eq!(
                            out.resolution(),
                            Resolution::new(tw, th),
                            "target {tw}x{th}, source {sw}x{sh}, {orientation}, keep_width={keep_width}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn keep_width_output_matches_resolution() {
        let mut p = params(80, 48, Orientation::Horizontal, false);
        p.keep_width = true;
        for (sw, sh) in [(400, 48), (80, 400), (80, 48)] {
            let out = normalize(&test_image(sw, sh), &p).unwrap();
            assert_eq!(out.resolution(), Resolution::new(80, 48));
        }
    }

    #[test]
    fn vertical_rotation_swaps_canvas() {
        // 800x480 rotated a quarter turn is a 480x800 canvas
        let rotated = orient(test_image(800, 480).to_rgb8(), Rotation::Ccw90);
        assert_eq!(rotated.dimensions(), (480, 800));
    }

    #[test]
    fn quarter_turn_is_counter_clockwise() {
        // Mark the top-right corner; after a CCW quarter turn it is top-left.
        let mut img = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        img.put_pixel(3, 0, Rgb([255, 0, 0]));
        let rotated = orient(img, Rotation::Ccw90);
        assert_eq!(rotated.dimensions(), (2, 4));
        assert_eq!(rotated.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn half_turn_moves_corner_diagonally() {
        let mut img = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        img.put_pixel(0, 0, Rgb([0, 255, 0]));
        let rotated = orient(img, Rotation::Ccw180);
        assert_eq!(rotated.get_pixel(3, 1).0, [0, 255, 0]);
    }

    #[test]
    fn matching_size_passes_pixels_through() {
        let source = test_image(80, 48);
        let out = normalize(&source, &params(80, 48, Orientation::Horizontal, false)).unwrap();
        assert_eq!(out.as_rgb(), &source.to_rgb8());
    }

    #[test]
    fn center_crop_keeps_middle_band() {
        // Top and bottom quarters red, middle green: 80x96 into 80x48 keeps green.
        let img = RgbImage::from_fn(80, 96, |_, y| {
            if (24..72).contains(&y) {
                Rgb([0, 255, 0])
            } else {
                Rgb([255, 0, 0])
            }
        });
        let out = normalize(
            &DynamicImage::ImageRgb8(img),
            &params(80, 48, Orientation::Horizontal, false),
        )
        .unwrap();
        assert!(out.as_rgb().pixels().all(|p| p.0 == [0, 255, 0]));
    }

    #[test]
    fn alpha_is_dropped() {
        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            10,
            6,
            image::Rgba([10, 20, 30, 0]),
        ));
        let out = normalize(&rgba, &params(10, 6, Orientation::Horizontal, false)).unwrap();
        assert_eq!(out.as_bytes().len(), 10 * 6 * 3);
        assert_eq!(out.as_rgb().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let err = normalize(&test_image(10, 10), &params(0, 48, Orientation::Horizontal, false))
            .unwrap_err();
        assert_eq!(err, TransformError::InvalidResolution(Resolution::new(0, 48)));
    }

    #[test]
    fn empty_source_is_rejected() {
        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let err = normalize(&empty, &params(80, 48, Orientation::Horizontal, false)).unwrap_err();
        assert_eq!(err, TransformError::EmptySource(0, 0));
    }

    #[test]
    fn normalize_is_deterministic() {
        let mut p = params(64, 40, Orientation::Vertical, true);
        p.style = StyleProfile {
            brightness: 1.1,
            contrast: 1.3,
            saturation: 0.7,
            sharpness: 2.0,
        };
        let source = test_image(333, 222);
        assert_eq!(normalize(&source, &p).unwrap(), normalize(&source, &p).unwrap());
    }
}
