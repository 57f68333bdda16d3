//! Pure calculation functions for orientation and crop geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{CropRegion, Rotation};
use crate::types::{Orientation, Resolution};

/// Rotation needed to bring content into the panel's native frame.
///
/// Vertical mounting is a quarter turn counter-clockwise; inversion adds a
/// half turn on top of whatever the orientation requires.
pub fn rotation_for(orientation: Orientation, inverted: bool) -> Rotation {
    let base = match orientation {
        Orientation::Horizontal => 0,
        Orientation::Vertical => 90,
    };
    let degrees = if inverted { base + 180 } else { base };
    Rotation::from_degrees(degrees)
}

/// Canvas size after rotating an image of `size`.
pub fn rotated_dimensions(size: (u32, u32), rotation: Rotation) -> (u32, u32) {
    if rotation.swaps_axes() {
        (size.1, size.0)
    } else {
        size
    }
}

/// Compute the region to keep so the crop has the target's aspect ratio.
///
/// Aspect ratios are compared by cross-multiplication so equal ratios are
/// detected exactly; in that case `None` is returned and no crop happens.
///
/// # Arguments
/// * `source` - Oriented image dimensions (width, height)
/// * `target` - Device resolution
/// * `keep_width` - Never crop horizontally. A wider source is kept whole
///   (and scaled non-uniformly by the following resize); a taller source is
///   cropped from the top edge down instead of around the center.
///
/// # Examples
/// ```
/// # use inkrefresh::imaging::crop_region;
/// # use inkrefresh::types::Resolution;
/// // 1600x1200 (4:3) into 800x480 (5:3): source is taller, keep 1600x960
/// let crop = crop_region((1600, 1200), Resolution::new(800, 480), false).unwrap();
/// assert_eq!((crop.x, crop.y, crop.width, crop.height), (0, 120, 1600, 960));
/// ```
pub fn crop_region(source: (u32, u32), target: Resolution, keep_width: bool) -> Option<CropRegion> {
    let (src_w, src_h) = (source.0 as u64, source.1 as u64);
    let (tgt_w, tgt_h) = (target.width as u64, target.height as u64);

    let src_cross = src_w * tgt_h;
    let tgt_cross = src_h * tgt_w;

    if src_cross == tgt_cross {
        return None;
    }

    if src_cross > tgt_cross {
        // Source is wider than the target aspect
        if keep_width {
            return None;
        }
        let width = (src_h * tgt_w / tgt_h).clamp(1, src_w);
        Some(CropRegion {
            x: ((src_w - width) / 2) as u32,
            y: 0,
            width: width as u32,
            height: source.1,
        })
    } else {
        // Source is taller than the target aspect
        let height = (src_w * tgt_h / tgt_w).clamp(1, src_h);
        let y = if keep_width { 0 } else { (src_h - height) / 2 };
        Some(CropRegion {
            x: 0,
            y: y as u32,
            width: source.0,
            height: height as u32,
        })
    }
}
