//! Tone enhancement: brightness, contrast, saturation, sharpness.
//!
//! Each enhancer interpolates between the image and a *degenerate* version
//! of it:
//!
//! | Enhancer | Degenerate image |
//! |---|---|
//! | Brightness | solid black |
//! | Contrast | solid gray at the image's mean luminance |
//! | Saturation | the image's own luminance, as gray |
//! | Sharpness | the image passed through a 3×3 smoothing kernel |
//!
//! `out = degenerate + factor * (pixel - degenerate)`, clamped per channel.
//! A factor of 1.0 returns the input untouched; 0.0 returns the degenerate
//! image; values above 1.0 extrapolate away from it.

use image::{Rgb, RgbImage};

/// ITU-R 601-2 luma in 16.16 fixed point, rounded.
fn luma(px: &Rgb<u8>) -> u8 {
    let [r, g, b] = px.0;
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

#[inline]
fn blend_channel(degenerate: u8, value: u8, factor: f32) -> u8 {
    let d = degenerate as f32;
    (d + factor * (value as f32 - d)).round().clamp(0.0, 255.0) as u8
}

pub fn brightness(img: &mut RgbImage, factor: f32) {
    if factor == 1.0 {
        return;
    }
    for px in img.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = blend_channel(0, *c, factor);
        }
    }
}

pub fn contrast(img: &mut RgbImage, factor: f32) {
    if factor == 1.0 {
        return;
    }
    let count = img.width() as u64 * img.height() as u64;
    if count == 0 {
        return;
    }
    let total: u64 = img.pixels().map(|px| luma(px) as u64).sum();
    let mean = ((total as f64 / count as f64) + 0.5) as u8;
    for px in img.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = blend_channel(mean, *c, factor);
        }
    }
}

pub fn saturation(img: &mut RgbImage, factor: f32) {
    if factor == 1.0 {
        return;
    }
    for px in img.pixels_mut() {
        let gray = luma(px);
        for c in px.0.iter_mut() {
            *c = blend_channel(gray, *c, factor);
        }
    }
}

pub fn sharpness(img: &mut RgbImage, factor: f32) {
    if factor == 1.0 {
        return;
    }
    let smoothed = smooth(img);
    for (px, soft) in img.pixels_mut().zip(smoothed.pixels()) {
        for (c, s) in px.0.iter_mut().zip(soft.0) {
            *c = blend_channel(s, *c, factor);
        }
    }
}

/// 3×3 smoothing kernel `[1 1 1; 1 5 1; 1 1 1] / 13`.
///
/// The one-pixel border is copied unchanged, so sharpening never touches the
/// outermost rows and columns.
fn smooth(img: &RgbImage) -> RgbImage {
    const KERNEL: [[u32; 3]; 3] = [[1, 1, 1], [1, 5, 1], [1, 1, 1]];
    const WEIGHT: u32 = 13;

    let (w, h) = img.dimensions();
    let mut out = img.clone();
    if w < 3 || h < 3 {
        return out;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut acc = [0u32; 3];
            for (ky, row) in KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    let px = img.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
                    for (a, v) in acc.iter_mut().zip(px.0) {
                        *a += v as u32 * weight;
                    }
                }
            }
            out.put_pixel(
                x,
                y,
                Rgb(acc.map(|a| ((a + WEIGHT / 2) / WEIGHT) as u8)),
            );
        }
    }
    out
}
