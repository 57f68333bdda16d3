//! Startup test card.
//!
//! Drawn directly into pixels, so it needs neither a plugin nor a browser:
//! a black frame, two title bars and a ramp of gray steps across the lower
//! half, which makes a panel's contrast and ghosting easy to judge.
//!
//! ```text
//! ┌──────────────────────────┐
//! │      ████████████        │
//! │        ████████          │
//! │                          │
//! │ ▓▓▓▒▒▒░░░   (8 steps)    │
//! └──────────────────────────┘
//! ```

use crate::types::Resolution;
use image::{Rgb, RgbImage};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Gray levels in the ramp, black to white.
pub const RAMP_STEPS: u32 = 8;

/// Source id recorded in the device state after the card is shown.
pub const STARTUP_SOURCE: &str = "startup";

/// Draw the test card at `size`, in content orientation.
pub fn startup_image(size: Resolution) -> RgbImage {
    let (w, h) = (size.width, size.height);
    let border = (w.min(h) / 40).max(1);

    let title = (h / 4, h / 4 + (h / 16).max(1));
    let subtitle = (title.1 + (h / 24).max(1), title.1 + (h / 24).max(1) + (h / 24).max(1));
    let ramp = (h * 5 / 8, h * 5 / 8 + (h / 6).max(1));

    RgbImage::from_fn(w, h, |x, y| {
        if x < border || y < border || x >= w - border || y >= h - border {
            return BLACK;
        }
        if (title.0..title.1).contains(&y) && (w / 4..w * 3 / 4).contains(&x) {
            return BLACK;
        }
        if (subtitle.0..subtitle.1).contains(&y) && (w / 3..w * 2 / 3).contains(&x) {
            return BLACK;
        }
        if (ramp.0..ramp.1).contains(&y) {
            let inner = (w - 2 * border) as u64;
            let step = ((x - border) as u64 * RAMP_STEPS as u64 / inner) as u32;
            let level = (step.min(RAMP_STEPS - 1) * 255 / (RAMP_STEPS - 1)) as u8;
            return Rgb([level; 3]);
        }
        WHITE
    })
}
