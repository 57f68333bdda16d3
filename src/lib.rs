//! # inkrefresh
//!
//! A refresh daemon for slow raster displays such as e-paper panels. Sources
//! (photos, notes, web pages) are produced by plugins on their own
//! intervals, normalized for the panel, and written to it only when the
//! pixels actually changed.
//!
//! # Architecture: One Cycle
//!
//! ```text
//! Scheduler ─▶ Plugin ─▶ (Renderer) ─▶ Transform ─▶ Gate ─▶ Display sink
//!              image or    HTML →        orient,      same     PNG file or
//!              HTML        bitmap        crop, tone   pixels?  panel
//! ```
//!
//! The scheduler runs at most one cycle at a time on a background thread.
//! A failure at any stage aborts that cycle only: the device state stays as
//! it was, the failure is recorded against the source, and the loop carries
//! on.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scheduler`] | Timing loop, manual triggers, the cycle runner and per-source health |
//! | [`plugin`] | Plugin contract, registry, and the `image`/`markdown`/`html` plugins |
//! | [`renderer`] | HTML → bitmap through a headless-browser subprocess |
//! | [`imaging`] | Pure image normalization: orientation, aspect-fit, enhancement |
//! | [`fingerprint`] | Content hash of the normalized image and the display gate |
//! | [`display`] | Display sinks and `display_type` resolution |
//! | [`state`] | Persisted device state (last fingerprint, device settings) |
//! | [`splash`] | Test card shown once on a device with no display history |
//! | [`config`] | `inkrefresh.toml` loading, merging, and validation |
//! | [`runtime`] | Builds a ready-to-run pipeline from configuration |
//! | [`types`] | Shared types (`RenderRequest`, `Resolution`, `StyleProfile`, …) |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Native-Frame Output
//!
//! Every normalized image is exactly the panel's native resolution. A
//! vertically mounted panel still receives a landscape-shaped buffer; the
//! portrait content is rotated into it. Plugins lay out their content at
//! [`types::DeviceProfile::content_dimensions`], which is the native size
//! with the edges swapped for vertical panels.
//!
//! ## Fingerprint After Transform
//!
//! The change gate hashes the *normalized* pixels, so a new style, crop or
//! orientation counts as new content even when the plugin output is the
//! same. E-paper refreshes are slow and wear the panel; skipping identical
//! frames is the point of the gate.
//!
//! ## Browser as a Subprocess
//!
//! HTML is rasterized by running headless Chromium as a child process with
//! a hard timeout, never by embedding a browser. A hung or crashing browser
//! costs one cycle and a killed process group, nothing more.

pub mod config;
pub mod display;
pub mod fingerprint;
pub mod imaging;
pub mod output;
pub mod plugin;
pub mod renderer;
pub mod runtime;
pub mod scheduler;
pub mod splash;
pub mod state;
pub mod types;
