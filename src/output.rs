//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Cycle events (`run`, `render`)
//!
//! ```text
//! [scheduled] photos: displayed 3f1c2a9b8e7d (1.4s)
//! [manual] notes: unchanged 3f1c2a9b8e7d (0.9s)
//! [scheduled] forecast: failed [upstream] (0.2s)
//!     Upstream error: feed down
//! ```
//!
//! ## Source status (`status` in interactive mode)
//!
//! ```text
//! Scheduler: running
//! photos (image)
//!     Last success: 2026-10-19 08:30:00 UTC
//!     Next due: 2026-10-19 09:30:00 UTC
//! forecast (weather) DEGRADED
//!     Failures: 3 in a row
//!     Last failure: [upstream] Upstream error: feed down at 2026-10-19 08:31:02 UTC
//! ```
//!
//! ## Device state (`status`)
//!
//! ```text
//! Device
//!     Display: local
//!     Resolution: 800x480 horizontal
//!     Last shown: weather at 2026-10-19 08:30:00 UTC
//!     Fingerprint: 3f1c2a9b8e7d
//!     State file: state/device.json
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::runtime::Diagnostics;
use crate::scheduler::{CycleEvent, CycleOutcome, Phase, SourceStatus};
use crate::state::DeviceState;
use chrono::{DateTime, Utc};
use std::path::Path;

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

// ============================================================================
// Cycle events
// ============================================================================

pub fn format_cycle_event(event: &CycleEvent) -> Vec<String> {
    let head = format!("[{}] {}", event.priority, event.source_id);
    let took = format!("({:.1}s)", event.elapsed.as_secs_f64());
    match &event.outcome {
        CycleOutcome::Displayed(fp) => vec![format!("{head}: displayed {} {took}", fp.short())],
        CycleOutcome::Unchanged(fp) => vec![format!("{head}: unchanged {} {took}", fp.short())],
        CycleOutcome::Cancelled => vec![format!("{head}: cancelled")],
        CycleOutcome::Failed { class, message } => vec![
            format!("{head}: failed [{class}] {took}"),
            format!("{}{message}", indent(1)),
        ],
    }
}

pub fn print_cycle_event(event: &CycleEvent) {
    for line in format_cycle_event(event) {
        println!("{line}");
    }
}

// ============================================================================
// Source status
// ============================================================================

pub fn format_status(phase: Phase, sources: &[SourceStatus]) -> Vec<String> {
    let mut lines = vec![format!("Scheduler: {phase}")];
    if sources.is_empty() {
        lines.push(format!("{}no sources configured", indent(1)));
    }
    for status in sources {
        let flag = if status.degraded { " DEGRADED" } else { "" };
        lines.push(format!("{} ({}){flag}", status.id, status.plugin));
        if status.consecutive_failures > 0 {
            lines.push(format!(
                "{}Failures: {} in a row",
                indent(1),
                status.consecutive_failures
            ));
        }
        if let Some(at) = &status.last_success {
            lines.push(format!("{}Last success: {}", indent(1), timestamp(at)));
        }
        if let Some(failure) = &status.last_failure {
            lines.push(format!(
                "{}Last failure: [{}] {} at {}",
                indent(1),
                failure.class,
                failure.message,
                timestamp(&failure.at)
            ));
        }
        match &status.next_due {
            Some(at) => lines.push(format!("{}Next due: {}", indent(1), timestamp(at))),
            None => lines.push(format!("{}Next due: now", indent(1))),
        }
    }
    lines
}

pub fn print_status(phase: Phase, sources: &[SourceStatus]) {
    for line in format_status(phase, sources) {
        println!("{line}");
    }
}

// ============================================================================
// Device state
// ============================================================================

pub fn format_device_state(state: &DeviceState, state_file: &Path) -> Vec<String> {
    let display = if state.display_type.is_empty() {
        "not initialized"
    } else {
        state.display_type.as_str()
    };
    let resolution = state
        .resolution
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unset".into());
    let inverted = if state.inverted { " inverted" } else { "" };

    let mut lines = vec![
        "Device".to_string(),
        format!("{}Display: {display}", indent(1)),
        format!(
            "{}Resolution: {resolution} {}{inverted}",
            indent(1),
            state.orientation
        ),
    ];
    match (&state.last_source, &state.last_displayed_at) {
        (Some(source), Some(at)) => {
            lines.push(format!("{}Last shown: {source} at {}", indent(1), timestamp(at)))
        }
        _ => lines.push(format!("{}Last shown: nothing yet", indent(1))),
    }
    if let Some(fp) = &state.last_fingerprint {
        lines.push(format!("{}Fingerprint: {}", indent(1), fp.short()));
    }
    lines.push(format!("{}State file: {}", indent(1), state_file.display()));
    lines
}

pub fn print_device_state(state: &DeviceState, state_file: &Path) {
    for line in format_device_state(state, state_file) {
        println!("{line}");
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

pub fn format_diagnostics(diag: &Diagnostics, source_count: usize) -> Vec<String> {
    let mut lines = vec![
        format!("Display: {}", diag.display),
        match &diag.renderer {
            Ok(invocation) => format!("Renderer: {invocation}"),
            Err(e) => format!("Renderer: unavailable ({e})"),
        },
        format!("Sources: {source_count}"),
    ];
    for (source, plugin) in &diag.unknown_plugins {
        lines.push(format!("{}{source}: unknown plugin '{plugin}'", indent(1)));
    }
    lines
}

pub fn print_diagnostics(diag: &Diagnostics, source_count: usize) {
    for line in format_diagnostics(diag, source_count) {
        println!("{line}");
    }
}
