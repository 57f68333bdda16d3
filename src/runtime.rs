//! Wiring from configuration to a ready-to-run pipeline.
//!
//! Startup order matters: the persisted state is loaded first, then synced
//! with the configured device (dropping the stored fingerprint if anything
//! that shapes the pixels changed), then handed to the sink's `initialize`
//! which may fill in a default resolution. A device that has never displayed
//! anything gets the startup test card before the scheduler takes over.

use crate::config::AppConfig;
use crate::display::{DisplayKind, SinkError, resolve_sink};
use crate::plugin::PluginRegistry;
use crate::renderer::{ChromeRenderer, Invocation, RenderError};
use crate::scheduler::{CycleLimits, CycleRunner, Scheduler};
use crate::state::StateStore;
use std::sync::Arc;

/// Build a cycle runner with the built-in plugins and the Chrome renderer.
pub fn build_runner(config: &AppConfig) -> Result<CycleRunner, SinkError> {
    build_runner_with(config, PluginRegistry::with_builtin())
}

/// Build a cycle runner around a caller-supplied plugin registry.
pub fn build_runner_with(
    config: &AppConfig,
    registry: PluginRegistry,
) -> Result<CycleRunner, SinkError> {
    let store = StateStore::new(&config.device.state_file);
    let mut state = store.load();
    let mut sink = resolve_sink(&config.device);
    state.sync_with(&config.device, sink.kind());
    sink.initialize(&mut state)?;
    if let Err(e) = store.save(&state) {
        log::warn!("cannot write {}: {e}", store.path().display());
    }

    let renderer = Arc::new(ChromeRenderer::from_config(&config.renderer));
    let limits = CycleLimits {
        plugin_timeout: config.scheduler.plugin_timeout(),
        render_timeout: config.renderer.timeout(),
    };
    Ok(CycleRunner::new(registry, renderer, sink, store, state)
        .with_default_style(config.device.style)
        .with_limits(limits))
}

/// Build an idle scheduler for every configured source.
pub fn build_scheduler(config: &AppConfig) -> Result<Scheduler, SinkError> {
    let mut runner = build_runner(config)?;
    greet_new_device(config, &mut runner);
    Ok(Scheduler::new(
        runner,
        config.sources.clone(),
        &config.scheduler,
    ))
}

/// Show the startup test card if enabled and nothing was ever displayed.
/// Failing to show it is not fatal.
fn greet_new_device(config: &AppConfig, runner: &mut CycleRunner) {
    if !config.device.startup_image || runner.state().last_displayed_at.is_some() {
        return;
    }
    match runner.show_startup_image() {
        Ok(_) => log::info!("showed startup image"),
        Err(e) => log::warn!("cannot show startup image: {e}"),
    }
}

/// Result of `inkrefresh check`.
#[derive(Debug)]
pub struct Diagnostics {
    pub display: DisplayKind,
    pub renderer: Result<Invocation, RenderError>,
    /// `(source id, plugin id)` pairs naming a plugin that isn't registered.
    pub unknown_plugins: Vec<(String, String)>,
}

impl Diagnostics {
    /// Unknown plugins are fatal; a missing browser only matters to sources
    /// producing HTML, so it is reported but not fatal.
    pub fn is_ok(&self) -> bool {
        self.unknown_plugins.is_empty()
    }
}

/// Inspect a loaded config without touching the device.
pub fn diagnose(config: &AppConfig, registry: &PluginRegistry) -> Diagnostics {
    let unknown_plugins = config
        .sources
        .iter()
        .filter(|s| registry.get(&s.plugin).is_none())
        .map(|s| (s.id.clone(), s.plugin.clone()))
        .collect();
    Diagnostics {
        display: DisplayKind::parse(&config.device.display_type),
        renderer: ChromeRenderer::from_config(&config.renderer).discover(),
        unknown_plugins,
    }
}
