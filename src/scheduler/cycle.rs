//! One refresh cycle: plugin → renderer → transform → gate → sink.
//!
//! [`CycleRunner`] owns everything a cycle touches (the sink, the device
//! state and its store), so only the thread running cycles ever mutates
//! them. Any failure aborts just the cycle it happened in and leaves the
//! device state as it was.

use crate::config::SourceConfig;
use crate::display::{DisplaySink, SinkError};
use crate::fingerprint::{ContentFingerprint, is_new_content};
use crate::imaging::{TransformError, TransformParams, normalize};
use crate::plugin::{PluginError, PluginRegistry};
use crate::renderer::{HtmlRenderer, RenderError};
use crate::splash::{STARTUP_SOURCE, startup_image};
use crate::state::{DeviceState, StateStore};
use crate::types::{Priority, RawArtifact, RenderRequest, StyleProfile};
use chrono::Utc;
use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a cycle failed.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Plugin did not finish within {0:?}")]
    PluginTimeout(Duration),
    #[error("Renderer did not finish within {0:?}")]
    RenderTimeout(Duration),
    #[error("No renderer available (tried: {})", .0.join(", "))]
    RendererUnavailable(Vec<String>),
    #[error("Render failed: {0}")]
    Render(String),
    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("Display failed: {0}")]
    SinkWrite(#[from] SinkError),
}

/// Coarse failure category, reported in source status and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Configuration,
    Upstream,
    Timeout,
    Renderer,
    Transform,
    Sink,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Upstream => "upstream",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Renderer => "renderer",
            ErrorClass::Transform => "transform",
            ErrorClass::Sink => "sink",
        };
        f.write_str(name)
    }
}

impl CycleError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CycleError::Configuration(_) => ErrorClass::Configuration,
            CycleError::Upstream(_) => ErrorClass::Upstream,
            CycleError::PluginTimeout(_) | CycleError::RenderTimeout(_) => ErrorClass::Timeout,
            CycleError::RendererUnavailable(_) | CycleError::Render(_) => ErrorClass::Renderer,
            CycleError::Transform(_) => ErrorClass::Transform,
            CycleError::SinkWrite(_) => ErrorClass::Sink,
        }
    }
}

impl From<PluginError> for CycleError {
    fn from(e: PluginError) -> Self {
        match e {
            PluginError::Configuration(msg) => CycleError::Configuration(msg),
            PluginError::Upstream(msg) => CycleError::Upstream(msg),
        }
    }
}

impl From<RenderError> for CycleError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Unavailable { tried } => CycleError::RendererUnavailable(tried),
            RenderError::Timeout(d) => CycleError::RenderTimeout(d),
            other => CycleError::Render(other.to_string()),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New content reached the panel.
    Displayed(ContentFingerprint),
    /// Content identical to what the panel shows; nothing was written.
    Unchanged(ContentFingerprint),
    /// Stopped at a checkpoint because the scheduler is shutting down.
    Cancelled,
    Failed { class: ErrorClass, message: String },
}

impl CycleOutcome {
    pub fn from_result(result: Result<CycleOutcome, CycleError>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(e) => CycleOutcome::Failed {
                class: e.class(),
                message: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Displayed(_) | CycleOutcome::Unchanged(_))
    }
}

/// A unit of work for the cycle runner. Consumed exactly once.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub source: SourceConfig,
    pub priority: Priority,
    pub due: Instant,
}

impl ScheduleEntry {
    pub fn manual(source: SourceConfig) -> Self {
        Self {
            source,
            priority: Priority::Manual,
            due: Instant::now(),
        }
    }
}

/// Time budgets for the stages that call out of process or into plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleLimits {
    pub plugin_timeout: Duration,
    pub render_timeout: Duration,
}

impl Default for CycleLimits {
    fn default() -> Self {
        Self {
            plugin_timeout: Duration::from_secs(60),
            render_timeout: Duration::from_secs(30),
        }
    }
}

/// Executes cycles against one device.
pub struct CycleRunner {
    registry: PluginRegistry,
    renderer: Arc<dyn HtmlRenderer>,
    sink: Box<dyn DisplaySink>,
    store: StateStore,
    state: DeviceState,
    default_style: StyleProfile,
    limits: CycleLimits,
}

impl CycleRunner {
    pub fn new(
        registry: PluginRegistry,
        renderer: Arc<dyn HtmlRenderer>,
        sink: Box<dyn DisplaySink>,
        store: StateStore,
        state: DeviceState,
    ) -> Self {
        Self {
            registry,
            renderer,
            sink,
            store,
            state,
            default_style: StyleProfile::default(),
            limits: CycleLimits::default(),
        }
    }

    /// Style used by sources that do not set their own.
    pub fn with_default_style(mut self, style: StyleProfile) -> Self {
        self.default_style = style;
        self
    }

    pub fn with_limits(mut self, limits: CycleLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Freeze the device and source settings into a request.
    pub fn request_for(&self, source: &SourceConfig) -> Result<RenderRequest, CycleError> {
        let resolution = self
            .state
            .resolution
            .filter(|r| r.is_valid())
            .ok_or_else(|| CycleError::Configuration("device resolution is not set".into()))?;
        Ok(RenderRequest {
            source_id: source.id.clone(),
            plugin: source.plugin.clone(),
            settings: source.settings.clone(),
            resolution,
            orientation: self.state.orientation,
            inverted: self.state.inverted,
            keep_width: source.keep_width,
            style: source.style.unwrap_or(self.default_style),
        })
    }

    /// Run one cycle. `cancel` is checked between stages.
    pub fn run_cycle(
        &mut self,
        entry: &ScheduleEntry,
        cancel: &AtomicBool,
    ) -> Result<CycleOutcome, CycleError> {
        if cancel.load(Ordering::SeqCst) {
            return Ok(CycleOutcome::Cancelled);
        }
        let request = self.request_for(&entry.source)?;
        log::info!(
            "{} cycle for '{}' ({} plugin)",
            entry.priority,
            request.source_id,
            request.plugin
        );

        let artifact = self.invoke_plugin(&request)?;
        if cancel.load(Ordering::SeqCst) {
            return Ok(CycleOutcome::Cancelled);
        }

        let raw = match artifact {
            RawArtifact::Image(img) => img,
            RawArtifact::Html(doc) => {
                let size = request.device_profile().content_dimensions();
                self.renderer
                    .render(&doc, size.width, size.height, self.limits.render_timeout)?
            }
        };
        self.present(&request, raw, cancel)
    }

    /// Show the startup test card through the same transform, gate and sink
    /// as a regular cycle.
    pub fn show_startup_image(&mut self) -> Result<CycleOutcome, CycleError> {
        let request = self.request_for(&SourceConfig::new(STARTUP_SOURCE, STARTUP_SOURCE))?;
        let card = startup_image(request.device_profile().content_dimensions());
        self.present(&request, DynamicImage::ImageRgb8(card), &AtomicBool::new(false))
    }

    /// Normalize `raw`, skip it if the device already shows it, otherwise
    /// display it and record it in the device state.
    fn present(
        &mut self,
        request: &RenderRequest,
        raw: DynamicImage,
        cancel: &AtomicBool,
    ) -> Result<CycleOutcome, CycleError> {
        let normalized = normalize(&raw, &TransformParams::from(request))?;
        drop(raw);

        let fingerprint = ContentFingerprint::of(&normalized);
        if !is_new_content(&fingerprint, &self.state) {
            log::info!(
                "'{}' unchanged ({}), skipping display",
                request.source_id,
                fingerprint.short()
            );
            return Ok(CycleOutcome::Unchanged(fingerprint));
        }
        if cancel.load(Ordering::SeqCst) {
            return Ok(CycleOutcome::Cancelled);
        }

        self.sink.display(&normalized)?;
        self.state
            .record_display(fingerprint.clone(), &request.source_id, Utc::now());
        if let Err(e) = self.store.save(&self.state) {
            log::warn!("cannot persist device state to {}: {e}", self.store.path().display());
        }
        log::info!("displayed '{}' ({})", request.source_id, fingerprint.short());
        Ok(CycleOutcome::Displayed(fingerprint))
    }

    /// Run the plugin on a helper thread bounded by the plugin timeout.
    /// A plugin that overruns is abandoned; its thread finishes on its own.
    fn invoke_plugin(&self, request: &RenderRequest) -> Result<RawArtifact, CycleError> {
        let plugin = self.registry.get(&request.plugin).ok_or_else(|| {
            CycleError::Configuration(format!("unknown plugin '{}'", request.plugin))
        })?;
        let settings = request.settings.clone();
        let device = request.device_profile();
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("plugin-{}", request.plugin))
            .spawn(move || {
                let _ = tx.send(plugin.generate(&settings, &device));
            })
            .map_err(|e| CycleError::Upstream(format!("cannot start plugin thread: {e}")))?;

        match rx.recv_timeout(self.limits.plugin_timeout) {
            Ok(result) => Ok(result?),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "plugin '{}' for '{}' timed out after {:?}",
                    request.plugin,
                    request.source_id,
                    self.limits.plugin_timeout
                );
                Err(CycleError::PluginTimeout(self.limits.plugin_timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(CycleError::Upstream(format!(
                "plugin '{}' panicked",
                request.plugin
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::NormalizedImage;
    use crate::plugin::Plugin;
    use crate::types::{DeviceProfile, HtmlDocument, Orientation, Resolution, Settings};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Plugin returning a solid color read from its `shade` setting.
    struct Solid;

    impl Plugin for Solid {
        fn id(&self) -> &str {
            "solid"
        }

        fn generate(&self, settings: &Settings, device: &DeviceProfile) -> Result<RawArtifact, PluginError> {
            let shade = settings
                .get("shade")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| PluginError::Configuration("missing shade".into()))? as u8;
            let size = device.content_dimensions();
            Ok(RawArtifact::Image(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                size.width,
                size.height,
                Rgb([shade, shade, shade]),
            ))))
        }
    }

    struct Sleepy(Duration);

    impl Plugin for Sleepy {
        fn id(&self) -> &str {
            "sleepy"
        }

        fn generate(&self, _: &Settings, _: &DeviceProfile) -> Result<RawArtifact, PluginError> {
            thread::sleep(self.0);
            Err(PluginError::Upstream("woke up too late".into()))
        }
    }

    struct Panicky;

    impl Plugin for Panicky {
        fn id(&self) -> &str {
            "panicky"
        }

        fn generate(&self, _: &Settings, _: &DeviceProfile) -> Result<RawArtifact, PluginError> {
            panic!("plugin bug")
        }
    }

    struct Webpage;

    impl Plugin for Webpage {
        fn id(&self) -> &str {
            "webpage"
        }

        fn generate(&self, _: &Settings, _: &DeviceProfile) -> Result<RawArtifact, PluginError> {
            Ok(RawArtifact::Html(HtmlDocument::new("<p>hi</p>")))
        }
    }

    /// Renderer recording requested sizes and painting them gray.
    #[derive(Default)]
    struct RecordingRenderer {
        sizes: Mutex<Vec<(u32, u32)>>,
    }

    impl HtmlRenderer for RecordingRenderer {
        fn render(&self, _: &HtmlDocument, w: u32, h: u32, _: Duration) -> Result<DynamicImage, RenderError> {
            self.sizes.lock().unwrap().push((w, h));
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([90, 90, 90]))))
        }
    }

    struct NoBrowser;

    impl HtmlRenderer for NoBrowser {
        fn render(&self, _: &HtmlDocument, _: u32, _: u32, _: Duration) -> Result<DynamicImage, RenderError> {
            Err(RenderError::Unavailable {
                tried: vec!["chromium".into()],
            })
        }
    }

    /// Sink that records image sizes and can be told to fail.
    #[derive(Clone, Default)]
    struct MockSink {
        shown: Arc<Mutex<Vec<(u32, u32)>>>,
        fail: bool,
    }

    impl DisplaySink for MockSink {
        fn kind(&self) -> &str {
            "mock"
        }

        fn initialize(&mut self, _: &mut DeviceState) -> Result<(), SinkError> {
            Ok(())
        }

        fn display(&mut self, image: &NormalizedImage) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Rejected("panel unplugged".into()));
            }
            self.shown.lock().unwrap().push((image.width(), image.height()));
            Ok(())
        }
    }

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(Solid));
        registry.register(Arc::new(Sleepy(Duration::from_millis(500))));
        registry.register(Arc::new(Panicky));
        registry.register(Arc::new(Webpage));
        registry
    }

    fn state(orientation: Orientation) -> DeviceState {
        DeviceState {
            resolution: Some(Resolution::new(40, 24)),
            orientation,
            display_type: "mock".into(),
            ..DeviceState::default()
        }
    }

    fn runner(tmp: &TempDir, sink: MockSink, renderer: Arc<dyn HtmlRenderer>) -> CycleRunner {
        CycleRunner::new(
            registry(),
            renderer,
            Box::new(sink),
            StateStore::new(tmp.path().join("state.json")),
            state(Orientation::Horizontal),
        )
        .with_limits(CycleLimits {
            plugin_timeout: Duration::from_millis(100),
            render_timeout: Duration::from_secs(1),
        })
    }

    fn entry(plugin: &str, shade: u64) -> ScheduleEntry {
        let mut source = SourceConfig::new(format!("{plugin}-src"), plugin);
        source.settings.insert("shade".into(), shade.into());
        ScheduleEntry {
            source,
            priority: Priority::Scheduled,
            due: Instant::now(),
        }
    }

    fn not_cancelled() -> AtomicBool {
        AtomicBool::new(false)
    }

    // =========================================================================
    // Happy path and the change gate
    // =========================================================================

    #[test]
    fn first_cycle_displays_and_persists() {
        let tmp = TempDir::new().unwrap();
        let sink = MockSink::default();
        let mut runner = runner(&tmp, sink.clone(), Arc::new(RecordingRenderer::default()));

        let outcome = runner.run_cycle(&entry("solid", 10), &not_cancelled()).unwrap();
        let CycleOutcome::Displayed(fp) = outcome else {
            panic!("expected Displayed, got {outcome:?}");
        };
        assert_eq!(*sink.shown.lock().unwrap(), vec![(40, 24)]);
        assert_eq!(runner.state().last_fingerprint.as_ref(), Some(&fp));
        assert_eq!(runner.state().last_source.as_deref(), Some("solid-src"));

        let persisted = StateStore::new(tmp.path().join("state.json")).load();
        assert_eq!(persisted.last_fingerprint, Some(fp));
    }

    #[test]
    fn identical_content_is_not_redisplayed() {
        let tmp = TempDir::new().unwrap();
        let sink = MockSink::default();
        let mut runner = runner(&tmp, sink.clone(), Arc::new(RecordingRenderer::default()));

        runner.run_cycle(&entry("solid", 10), &not_cancelled()).unwrap();
        let second = runner.run_cycle(&entry("solid", 10), &not_cancelled()).unwrap();
        assert!(matches!(second, CycleOutcome::Unchanged(_)));
        assert_eq!(sink.shown.lock().unwrap().len(), 1);

        let third = runner.run_cycle(&entry("solid", 11), &not_cancelled()).unwrap();
        assert!(matches!(third, CycleOutcome::Displayed(_)));
        assert_eq!(sink.shown.lock().unwrap().len(), 2);
    }

    #[test]
    fn html_is_rendered_at_content_size() {
        let tmp = TempDir::new().unwrap();
        let renderer = Arc::new(RecordingRenderer::default());
        let sink = MockSink::default();
        let mut runner = CycleRunner::new(
            registry(),
            renderer.clone(),
            Box::new(sink.clone()),
            StateStore::new(tmp.path().join("state.json")),
            state(Orientation::Vertical),
        );

        runner.run_cycle(&entry("webpage", 0), &not_cancelled()).unwrap();
        // Portrait content for a vertical panel, rotated back to native.
        assert_eq!(*renderer.sizes.lock().unwrap(), vec![(24, 40)]);
        assert_eq!(*sink.shown.lock().unwrap(), vec![(40, 24)]);
    }

    #[test]
    fn source_style_overrides_default() {
        let tmp = TempDir::new().unwrap();
        let dim = StyleProfile {
            brightness: 0.5,
            ..StyleProfile::default()
        };
        let runner = runner(&tmp, MockSink::default(), Arc::new(NoBrowser)).with_default_style(dim);

        let plain = SourceConfig::new("a", "solid");
        assert_eq!(runner.request_for(&plain).unwrap().style, dim);

        let mut own = SourceConfig::new("b", "solid");
        own.style = Some(StyleProfile::default());
        assert_eq!(runner.request_for(&own).unwrap().style, StyleProfile::default());
    }

    // =========================================================================
    // Failures leave state untouched
    // =========================================================================

    fn assert_fails(
        runner: &mut CycleRunner,
        entry: &ScheduleEntry,
        class: ErrorClass,
    ) -> CycleError {
        let before = runner.state().clone();
        let err = runner.run_cycle(entry, &not_cancelled()).unwrap_err();
        assert_eq!(err.class(), class, "{err}");
        assert_eq!(runner.state(), &before);
        err
    }

    #[test]
    fn unknown_plugin_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let mut runner = runner(&tmp, MockSink::default(), Arc::new(NoBrowser));
        assert_fails(&mut runner, &entry("weather", 0), ErrorClass::Configuration);
    }

    #[test]
    fn plugin_settings_error_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let mut runner = runner(&tmp, MockSink::default(), Arc::new(NoBrowser));
        let mut e = entry("solid", 0);
        e.source.settings.clear();
        assert_fails(&mut runner, &e, ErrorClass::Configuration);
    }

    #[test]
    fn slow_plugin_times_out() {
        let tmp = TempDir::new().unwrap();
        let mut runner = runner(&tmp, MockSink::default(), Arc::new(NoBrowser));
        let err = assert_fails(&mut runner, &entry("sleepy", 0), ErrorClass::Timeout);
        assert!(matches!(err, CycleError::PluginTimeout(_)));
    }

    #[test]
    fn panicking_plugin_is_upstream_error() {
        let tmp = TempDir::new().unwrap();
        let mut runner = runner(&tmp, MockSink::default(), Arc::new(NoBrowser));
        assert_fails(&mut runner, &entry("panicky", 0), ErrorClass::Upstream);
    }

    #[test]
    fn missing_renderer_is_renderer_error() {
        let tmp = TempDir::new().unwrap();
        let mut runner = runner(&tmp, MockSink::default(), Arc::new(NoBrowser));
        let err = assert_fails(&mut runner, &entry("webpage", 0), ErrorClass::Renderer);
        assert!(matches!(err, CycleError::RendererUnavailable(tried) if tried == vec!["chromium"]));
    }

    #[test]
    fn sink_failure_is_sink_error() {
        let tmp = TempDir::new().unwrap();
        let sink = MockSink {
            fail: true,
            ..MockSink::default()
        };
        let mut runner = runner(&tmp, sink, Arc::new(NoBrowser));
        assert_fails(&mut runner, &entry("solid", 1), ErrorClass::Sink);
        assert!(!tmp.path().join("state.json").exists());
    }

    #[test]
    fn missing_resolution_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let mut runner = CycleRunner::new(
            registry(),
            Arc::new(NoBrowser),
            Box::new(MockSink::default()),
            StateStore::new(tmp.path().join("state.json")),
            DeviceState::default(),
        );
        assert_fails(&mut runner, &entry("solid", 1), ErrorClass::Configuration);
    }

    #[test]
    fn cancelled_before_start_does_nothing() {
        let tmp = TempDir::new().unwrap();
        let sink = MockSink::default();
        let mut runner = runner(&tmp, sink.clone(), Arc::new(NoBrowser));
        let outcome = runner
            .run_cycle(&entry("solid", 1), &AtomicBool::new(true))
            .unwrap();
        assert_eq!(outcome, CycleOutcome::Cancelled);
        assert!(sink.shown.lock().unwrap().is_empty());
    }

    // =========================================================================
    // Error classes
    // =========================================================================

    #[test]
    fn render_errors_map_to_cycle_errors() {
        let timeout: CycleError = RenderError::Timeout(Duration::from_secs(3)).into();
        assert!(matches!(timeout, CycleError::RenderTimeout(_)));
        assert_eq!(timeout.class(), ErrorClass::Timeout);

        let empty: CycleError = RenderError::EmptyOutput.into();
        assert_eq!(empty.class(), ErrorClass::Renderer);
    }

    #[test]
    fn failed_outcome_carries_class_and_message() {
        let outcome = CycleOutcome::from_result(Err(CycleError::Upstream("feed down".into())));
        assert_eq!(
            outcome,
            CycleOutcome::Failed {
                class: ErrorClass::Upstream,
                message: "Upstream error: feed down".into()
            }
        );
        assert!(!outcome.is_success());
    }
}
