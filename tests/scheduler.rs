//! Scheduler loop behaviour: manual triggers, stop semantics, health.
//!
//! Plugins here are in-process fakes; cycles display into a recording sink
//! so nothing touches a real panel or browser.

use image::{DynamicImage, Rgb, RgbImage};
use inkrefresh::config::{SchedulerConfig, SourceConfig};
use inkrefresh::display::{DisplaySink, SinkError};
use inkrefresh::imaging::NormalizedImage;
use inkrefresh::plugin::{Plugin, PluginError, PluginRegistry};
use inkrefresh::renderer::{HtmlRenderer, RenderError};
use inkrefresh::scheduler::{
    CycleEvent, CycleLimits, CycleOutcome, CycleRunner, ErrorClass, Phase, Scheduler,
    SchedulerError,
};
use inkrefresh::state::{DeviceState, StateStore};
use inkrefresh::types::{DeviceProfile, HtmlDocument, Priority, RawArtifact, Resolution, Settings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Fakes
// =============================================================================

/// Paints a solid shade taken from the `shade` setting. Blocks while its
/// gate is closed and reports each call.
struct GatedPlugin {
    open: Arc<(Mutex<bool>, Condvar)>,
    entered: Mutex<Sender<u64>>,
    fail: Arc<AtomicBool>,
}

impl Plugin for GatedPlugin {
    fn id(&self) -> &str {
        "gated"
    }

    fn generate(&self, settings: &Settings, device: &DeviceProfile) -> Result<RawArtifact, PluginError> {
        let shade = settings.get("shade").and_then(|v| v.as_u64()).unwrap_or(0);
        let _ = self.entered.lock().unwrap().send(shade);

        let (lock, cvar) = &*self.open;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
        drop(open);

        if self.fail.load(Ordering::SeqCst) {
            return Err(PluginError::Upstream("feed unavailable".into()));
        }
        let size = device.content_dimensions();
        Ok(RawArtifact::Image(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            size.width,
            size.height,
            Rgb([shade as u8; 3]),
        ))))
    }
}

struct NoRenderer;

impl HtmlRenderer for NoRenderer {
    fn render(&self, _: &HtmlDocument, _: u32, _: u32, _: Duration) -> Result<DynamicImage, RenderError> {
        Err(RenderError::Unavailable { tried: Vec::new() })
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    shown: Arc<Mutex<Vec<u8>>>,
}

impl DisplaySink for RecordingSink {
    fn kind(&self) -> &str {
        "recording"
    }

    fn initialize(&mut self, _: &mut DeviceState) -> Result<(), SinkError> {
        Ok(())
    }

    fn display(&mut self, image: &NormalizedImage) -> Result<(), SinkError> {
        self.shown.lock().unwrap().push(image.as_bytes()[0]);
        Ok(())
    }
}

struct Harness {
    _tmp: TempDir,
    scheduler: Scheduler,
    events: Receiver<CycleEvent>,
    entered: Receiver<u64>,
    open: Arc<(Mutex<bool>, Condvar)>,
    fail: Arc<AtomicBool>,
    sink: RecordingSink,
}

impl Harness {
    fn new(gate_open: bool) -> Self {
        Self::with_sources(gate_open, vec![source(100)])
    }

    fn with_sources(gate_open: bool, sources: Vec<SourceConfig>) -> Self {
        let tmp = TempDir::new().unwrap();
        let open = Arc::new((Mutex::new(gate_open), Condvar::new()));
        let fail = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered) = mpsc::channel();

        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(GatedPlugin {
            open: Arc::clone(&open),
            entered: Mutex::new(entered_tx),
            fail: Arc::clone(&fail),
        }));

        let sink = RecordingSink::default();
        let state = DeviceState {
            resolution: Some(Resolution::new(16, 10)),
            display_type: "recording".into(),
            ..DeviceState::default()
        };
        let runner = CycleRunner::new(
            registry,
            Arc::new(NoRenderer),
            Box::new(sink.clone()),
            StateStore::new(tmp.path().join("device.json")),
            state,
        )
        .with_limits(CycleLimits {
            plugin_timeout: Duration::from_secs(10),
            render_timeout: Duration::from_secs(1),
        });

        let (tx, events) = mpsc::channel();
        let scheduler = Scheduler::new(runner, sources, &SchedulerConfig::default())
            .with_events(tx);

        Self {
            _tmp: tmp,
            scheduler,
            events,
            entered,
            open,
            fail,
            sink,
        }
    }

    fn open_gate(&self) {
        let (lock, cvar) = &*self.open;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn next_event(&self) -> CycleEvent {
        self.events.recv_timeout(WAIT).expect("cycle event")
    }
}

fn source(shade: u64) -> SourceConfig {
    let mut source = SourceConfig::new("panel", "gated");
    source.settings.insert("shade".into(), shade.into());
    source
}

// =============================================================================
// Manual triggers
// =============================================================================

#[test]
fn burst_of_triggers_runs_one_manual_cycle_with_latest_request() {
    let h = Harness::new(false);
    h.scheduler.start().unwrap();

    // The start-up cycle is now blocked inside the plugin.
    assert_eq!(h.entered.recv_timeout(WAIT).unwrap(), 100);
    assert_eq!(h.scheduler.phase(), Phase::CycleInFlight);
    for shade in 1..=5 {
        h.scheduler.trigger_now(source(shade)).unwrap();
    }
    h.open_gate();

    let first = h.next_event();
    assert_eq!(first.priority, Priority::Scheduled);
    assert!(matches!(first.outcome, CycleOutcome::Displayed(_)));

    let second = h.next_event();
    assert_eq!(second.priority, Priority::Manual);
    assert!(matches!(second.outcome, CycleOutcome::Displayed(_)));
    assert_eq!(h.entered.recv_timeout(WAIT).unwrap(), 5);

    assert!(h.events.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(*h.sink.shown.lock().unwrap(), vec![100, 5]);
}

#[test]
fn manual_trigger_does_not_move_schedule() {
    let h = Harness::new(true);
    h.scheduler.start().unwrap();
    h.next_event();
    let due = h.scheduler.status()[0].next_due.unwrap();

    h.scheduler.trigger_source("panel").unwrap();
    let manual = h.next_event();
    assert_eq!(manual.priority, Priority::Manual);
    assert_eq!(h.scheduler.status()[0].next_due, Some(due));
}

#[test]
fn repeated_content_is_not_redisplayed() {
    let h = Harness::new(true);
    h.scheduler.start().unwrap();
    assert!(matches!(h.next_event().outcome, CycleOutcome::Displayed(_)));

    h.scheduler.trigger_source("panel").unwrap();
    assert!(matches!(h.next_event().outcome, CycleOutcome::Unchanged(_)));
    assert_eq!(h.sink.shown.lock().unwrap().len(), 1);
}

#[test]
fn unknown_source_trigger_is_rejected() {
    let h = Harness::new(true);
    assert!(matches!(
        h.scheduler.trigger_source("nope"),
        Err(SchedulerError::UnknownSource(id)) if id == "nope"
    ));
}

// =============================================================================
// Failures and health
// =============================================================================

#[test]
fn three_failures_degrade_and_one_success_recovers() {
    let h = Harness::new(true);
    h.fail.store(true, Ordering::SeqCst);
    h.scheduler.start().unwrap();

    let first = h.next_event();
    match &first.outcome {
        CycleOutcome::Failed { class, message } => {
            assert_eq!(*class, ErrorClass::Upstream);
            assert!(message.contains("feed unavailable"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    // The failed attempt still schedules the next run a full interval out.
    let next_due = h.scheduler.status()[0].next_due.unwrap();
    assert!(next_due > first.started_at + chrono::Duration::minutes(59));

    for _ in 0..2 {
        h.scheduler.trigger_source("panel").unwrap();
        h.next_event();
    }
    let status = &h.scheduler.status()[0];
    assert_eq!(status.consecutive_failures, 3);
    assert!(status.degraded);
    assert!(h.sink.shown.lock().unwrap().is_empty());

    h.fail.store(false, Ordering::SeqCst);
    h.scheduler.trigger_source("panel").unwrap();
    assert!(h.next_event().outcome.is_success());
    let status = &h.scheduler.status()[0];
    assert!(!status.degraded);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_success.is_some());
}

#[test]
fn oversized_interval_does_not_kill_the_loop() {
    let mut forever = source(100);
    forever.interval_minutes = u64::MAX;
    let h = Harness::with_sources(true, vec![forever]);
    h.scheduler.start().unwrap();

    assert!(h.next_event().outcome.is_success());
    assert_eq!(h.scheduler.status()[0].next_due, None);
    assert_ne!(h.scheduler.phase(), Phase::Stopped);

    h.scheduler.trigger_source("panel").unwrap();
    assert_eq!(h.next_event().priority, Priority::Manual);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn start_is_idempotent_and_stop_is_terminal() {
    let h = Harness::new(true);
    assert_eq!(h.scheduler.phase(), Phase::Idle);
    h.scheduler.start().unwrap();
    h.scheduler.start().unwrap();
    h.next_event();

    h.scheduler.stop();
    assert_eq!(h.scheduler.phase(), Phase::Stopped);
    h.scheduler.stop();

    assert!(matches!(h.scheduler.start(), Err(SchedulerError::Stopped)));
    assert!(matches!(
        h.scheduler.trigger_now(source(1)),
        Err(SchedulerError::Stopped)
    ));
}

#[test]
fn stop_before_start() {
    let h = Harness::new(true);
    h.scheduler.stop();
    assert_eq!(h.scheduler.phase(), Phase::Stopped);
    assert!(h.events.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn stop_from_another_thread_ends_event_stream() {
    let h = Harness::new(true);
    h.scheduler.start().unwrap();
    h.next_event();

    std::thread::scope(|s| {
        s.spawn(|| h.scheduler.stop());
    });
    // A consumer draining the events returns once the loop has exited.
    assert!(matches!(
        h.events.recv_timeout(WAIT),
        Err(mpsc::RecvTimeoutError::Disconnected)
    ));
    assert_eq!(h.scheduler.phase(), Phase::Stopped);
}

#[test]
fn stop_cancels_in_flight_cycle_at_next_checkpoint() {
    let h = Harness::new(false);
    h.scheduler.start().unwrap();
    h.entered.recv_timeout(WAIT).unwrap();

    let open = Arc::clone(&h.open);
    let opener = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        let (lock, cvar) = &*open;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    });
    h.scheduler.stop();
    opener.join().unwrap();

    assert_eq!(h.next_event().outcome, CycleOutcome::Cancelled);
    assert!(h.sink.shown.lock().unwrap().is_empty());
    assert_eq!(h.scheduler.phase(), Phase::Stopped);
}
