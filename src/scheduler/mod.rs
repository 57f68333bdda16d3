//! Refresh scheduler.
//!
//! Decides what to show next and when, and runs one cycle at a time on a
//! background thread.
//!
//! ```text
//! Idle ──start()──▶ Running ⇄ CycleInFlight
//!   │                  │            │
//!   └──────stop()──────┴────────────┴──▶ Stopped
//! ```
//!
//! The loop picks work in priority order: a stop request, then a pending
//! manual trigger, then the most overdue source. With nothing to do it
//! sleeps until the next due time or until woken by a trigger or stop.
//!
//! Manual triggers go through a single-slot mailbox: a burst of triggers
//! while a cycle runs collapses into one re-run of the latest request, and
//! `trigger_now` never waits for the running cycle.
//!
//! The module is split into:
//! - **Cycle**: [`CycleRunner`] and the cycle's error and outcome types
//! - **Timetable**: pure interval bookkeeping
//! - **Health**: per-source failure counters ([`SourceStatus`])

mod cycle;
mod health;
mod timetable;

pub use cycle::{
    CycleError, CycleLimits, CycleOutcome, CycleRunner, ErrorClass, ScheduleEntry,
};
pub use health::{FailureRecord, SourceStatus};
pub use timetable::Timetable;

use crate::config::{SchedulerConfig, SourceConfig};
use crate::types::Priority;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler has been stopped")]
    Stopped,
    #[error("Unknown source '{0}'")]
    UnknownSource(String),
    #[error("Cannot start scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    CycleInFlight,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::CycleInFlight => "cycle in flight",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Emitted after every cycle.
#[derive(Debug, Clone)]
pub struct CycleEvent {
    pub source_id: String,
    pub priority: Priority,
    pub outcome: CycleOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Mailbox {
    /// Latest manual request; a newer one replaces it.
    pending: Option<SourceConfig>,
    stop: bool,
}

/// State shared between the handle and the loop thread.
struct Shared {
    mailbox: Mutex<Mailbox>,
    wake: Condvar,
    cancel: AtomicBool,
    phase: Mutex<Phase>,
    health: Mutex<BTreeMap<String, SourceStatus>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn set_phase(&self, phase: Phase) {
        *lock(&self.phase) = phase;
    }
}

/// Everything the loop thread takes ownership of.
struct Worker {
    runner: CycleRunner,
    timetable: Timetable,
    degraded_after: u32,
    events: Option<Sender<CycleEvent>>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    sources: Vec<SourceConfig>,
    worker: Mutex<Option<Worker>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(runner: CycleRunner, sources: Vec<SourceConfig>, config: &SchedulerConfig) -> Self {
        let health = sources
            .iter()
            .map(|s| (s.id.clone(), SourceStatus::new(&s.id, &s.plugin)))
            .collect();
        let shared = Arc::new(Shared {
            mailbox: Mutex::new(Mailbox::default()),
            wake: Condvar::new(),
            cancel: AtomicBool::new(false),
            phase: Mutex::new(Phase::Idle),
            health: Mutex::new(health),
        });
        let worker = Worker {
            runner,
            timetable: Timetable::default(),
            degraded_after: config.degraded_after.max(1),
            events: None,
        };
        Self {
            shared,
            sources,
            worker: Mutex::new(Some(worker)),
            handle: Mutex::new(None),
        }
    }

    /// Send a [`CycleEvent`] to `tx` after every cycle.
    pub fn with_events(self, tx: Sender<CycleEvent>) -> Self {
        if let Some(worker) = lock(&self.worker).as_mut() {
            worker.events = Some(tx);
        }
        self
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.shared.phase)
    }

    /// Start the loop thread. Does nothing if already running.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut phase = lock(&self.shared.phase);
        match *phase {
            Phase::Stopped => return Err(SchedulerError::Stopped),
            Phase::Running | Phase::CycleInFlight => return Ok(()),
            Phase::Idle => {}
        }
        let Some(mut worker) = lock(&self.worker).take() else {
            return Err(SchedulerError::Stopped);
        };
        worker.timetable = Timetable::new(&self.sources, Instant::now());

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("inkrefresh-scheduler".into())
            .spawn(move || run_loop(shared, worker))?;
        *lock(&self.handle) = Some(handle);
        *phase = Phase::Running;
        log::info!("scheduler started with {} source(s)", self.sources.len());
        Ok(())
    }

    /// Cancel the in-flight cycle at its next checkpoint and join the loop.
    /// Safe to call more than once.
    pub fn stop(&self) {
        {
            let mut mailbox = lock(&self.shared.mailbox);
            mailbox.stop = true;
            mailbox.pending = None;
        }
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();

        if let Some(handle) = lock(&self.handle).take()
            && handle.join().is_err()
        {
            log::error!("scheduler thread panicked");
        }
        lock(&self.worker).take();
        if self.phase() != Phase::Stopped {
            log::info!("scheduler stopped");
        }
        self.shared.set_phase(Phase::Stopped);
    }

    /// Queue a manual cycle for `source`, replacing any queued one.
    pub fn trigger_now(&self, source: SourceConfig) -> Result<(), SchedulerError> {
        let mut mailbox = lock(&self.shared.mailbox);
        if mailbox.stop {
            return Err(SchedulerError::Stopped);
        }
        if let Some(previous) = mailbox.pending.replace(source) {
            log::debug!("manual trigger for '{}' superseded", previous.id);
        }
        drop(mailbox);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Queue a manual cycle for the configured source `id`.
    pub fn trigger_source(&self, id: &str) -> Result<(), SchedulerError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownSource(id.to_string()))?;
        self.trigger_now(source)
    }

    /// Health of every configured source, in configuration order.
    pub fn status(&self) -> Vec<SourceStatus> {
        let health = lock(&self.shared.health);
        self.sources
            .iter()
            .filter_map(|s| health.get(&s.id).cloned())
            .collect()
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Block until there is work or a stop request. `None` means stop.
fn next_entry(shared: &Shared, timetable: &Timetable) -> Option<ScheduleEntry> {
    let mut mailbox = lock(&shared.mailbox);
    loop {
        if mailbox.stop {
            return None;
        }
        if let Some(source) = mailbox.pending.take() {
            return Some(ScheduleEntry::manual(source));
        }
        let now = Instant::now();
        if let Some(entry) = timetable.due_entry(now) {
            return Some(entry);
        }
        mailbox = match timetable.next_due() {
            Some(due) => {
                shared
                    .wake
                    .wait_timeout(mailbox, due.saturating_duration_since(now))
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => shared
                .wake
                .wait(mailbox)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

fn run_loop(shared: Arc<Shared>, mut worker: Worker) {
    while let Some(entry) = next_entry(&shared, &worker.timetable) {
        shared.set_phase(Phase::CycleInFlight);
        let started = Instant::now();
        let started_at = Utc::now();

        let result = worker.runner.run_cycle(&entry, &shared.cancel);
        if let Err(e) = &result {
            log::error!("cycle for '{}' failed [{}]: {e}", entry.source.id, e.class());
        }
        let outcome = CycleOutcome::from_result(result);

        let scheduled = entry.priority == Priority::Scheduled;
        let next_due = if scheduled {
            worker
                .timetable
                .record_attempt(&entry.source.id, started)
                .and_then(|due| chrono::Duration::from_std(due - started).ok())
                .and_then(|interval| started_at.checked_add_signed(interval))
        } else {
            None
        };
        {
            let mut health = lock(&shared.health);
            let status = health
                .entry(entry.source.id.clone())
                .or_insert_with(|| SourceStatus::new(&entry.source.id, &entry.source.plugin));
            status.record(&outcome, Utc::now(), worker.degraded_after);
            if scheduled {
                status.next_due = next_due;
            }
        }

        if let Some(tx) = &worker.events {
            let event = CycleEvent {
                source_id: entry.source.id.clone(),
                priority: entry.priority,
                outcome,
                started_at,
                elapsed: started.elapsed(),
            };
            if tx.send(event).is_err() {
                worker.events = None;
            }
        }

        // Don't flip back to Running if stop() already marked us stopped.
        let mut phase = lock(&shared.phase);
        if *phase == Phase::CycleInFlight {
            *phase = Phase::Running;
        }
    }
    log::debug!("scheduler loop exited");
}
