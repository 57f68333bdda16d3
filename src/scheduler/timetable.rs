//! Interval bookkeeping, kept free of threads and clocks so it can be
//! tested with made-up instants.
//!
//! Every source is due at start. After each attempt, successful or not, the
//! source's next due time is `attempt start + interval`. Manual cycles do not
//! touch the timetable. An interval too large to add to the clock leaves the
//! source unscheduled.

use super::cycle::ScheduleEntry;
use crate::config::SourceConfig;
use crate::types::Priority;
use std::time::Instant;

#[derive(Debug, Clone)]
struct Slot {
    source: SourceConfig,
    /// `None` once the source can no longer be scheduled.
    next_due: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct Timetable {
    slots: Vec<Slot>,
}

impl Timetable {
    /// All `sources` due at `now`.
    pub fn new(sources: &[SourceConfig], now: Instant) -> Self {
        Self {
            slots: sources
                .iter()
                .map(|source| Slot {
                    source: source.clone(),
                    next_due: Some(now),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Earliest due time across all sources.
    pub fn next_due(&self) -> Option<Instant> {
        self.slots.iter().filter_map(|s| s.next_due).min()
    }

    pub fn due_at(&self, id: &str) -> Option<Instant> {
        self.slots
            .iter()
            .find(|s| s.source.id == id)
            .and_then(|s| s.next_due)
    }

    /// The most overdue source at `now`, if any. Ties go to the source listed
    /// first in the configuration.
    pub fn due_entry(&self, now: Instant) -> Option<ScheduleEntry> {
        self.slots
            .iter()
            .filter_map(|s| s.next_due.filter(|due| *due <= now).map(|due| (s, due)))
            .min_by_key(|(_, due)| *due)
            .map(|(s, due)| ScheduleEntry {
                source: s.source.clone(),
                priority: Priority::Scheduled,
                due,
            })
    }

    /// Record an attempt that started at `started`; returns the new due time,
    /// or `None` if `id` is unknown or will not be due again.
    pub fn record_attempt(&mut self, id: &str, started: Instant) -> Option<Instant> {
        let slot = self.slots.iter_mut().find(|s| s.source.id == id)?;
        slot.next_due = started.checked_add(slot.source.interval());
        if slot.next_due.is_none() {
            log::warn!(
                "interval of {} minutes for '{id}' is out of range; not scheduling it again",
                slot.source.interval_minutes
            );
        }
        slot.next_due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn source(id: &str, minutes: u64) -> SourceConfig {
        let mut s = SourceConfig::new(id, "image");
        s.interval_minutes = minutes;
        s
    }

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn all_sources_due_at_start() {
        let t0 = Instant::now();
        let table = Timetable::new(&[source("a", 5), source("b", 10)], t0);
        assert_eq!(table.next_due(), Some(t0));
        assert_eq!(table.due_entry(t0).unwrap().source.id, "a");
    }

    #[test]
    fn empty_timetable_has_nothing_due() {
        let table = Timetable::new(&[], Instant::now());
        assert!(table.is_empty());
        assert_eq!(table.next_due(), None);
        assert!(table.due_entry(Instant::now()).is_none());
    }

    #[test]
    fn next_due_is_attempt_start_plus_interval() {
        let t0 = Instant::now();
        let mut table = Timetable::new(&[source("a", 5)], t0);

        // The attempt took two minutes; the schedule counts from its start.
        let started = t0 + Duration::from_secs(1);
        assert_eq!(table.record_attempt("a", started), Some(started + 5 * MIN));
        assert!(table.due_entry(started + 2 * MIN).is_none());
        assert!(table.due_entry(started + 5 * MIN).is_some());
    }

    #[test]
    fn sources_interleave_by_due_time() {
        let t0 = Instant::now();
        let mut table = Timetable::new(&[source("a", 5), source("b", 3)], t0);

        let first = table.due_entry(t0).unwrap();
        assert_eq!(first.source.id, "a");
        assert_eq!(first.priority, Priority::Scheduled);
        table.record_attempt("a", t0);

        assert_eq!(table.due_entry(t0).unwrap().source.id, "b");
        table.record_attempt("b", t0);

        assert_eq!(table.next_due(), Some(t0 + 3 * MIN));
        assert_eq!(table.due_entry(t0 + 3 * MIN).unwrap().source.id, "b");
        // At 6 minutes both are overdue; the longer-waiting one goes first.
        table.record_attempt("b", t0 + Duration::from_secs(150));
        assert_eq!(table.due_entry(t0 + 6 * MIN).unwrap().source.id, "a");
    }

    #[test]
    fn out_of_range_interval_unschedules_only_that_source() {
        let t0 = Instant::now();
        let mut table = Timetable::new(&[source("a", u64::MAX), source("b", 5)], t0);

        assert_eq!(table.record_attempt("a", t0), None);
        assert_eq!(table.due_at("a"), None);
        assert_eq!(table.due_entry(t0).unwrap().source.id, "b");

        table.record_attempt("b", t0);
        assert_eq!(table.next_due(), Some(t0 + 5 * MIN));
        assert!(table.due_entry(t0 + 1000 * MIN).is_some_and(|e| e.source.id == "b"));
    }

    #[test]
    fn unknown_source_is_ignored() {
        let t0 = Instant::now();
        let mut table = Timetable::new(&[source("a", 5)], t0);
        assert_eq!(table.record_attempt("zzz", t0), None);
        assert_eq!(table.due_at("a"), Some(t0));
    }
}
