//! Per-source health tracking.

use super::cycle::{CycleOutcome, ErrorClass};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub class: ErrorClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of one source's health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub id: String,
    pub plugin: String,
    pub consecutive_failures: u32,
    /// Set once `consecutive_failures` reaches the configured threshold.
    /// Degraded sources are still scheduled.
    pub degraded: bool,
    pub last_failure: Option<FailureRecord>,
    pub last_success: Option<DateTime<Utc>>,
    /// `None` until the first attempt: every source is due at start.
    pub next_due: Option<DateTime<Utc>>,
}

impl SourceStatus {
    pub fn new(id: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plugin: plugin.into(),
            consecutive_failures: 0,
            degraded: false,
            last_failure: None,
            last_success: None,
            next_due: None,
        }
    }

    /// Fold a finished cycle into the counters.
    pub fn record(&mut self, outcome: &CycleOutcome, at: DateTime<Utc>, degraded_after: u32) {
        match outcome {
            CycleOutcome::Displayed(_) | CycleOutcome::Unchanged(_) => {
                if self.degraded {
                    log::info!("source '{}' recovered", self.id);
                }
                self.consecutive_failures = 0;
                self.degraded = false;
                self.last_success = Some(at);
            }
            CycleOutcome::Failed { class, message } => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_failure = Some(FailureRecord {
                    class: *class,
                    message: message.clone(),
                    at,
                });
                if !self.degraded && self.consecutive_failures >= degraded_after {
                    log::warn!(
                        "source '{}' degraded after {} consecutive failures",
                        self.id,
                        self.consecutive_failures
                    );
                    self.degraded = true;
                }
            }
            CycleOutcome::Cancelled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> CycleOutcome {
        CycleOutcome::Failed {
            class: ErrorClass::Upstream,
            message: "feed down".into(),
        }
    }

    fn ok() -> CycleOutcome {
        CycleOutcome::Unchanged(serde_json::from_str(&format!("\"{}\"", "0".repeat(64))).unwrap())
    }

    #[test]
    fn degraded_after_threshold() {
        let mut status = SourceStatus::new("a", "image");
        let now = Utc::now();
        status.record(&failed(), now, 3);
        status.record(&failed(), now, 3);
        assert!(!status.degraded);
        status.record(&failed(), now, 3);
        assert!(status.degraded);
        assert_eq!(status.consecutive_failures, 3);
        let failure = status.last_failure.as_ref().unwrap();
        assert_eq!(failure.class, ErrorClass::Upstream);
        assert_eq!(failure.message, "feed down");
    }

    #[test]
    fn success_clears_degraded() {
        let mut status = SourceStatus::new("a", "image");
        let now = Utc::now();
        for _ in 0..4 {
            status.record(&failed(), now, 3);
        }
        status.record(&ok(), now, 3);
        assert!(!status.degraded);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_success, Some(now));
        // The last failure stays visible for diagnostics.
        assert!(status.last_failure.is_some());
    }

    #[test]
    fn cancellation_is_neutral() {
        let mut status = SourceStatus::new("a", "image");
        status.record(&failed(), Utc::now(), 3);
        status.record(&CycleOutcome::Cancelled, Utc::now(), 3);
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.last_success, None);
    }
}
