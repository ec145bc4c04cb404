//! Health Tracker: quarantines repeatedly failing handles with a
//! fixed cooldown (no exponential backoff — a cold tool server usually needs a
//! fixed pause, not a growing one, before it's worth retrying).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
struct HealthRecord {
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    cooldown_until: Option<Instant>,
}

/// Per-handle success/failure tracker with a cooldown after failure.
pub struct HealthTracker {
    cooldown: Duration,
    records: Mutex<HashMap<String, HealthRecord>>,
}

impl HealthTracker {
    pub fn new(cooldown_seconds: u64) -> Self {
        Self {
            cooldown: Duration::from_secs(cooldown_seconds),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// True iff there is no record, or its cooldown is absent/elapsed.
    pub fn is_healthy(&self, handle: &str) -> bool {
        let records = self.records.lock().unwrap();
        match records.get(handle) {
            None => true,
            Some(r) => match r.cooldown_until {
                None => true,
                Some(until) => Instant::now() >= until,
            },
        }
    }

    /// Clears the record.
    pub fn mark_ok(&self, handle: &str) {
        let mut records = self.records.lock().unwrap();
        records.remove(handle);
        tracing::debug!(handle, "health: marked ok");
    }

    /// Sets `cooldown_until = now + cooldown_seconds`; increments `consecutive_failures`
    ///.
    pub fn mark_fail(&self, handle: &str) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(handle.to_string()).or_default();
        record.consecutive_failures += 1;
        let now = Instant::now();
        record.last_failure_time = Some(now);
        record.cooldown_until = Some(now + self.cooldown);
        tracing::warn!(
            handle,
            consecutive_failures = record.consecutive_failures,
            "health: marked failed"
        );
    }

    /// Healthy handles, preserving input order.
    pub fn filter_healthy<'a>(&self, handles: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        handles.into_iter().filter(|h| self.is_healthy(h)).collect()
    }

    pub fn consecutive_failures(&self, handle: &str) -> u32 {
        self.records
            .lock()
            .unwrap()
            .get(handle)
            .map(|r| r.consecutive_failures)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_handle_is_healthy() {
        let tracker = HealthTracker::new(60);
        assert!(tracker.is_healthy("nope"));
    }

    #[test]
    fn mark_fail_makes_handle_unhealthy_until_cooldown_elapses() {
        let tracker = HealthTracker::new(0);
        tracker.mark_fail("h1");
        // Cooldown of 0s should already be in the past by the time we check.
        std::thread::sleep(Duration::from_millis(5));
        assert!(tracker.is_healthy("h1"));
    }

    #[test]
    fn mark_fail_keeps_handle_unhealthy_before_cooldown_elapses() {
        let tracker = HealthTracker::new(60);
        tracker.mark_fail("h1");
        assert!(!tracker.is_healthy("h1"));
    }

    #[test]
    fn mark_ok_clears_record() {
        let tracker = HealthTracker::new(60);
        tracker.mark_fail("h1");
        assert!(!tracker.is_healthy("h1"));
        tracker.mark_ok("h1");
        assert!(tracker.is_healthy("h1"));
        assert_eq!(tracker.consecutive_failures("h1"), 0);
    }

    #[test]
    fn consecutive_failures_increments_across_calls() {
        let tracker = HealthTracker::new(60);
        tracker.mark_fail("h1");
        tracker.mark_fail("h1");
        assert_eq!(tracker.consecutive_failures("h1"), 2);
    }

    #[test]
    fn filter_healthy_preserves_order_and_drops_unhealthy() {
        let tracker = HealthTracker::new(60);
        tracker.mark_fail("b");
        let filtered = tracker.filter_healthy(["a", "b", "c"]);
        assert_eq!(filtered, vec!["a", "c"]);
    }
}
