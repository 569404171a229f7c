//! Offline detection
//!
//! Per tag: `ACTIVE -> STALE-NOTIFIED` once `now - last_seen_at` exceeds the
//! threshold. Firing resets `last_seen_at` to `now`, so a tag that stays
//! silent is re-notified once per threshold window instead of on every sweep.
//! Any new sample puts the tag back in `ACTIVE`.

use crate::core::{TagState, DEFAULT_OFFLINE_THRESHOLD_SECS};

/// A tag that just crossed the staleness threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaleReport {
    /// Seconds since the tag was last seen (or last notified)
    pub silent_for: f64,
    pub checked_at: f64,
}

#[derive(Debug, Clone)]
pub struct OfflineEvaluator {
    threshold_secs: f64,
}

impl Default for OfflineEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_OFFLINE_THRESHOLD_SECS)
    }
}

impl OfflineEvaluator {
    pub fn new(threshold_secs: f64) -> Self {
        Self { threshold_secs }
    }

    pub fn threshold_secs(&self) -> f64 {
        self.threshold_secs
    }

    /// Check one tag and re-arm it if stale. Call under the tag's lock.
    pub fn check(&self, state: &mut TagState, now: f64) -> Option<StaleReport> {
        let silent_for = now - state.last_seen_at;
        if silent_for <= self.threshold_secs {
            return None;
        }

        state.last_seen_at = now;
        state.offline_event_pending = true;
        Some(StaleReport {
            silent_for,
            checked_at: now,
        })
    }
}
