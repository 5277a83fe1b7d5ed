//! Cognitive uptime tracking
//!
//! Activity is recorded as sparse heartbeats (at most one per minute). Uptime is
//! the time since the end of the most recent restorative break, where a break is
//! a gap of at least 60 minutes between consecutive heartbeats.
//!
//! When no break exists in the retained 24 hours, the earliest retained heartbeat
//! is used as the start. Uptime is then bounded by the retention window rather
//! than by the real session length.

use crate::error::HumsanaError;
use crate::persist::{load_json_or_default, write_json_atomic};
use crate::types::{FatigueStatus, Heartbeat};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Minimum gap between heartbeats that counts as a restorative break
pub const BREAK_THRESHOLD_MINUTES: u32 = 60;

/// How long heartbeats are retained
pub const HISTORY_HOURS: i64 = 24;

/// Minimum spacing between recorded heartbeats
pub const HEARTBEAT_DEBOUNCE_SECONDS: i64 = 60;

/// Uptime at which the time-based fatigue term saturates
const FATIGUE_RAMP_HOURS: f64 = 12.0;

/// Upper bound of the time-based fatigue term
const MAX_UPTIME_FATIGUE: f64 = 60.0;

/// Weight of the current stress score
const STRESS_FATIGUE_WEIGHT: f64 = 40.0;

/// On-disk layout of the activity log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ActivityLog {
    #[serde(default)]
    heartbeats: Vec<Heartbeat>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// Records activity heartbeats and derives uptime and fatigue from them
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    path: Option<PathBuf>,
    heartbeats: Vec<Heartbeat>,
}

impl ActivityTracker {
    /// Tracker without a backing file
    pub fn in_memory() -> Self {
        Self {
            path: None,
            heartbeats: Vec::new(),
        }
    }

    /// Tracker backed by a JSON file. A missing or corrupted file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let log: ActivityLog = load_json_or_default(&path);
        let mut heartbeats = log.heartbeats;
        heartbeats.sort_by_key(|hb| hb.timestamp);

        Self {
            path: Some(path),
            heartbeats,
        }
    }

    /// Record activity now
    pub fn record_activity(&mut self, source: &str) -> Result<bool, HumsanaError> {
        self.record_activity_at(source, Utc::now())
    }

    /// Record activity at `now`.
    ///
    /// Returns `false` when the heartbeat was debounced. If the write fails the
    /// heartbeat still counts toward uptime and is written by the next successful
    /// save.
    pub fn record_activity_at(
        &mut self,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, HumsanaError> {
        if let Some(last) = self.heartbeats.last() {
            if now - last.timestamp < Duration::seconds(HEARTBEAT_DEBOUNCE_SECONDS) {
                return Ok(false);
            }
        }

        let heartbeat = Heartbeat {
            timestamp: now,
            source: source.to_string(),
        };

        // Keep the log sorted even if the caller's clock stepped backwards
        let idx = self
            .heartbeats
            .partition_point(|hb| hb.timestamp <= heartbeat.timestamp);
        self.heartbeats.insert(idx, heartbeat);

        self.save_at(now)?;
        Ok(true)
    }

    /// Drop heartbeats older than the retention window and persist the log
    pub fn save_at(&mut self, now: DateTime<Utc>) -> Result<(), HumsanaError> {
        let cutoff = now - Duration::hours(HISTORY_HOURS);
        self.heartbeats.retain(|hb| hb.timestamp > cutoff);

        if let Some(path) = &self.path {
            let log = ActivityLog {
                heartbeats: self.heartbeats.clone(),
                last_updated: Some(now),
            };
            write_json_atomic(path, &log)?;
        }
        Ok(())
    }

    pub fn heartbeats(&self) -> &[Heartbeat] {
        &self.heartbeats
    }

    /// Start of the current uptime epoch, if any activity was recorded
    pub fn epoch_start(&self) -> Option<DateTime<Utc>> {
        let threshold = Duration::minutes(BREAK_THRESHOLD_MINUTES as i64);

        // Most recent gap wins
        for pair in self.heartbeats.windows(2).rev() {
            let (previous, current) = (&pair[0], &pair[1]);
            if current.timestamp - previous.timestamp >= threshold {
                return Some(current.timestamp);
            }
        }

        self.heartbeats.first().map(|hb| hb.timestamp)
    }

    pub fn cognitive_uptime_hours(&self) -> f64 {
        self.cognitive_uptime_hours_at(Utc::now())
    }

    /// Hours since the last restorative break, never negative
    pub fn cognitive_uptime_hours_at(&self, now: DateTime<Utc>) -> f64 {
        match self.epoch_start() {
            Some(start) => {
                let seconds = (now - start).num_milliseconds() as f64 / 1000.0;
                (seconds / 3600.0).max(0.0)
            }
            None => 0.0,
        }
    }

    pub fn fatigue_level(&self, current_stress: f64) -> u8 {
        self.fatigue_level_at(current_stress, Utc::now())
    }

    pub fn fatigue_level_at(&self, current_stress: f64, now: DateTime<Utc>) -> u8 {
        fatigue_from(self.cognitive_uptime_hours_at(now), current_stress)
    }

    pub fn fatigue_status(&self, current_stress: f64) -> FatigueStatus {
        self.fatigue_status_at(current_stress, Utc::now())
    }

    pub fn fatigue_status_at(&self, current_stress: f64, now: DateTime<Utc>) -> FatigueStatus {
        let uptime = self.cognitive_uptime_hours_at(now);
        FatigueStatus::new(
            fatigue_from(uptime, current_stress),
            uptime,
            BREAK_THRESHOLD_MINUTES,
        )
    }
}

/// Fatigue level (0-100) from uptime and the current stress score
///
/// ```text
/// base   = min(60, uptime_hours / 12 * 60)
/// stress = current_stress * 40
/// level  = clamp(trunc(base + stress), 0, 100)
/// ```
pub fn fatigue_from(uptime_hours: f64, current_stress: f64) -> u8 {
    let base = f64::min(
        MAX_UPTIME_FATIGUE,
        (uptime_hours / FATIGUE_RAMP_HOURS) * MAX_UPTIME_FATIGUE,
    );
    let stress = current_stress * STRESS_FATIGUE_WEIGHT;
    let total = (base + stress).trunc();

    if total.is_nan() {
        return 0;
    }
    total.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FatigueCategory;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(m)
    }

    #[test]
    fn test_debounce_within_a_minute() {
        let mut tracker = ActivityTracker::in_memory();
        assert!(tracker.record_activity_at("keyboard", t0()).unwrap());
        assert!(!tracker
            .record_activity_at("keyboard", t0() + Duration::seconds(59))
            .unwrap());
        assert!(tracker
            .record_activity_at("mouse", t0() + Duration::seconds(60))
            .unwrap());
        assert_eq!(tracker.heartbeats().len(), 2);
        assert_eq!(tracker.heartbeats()[1].source, "mouse");
    }

    #[test]
    fn test_no_heartbeats_means_zero_uptime() {
        let tracker = ActivityTracker::in_memory();
        assert_eq!(tracker.cognitive_uptime_hours_at(t0()), 0.0);
        assert_eq!(tracker.fatigue_level_at(0.0, t0()), 0);
    }

    #[test]
    fn test_break_resets_uptime() {
        let mut tracker = ActivityTracker::in_memory();
        for m in [0, 1, 2, 3, 70] {
            tracker.record_activity_at("keyboard", minutes(m)).unwrap();
        }

        assert_eq!(tracker.epoch_start(), Some(minutes(70)));
        assert_eq!(tracker.cognitive_uptime_hours_at(minutes(70)), 0.0);
        assert!((tracker.cognitive_uptime_hours_at(minutes(100)) - 0.5).abs() < 1e-9);
        assert!((tracker.cognitive_uptime_hours_at(minutes(130)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_most_recent_break_wins() {
        let mut tracker = ActivityTracker::in_memory();
        for m in [0, 90, 91, 200, 201, 202] {
            tracker.record_activity_at("keyboard", minutes(m)).unwrap();
        }
        assert_eq!(tracker.epoch_start(), Some(minutes(200)));
    }

    #[test]
    fn test_gap_just_under_threshold_is_not_a_break() {
        let mut tracker = ActivityTracker::in_memory();
        for m in [0, 59, 118] {
            tracker.record_activity_at("keyboard", minutes(m)).unwrap();
        }
        assert_eq!(tracker.epoch_start(), Some(minutes(0)));
        assert!((tracker.cognitive_uptime_hours_at(minutes(120)) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_retention_drops_old_heartbeats() {
        let mut tracker = ActivityTracker::in_memory();
        tracker.record_activity_at("keyboard", t0()).unwrap();
        tracker
            .record_activity_at("keyboard", t0() + Duration::hours(25))
            .unwrap();

        assert_eq!(tracker.heartbeats().len(), 1);
        assert_eq!(tracker.heartbeats()[0].timestamp, t0() + Duration::hours(25));
    }

    #[test]
    fn test_fatigue_formula_boundaries() {
        assert_eq!(fatigue_from(12.0, 0.0), 60);
        assert_eq!(fatigue_from(0.0, 1.0), 40);
        assert_eq!(fatigue_from(12.0, 1.0), 100);
        assert_eq!(fatigue_from(24.0, 1.0), 100);
        assert_eq!(fatigue_from(6.0, 0.0), 30);
        assert_eq!(fatigue_from(0.0, 0.0), 0);
        assert_eq!(fatigue_from(0.0, -0.5), 0);
    }

    #[test]
    fn test_fatigue_truncates() {
        // 1h -> 5.0, stress 0.33 -> 13.2 => 18
        assert_eq!(fatigue_from(1.0, 0.33), 18);
    }

    #[test]
    fn test_fatigue_status_at_twelve_hours() {
        let mut tracker = ActivityTracker::in_memory();
        tracker.record_activity_at("keyboard", t0()).unwrap();
        let now = t0() + Duration::hours(12);

        let status = tracker.fatigue_status_at(0.0, now);
        assert_eq!(status.fatigue_level, 60);
        assert_eq!(status.fatigue_category, FatigueCategory::High);
        assert_eq!(status.uptime_hours, 12.0);
        assert_eq!(status.break_threshold_minutes, 60);

        let status = tracker.fatigue_status_at(1.0, now);
        assert_eq!(status.fatigue_level, 100);
        assert_eq!(status.fatigue_category, FatigueCategory::Critical);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.json");

        let mut tracker = ActivityTracker::open(&path);
        for m in [0, 1, 2] {
            tracker.record_activity_at("keyboard", minutes(m)).unwrap();
        }

        let reloaded = ActivityTracker::open(&path);
        assert_eq!(reloaded.heartbeats().len(), 3);
        assert_eq!(reloaded.epoch_start(), Some(minutes(0)));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["heartbeats"][0]["timestamp"].is_string());
        assert_eq!(raw["heartbeats"][0]["source"], "keyboard");
        assert!(raw["last_updated"].is_string());
    }

    #[test]
    fn test_corrupted_log_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.json");
        std::fs::write(&path, "garbage").unwrap();

        let mut tracker = ActivityTracker::open(&path);
        assert!(tracker.heartbeats().is_empty());

        // And it rebuilds on the next write
        tracker.record_activity_at("keyboard", t0()).unwrap();
        assert_eq!(ActivityTracker::open(&path).heartbeats().len(), 1);
    }

    #[test]
    fn test_failed_write_keeps_heartbeat_for_next_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.json");
        std::fs::create_dir(&path).unwrap();

        let mut tracker = ActivityTracker::open(&path);
        assert!(tracker.record_activity_at("keyboard", minutes(0)).is_err());
        assert_eq!(tracker.heartbeats().len(), 1);
        assert_eq!(tracker.epoch_start(), Some(minutes(0)));

        std::fs::remove_dir(&path).unwrap();
        tracker.record_activity_at("keyboard", minutes(1)).unwrap();
        assert_eq!(ActivityTracker::open(&path).heartbeats().len(), 2);
    }
}
