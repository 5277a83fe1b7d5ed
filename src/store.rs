//! Stored analysis history
//!
//! Keeps timestamped analysis results and work sessions so status surfaces can
//! report averages and the dominant state over a trailing window.

use crate::error::HumsanaError;
use crate::persist::{load_json_or_default, write_json_atomic};
use crate::types::{AggregateMetrics, AnalysisResult, UserState};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One stored analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub result: AnalysisResult,
}

/// A work session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Totals for a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_analyses: u32,
    pub avg_stress: f64,
    pub avg_focus: f64,
    pub dominant_state: UserState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    analyses: Vec<StoredAnalysis>,
    #[serde(default)]
    sessions: Vec<Session>,
}

/// Analysis history, optionally backed by a JSON file
#[derive(Debug, Clone, Default)]
pub struct AnalysisStore {
    path: Option<PathBuf>,
    doc: StoreDocument,
    active_session: Option<Uuid>,
}

impl AnalysisStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store. A missing or corrupted file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut doc: StoreDocument = load_json_or_default(&path);
        doc.analyses.sort_by_key(|a| a.timestamp);
        Self {
            path: Some(path),
            doc,
            active_session: None,
        }
    }

    fn save(&self) -> Result<(), HumsanaError> {
        match &self.path {
            Some(path) => write_json_atomic(path, &self.doc),
            None => Ok(()),
        }
    }

    /// Store `result` observed at `at`, tagged with the active session if any
    pub fn append(&mut self, result: AnalysisResult, at: DateTime<Utc>) -> Result<(), HumsanaError> {
        let record = StoredAnalysis {
            timestamp: at,
            session_id: self.active_session,
            result,
        };
        let idx = self.doc.analyses.partition_point(|a| a.timestamp <= at);
        self.doc.analyses.insert(idx, record);
        self.save()
    }

    pub fn len(&self) -> usize {
        self.doc.analyses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.analyses.is_empty()
    }

    /// Most recent stored analysis
    pub fn latest(&self) -> Option<&StoredAnalysis> {
        self.doc.analyses.last()
    }

    fn window(&self, window_minutes: u32, now: DateTime<Utc>) -> impl Iterator<Item = &StoredAnalysis> {
        // A window reaching past the start of representable time has no lower bound
        let cutoff = now.checked_sub_signed(Duration::minutes(i64::from(window_minutes)));
        self.doc
            .analyses
            .iter()
            .filter(move |a| cutoff.map_or(true, |c| a.timestamp > c) && a.timestamp <= now)
    }

    /// Averages over analyses in the trailing window; neutral when it is empty
    pub fn average_metrics(&self, window_minutes: u32, now: DateTime<Utc>) -> AggregateMetrics {
        let records: Vec<&AnalysisResult> =
            self.window(window_minutes, now).map(|a| &a.result).collect();
        if records.is_empty() {
            return AggregateMetrics::neutral(window_minutes);
        }

        let n = records.len() as f64;
        let mean = |f: fn(&AnalysisResult) -> f64| records.iter().map(|r| f(r)).sum::<f64>() / n;

        AggregateMetrics {
            stress_level: round_to(mean(|r| r.stress_level), 3),
            focus_level: round_to(mean(|r| r.focus_level), 3),
            cognitive_load: round_to(mean(|r| r.cognitive_load), 3),
            typing_wpm: round_to(mean(|r| r.typing_wpm), 1),
            backspace_ratio: round_to(mean(|r| r.backspace_ratio), 3),
            sample_count: records.len() as u32,
            window_minutes,
        }
    }

    /// Most frequent state in the trailing window; RELAXED when it is empty
    pub fn dominant_state(&self, window_minutes: u32, now: DateTime<Utc>) -> UserState {
        dominant(self.window(window_minutes, now).map(|a| a.result.state))
    }

    /// Drop analyses older than `days`. Returns how many were removed.
    pub fn cleanup_older_than(&mut self, days: u32, now: DateTime<Utc>) -> Result<usize, HumsanaError> {
        let Some(cutoff) = now.checked_sub_signed(Duration::days(i64::from(days))) else {
            return Ok(0);
        };
        let before = self.doc.analyses.len();
        self.doc.analyses.retain(|a| a.timestamp >= cutoff);
        self.doc
            .sessions
            .retain(|s| s.ended_at.map(|end| end >= cutoff).unwrap_or(true));
        let removed = before - self.doc.analyses.len();
        if removed > 0 {
            log::debug!("Pruned {} analyses older than {} days", removed, days);
            self.save()?;
        }
        Ok(removed)
    }

    /// Start a session; analyses appended from now on belong to it
    pub fn start_session(&mut self, now: DateTime<Utc>) -> Result<Uuid, HumsanaError> {
        let id = Uuid::new_v4();
        self.doc.sessions.push(Session {
            id,
            started_at: now,
            ended_at: None,
        });
        self.active_session = Some(id);
        self.save()?;
        Ok(id)
    }

    pub fn end_session(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<SessionSummary, HumsanaError> {
        let session = self
            .doc
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| HumsanaError::UnknownSession(id.to_string()))?;
        let ended_at = *session.ended_at.get_or_insert(now);
        let started_at = session.started_at;

        if self.active_session == Some(id) {
            self.active_session = None;
        }

        let results: Vec<&AnalysisResult> = self
            .doc
            .analyses
            .iter()
            .filter(|a| a.session_id == Some(id))
            .map(|a| &a.result)
            .collect();

        let (avg_stress, avg_focus) = if results.is_empty() {
            (0.0, 0.0)
        } else {
            let n = results.len() as f64;
            (
                round_to(results.iter().map(|r| r.stress_level).sum::<f64>() / n, 3),
                round_to(results.iter().map(|r| r.focus_level).sum::<f64>() / n, 3),
            )
        };

        let summary = SessionSummary {
            id,
            started_at,
            ended_at,
            total_analyses: results.len() as u32,
            avg_stress,
            avg_focus,
            dominant_state: dominant(results.iter().map(|r| r.state)),
        };

        self.save()?;
        Ok(summary)
    }

    pub fn active_session(&self) -> Option<Uuid> {
        self.active_session
    }

    pub fn sessions(&self) -> &[Session] {
        &self.doc.sessions
    }
}

/// Most frequent state; ties go to whichever tied state was seen last
fn dominant(states: impl Iterator<Item = UserState>) -> UserState {
    let mut counts: HashMap<UserState, (usize, usize)> = HashMap::new();
    for (i, state) in states.enumerate() {
        let entry = counts.entry(state).or_insert((0, i));
        entry.0 += 1;
        entry.1 = i;
    }
    counts
        .into_iter()
        .max_by_key(|(_, (count, last_seen))| (*count, *last_seen))
        .map(|(state, _)| state)
        .unwrap_or(UserState::Relaxed)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_window;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn result(state: UserState, stress: f64, focus: f64, wpm: f64) -> AnalysisResult {
        let base = analyze_window(&[], 0.0);
        let hints = state.hints();
        AnalysisResult {
            stress_level: stress,
            focus_level: focus,
            cognitive_load: 0.4,
            state,
            confidence: 0.5,
            response_style: hints.response_style,
            avoid_clarifying_questions: hints.avoid_clarifying_questions,
            interruptible: hints.interruptible,
            typing_wpm: wpm,
            backspace_ratio: 0.05,
            ..base
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_window_is_neutral() {
        let store = AnalysisStore::in_memory();
        let metrics = store.average_metrics(5, t0());
        assert_eq!(metrics, AggregateMetrics::neutral(5));
        assert_eq!(store.dominant_state(5, t0()), UserState::Relaxed);
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_average_metrics_over_window() {
        let mut store = AnalysisStore::in_memory();
        // Outside the 5-minute window
        store
            .append(result(UserState::Stressed, 0.9, 0.1, 10.0), t0())
            .unwrap();
        store
            .append(
                result(UserState::Working, 0.2, 0.6, 40.0),
                t0() + Duration::minutes(7),
            )
            .unwrap();
        store
            .append(
                result(UserState::Working, 0.4, 0.8, 51.0),
                t0() + Duration::minutes(9),
            )
            .unwrap();

        let metrics = store.average_metrics(5, t0() + Duration::minutes(10));
        assert_eq!(metrics.sample_count, 2);
        assert_eq!(metrics.stress_level, 0.3);
        assert_eq!(metrics.focus_level, 0.7);
        assert_eq!(metrics.typing_wpm, 45.5);
        assert_eq!(metrics.window_minutes, 5);
    }

    #[test]
    fn test_dominant_state_ties_go_to_most_recent() {
        let mut store = AnalysisStore::in_memory();
        let states = [
            UserState::Focused,
            UserState::Working,
            UserState::Focused,
            UserState::Working,
        ];
        for (i, state) in states.iter().enumerate() {
            store
                .append(result(*state, 0.1, 0.5, 40.0), t0() + Duration::seconds(i as i64))
                .unwrap();
        }
        let now = t0() + Duration::minutes(1);
        assert_eq!(store.dominant_state(5, now), UserState::Working);

        store
            .append(result(UserState::Focused, 0.1, 0.5, 40.0), now)
            .unwrap();
        assert_eq!(store.dominant_state(5, now), UserState::Focused);
    }

    #[test]
    fn test_latest_follows_timestamp_order() {
        let mut store = AnalysisStore::in_memory();
        store
            .append(result(UserState::Working, 0.1, 0.5, 40.0), t0() + Duration::minutes(2))
            .unwrap();
        store
            .append(result(UserState::Focused, 0.1, 0.5, 40.0), t0())
            .unwrap();

        assert_eq!(store.latest().unwrap().result.state, UserState::Working);
    }

    #[test]
    fn test_cleanup_older_than() {
        let mut store = AnalysisStore::in_memory();
        store
            .append(result(UserState::Working, 0.1, 0.5, 40.0), t0())
            .unwrap();
        store
            .append(result(UserState::Working, 0.1, 0.5, 40.0), t0() + Duration::days(6))
            .unwrap();

        let removed = store
            .cleanup_older_than(7, t0() + Duration::days(8))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_huge_windows_do_not_overflow() {
        let mut store = AnalysisStore::in_memory();
        store
            .append(result(UserState::Working, 0.2, 0.5, 40.0), t0())
            .unwrap();

        let removed = store.cleanup_older_than(u32::MAX, t0()).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.len(), 1);

        let metrics = store.average_metrics(u32::MAX, t0());
        assert_eq!(metrics.sample_count, 1);
        assert_eq!(store.dominant_state(u32::MAX, t0()), UserState::Working);
    }

    #[test]
    fn test_session_summary() {
        let mut store = AnalysisStore::in_memory();
        store
            .append(result(UserState::Stressed, 0.9, 0.1, 40.0), t0())
            .unwrap();

        let id = store.start_session(t0() + Duration::minutes(1)).unwrap();
        store
            .append(result(UserState::Focused, 0.2, 0.8, 40.0), t0() + Duration::minutes(2))
            .unwrap();
        store
            .append(result(UserState::Focused, 0.4, 0.6, 40.0), t0() + Duration::minutes(3))
            .unwrap();

        let summary = store.end_session(id, t0() + Duration::minutes(4)).unwrap();
        assert_eq!(summary.total_analyses, 2);
        assert_eq!(summary.avg_stress, 0.3);
        assert_eq!(summary.avg_focus, 0.7);
        assert_eq!(summary.dominant_state, UserState::Focused);
        assert!(store.active_session().is_none());
    }

    #[test]
    fn test_unknown_session() {
        let mut store = AnalysisStore::in_memory();
        let err = store.end_session(Uuid::new_v4(), t0()).unwrap_err();
        assert!(matches!(err, HumsanaError::UnknownSession(_)));
    }

    #[test]
    fn test_persist_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.json");

        let mut store = AnalysisStore::open(&path);
        store
            .append(result(UserState::Debugging, 0.5, 0.5, 30.0), t0())
            .unwrap();

        let reopened = AnalysisStore::open(&path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.latest().unwrap().result.state, UserState::Debugging);
    }
}
