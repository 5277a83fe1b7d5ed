//! Pipeline orchestration
//!
//! This module wires the collector, analyzer, store, activity tracker and
//! notifier together. A daemon owns one [`SignalPipeline`] and feeds it input
//! observations; status surfaces read from it.
//!
//! Disk trouble never costs an observation: persistence failures are logged and
//! the in-memory state carries on.

use crate::activity::ActivityTracker;
use crate::analyzer::{analyze_window, SignalAnalyzer};
use crate::collector::SignalCollector;
use crate::config::{Config, DataPaths};
use crate::error::HumsanaError;
use crate::notify::{dispatch_status_update, Notifier, NullNotifier, StateChangeTracker};
use crate::store::AnalysisStore;
use crate::types::{
    AggregateMetrics, AnalysisResult, FatigueStatus, KeyKind, TimingEvent, UserState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Analyze one window of timing events without any stored state.
///
/// # Example
/// ```ignore
/// let result = analyze_events(&events, 0.0);
/// println!("{}", result.state);
/// ```
pub fn analyze_events(events: &[TimingEvent], idle_seconds: f64) -> AnalysisResult {
    analyze_window(events, idle_seconds)
}

/// Parse a JSON array of timing events.
///
/// Negative intervals are rejected; everything else the analyzer tolerates.
pub fn parse_timing_events(json: &str) -> Result<Vec<TimingEvent>, HumsanaError> {
    let events: Vec<TimingEvent> = serde_json::from_str(json)?;
    if let Some(index) = events.iter().position(|e| e.interval_ms < 0.0) {
        return Err(HumsanaError::ParseError(format!(
            "event {} has a negative interval",
            index
        )));
    }
    Ok(events)
}

/// Snapshot for status surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub metrics: AggregateMetrics,
    pub dominant_state: UserState,
    pub fatigue: FatigueStatus,
    pub latest: Option<AnalysisResult>,
    /// Window stress at or above `stress_threshold`
    pub high_stress: bool,
    /// Window focus below `focus_threshold`
    pub low_focus: bool,
}

/// Stateful processor for a live input stream.
pub struct SignalPipeline {
    config: Config,
    collector: SignalCollector,
    analyzer: SignalAnalyzer,
    store: AnalysisStore,
    tracker: ActivityTracker,
    state_changes: StateChangeTracker,
    notifier: Box<dyn Notifier>,
}

impl SignalPipeline {
    pub fn new(config: Config, store: AnalysisStore, tracker: ActivityTracker) -> Self {
        Self {
            collector: SignalCollector::new(config.batch_size),
            analyzer: SignalAnalyzer::new(),
            store,
            tracker,
            state_changes: StateChangeTracker::new(),
            notifier: Box::new(NullNotifier),
            config,
        }
    }

    /// Pipeline backed by the files under `paths`
    pub fn open(config: Config, paths: &DataPaths) -> Self {
        Self::new(
            config,
            AnalysisStore::open(paths.analyses()),
            ActivityTracker::open(paths.activity()),
        )
    }

    /// In-memory pipeline
    pub fn in_memory(config: Config) -> Self {
        Self::new(config, AnalysisStore::in_memory(), ActivityTracker::in_memory())
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    /// Feed one key observation.
    ///
    /// Returns the analysis when this key completes a batch. The idle time used
    /// is the gap before this key, so a batch closed on return from a break sees it.
    pub fn on_key(&mut self, kind: KeyKind, at: DateTime<Utc>) -> Option<AnalysisResult> {
        self.heartbeat("keyboard", at);

        let seconds = to_seconds(at);
        let idle_seconds = self.collector.idle_seconds(seconds);
        let batch = self.collector.record_key(kind, seconds)?;

        let result = self.analyzer.analyze(&batch, idle_seconds);
        log::debug!(
            "Analyzed {} events: {} (confidence {:.2})",
            batch.len(),
            result.state,
            result.confidence
        );

        if let Err(e) = self.store.append(result.clone(), at) {
            log::warn!("Failed to persist analysis: {}", e);
        }
        if let Err(e) = self
            .store
            .cleanup_older_than(self.config.data_retention_days, at)
        {
            log::warn!("Failed to persist analysis cleanup: {}", e);
        }

        if let Some(update) = self.state_changes.observe(result.state) {
            dispatch_status_update(self.notifier.as_ref(), &update);
        }

        Some(result)
    }

    /// Feed a pointer click or scroll
    pub fn on_pointer(&mut self, at: DateTime<Utc>) {
        self.heartbeat("mouse", at);
        self.collector.record_pointer(to_seconds(at));
    }

    fn heartbeat(&mut self, source: &str, at: DateTime<Utc>) {
        if let Err(e) = self.tracker.record_activity_at(source, at) {
            log::warn!("Failed to persist {} heartbeat: {}", source, e);
        }
    }

    /// Average stress over the configured metrics window
    pub fn current_stress(&self, now: DateTime<Utc>) -> f64 {
        self.store
            .average_metrics(self.config.metrics_window_minutes, now)
            .stress_level
    }

    pub fn fatigue_status(&self, now: DateTime<Utc>) -> FatigueStatus {
        self.tracker.fatigue_status_at(self.current_stress(now), now)
    }

    pub fn status_report(&self, now: DateTime<Utc>) -> StatusReport {
        let window = self.config.metrics_window_minutes;
        let metrics = self.store.average_metrics(window, now);
        let sampled = metrics.sample_count > 0;
        StatusReport {
            fatigue: self.tracker.fatigue_status_at(metrics.stress_level, now),
            dominant_state: self.store.dominant_state(window, now),
            latest: self.store.latest().map(|s| s.result.clone()),
            high_stress: sampled && metrics.stress_level >= self.config.stress_threshold,
            low_focus: sampled && metrics.focus_level < self.config.focus_threshold,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AnalysisStore {
        &mut self.store
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn analyzer(&self) -> &SignalAnalyzer {
        &self.analyzer
    }

    pub fn collector(&self) -> &SignalCollector {
        &self.collector
    }
}

fn to_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
