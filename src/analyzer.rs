//! Signal analyzer
//!
//! Maps a window of timing events to behavioral scores, a discrete user state and
//! an interaction recommendation. Every mapping is a fixed threshold rule so the
//! same window always yields the same result.

use crate::types::{AnalysisResult, TimingEvent, UserState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Minimum window size for a real analysis
pub const MIN_EVENTS: usize = 10;

/// Window size at which confidence saturates
pub const CONFIDENCE_SATURATION_EVENTS: usize = 100;

/// Number of past results kept in memory
pub const HISTORY_CAPACITY: usize = 100;

/// Confidence reported when the window is too small
const INSUFFICIENT_DATA_CONFIDENCE: f64 = 0.1;

/// Intervals at or above this are pauses, not rhythm
const RHYTHM_OUTLIER_MS: f64 = 2000.0;

/// Average word length used for WPM estimation
const CHARS_PER_WORD: f64 = 5.0;

/// Idle time after which the user is considered away
const AWAY_IDLE_SECONDS: f64 = 120.0;

/// Sustained typing: at least this many events...
const SUSTAINED_MIN_EVENTS: usize = 50;
/// ...spanning more than this many seconds
const SUSTAINED_MIN_SPAN_SECONDS: f64 = 30.0;

/// Raw metrics extracted from a window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub typing_wpm: f64,
    pub backspace_ratio: f64,
    pub rhythm_variance: f64,
}

impl SignalMetrics {
    /// Extract metrics from a chronologically ordered window
    pub fn from_events(events: &[TimingEvent]) -> Self {
        Self {
            typing_wpm: compute_wpm(events),
            backspace_ratio: compute_backspace_ratio(events),
            rhythm_variance: compute_rhythm_variance(events),
        }
    }
}

/// Behavioral scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BehaviorScores {
    pub stress: f64,
    pub focus: f64,
    pub cognitive_load: f64,
}

/// Stateful analyzer holding a bounded history of its own results
#[derive(Debug, Clone)]
pub struct SignalAnalyzer {
    history: VecDeque<AnalysisResult>,
    capacity: usize,
}

impl Default for SignalAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalAnalyzer {
    pub fn new() -> Self {
        Self::with_history_capacity(HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Analyze a window of events.
    ///
    /// Windows shorter than [`MIN_EVENTS`] produce a low-confidence neutral result
    /// which is not added to the history.
    pub fn analyze(&mut self, events: &[TimingEvent], idle_seconds: f64) -> AnalysisResult {
        if events.len() < MIN_EVENTS {
            return insufficient_data_result(idle_seconds);
        }

        let result = analyze_window(events, idle_seconds);

        self.history.push_back(result.clone());
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }

        result
    }

    /// Past results, oldest first
    pub fn history(&self) -> impl Iterator<Item = &AnalysisResult> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Most recent result, if any
    pub fn last(&self) -> Option<&AnalysisResult> {
        self.history.back()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Analyze a window without touching any history.
pub fn analyze_window(events: &[TimingEvent], idle_seconds: f64) -> AnalysisResult {
    if events.len() < MIN_EVENTS {
        return insufficient_data_result(idle_seconds);
    }

    let metrics = SignalMetrics::from_events(events);
    let scores = BehaviorScores {
        stress: compute_stress(&metrics),
        focus: compute_focus(events, metrics.rhythm_variance, idle_seconds),
        cognitive_load: compute_cognitive_load(&metrics),
    };
    let state = determine_state(&metrics, &scores, idle_seconds);
    let confidence = (events.len() as f64 / CONFIDENCE_SATURATION_EVENTS as f64).min(1.0);

    build_result(state, &scores, &metrics, confidence, idle_seconds)
}

fn insufficient_data_result(idle_seconds: f64) -> AnalysisResult {
    let scores = BehaviorScores {
        stress: 0.0,
        focus: 0.5,
        cognitive_load: 0.3,
    };
    build_result(
        UserState::Relaxed,
        &scores,
        &SignalMetrics::default(),
        INSUFFICIENT_DATA_CONFIDENCE,
        idle_seconds,
    )
}

fn build_result(
    state: UserState,
    scores: &BehaviorScores,
    metrics: &SignalMetrics,
    confidence: f64,
    idle_seconds: f64,
) -> AnalysisResult {
    let hints = state.hints();
    AnalysisResult {
        stress_level: scores.stress,
        focus_level: scores.focus,
        cognitive_load: scores.cognitive_load,
        state,
        confidence,
        response_style: hints.response_style,
        avoid_clarifying_questions: hints.avoid_clarifying_questions,
        interruptible: hints.interruptible,
        typing_wpm: metrics.typing_wpm,
        backspace_ratio: metrics.backspace_ratio,
        rhythm_variance: metrics.rhythm_variance,
        idle_seconds,
    }
}

fn time_span_seconds(events: &[TimingEvent]) -> f64 {
    let first = events.iter().map(|e| e.timestamp).fold(f64::INFINITY, f64::min);
    let last = events
        .iter()
        .map(|e| e.timestamp)
        .fold(f64::NEG_INFINITY, f64::max);
    if first.is_finite() && last.is_finite() {
        last - first
    } else {
        0.0
    }
}

/// Estimate words per minute
///
/// Formula: `(event_count / span_seconds / 5) * 60`, rounded to one decimal
fn compute_wpm(events: &[TimingEvent]) -> f64 {
    if events.len() < 2 {
        return 0.0;
    }
    let span = time_span_seconds(events);
    if span <= 0.0 {
        return 0.0;
    }
    let chars_per_second = events.len() as f64 / span;
    let wpm = (chars_per_second / CHARS_PER_WORD) * 60.0;
    (wpm * 10.0).round() / 10.0
}

/// Fraction of events that were corrections
fn compute_backspace_ratio(events: &[TimingEvent]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    let corrections = events.iter().filter(|e| e.is_backspace).count();
    corrections as f64 / events.len() as f64
}

/// Sample variance of inter-key intervals in (0, 2000) ms
///
/// Long pauses are excluded so a coffee break does not read as erratic typing.
fn compute_rhythm_variance(events: &[TimingEvent]) -> f64 {
    let intervals: Vec<f64> = events
        .iter()
        .map(|e| e.interval_ms)
        .filter(|&ms| ms > 0.0 && ms < RHYTHM_OUTLIER_MS)
        .collect();

    if intervals.len() < 2 {
        return 0.0;
    }

    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);

    if variance.is_finite() {
        variance
    } else {
        0.0
    }
}

/// Stress score
///
/// ```text
/// +0.35 wpm > 80            | +0.15 wpm > 60
/// +0.35 backspace > 0.15    | +0.15 backspace > 0.10
/// +0.30 variance > 10000    | +0.15 variance > 5000
/// ```
fn compute_stress(metrics: &SignalMetrics) -> f64 {
    let mut stress = 0.0;

    if metrics.typing_wpm > 80.0 {
        stress += 0.35;
    } else if metrics.typing_wpm > 60.0 {
        stress += 0.15;
    }

    if metrics.backspace_ratio > 0.15 {
        stress += 0.35;
    } else if metrics.backspace_ratio > 0.10 {
        stress += 0.15;
    }

    if metrics.rhythm_variance > 10_000.0 {
        stress += 0.30;
    } else if metrics.rhythm_variance > 5_000.0 {
        stress += 0.15;
    }

    f64::min(stress, 1.0)
}

/// Focus score
///
/// Starts at 0.5, rewarded for sustained typing and steady rhythm, penalized by
/// the most severe idle tier that applies (60s / 30s / 5s).
fn compute_focus(events: &[TimingEvent], variance: f64, idle_seconds: f64) -> f64 {
    let mut focus: f64 = 0.5;

    if events.len() >= SUSTAINED_MIN_EVENTS && time_span_seconds(events) > SUSTAINED_MIN_SPAN_SECONDS
    {
        focus += 0.25;
    }

    if variance < 3_000.0 {
        focus += 0.25;
    } else if variance < 5_000.0 {
        focus += 0.10;
    }

    if idle_seconds > 60.0 {
        focus -= 0.30;
    } else if idle_seconds > 30.0 {
        focus -= 0.15;
    } else if idle_seconds > 5.0 {
        focus -= 0.05;
    }

    focus.clamp(0.0, 1.0)
}

/// Cognitive load score
///
/// The two speed-plus-corrections rules are additive: very fast typing with many
/// corrections earns both.
fn compute_cognitive_load(metrics: &SignalMetrics) -> f64 {
    let mut load = 0.3;

    if metrics.typing_wpm > 70.0 && metrics.backspace_ratio > 0.12 {
        load += 0.35;
    }

    if metrics.rhythm_variance > 8_000.0 {
        load += 0.25;
    }

    if metrics.typing_wpm > 90.0 && metrics.backspace_ratio > 0.18 {
        load += 0.20;
    }

    f64::min(load, 1.0)
}

/// Map metrics and scores to a state. Rules are checked in order; the first
/// match wins.
///
/// Adrenaline (fast and accurate) sits ahead of the stress rules because it shares
/// their speed signature but has the opposite error rate.
pub fn determine_state(
    metrics: &SignalMetrics,
    scores: &BehaviorScores,
    idle_seconds: f64,
) -> UserState {
    if idle_seconds > AWAY_IDLE_SECONDS {
        return UserState::Relaxed;
    }

    if metrics.typing_wpm > 90.0 && metrics.backspace_ratio < 0.05 && scores.focus > 0.7 {
        return UserState::Adrenaline;
    }

    if scores.cognitive_load > 0.8 && metrics.backspace_ratio > 0.15 {
        return UserState::Fatigued;
    }

    if scores.stress > 0.7 && scores.cognitive_load > 0.6 {
        return UserState::Debugging;
    }

    if scores.stress > 0.6 {
        return UserState::Stressed;
    }

    if scores.focus > 0.7 && scores.stress < 0.4 {
        return UserState::Focused;
    }

    if scores.focus > 0.4 {
        return UserState::Working;
    }

    UserState::Relaxed
}
