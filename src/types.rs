//! Core data types for Humsana
//!
//! These types flow between the signal analyzer, the activity tracker and the
//! interlock. None of them can carry key identity or typed content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One observed input event, reduced to timing information only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingEvent {
    /// Wall-clock time of the event in seconds
    pub timestamp: f64,
    /// Milliseconds since the previous event (0 for the first)
    #[serde(default)]
    pub interval_ms: f64,
    /// Whether the key was a correction
    #[serde(default)]
    pub is_backspace: bool,
    /// Whether the key was a modifier (shift, ctrl, alt, cmd)
    #[serde(default)]
    pub is_modifier: bool,
}

impl TimingEvent {
    pub fn new(timestamp: f64, interval_ms: f64) -> Self {
        Self {
            timestamp,
            interval_ms,
            is_backspace: false,
            is_modifier: false,
        }
    }

    pub fn backspace(timestamp: f64, interval_ms: f64) -> Self {
        Self {
            is_backspace: true,
            ..Self::new(timestamp, interval_ms)
        }
    }
}

/// Classification of a key press made by the capture layer.
///
/// The capture layer decides the kind and drops the key itself; this is the
/// only key-related information that ever enters the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Backspace,
    Modifier,
    Other,
}

/// Discrete user state inferred from a window of timing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Relaxed,
    Working,
    Focused,
    Stressed,
    Debugging,
    Adrenaline,
    Fatigued,
}

impl UserState {
    pub const ALL: [UserState; 7] = [
        UserState::Relaxed,
        UserState::Working,
        UserState::Focused,
        UserState::Stressed,
        UserState::Debugging,
        UserState::Adrenaline,
        UserState::Fatigued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserState::Relaxed => "relaxed",
            UserState::Working => "working",
            UserState::Focused => "focused",
            UserState::Stressed => "stressed",
            UserState::Debugging => "debugging",
            UserState::Adrenaline => "adrenaline",
            UserState::Fatigued => "fatigued",
        }
    }

    /// Interaction hints for an assistant talking to a user in this state
    pub fn hints(&self) -> InteractionHints {
        let (response_style, avoid_clarifying_questions, interruptible) = match self {
            UserState::Adrenaline => (ResponseStyle::ConciseCommandMode, true, false),
            UserState::Fatigued => (ResponseStyle::Protective, true, false),
            UserState::Debugging => (ResponseStyle::Concise, true, false),
            UserState::Stressed => (ResponseStyle::Concise, true, false),
            UserState::Focused => (ResponseStyle::Detailed, false, false),
            UserState::Working => (ResponseStyle::Detailed, false, true),
            UserState::Relaxed => (ResponseStyle::Friendly, false, true),
        };
        InteractionHints {
            response_style,
            avoid_clarifying_questions,
            interruptible,
        }
    }
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an assistant should shape its responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    ConciseCommandMode,
    Protective,
    Concise,
    Detailed,
    Friendly,
}

/// Interaction recommendation derived from a [`UserState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionHints {
    pub response_style: ResponseStyle,
    pub avoid_clarifying_questions: bool,
    pub interruptible: bool,
}

/// Result of analyzing one window of timing events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Stress score (0-1)
    pub stress_level: f64,
    /// Focus score (0-1)
    pub focus_level: f64,
    /// Cognitive load score (0-1)
    pub cognitive_load: f64,
    /// Discrete state
    pub state: UserState,
    /// Confidence in this analysis (0-1), grows with window size
    pub confidence: f64,

    // Recommendations, a pure function of `state`
    pub response_style: ResponseStyle,
    pub avoid_clarifying_questions: bool,
    pub interruptible: bool,

    // Raw metrics kept for diagnostics
    /// Estimated words per minute
    pub typing_wpm: f64,
    /// Fraction of events that were corrections
    pub backspace_ratio: f64,
    /// Sample variance of inter-key intervals (ms^2)
    pub rhythm_variance: f64,
    /// Seconds since last activity at analysis time
    pub idle_seconds: f64,
}

/// Fatigue bucket used for display and audit snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatigueCategory {
    Low,
    Moderate,
    High,
    Critical,
}

impl FatigueCategory {
    /// Bucket a 0-100 fatigue level
    pub fn from_level(level: u8) -> Self {
        match level {
            0..=29 => FatigueCategory::Low,
            30..=59 => FatigueCategory::Moderate,
            60..=84 => FatigueCategory::High,
            _ => FatigueCategory::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FatigueCategory::Low => "low",
            FatigueCategory::Moderate => "moderate",
            FatigueCategory::High => "high",
            FatigueCategory::Critical => "critical",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            FatigueCategory::Low => "You are fresh. Good time for complex work.",
            FatigueCategory::Moderate => {
                "You have been working a while. Consider a break in the next hour."
            }
            FatigueCategory::High => {
                "High fatigue detected. Take a break before making important decisions."
            }
            FatigueCategory::Critical => "Critical fatigue. You should stop working and rest.",
        }
    }
}

impl fmt::Display for FatigueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived fatigue snapshot, recomputed on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatigueStatus {
    /// Fatigue level (0-100)
    pub fatigue_level: u8,
    pub fatigue_category: FatigueCategory,
    /// Hours since the last restorative break, rounded to 2 decimals
    pub uptime_hours: f64,
    pub recommendation: String,
    /// Minimum inactivity that counts as a restorative break
    pub break_threshold_minutes: u32,
}

impl FatigueStatus {
    /// Build a status from a level and uptime
    pub fn new(fatigue_level: u8, uptime_hours: f64, break_threshold_minutes: u32) -> Self {
        let fatigue_category = FatigueCategory::from_level(fatigue_level);
        Self {
            fatigue_level,
            fatigue_category,
            uptime_hours: (uptime_hours * 100.0).round() / 100.0,
            recommendation: fatigue_category.recommendation().to_string(),
            break_threshold_minutes,
        }
    }
}

/// A single activity heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    /// Where the activity came from ("keyboard", "mouse", "api")
    pub source: String,
}

/// Averages over a trailing window of stored analyses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub stress_level: f64,
    pub focus_level: f64,
    pub cognitive_load: f64,
    pub typing_wpm: f64,
    pub backspace_ratio: f64,
    pub sample_count: u32,
    pub window_minutes: u32,
}

impl AggregateMetrics {
    /// Neutral metrics used when the window holds no samples
    pub fn neutral(window_minutes: u32) -> Self {
        Self {
            stress_level: 0.0,
            focus_level: 0.5,
            cognitive_load: 0.3,
            typing_wpm: 0.0,
            backspace_ratio: 0.0,
            sample_count: 0,
            window_minutes,
        }
    }
}
