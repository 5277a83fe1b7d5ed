//! Notification dispatch contract
//!
//! Humsana emits two kinds of records for outside delivery: safety events from the
//! interlock and status updates when the user's state changes. Formatting them for
//! a particular chat or paging service is the [`Notifier`] implementor's job.
//! Delivery is best effort; a failure is logged and never affects a decision.

use crate::audit::{AuditEntry, AuditEventKind, AuditOutcome};
use crate::config::ExecutionMode;
use crate::error::HumsanaError;
use crate::types::{FatigueCategory, UserState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suggested lifetime of a published status, in seconds
pub const STATUS_EXPIRY_SECONDS: u64 = 3600;

/// Safety event record handed to delivery collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub event_kind: AuditEventKind,
    pub command: String,
    pub fatigue_level: u8,
    pub fatigue_category: FatigueCategory,
    pub uptime_hours: f64,
    pub outcome: AuditOutcome,
    pub mode: ExecutionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    pub user: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&AuditEntry> for SafetyEvent {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            event_kind: entry.event,
            command: entry.command.clone(),
            fatigue_level: entry.fatigue_level,
            fatigue_category: entry.fatigue_category,
            uptime_hours: entry.uptime_hours,
            outcome: entry.outcome,
            mode: entry.mode,
            override_reason: entry.override_reason.clone(),
            user: entry.user.clone(),
            timestamp: entry.timestamp,
        }
    }
}

/// Presence status derived from a user state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub state: UserState,
    /// Status text; empty clears the status
    pub text: String,
    pub emoji: String,
    pub expires_in_seconds: u64,
}

impl StatusUpdate {
    pub fn for_state(state: UserState) -> Self {
        let (text, emoji) = match state {
            UserState::Focused => ("Deep Focus", ":brain:"),
            UserState::Adrenaline => ("Handling Incident", ":rotating_light:"),
            UserState::Fatigued => ("Low Battery", ":battery:"),
            UserState::Stressed => ("Busy", ":warning:"),
            UserState::Debugging => ("Debugging", ":bug:"),
            UserState::Working => ("Working", ":computer:"),
            UserState::Relaxed => ("", ""),
        };
        Self {
            state,
            text: text.to_string(),
            emoji: emoji.to_string(),
            expires_in_seconds: STATUS_EXPIRY_SECONDS,
        }
    }

    /// Whether this update removes any published status
    pub fn clears(&self) -> bool {
        self.text.is_empty()
    }
}

/// Delivery collaborator
pub trait Notifier {
    fn deliver_safety_event(&self, event: &SafetyEvent) -> Result<(), HumsanaError>;

    fn deliver_status_update(&self, update: &StatusUpdate) -> Result<(), HumsanaError>;
}

/// Drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn deliver_safety_event(&self, _event: &SafetyEvent) -> Result<(), HumsanaError> {
        Ok(())
    }

    fn deliver_status_update(&self, _update: &StatusUpdate) -> Result<(), HumsanaError> {
        Ok(())
    }
}

/// Writes every record to the log as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver_safety_event(&self, event: &SafetyEvent) -> Result<(), HumsanaError> {
        log::info!("safety event: {}", serde_json::to_string(event)?);
        Ok(())
    }

    fn deliver_status_update(&self, update: &StatusUpdate) -> Result<(), HumsanaError> {
        log::info!("status update: {}", serde_json::to_string(update)?);
        Ok(())
    }
}

/// Deliver a safety event, logging and discarding any failure
pub fn dispatch_safety_event(notifier: &dyn Notifier, event: &SafetyEvent) {
    if let Err(e) = notifier.deliver_safety_event(event) {
        log::warn!("Safety event delivery failed: {}", e);
    }
}

/// Deliver a status update, logging and discarding any failure
pub fn dispatch_status_update(notifier: &dyn Notifier, update: &StatusUpdate) {
    if let Err(e) = notifier.deliver_status_update(update) {
        log::warn!("Status update delivery failed: {}", e);
    }
}

/// Emits a status update only when the observed state differs from the last one
#[derive(Debug, Clone, Default)]
pub struct StateChangeTracker {
    last: Option<UserState>,
}

impl StateChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, state: UserState) -> Option<StatusUpdate> {
        if self.last == Some(state) {
            return None;
        }
        self.last = Some(state);
        Some(StatusUpdate::for_state(state))
    }

    pub fn last(&self) -> Option<UserState> {
        self.last
    }
}
