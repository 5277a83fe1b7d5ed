//! Safety audit log
//!
//! Append-only record of interlock decisions for compliance and post-mortems.
//! The log is a ring buffer: once it holds `max_entries`, appending evicts the
//! oldest entry.

use crate::config::ExecutionMode;
use crate::error::HumsanaError;
use crate::persist::{load_json_or_default, write_json_atomic};
use crate::types::{FatigueCategory, FatigueStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Default number of retained entries
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Kind of safety event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    SafetyOverride,
    CommandBlocked,
    DangerousCommandAllowed,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::SafetyOverride => "safety_override",
            AuditEventKind::CommandBlocked => "command_blocked",
            AuditEventKind::DangerousCommandAllowed => "dangerous_command_allowed",
        }
    }
}

/// What happened to the command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Executed,
    Blocked,
    Simulated,
}

impl AuditOutcome {
    /// Outcome of a command that was let through in the given mode
    pub fn for_mode(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Live => AuditOutcome::Executed,
            ExecutionMode::DryRun => AuditOutcome::Simulated,
        }
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub event: AuditEventKind,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub fatigue_level: u8,
    pub fatigue_category: FatigueCategory,
    pub uptime_hours: f64,
    #[serde(default)]
    pub override_reason: Option<String>,
    pub user: String,
    pub outcome: AuditOutcome,
    pub mode: ExecutionMode,
}

/// Input for a new audit record; id, timestamp and user are filled in by the log
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub event: AuditEventKind,
    pub command: &'a str,
    pub fatigue: &'a FatigueStatus,
    pub outcome: AuditOutcome,
    pub mode: ExecutionMode,
    pub override_reason: Option<&'a str>,
}

/// Summary counts over the retained entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_events: usize,
    pub overrides: usize,
    pub blocks: usize,
    pub allowed: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// On-disk layout of the audit log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AuditDocument {
    #[serde(default)]
    entries: VecDeque<AuditEntry>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    total_count: usize,
}

/// Ring-buffered audit log, optionally backed by a JSON file
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<PathBuf>,
    entries: VecDeque<AuditEntry>,
    max_entries: usize,
    user: String,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: VecDeque::new(),
            max_entries: DEFAULT_MAX_ENTRIES,
            user: current_user(),
        }
    }

    /// Open a file-backed log. A missing or corrupted file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let doc: AuditDocument = load_json_or_default(&path);
        let mut log = Self {
            path: Some(path),
            entries: doc.entries,
            max_entries: DEFAULT_MAX_ENTRIES,
            user: current_user(),
        };
        log.trim();
        log
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self.trim();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Append an entry timestamped now
    pub fn log_event(&mut self, record: AuditRecord<'_>) -> Result<AuditEntry, HumsanaError> {
        self.log_event_at(record, Utc::now())
    }

    /// Append an entry at `now`.
    ///
    /// Timestamps within one log are strictly increasing; two events in the same
    /// clock tick are separated by a microsecond.
    pub fn log_event_at(
        &mut self,
        record: AuditRecord<'_>,
        now: DateTime<Utc>,
    ) -> Result<AuditEntry, HumsanaError> {
        let timestamp = match self.entries.back() {
            Some(last) if now <= last.timestamp => last.timestamp + Duration::microseconds(1),
            _ => now,
        };

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            event: record.event,
            timestamp,
            command: record.command.to_string(),
            fatigue_level: record.fatigue.fatigue_level,
            fatigue_category: record.fatigue.fatigue_category,
            uptime_hours: record.fatigue.uptime_hours,
            override_reason: record.override_reason.map(str::to_string),
            user: self.user.clone(),
            outcome: record.outcome,
            mode: record.mode,
        };

        self.entries.push_back(entry.clone());
        let evicted = self.trim();

        // Memory only keeps what reached disk
        if let Err(e) = self.save(timestamp) {
            self.entries.pop_back();
            for old in evicted.into_iter().rev() {
                self.entries.push_front(old);
            }
            return Err(e);
        }

        Ok(entry)
    }

    fn trim(&mut self) -> Vec<AuditEntry> {
        let excess = self.entries.len().saturating_sub(self.max_entries);
        self.entries.drain(..excess).collect()
    }

    fn save(&self, now: DateTime<Utc>) -> Result<(), HumsanaError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let doc = AuditDocument {
            entries: self.entries.clone(),
            last_updated: Some(now),
            total_count: self.entries.len(),
        };
        write_json_atomic(path, &doc)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All retained entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    /// The `count` most recent entries, oldest first
    pub fn recent(&self, count: usize) -> Vec<&AuditEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).collect()
    }

    /// Safety overrides strictly after `since`
    pub fn overrides_since(&self, since: DateTime<Utc>) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.event == AuditEventKind::SafetyOverride && e.timestamp > since)
            .collect()
    }

    pub fn stats(&self) -> AuditStats {
        let count = |pred: &dyn Fn(&AuditEntry) -> bool| self.entries.iter().filter(|e| pred(e)).count();

        AuditStats {
            total_events: self.entries.len(),
            overrides: count(&|e| e.event == AuditEventKind::SafetyOverride),
            blocks: count(&|e| e.event == AuditEventKind::CommandBlocked),
            allowed: count(&|e| e.event == AuditEventKind::DangerousCommandAllowed),
            oldest_entry: self.entries.front().map(|e| e.timestamp),
            newest_entry: self.entries.back().map(|e| e.timestamp),
        }
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
