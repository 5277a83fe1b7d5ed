//! Humsana - Local cognitive-state inference and a fatigue interlock for the terminal
//!
//! Humsana infers a user's working state from keystroke timing alone (never key
//! identity or content), tracks how long they have been working without a real
//! break, and gates dangerous shell commands when fatigue is high.
//!
//! ## Modules
//!
//! - **Signals**: [`collector`] reduces key presses to timing events, [`analyzer`]
//!   turns a window of them into scores and a discrete [`UserState`]
//! - **Fatigue**: [`activity`] derives cognitive uptime and a 0-100 fatigue level
//!   from activity heartbeats
//! - **Interlock**: [`interlock`] blocks dangerous commands above the fatigue
//!   threshold, with an audited override phrase ([`audit`])
//! - **Plumbing**: [`pipeline`] wires the pieces together for a daemon, [`store`]
//!   keeps analysis history, [`notify`] defines the delivery contract

pub mod activity;
pub mod analyzer;
pub mod audit;
pub mod collector;
pub mod config;
pub mod error;
pub mod interlock;
pub mod notify;
pub mod persist;
pub mod pipeline;
pub mod runner;
pub mod store;
pub mod types;

pub use activity::ActivityTracker;
pub use analyzer::SignalAnalyzer;
pub use audit::{AuditEntry, AuditEventKind, AuditLog, AuditOutcome};
pub use collector::SignalCollector;
pub use config::{Config, DataPaths, Entitlement, ExecutionMode, LicenseKeyFile};
pub use error::HumsanaError;
pub use interlock::{ExecutionOutcome, ExecutionStatus, InterlockEngine, InterlockResult};
pub use notify::{LogNotifier, Notifier, NullNotifier, SafetyEvent, StatusUpdate};
pub use pipeline::{analyze_events, parse_timing_events, SignalPipeline, StatusReport};
pub use runner::{CommandRunner, ShellRunner};
pub use store::AnalysisStore;
pub use types::{AnalysisResult, FatigueCategory, FatigueStatus, KeyKind, TimingEvent, UserState};

/// Humsana version
pub const HUMSANA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by diagnostics
pub const PRODUCER_NAME: &str = "humsana";
