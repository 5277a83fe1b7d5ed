//! End-to-end interlock flows through the public API.
//!
//! Fatigue comes from a real activity log, decisions go to a file-backed audit
//! log, and nothing is ever run for real: live-mode tests use a recording runner.

use chrono::{DateTime, Duration, TimeZone, Utc};
use humsana::audit::AuditEventKind;
use humsana::config::StaticEntitlement;
use humsana::interlock::{CheckStatus, OVERRIDE_INSTRUCTION};
use humsana::runner::RunOutcome;
use humsana::{
    ActivityTracker, AuditLog, CommandRunner, Config, DataPaths, ExecutionMode, ExecutionStatus,
    FatigueStatus, InterlockEngine,
};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Default)]
struct RecordingRunner {
    calls: Rc<RefCell<Vec<String>>>,
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &str) -> RunOutcome {
        self.calls.borrow_mut().push(command.to_string());
        RunOutcome::Completed {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap()
}

/// Heartbeats every 30 minutes from `start` for `hours`
fn work(tracker: &mut ActivityTracker, start: DateTime<Utc>, hours: i64) {
    for step in 0..=(hours * 2) {
        tracker
            .record_activity_at("keyboard", start + Duration::minutes(30 * step))
            .unwrap();
    }
}

#[test]
fn test_blocked_command_carries_override_instruction() {
    let engine = InterlockEngine::new(Config::default(), AuditLog::in_memory());
    let fatigue = FatigueStatus::new(85, 11.0, 60);

    let result = engine.check_command("rm -rf /tmp/x", &fatigue);

    assert!(!result.allowed);
    assert_eq!(result.status, CheckStatus::Blocked);
    assert_eq!(result.override_instruction.as_deref(), Some(OVERRIDE_INSTRUCTION));
}

#[test]
fn test_long_session_blocks_and_override_is_audited() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path());

    let mut tracker = ActivityTracker::open(paths.activity());
    work(&mut tracker, t0(), 13);
    let now = t0() + Duration::hours(13);

    // Uptime is capped at 60 points; stress 0.75 adds 30
    let fatigue = tracker.fatigue_status_at(0.75, now);
    assert_eq!(fatigue.fatigue_level, 90);

    let mut engine = InterlockEngine::new(Config::default(), AuditLog::open(paths.audit()));

    let blocked = engine.execute_command("rm -rf /tmp/x", None, &fatigue).unwrap();
    assert_eq!(blocked.status, ExecutionStatus::Blocked);
    assert!(blocked.override_required);

    let reason = engine.process_override("OVERRIDE SAFETY PROTOCOL: prod fire");
    assert_eq!(reason.as_deref(), Some("prod fire"));

    let outcome = engine
        .execute_command("rm -rf /tmp/x", reason.as_deref(), &fatigue)
        .unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Simulated);
    assert_eq!(outcome.override_reason.as_deref(), Some("prod fire"));

    // Overriding is not rest
    assert_eq!(tracker.fatigue_status_at(0.75, now), fatigue);

    let reopened = AuditLog::open(paths.audit());
    let events: Vec<AuditEventKind> = reopened.entries().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![AuditEventKind::CommandBlocked, AuditEventKind::SafetyOverride]
    );
    let entry = reopened.recent(1)[0];
    assert_eq!(entry.override_reason.as_deref(), Some("prod fire"));
    assert_eq!(entry.fatigue_level, 90);
}

#[test]
fn test_repeated_override_logs_distinct_entries() {
    let mut engine = InterlockEngine::new(Config::default(), AuditLog::in_memory());
    let fatigue = FatigueStatus::new(85, 11.0, 60);

    for _ in 0..2 {
        let outcome = engine
            .execute_command("rm -rf /tmp/x", Some("prod fire"), &fatigue)
            .unwrap();
        assert_ne!(outcome.status, ExecutionStatus::Blocked);
    }

    let overrides: Vec<_> = engine
        .audit()
        .entries()
        .filter(|e| e.event == AuditEventKind::SafetyOverride)
        .collect();
    assert_eq!(overrides.len(), 2);
    assert_ne!(overrides[0].id, overrides[1].id);
    assert!(overrides[1].timestamp > overrides[0].timestamp);
}

#[test]
fn test_override_executes_in_live_mode() {
    let runner = RecordingRunner::default();
    let config = Config {
        execution_mode: ExecutionMode::Live,
        ..Config::default()
    };
    let mut engine = InterlockEngine::new(config, AuditLog::in_memory())
        .with_runner(runner.clone())
        .with_entitlement(StaticEntitlement(true));
    let fatigue = FatigueStatus::new(85, 11.0, 60);

    let outcome = engine
        .execute_command("rm -rf /tmp/x", Some("prod fire"), &fatigue)
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Executed);
    assert_eq!(*runner.calls.borrow(), vec!["rm -rf /tmp/x".to_string()]);
}

#[test]
fn test_break_lowers_fatigue_below_threshold() {
    let mut tracker = ActivityTracker::in_memory();
    work(&mut tracker, t0(), 13);

    // 70 minute break, then back at the keyboard
    let back = t0() + Duration::hours(13) + Duration::minutes(70);
    tracker.record_activity_at("keyboard", back).unwrap();

    let fatigue = tracker.fatigue_status_at(0.7, back + Duration::minutes(30));
    assert_eq!(fatigue.uptime_hours, 0.5);
    assert_eq!(fatigue.fatigue_level, 30);

    let mut engine = InterlockEngine::new(Config::default(), AuditLog::in_memory());
    let outcome = engine.execute_command("rm -rf /tmp/x", None, &fatigue).unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Simulated);
    assert_eq!(
        engine.audit().recent(1)[0].event,
        AuditEventKind::DangerousCommandAllowed
    );
}
