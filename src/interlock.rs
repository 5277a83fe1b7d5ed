//! Fatigue interlock for dangerous shell commands
//!
//! A command is blocked when it matches a dangerous pattern and the user's
//! fatigue is above the configured threshold. That predicate is the whole gate.
//! The only bypass is the override phrase:
//!
//! ```text
//! OVERRIDE SAFETY PROTOCOL: <reason>
//! ```
//!
//! Every block, override and allowed dangerous command is written to the audit
//! log before anything runs. Overriding never touches fatigue state.

use crate::audit::{AuditEventKind, AuditLog, AuditOutcome, AuditRecord};
use crate::config::{Config, Entitlement, ExecutionMode, StaticEntitlement};
use crate::error::HumsanaError;
use crate::notify::{dispatch_safety_event, Notifier, NullNotifier, SafetyEvent};
use crate::runner::{CommandRunner, RunOutcome, ShellRunner};
use crate::types::{FatigueCategory, FatigueStatus};
use serde::{Deserialize, Serialize};

/// Fixed words of the override phrase, matched case-insensitively
pub const OVERRIDE_PHRASE: &str = "OVERRIDE SAFETY PROTOCOL";

/// Instruction returned with every block so a calling agent can self-correct
pub const OVERRIDE_INSTRUCTION: &str = "To proceed anyway, reply with exactly:\n\
OVERRIDE SAFETY PROTOCOL: [your reason]\n\n\
Example: OVERRIDE SAFETY PROTOCOL: P0 production outage";

/// Commands longer than this are shortened in messages
const DISPLAY_COMMAND_CHARS: usize = 50;

/// Decision of a pre-flight check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Allowed,
    Blocked,
}

/// Result of [`InterlockEngine::check_command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterlockResult {
    pub allowed: bool,
    pub status: CheckStatus,
    pub message: String,
    pub fatigue_level: u8,
    pub fatigue_category: FatigueCategory,
    pub uptime_hours: f64,
    pub command: String,
    pub mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_instruction: Option<String>,
}

/// Terminal status of [`InterlockEngine::execute_command`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Blocked,
    Simulated,
    Executed,
    Timeout,
    Error,
}

/// What happened to a command submitted for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub command: String,
    pub message: String,
    pub mode: ExecutionMode,
    pub fatigue: FatigueStatus,
    /// Set when the command went through on an override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    #[serde(default)]
    pub override_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    fn new(
        status: ExecutionStatus,
        command: &str,
        message: String,
        mode: ExecutionMode,
        fatigue: &FatigueStatus,
    ) -> Self {
        Self {
            status,
            command: command.to_string(),
            message,
            mode,
            fatigue: fatigue.clone(),
            override_reason: None,
            override_required: false,
            exit_code: None,
            stdout: None,
            stderr: None,
            error: None,
        }
    }
}

/// Current state of the interlock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterlockStatus {
    /// Whether dangerous commands would be blocked right now
    pub interlock_active: bool,
    pub execution_mode: ExecutionMode,
    pub fatigue: FatigueStatus,
    pub threshold: u8,
    pub dangerous_patterns_count: usize,
    pub webhook_configured: bool,
}

/// Extract the reason from an override message.
///
/// The phrase may appear anywhere in the message; the reason runs to the end of
/// its line and must be non-empty after trimming.
pub fn parse_override_phrase(message: &str) -> Result<String, HumsanaError> {
    // ASCII lowercasing keeps byte offsets aligned with `message`
    let lower = message.to_ascii_lowercase();
    let mut from = 0;

    while let Some(pos) = lower[from..].find("override") {
        let start = from + pos;
        if let Some(reason_at) = match_phrase_tail(&lower, start + "override".len()) {
            let reason = message[reason_at..].lines().next().unwrap_or("").trim();
            if reason.is_empty() {
                return Err(HumsanaError::InvalidOverride(
                    "override reason is empty".to_string(),
                ));
            }
            return Ok(reason.to_string());
        }
        from = start + "override".len();
    }

    Err(HumsanaError::InvalidOverride(format!(
        "message does not contain '{}: <reason>'",
        OVERRIDE_PHRASE
    )))
}

/// Match `\s+safety\s+protocol:\s*` at `at`, returning the offset after it
fn match_phrase_tail(lower: &str, mut at: usize) -> Option<usize> {
    for word in ["safety", "protocol:"] {
        let skipped = skip_whitespace(lower, at);
        if skipped == at || !lower[skipped..].starts_with(word) {
            return None;
        }
        at = skipped + word.len();
    }
    Some(skip_whitespace(lower, at))
}

fn skip_whitespace(s: &str, at: usize) -> usize {
    let rest = &s[at..];
    at + rest.len() - rest.trim_start().len()
}

/// Case-insensitive substring match against any pattern
fn matches_any<'a>(command: &str, mut patterns: impl Iterator<Item = &'a str>) -> bool {
    let command = command.to_lowercase();
    patterns.any(|p| command.contains(&p.to_lowercase()))
}

fn truncate(command: &str) -> String {
    if command.chars().count() <= DISPLAY_COMMAND_CHARS {
        return command.to_string();
    }
    let head: String = command.chars().take(DISPLAY_COMMAND_CHARS - 3).collect();
    format!("{}...", head)
}

/// The interlock. One instance per process, holding its collaborators.
pub struct InterlockEngine {
    config: Config,
    audit: AuditLog,
    runner: Box<dyn CommandRunner>,
    entitlement: Box<dyn Entitlement>,
    notifier: Box<dyn Notifier>,
    pending_override: Option<String>,
}

impl InterlockEngine {
    /// Engine with a shell runner, no license gate and no notifications
    pub fn new(config: Config, audit: AuditLog) -> Self {
        Self {
            config,
            audit,
            runner: Box::new(ShellRunner::new()),
            entitlement: Box::new(StaticEntitlement(true)),
            notifier: Box::new(NullNotifier),
            pending_override: None,
        }
    }

    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn with_entitlement(mut self, entitlement: impl Entitlement + 'static) -> Self {
        self.entitlement = Box::new(entitlement);
        self
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Mode after applying the license gate
    pub fn execution_mode(&self) -> ExecutionMode {
        self.config.effective_execution_mode(self.entitlement.as_ref())
    }

    /// Whether `command` contains any built-in or user deny pattern
    pub fn is_dangerous(&self, command: &str) -> bool {
        matches_any(command, self.config.all_dangerous_patterns())
    }

    fn should_block(&self, command: &str, fatigue: &FatigueStatus) -> (bool, bool) {
        let dangerous = self.is_dangerous(command);
        (dangerous, dangerous && fatigue.fatigue_level > self.config.fatigue_threshold)
    }

    /// Decide whether `command` would be allowed, without logging or running it
    pub fn check_command(&self, command: &str, fatigue: &FatigueStatus) -> InterlockResult {
        let (dangerous, blocked) = self.should_block(command, fatigue);
        let mode = self.execution_mode();

        let (status, message, override_instruction) = if blocked {
            (
                CheckStatus::Blocked,
                format!(
                    "INTERLOCK ENGAGED: High fatigue detected ({}%). You have been active for {:.1} hours. Command '{}' is blocked for safety.",
                    fatigue.fatigue_level,
                    fatigue.uptime_hours,
                    truncate(command)
                ),
                Some(OVERRIDE_INSTRUCTION.to_string()),
            )
        } else {
            let verdict = if dangerous {
                "allowed (low fatigue)"
            } else {
                "safe"
            };
            (
                CheckStatus::Allowed,
                format!("Safety check passed. Command is {}.", verdict),
                None,
            )
        };

        InterlockResult {
            allowed: !blocked,
            status,
            message,
            fatigue_level: fatigue.fatigue_level,
            fatigue_category: fatigue.fatigue_category,
            uptime_hours: fatigue.uptime_hours,
            command: command.to_string(),
            mode,
            override_instruction,
        }
    }

    /// Look for the override phrase in `message`.
    ///
    /// A valid reason is remembered and used by the next blocked
    /// [`execute_command`](Self::execute_command) call that has no explicit reason.
    /// A malformed phrase counts as no override.
    pub fn process_override(&mut self, message: &str) -> Option<String> {
        match parse_override_phrase(message) {
            Ok(reason) => {
                self.pending_override = Some(reason.clone());
                Some(reason)
            }
            Err(e) => {
                log::debug!("No override accepted: {}", e);
                None
            }
        }
    }

    pub fn pending_override(&self) -> Option<&str> {
        self.pending_override.as_deref()
    }

    /// Run `command` through the interlock.
    ///
    /// Blocks, overrides and allowed dangerous commands are audited before
    /// execution. An audit write failure aborts with an error and nothing runs.
    pub fn execute_command(
        &mut self,
        command: &str,
        override_reason: Option<&str>,
        fatigue: &FatigueStatus,
    ) -> Result<ExecutionOutcome, HumsanaError> {
        let mode = self.execution_mode();
        let (dangerous, blocked) = self.should_block(command, fatigue);

        if mode == ExecutionMode::Live
            && !self.config.allow_patterns.is_empty()
            && !matches_any(command, self.config.allow_patterns.iter().map(String::as_str))
        {
            log::info!("Rejected '{}': not in allowlist", truncate(command));
            self.record(
                AuditEventKind::CommandBlocked,
                command,
                fatigue,
                AuditOutcome::Blocked,
                mode,
                None,
            )?;
            let mut outcome = ExecutionOutcome::new(
                ExecutionStatus::Blocked,
                command,
                format!("Command '{}' is not in the allow_patterns list.", truncate(command)),
                mode,
                fatigue,
            );
            outcome.error = Some("Command not in allowlist".to_string());
            return Ok(outcome);
        }

        if blocked {
            let explicit = override_reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string);
            let reason = explicit.or_else(|| self.pending_override.take());
            self.pending_override = None;

            let Some(reason) = reason else {
                log::info!(
                    "Blocked '{}' at fatigue {}%",
                    truncate(command),
                    fatigue.fatigue_level
                );
                self.record(
                    AuditEventKind::CommandBlocked,
                    command,
                    fatigue,
                    AuditOutcome::Blocked,
                    mode,
                    None,
                )?;
                let mut outcome = ExecutionOutcome::new(
                    ExecutionStatus::Blocked,
                    command,
                    format!(
                        "High fatigue detected ({}%, {}). You have been active for {:.1} hours.\n\n\
                         Command `{}` is high-risk and has been blocked.\n\n{}",
                        fatigue.fatigue_level,
                        fatigue.fatigue_category,
                        fatigue.uptime_hours,
                        truncate(command),
                        OVERRIDE_INSTRUCTION
                    ),
                    mode,
                    fatigue,
                );
                outcome.error = Some("INTERLOCK ENGAGED".to_string());
                outcome.override_required = true;
                return Ok(outcome);
            };

            log::info!("Safety override for '{}': {}", truncate(command), reason);
            self.record(
                AuditEventKind::SafetyOverride,
                command,
                fatigue,
                AuditOutcome::for_mode(mode),
                mode,
                Some(&reason),
            )?;
            return Ok(self.execute_or_simulate(command, fatigue, mode, Some(reason)));
        }

        if dangerous {
            log::info!("Dangerous command allowed at low fatigue: '{}'", truncate(command));
            self.record(
                AuditEventKind::DangerousCommandAllowed,
                command,
                fatigue,
                AuditOutcome::for_mode(mode),
                mode,
                None,
            )?;
        } else {
            log::debug!("Allowed '{}'", truncate(command));
        }

        Ok(self.execute_or_simulate(command, fatigue, mode, None))
    }

    fn record(
        &mut self,
        event: AuditEventKind,
        command: &str,
        fatigue: &FatigueStatus,
        outcome: AuditOutcome,
        mode: ExecutionMode,
        override_reason: Option<&str>,
    ) -> Result<(), HumsanaError> {
        let entry = self.audit.log_event(AuditRecord {
            event,
            command,
            fatigue,
            outcome,
            mode,
            override_reason,
        })?;
        if self.config.enable_dangerous_command_alerts {
            dispatch_safety_event(self.notifier.as_ref(), &SafetyEvent::from(&entry));
        }
        Ok(())
    }

    fn execute_or_simulate(
        &self,
        command: &str,
        fatigue: &FatigueStatus,
        mode: ExecutionMode,
        override_reason: Option<String>,
    ) -> ExecutionOutcome {
        let mut outcome = match mode {
            ExecutionMode::DryRun => ExecutionOutcome::new(
                ExecutionStatus::Simulated,
                command,
                format!(
                    "[DRY RUN] Safety check passed.\n\nCommand: `{}`\n\n\
                     This command WOULD have been executed.\n\
                     (Execution skipped: dry_run mode active)",
                    command
                ),
                mode,
                fatigue,
            ),
            ExecutionMode::Live => match self.runner.run(command) {
                RunOutcome::Completed {
                    exit_code,
                    stdout,
                    stderr,
                } => {
                    let mut outcome = ExecutionOutcome::new(
                        ExecutionStatus::Executed,
                        command,
                        format!("Command exited with status {}", exit_code.map_or("unknown".to_string(), |c| c.to_string())),
                        mode,
                        fatigue,
                    );
                    outcome.exit_code = exit_code;
                    outcome.stdout = Some(stdout);
                    outcome.stderr = Some(stderr);
                    outcome
                }
                RunOutcome::TimedOut => {
                    log::warn!("Command timed out: '{}'", truncate(command));
                    let mut outcome = ExecutionOutcome::new(
                        ExecutionStatus::Timeout,
                        command,
                        "Command timed out and was killed".to_string(),
                        mode,
                        fatigue,
                    );
                    outcome.error = Some("Command timed out".to_string());
                    outcome
                }
                RunOutcome::Failed(e) => {
                    log::warn!("Command failed to run: {}", e);
                    let mut outcome = ExecutionOutcome::new(
                        ExecutionStatus::Error,
                        command,
                        format!("Command could not be run: {}", e),
                        mode,
                        fatigue,
                    );
                    outcome.error = Some(e);
                    outcome
                }
            },
        };
        outcome.override_reason = override_reason;
        outcome
    }

    pub fn get_status(&self, fatigue: &FatigueStatus) -> InterlockStatus {
        InterlockStatus {
            interlock_active: fatigue.fatigue_level > self.config.fatigue_threshold,
            execution_mode: self.execution_mode(),
            fatigue: fatigue.clone(),
            threshold: self.config.fatigue_threshold,
            dangerous_patterns_count: self.config.dangerous_commands.len()
                + self.config.deny_patterns.len(),
            webhook_configured: self.config.webhook_url.is_some(),
        }
    }
}
