//! Humsana CLI - Command-line interface for Humsana
//!
//! Commands:
//! - status: Current metrics, dominant state and fatigue
//! - check: Ask the interlock about a command without running it
//! - exec: Run a command through the interlock
//! - analyze: Analyze a JSON array of timing events (batch mode)
//! - ingest: Feed key observations from stdin (streaming mode)
//! - audit: Show the safety audit log
//! - config: Show or initialize configuration
//! - doctor: Diagnose installation health

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use humsana::config::DataPaths;
use humsana::interlock::ExecutionStatus;
use humsana::pipeline::parse_timing_events;
use humsana::types::KeyKind;
use humsana::{
    analyze_events, AuditLog, Config, Entitlement, HumsanaError, InterlockEngine, LicenseKeyFile,
    LogNotifier, SignalPipeline, HUMSANA_VERSION, PRODUCER_NAME,
};

/// Humsana - Cognitive-state inference and a fatigue interlock for the terminal
#[derive(Parser)]
#[command(name = "humsana")]
#[command(author = "Humsana")]
#[command(version = HUMSANA_VERSION)]
#[command(about = "Keystroke-timing state inference and dangerous-command interlock", long_about = None)]
struct Cli {
    /// Data directory (defaults to $HUMSANA_HOME or ~/.humsana)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current metrics, dominant state and fatigue
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether a command would be allowed right now
    Check {
        /// Shell command to check
        command: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a command through the interlock
    Exec {
        /// Shell command to run
        command: String,

        /// Override message, e.g. "OVERRIDE SAFETY PROTOCOL: P0 outage"
        #[arg(long = "override")]
        override_message: Option<String>,
    },

    /// Analyze a JSON array of timing events
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Seconds since last activity
        #[arg(long, default_value = "0")]
        idle: f64,
    },

    /// Read key observations as NDJSON from stdin and emit analyses
    Ingest {
        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Show the safety audit log
    Audit {
        /// Number of most recent entries
        #[arg(long, default_value = "10")]
        count: usize,

        /// Show summary counts instead of entries
        #[arg(long)]
        stats: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose installation health
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config.json
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// One line of `ingest` input
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Observation {
    Key { kind: KeyKind, at: DateTime<Utc> },
    Pointer { at: DateTime<Utc> },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), HumCliError> {
    let paths = match cli.home {
        Some(home) => DataPaths::new(home),
        None => DataPaths::resolve()?,
    };

    match cli.command {
        Commands::Status { json } => cmd_status(&paths, json),
        Commands::Check { command, json } => cmd_check(&paths, &command, json),
        Commands::Exec {
            command,
            override_message,
        } => cmd_exec(&paths, &command, override_message.as_deref()),
        Commands::Analyze { input, idle } => cmd_analyze(&input, idle),
        Commands::Ingest { flush } => cmd_ingest(&paths, flush),
        Commands::Audit { count, stats } => cmd_audit(&paths, count, stats),
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&paths),
            ConfigAction::Init { force } => cmd_config_init(&paths, force),
        },
        Commands::Doctor { json } => cmd_doctor(&paths, json),
    }
}

fn interlock_engine(paths: &DataPaths, config: Config) -> InterlockEngine {
    InterlockEngine::new(config, AuditLog::open(paths.audit()))
        .with_entitlement(LicenseKeyFile::new(paths.license()))
        .with_notifier(LogNotifier)
}

fn cmd_status(paths: &DataPaths, json: bool) -> Result<(), HumCliError> {
    let config = Config::load(&paths.config());
    let pipeline = SignalPipeline::open(config.clone(), paths);
    let now = Utc::now();
    let report = pipeline.status_report(now);
    let interlock = interlock_engine(paths, config.clone()).get_status(&report.fatigue);

    if json {
        let value = serde_json::json!({
            "status": report,
            "interlock": interlock,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Humsana Status");
    println!("==============");
    println!("State:           {}", report.dominant_state);
    println!(
        "Stress / focus:  {:.2} / {:.2} ({} samples, {} min)",
        report.metrics.stress_level,
        report.metrics.focus_level,
        report.metrics.sample_count,
        report.metrics.window_minutes
    );
    if report.high_stress {
        println!("                 stress above {:.2}", config.stress_threshold);
    }
    if report.low_focus {
        println!("                 focus below {:.2}", config.focus_threshold);
    }
    println!("Typing speed:    {:.1} wpm", report.metrics.typing_wpm);
    println!(
        "Fatigue:         {}% ({}), {:.2} h since last break",
        report.fatigue.fatigue_level, report.fatigue.fatigue_category, report.fatigue.uptime_hours
    );
    println!("                 {}", report.fatigue.recommendation);
    println!(
        "Interlock:       {} (threshold {}%, mode {})",
        if interlock.interlock_active {
            "ACTIVE"
        } else {
            "standby"
        },
        interlock.threshold,
        interlock.execution_mode
    );

    Ok(())
}

fn cmd_check(paths: &DataPaths, command: &str, json: bool) -> Result<(), HumCliError> {
    let config = Config::load(&paths.config());
    let fatigue = SignalPipeline::open(config.clone(), paths).fatigue_status(Utc::now());
    let result = interlock_engine(paths, config).check_command(command, &fatigue);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.message);
        if let Some(instruction) = &result.override_instruction {
            println!("\n{}", instruction);
        }
    }

    if result.allowed {
        Ok(())
    } else {
        Err(HumCliError::Blocked(result.fatigue_level))
    }
}

fn cmd_exec(
    paths: &DataPaths,
    command: &str,
    override_message: Option<&str>,
) -> Result<(), HumCliError> {
    let config = Config::load(&paths.config());
    let fatigue = SignalPipeline::open(config.clone(), paths).fatigue_status(Utc::now());
    let mut engine = interlock_engine(paths, config);

    if let Some(message) = override_message {
        if engine.process_override(message).is_none() {
            log::warn!("Override message not accepted; expected 'OVERRIDE SAFETY PROTOCOL: <reason>'");
        }
    }

    let outcome = engine.execute_command(command, None, &fatigue)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match outcome.status {
        ExecutionStatus::Simulated | ExecutionStatus::Executed => Ok(()),
        ExecutionStatus::Blocked => Err(HumCliError::Blocked(fatigue.fatigue_level)),
        ExecutionStatus::Timeout | ExecutionStatus::Error => Err(HumCliError::ExecutionFailed(
            outcome.error.unwrap_or_else(|| "unknown failure".to_string()),
        )),
    }
}

fn cmd_analyze(input: &Path, idle: f64) -> Result<(), HumCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let events = parse_timing_events(&input_data)?;

    if events.is_empty() {
        return Err(HumCliError::NoEvents);
    }

    let result = analyze_events(&events, idle);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_ingest(paths: &DataPaths, flush: bool) -> Result<(), HumCliError> {
    if atty::is(atty::Stream::Stdin) {
        log::warn!("Reading key observations from a terminal; pipe NDJSON in or end with Ctrl-D");
    }

    let config = Config::load(&paths.config());
    let mut pipeline = SignalPipeline::open(config, paths).with_notifier(LogNotifier);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        let observation: Observation = serde_json::from_str(trimmed).map_err(|e| {
            HumCliError::ParseError(format!("Failed to parse observation: {}", e))
        })?;

        let result = match observation {
            Observation::Key { kind, at } => pipeline.on_key(kind, at),
            Observation::Pointer { at } => {
                pipeline.on_pointer(at);
                None
            }
        };

        if let Some(result) = result {
            writeln!(stdout, "{}", serde_json::to_string(&result)?)?;
            if flush {
                stdout.flush()?;
            }
        }
    }

    stdout.flush()?;
    Ok(())
}

fn cmd_audit(paths: &DataPaths, count: usize, stats: bool) -> Result<(), HumCliError> {
    let audit = AuditLog::open(paths.audit());

    if stats {
        println!("{}", serde_json::to_string_pretty(&audit.stats())?);
    } else {
        println!("{}", serde_json::to_string_pretty(&audit.recent(count))?);
    }

    Ok(())
}

fn cmd_config_show(paths: &DataPaths) -> Result<(), HumCliError> {
    let config = Config::load(&paths.config());
    println!("{}", config.to_json()?);
    Ok(())
}

fn cmd_config_init(paths: &DataPaths, force: bool) -> Result<(), HumCliError> {
    let path = paths.config();
    if path.exists() && !force {
        return Err(HumCliError::ConfigExists(path));
    }

    Config::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_doctor(paths: &DataPaths, json: bool) -> Result<(), HumCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "humsana_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Humsana version {}", HUMSANA_VERSION),
    });

    checks.push(DoctorCheck {
        name: "data_dir".to_string(),
        status: if paths.root.is_dir() {
            CheckStatus::Ok
        } else {
            CheckStatus::Warning
        },
        message: format!("Using {}", paths.root.display()),
    });

    let config_path = paths.config();
    checks.push(if !config_path.exists() {
        DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "No config.json; using defaults (run 'humsana config init')".to_string(),
        }
    } else {
        match fs::read_to_string(&config_path)
            .map_err(HumsanaError::from)
            .and_then(|content| Config::from_json(&content))
        {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (mode {}, threshold {}%)",
                    config.execution_mode, config.fatigue_threshold
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid config.json, defaults in effect: {}", e),
            },
        }
    });

    for (name, path) in [("activity_log", paths.activity()), ("audit_log", paths.audit())] {
        checks.push(json_file_check(name, &path));
    }

    let license = LicenseKeyFile::new(paths.license());
    checks.push(DoctorCheck {
        name: "license".to_string(),
        status: CheckStatus::Ok,
        message: if license.allows_live_execution() {
            "Pro license present; live execution available".to_string()
        } else {
            "No pro license; live mode runs as dry_run".to_string()
        },
    });

    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (interactive mode)".to_string()
        } else {
            "stdin is a pipe (ingest ready)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: HUMSANA_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Humsana Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(HumCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// A persisted log that fails to parse is not fatal, but it will be reset on next write
fn json_file_check(name: &str, path: &Path) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: "Not created yet".to_string(),
        };
    }

    match fs::read_to_string(path).map(|c| serde_json::from_str::<serde_json::Value>(&c)) {
        Ok(Ok(_)) => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: format!("{} is valid JSON", path.display()),
        },
        Ok(Err(e)) => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: format!("{} is corrupted and will be reset: {}", path.display(), e),
        },
        Err(e) => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot read {}: {}", path.display(), e),
        },
    }
}

// Error types

#[derive(Debug)]
enum HumCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Core(HumsanaError),
    Blocked(u8),
    ExecutionFailed(String),
    NoEvents,
    ConfigExists(PathBuf),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for HumCliError {
    fn from(e: io::Error) -> Self {
        HumCliError::Io(e)
    }
}

impl From<serde_json::Error> for HumCliError {
    fn from(e: serde_json::Error) -> Self {
        HumCliError::Json(e)
    }
}

impl From<HumsanaError> for HumCliError {
    fn from(e: HumsanaError) -> Self {
        HumCliError::Core(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HumCliError> for CliError {
    fn from(e: HumCliError) -> Self {
        match e {
            HumCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HumCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            HumCliError::Core(e) => CliError {
                code: "HUMSANA_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'humsana doctor' for details".to_string()),
            },
            HumCliError::Blocked(level) => CliError {
                code: "INTERLOCK_ENGAGED".to_string(),
                message: format!("Command blocked at fatigue {}%", level),
                hint: Some(
                    "Retry with --override \"OVERRIDE SAFETY PROTOCOL: <reason>\"".to_string(),
                ),
            },
            HumCliError::ExecutionFailed(msg) => CliError {
                code: "EXECUTION_FAILED".to_string(),
                message: msg,
                hint: None,
            },
            HumCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No timing events found in input".to_string(),
                hint: Some("Ensure input is a non-empty JSON array".to_string()),
            },
            HumCliError::ConfigExists(path) => CliError {
                code: "CONFIG_EXISTS".to_string(),
                message: format!("{} already exists", path.display()),
                hint: Some("Use --force to overwrite".to_string()),
            },
            HumCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            HumCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
