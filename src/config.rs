//! User configuration and the license gate
//!
//! Configuration lives in `config.json` inside the data directory. Every field
//! has a default, so a partial file loads and a missing file means defaults.

use crate::error::HumsanaError;
use crate::persist::write_json_atomic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "HUMSANA_HOME";

pub const CONFIG_FILE: &str = "config.json";
pub const ACTIVITY_FILE: &str = "activity.json";
pub const AUDIT_FILE: &str = "audit.json";
pub const ANALYSES_FILE: &str = "analyses.json";
pub const LICENSE_FILE: &str = "license.key";

/// Prefix every locally valid pro license key carries
pub const LICENSE_KEY_PREFIX: &str = "hum_pro_";

/// Upper bound on `data_retention_days` (one hundred years)
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Command substrings treated as dangerous unless the user replaces the list
pub const DEFAULT_DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf",
    "DROP DATABASE",
    "DROP TABLE",
    "DELETE FROM",
    "git push --force",
    "git push -f",
    "kubectl delete",
    "terraform destroy",
    "docker system prune",
    "sudo rm",
    "dd if=",
    "mkfs",
    "> /dev/sd",
];

/// Whether approved commands actually run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Approved commands are only described, never run
    #[default]
    DryRun,
    /// Approved commands are run through the shell
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::DryRun => "dry_run",
            ExecutionMode::Live => "live",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Humsana configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub execution_mode: ExecutionMode,
    /// Fatigue level (0-100) above which dangerous commands are blocked
    pub fatigue_threshold: u8,
    pub dangerous_commands: Vec<String>,
    /// Extra dangerous patterns added on top of `dangerous_commands`
    pub deny_patterns: Vec<String>,
    /// When non-empty, live mode only runs commands matching one of these
    pub allow_patterns: Vec<String>,
    pub webhook_url: Option<String>,
    /// Average stress at or above which status reports flag high stress
    pub stress_threshold: f64,
    /// Average focus below which status reports flag low focus
    pub focus_threshold: f64,
    /// Keys per analysis batch
    pub batch_size: usize,
    pub data_retention_days: u32,
    pub enable_dangerous_command_alerts: bool,
    /// Trailing window for aggregate metrics and current stress
    pub metrics_window_minutes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::DryRun,
            fatigue_threshold: 70,
            dangerous_commands: DEFAULT_DANGEROUS_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            deny_patterns: Vec::new(),
            allow_patterns: Vec::new(),
            webhook_url: None,
            stress_threshold: 0.7,
            focus_threshold: 0.6,
            batch_size: 20,
            data_retention_days: 7,
            enable_dangerous_command_alerts: true,
            metrics_window_minutes: 5,
        }
    }
}

impl Config {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, HumsanaError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, HumsanaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), HumsanaError> {
        if self.fatigue_threshold > 100 {
            return Err(HumsanaError::InvalidConfig(format!(
                "fatigue_threshold must be 0-100, got {}",
                self.fatigue_threshold
            )));
        }
        for (name, value) in [
            ("stress_threshold", self.stress_threshold),
            ("focus_threshold", self.focus_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HumsanaError::InvalidConfig(format!(
                    "{} must be 0-1, got {}",
                    name, value
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(HumsanaError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.data_retention_days > MAX_RETENTION_DAYS {
            return Err(HumsanaError::InvalidConfig(format!(
                "data_retention_days must be at most {}, got {}",
                MAX_RETENTION_DAYS, self.data_retention_days
            )));
        }
        if self.metrics_window_minutes == 0 {
            return Err(HumsanaError::InvalidConfig(
                "metrics_window_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from `path`, falling back to defaults on any problem.
    ///
    /// A missing file is silent; an unreadable or invalid one is logged.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                log::warn!("Cannot read {}: {}; using defaults", path.display(), e);
                return Self::default();
            }
        };

        match Self::from_json(&content) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Invalid {}: {}; using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), HumsanaError> {
        self.validate()?;
        write_json_atomic(path, self)
    }

    /// Built-in and user deny patterns, in match order
    pub fn all_dangerous_patterns(&self) -> impl Iterator<Item = &str> {
        self.dangerous_commands
            .iter()
            .chain(self.deny_patterns.iter())
            .map(String::as_str)
    }

    /// The mode commands will actually run in once the license gate is applied
    pub fn effective_execution_mode(&self, entitlement: &dyn Entitlement) -> ExecutionMode {
        match self.execution_mode {
            ExecutionMode::Live if !entitlement.allows_live_execution() => {
                log::debug!("Live mode requested without entitlement; using dry_run");
                ExecutionMode::DryRun
            }
            mode => mode,
        }
    }
}

/// Resolve the data directory: `$HUMSANA_HOME`, else `$HOME/.humsana`
pub fn data_dir() -> Result<PathBuf, HumsanaError> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    match std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        Some(home) => Ok(PathBuf::from(home).join(".humsana")),
        None => Err(HumsanaError::InvalidConfig(format!(
            "neither {} nor HOME is set",
            HOME_ENV
        ))),
    }
}

/// Paths of every file Humsana keeps under one data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths under the resolved data directory
    pub fn resolve() -> Result<Self, HumsanaError> {
        Ok(Self::new(data_dir()?))
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn activity(&self) -> PathBuf {
        self.root.join(ACTIVITY_FILE)
    }

    pub fn audit(&self) -> PathBuf {
        self.root.join(AUDIT_FILE)
    }

    pub fn analyses(&self) -> PathBuf {
        self.root.join(ANALYSES_FILE)
    }

    pub fn license(&self) -> PathBuf {
        self.root.join(LICENSE_FILE)
    }
}

/// License gate consulted before running commands for real
pub trait Entitlement {
    fn allows_live_execution(&self) -> bool;
}

/// Fixed answer, for tests and embedders that do their own licensing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticEntitlement(pub bool);

impl Entitlement for StaticEntitlement {
    fn allows_live_execution(&self) -> bool {
        self.0
    }
}

/// License key stored in a local file. Only the key format is checked.
#[derive(Debug, Clone)]
pub struct LicenseKeyFile {
    path: PathBuf,
}

impl LicenseKeyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The trimmed key, if the file exists and is readable
    pub fn key(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl Entitlement for LicenseKeyFile {
    fn allows_live_execution(&self) -> bool {
        self.key()
            .map(|k| k.starts_with(LICENSE_KEY_PREFIX) && k.len() > LICENSE_KEY_PREFIX.len())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.execution_mode, ExecutionMode::DryRun);
        assert_eq!(config.fatigue_threshold, 70);
        assert_eq!(config.batch_size, 20);
        assert!(config.dangerous_commands.iter().any(|c| c == "rm -rf"));
        assert_eq!(config.dangerous_commands.len(), DEFAULT_DANGEROUS_COMMANDS.len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{"execution_mode": "live", "fatigue_threshold": 50}"#)
            .unwrap();
        assert_eq!(config.execution_mode, ExecutionMode::Live);
        assert_eq!(config.fatigue_threshold, 50);
        assert_eq!(config.stress_threshold, 0.7);
        assert!(config.enable_dangerous_command_alerts);
    }

    #[test]
    fn test_from_json_rejects_out_of_range() {
        let err = Config::from_json(r#"{"fatigue_threshold": 150}"#).unwrap_err();
        assert!(matches!(err, HumsanaError::InvalidConfig(_)));

        let err = Config::from_json(r#"{"stress_threshold": 1.5}"#).unwrap_err();
        assert!(matches!(err, HumsanaError::InvalidConfig(_)));

        let err = Config::from_json(r#"{"batch_size": 0}"#).unwrap_err();
        assert!(matches!(err, HumsanaError::InvalidConfig(_)));

        let err = Config::from_json(r#"{"data_retention_days": 4000000000}"#).unwrap_err();
        assert!(matches!(err, HumsanaError::InvalidConfig(_)));

        let config = Config::from_json(r#"{"data_retention_days": 36500}"#).unwrap();
        assert_eq!(config.data_retention_days, MAX_RETENTION_DAYS);
    }

    #[test]
    fn test_retired_fields_are_ignored() {
        let config = Config::from_json(r#"{"analysis_interval_secs": 30, "batch_size": 12}"#).unwrap();
        assert_eq!(config.batch_size, 12);
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        assert_eq!(Config::load(&path), Config::default());

        fs::write(&path, "execution_mode: live").unwrap();
        assert_eq!(Config::load(&path), Config::default());

        fs::write(&path, r#"{"fatigue_threshold": 200}"#).unwrap();
        assert_eq!(Config::load(&path), Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = Config {
            fatigue_threshold: 55,
            deny_patterns: vec!["helm uninstall".to_string()],
            ..Config::default()
        };

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path), config);
    }

    #[test]
    fn test_dangerous_patterns_include_deny_list() {
        let config = Config {
            deny_patterns: vec!["helm uninstall".to_string()],
            ..Config::default()
        };
        let patterns: Vec<&str> = config.all_dangerous_patterns().collect();
        assert_eq!(patterns.first(), Some(&"rm -rf"));
        assert_eq!(patterns.last(), Some(&"helm uninstall"));
    }

    #[test]
    fn test_effective_mode_downgrades_without_entitlement() {
        let live = Config {
            execution_mode: ExecutionMode::Live,
            ..Config::default()
        };
        assert_eq!(
            live.effective_execution_mode(&StaticEntitlement(false)),
            ExecutionMode::DryRun
        );
        assert_eq!(
            live.effective_execution_mode(&StaticEntitlement(true)),
            ExecutionMode::Live
        );

        let dry = Config::default();
        assert_eq!(
            dry.effective_execution_mode(&StaticEntitlement(true)),
            ExecutionMode::DryRun
        );
    }

    #[test]
    fn test_license_key_format() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let license = LicenseKeyFile::new(paths.license());

        assert!(!license.allows_live_execution());

        fs::write(paths.license(), "not_a_key\n").unwrap();
        assert!(!license.allows_live_execution());

        fs::write(paths.license(), "hum_pro_\n").unwrap();
        assert!(!license.allows_live_execution());

        fs::write(paths.license(), "  hum_pro_abc123\n").unwrap();
        assert!(license.allows_live_execution());
        assert_eq!(license.key().as_deref(), Some("hum_pro_abc123"));
    }

    #[test]
    fn test_data_paths() {
        let paths = DataPaths::new("/data");
        assert_eq!(paths.audit(), PathBuf::from("/data/audit.json"));
        assert_eq!(paths.activity(), PathBuf::from("/data/activity.json"));
    }
}
