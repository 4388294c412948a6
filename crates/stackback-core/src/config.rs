use crate::error::{Result, StackbackError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// VerifyDepth
// ---------------------------------------------------------------------------

/// How thoroughly a fresh snapshot is checked after backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerifyDepth {
    /// Snapshot manifest only.
    #[default]
    Metadata,
    /// Full file listing of the snapshot.
    Files,
    /// Read back and verify all pack data. The tool has no per-snapshot
    /// data check, so this covers the whole repository.
    Data,
}

impl VerifyDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyDepth::Metadata => "metadata",
            VerifyDepth::Files => "files",
            VerifyDepth::Data => "data",
        }
    }
}

impl std::str::FromStr for VerifyDepth {
    type Err = StackbackError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "metadata" => Ok(VerifyDepth::Metadata),
            "files" => Ok(VerifyDepth::Files),
            "data" => Ok(VerifyDepth::Data),
            other => Err(StackbackError::Config(format!(
                "unknown verification depth '{other}' (expected metadata, files or data)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub depth: VerifyDepth,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            depth: VerifyDepth::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// RetentionPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub auto_prune: bool,
    #[serde(default)]
    pub keep_daily: Option<u32>,
    #[serde(default)]
    pub keep_weekly: Option<u32>,
    #[serde(default)]
    pub keep_monthly: Option<u32>,
    #[serde(default)]
    pub keep_yearly: Option<u32>,
}

impl RetentionPolicy {
    /// A zero count keeps nothing extra and is treated as unset.
    pub fn has_counts(&self) -> bool {
        [
            self.keep_daily,
            self.keep_weekly,
            self.keep_monthly,
            self.keep_yearly,
        ]
        .into_iter()
        .any(|count| count.is_some_and(|n| n > 0))
    }

    /// Pruning runs only when enabled and at least one count is positive.
    pub fn should_prune(&self) -> bool {
        self.auto_prune && self.has_counts()
    }
}

// ---------------------------------------------------------------------------
// Timeouts / lifecycle tuning (seconds on disk)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_stop_timeout")]
    pub stop: u64,
    #[serde(default = "default_start_timeout")]
    pub start: u64,
    #[serde(default = "default_status_timeout")]
    pub status: u64,
    #[serde(default = "default_backup_timeout")]
    pub backup: u64,
    #[serde(default = "default_verify_timeout")]
    pub verify: u64,
    #[serde(default = "default_forget_timeout")]
    pub forget: u64,
    #[serde(default = "default_registry_lock_timeout")]
    pub registry_lock: u64,
    #[serde(default = "default_secret_command_timeout")]
    pub secret_command: u64,
}

fn default_stop_timeout() -> u64 {
    120
}
fn default_start_timeout() -> u64 {
    180
}
fn default_status_timeout() -> u64 {
    30
}
fn default_backup_timeout() -> u64 {
    3600
}
fn default_verify_timeout() -> u64 {
    1800
}
fn default_forget_timeout() -> u64 {
    600
}
fn default_registry_lock_timeout() -> u64 {
    10
}
fn default_secret_command_timeout() -> u64 {
    30
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            stop: default_stop_timeout(),
            start: default_start_timeout(),
            status: default_status_timeout(),
            backup: default_backup_timeout(),
            verify: default_verify_timeout(),
            forget: default_forget_timeout(),
            registry_lock: default_registry_lock_timeout(),
            secret_command: default_secret_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Settle time after a stop command returned.
    #[serde(default = "default_stop_grace")]
    pub stop_grace: u64,
    /// Settle time after a stop command hit its timeout.
    #[serde(default = "default_stop_grace_after_timeout")]
    pub stop_grace_after_timeout: u64,
    /// Settle time after a start command returned.
    #[serde(default = "default_start_grace")]
    pub start_grace: u64,
    #[serde(default = "default_verify_retries")]
    pub verify_retries: u32,
    #[serde(default = "default_verify_interval")]
    pub verify_interval: u64,
}

fn default_stop_grace() -> u64 {
    2
}
fn default_stop_grace_after_timeout() -> u64 {
    10
}
fn default_start_grace() -> u64 {
    2
}
fn default_verify_retries() -> u32 {
    3
}
fn default_verify_interval() -> u64 {
    5
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace: default_stop_grace(),
            stop_grace_after_timeout: default_stop_grace_after_timeout(),
            start_grace: default_start_grace(),
            verify_retries: default_verify_retries(),
            verify_interval: default_verify_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (raw, as on disk)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stacks_root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<PathBuf>,
    #[serde(default)]
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default = "default_compose_command")]
    pub compose_command: Vec<String>,
    #[serde(default = "default_restic_binary")]
    pub restic_binary: String,
    #[serde(default = "default_min_free_space_mb")]
    pub min_free_space_mb: u64,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

fn default_compose_command() -> Vec<String> {
    vec!["docker".to_string(), "compose".to_string()]
}

fn default_restic_binary() -> String {
    "restic".to_string()
}

fn default_min_free_space_mb() -> u64 {
    1024
}

impl Config {
    pub fn new(stacks_root: impl Into<PathBuf>, repository: impl Into<String>) -> Self {
        Self {
            stacks_root: stacks_root.into(),
            registry_file: None,
            lock_file: None,
            repository: repository.into(),
            password_file: None,
            password_command: None,
            password: None,
            hostname: None,
            compose_command: default_compose_command(),
            restic_binary: default_restic_binary(),
            min_free_space_mb: default_min_free_space_mb(),
            verify: VerifyConfig::default(),
            retention: RetentionPolicy::default(),
            timeouts: TimeoutsConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StackbackError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry_file
            .clone()
            .unwrap_or_else(|| paths::default_registry_file(&self.stacks_root))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Single validation pass. Either every check holds and a
    /// `ValidatedConfig` comes back, or every failing check is reported.
    pub fn validate(&self) -> std::result::Result<ValidatedConfig, Vec<ConfigIssue>> {
        let mut issues = Vec::new();
        let mut issue = |field: &str, message: String| {
            issues.push(ConfigIssue {
                field: field.to_string(),
                message,
            })
        };

        if !self.stacks_root.is_absolute() {
            issue(
                "stacks_root",
                format!("must be an absolute path, got '{}'", self.stacks_root.display()),
            );
        }
        if self.repository.trim().is_empty() {
            issue("repository", "must not be empty".to_string());
        }
        let has_secret_source = self.password_file.is_some()
            || self
                .password_command
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
            || self.password.as_deref().is_some_and(|p| !p.is_empty());
        if !has_secret_source {
            issue(
                "password",
                "one of password_file, password_command or password must be set".to_string(),
            );
        }
        if self.compose_command.is_empty() || self.compose_command[0].trim().is_empty() {
            issue("compose_command", "must name a program".to_string());
        }
        if self.restic_binary.trim().is_empty() {
            issue("restic_binary", "must name a program".to_string());
        }
        if let Some(host) = &self.hostname {
            if host.trim().is_empty() {
                issue("hostname", "must not be blank when set".to_string());
            }
        }
        for (field, secs) in [
            ("timeouts.stop", self.timeouts.stop),
            ("timeouts.start", self.timeouts.start),
            ("timeouts.status", self.timeouts.status),
            ("timeouts.backup", self.timeouts.backup),
            ("timeouts.verify", self.timeouts.verify),
            ("timeouts.forget", self.timeouts.forget),
            ("timeouts.secret_command", self.timeouts.secret_command),
        ] {
            if secs == 0 {
                issue(field, "must be greater than zero".to_string());
            }
        }
        if self.lifecycle.verify_retries == 0 {
            issue("lifecycle.verify_retries", "must be at least 1".to_string());
        }
        if self.retention.auto_prune && !self.retention.has_counts() {
            // Not fatal: pruning is skipped.
            tracing::warn!("retention.auto_prune is set but no keep_* count is above zero");
        }

        if !issues.is_empty() {
            return Err(issues);
        }

        Ok(ValidatedConfig {
            registry_file: self.registry_path(),
            lock_file: self
                .lock_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(paths::DEFAULT_LOCK_FILE)),
            stacks_root: self.stacks_root.clone(),
            repository: self.repository.clone(),
            secret: SecretSources {
                file: self.password_file.clone(),
                command: self.password_command.clone(),
                value: self.password.clone(),
            },
            hostname: self.hostname.clone(),
            compose_command: self.compose_command.clone(),
            restic_binary: self.restic_binary.clone(),
            min_free_space_bytes: self.min_free_space_mb.saturating_mul(1024 * 1024),
            verify: self.verify.enabled.then_some(self.verify.depth),
            retention: self.retention.clone(),
            timeouts: Timeouts {
                stop: secs(self.timeouts.stop),
                start: secs(self.timeouts.start),
                status: secs(self.timeouts.status),
                backup: secs(self.timeouts.backup),
                verify: secs(self.timeouts.verify),
                forget: secs(self.timeouts.forget),
                registry_lock: secs(self.timeouts.registry_lock),
                secret_command: secs(self.timeouts.secret_command),
            },
            lifecycle: LifecycleTuning {
                stop_grace: secs(self.lifecycle.stop_grace),
                stop_grace_after_timeout: secs(self.lifecycle.stop_grace_after_timeout),
                start_grace: secs(self.lifecycle.start_grace),
                verify_retries: self.lifecycle.verify_retries,
                verify_interval: secs(self.lifecycle.verify_interval),
            },
        })
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl From<Vec<ConfigIssue>> for StackbackError {
    fn from(issues: Vec<ConfigIssue>) -> Self {
        StackbackError::InvalidConfig(issues.iter().map(|i| i.to_string()).collect())
    }
}

// ---------------------------------------------------------------------------
// ValidatedConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SecretSources {
    pub file: Option<PathBuf>,
    pub command: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub stop: Duration,
    pub start: Duration,
    pub status: Duration,
    pub backup: Duration,
    pub verify: Duration,
    pub forget: Duration,
    pub registry_lock: Duration,
    pub secret_command: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleTuning {
    pub stop_grace: Duration,
    pub stop_grace_after_timeout: Duration,
    pub start_grace: Duration,
    pub verify_retries: u32,
    pub verify_interval: Duration,
}

impl LifecycleTuning {
    /// No waiting at all; used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            stop_grace: Duration::ZERO,
            stop_grace_after_timeout: Duration::ZERO,
            start_grace: Duration::ZERO,
            verify_retries: 3,
            verify_interval: Duration::ZERO,
        }
    }
}

/// Immutable configuration every core component reads from.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub stacks_root: PathBuf,
    pub registry_file: PathBuf,
    pub lock_file: PathBuf,
    pub repository: String,
    pub secret: SecretSources,
    pub hostname: Option<String>,
    pub compose_command: Vec<String>,
    pub restic_binary: String,
    pub min_free_space_bytes: u64,
    /// `None` when verification is disabled.
    pub verify: Option<VerifyDepth>,
    pub retention: RetentionPolicy,
    pub timeouts: Timeouts,
    pub lifecycle: LifecycleTuning,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        "stacks_root: /srv/stacks\nrepository: /mnt/backup/restic\npassword_file: /etc/stackback/pw\n"
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(cfg.compose_command, vec!["docker", "compose"]);
        assert_eq!(cfg.restic_binary, "restic");
        assert_eq!(cfg.lifecycle.verify_retries, 3);
        assert!(cfg.verify.enabled);
        assert_eq!(cfg.verify.depth, VerifyDepth::Metadata);
        assert!(!cfg.retention.should_prune());

        let valid = cfg.validate().unwrap();
        assert_eq!(
            valid.registry_file,
            PathBuf::from("/srv/stacks/.stackback-dirs")
        );
        assert_eq!(valid.lock_file, PathBuf::from(paths::DEFAULT_LOCK_FILE));
        assert_eq!(valid.timeouts.backup, Duration::from_secs(3600));
        assert_eq!(valid.verify, Some(VerifyDepth::Metadata));
    }

    #[test]
    fn validate_reports_every_issue_at_once() {
        let mut cfg = Config::new("relative/root", "");
        cfg.timeouts.stop = 0;
        cfg.lifecycle.verify_retries = 0;
        let issues = cfg.validate().unwrap_err();
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"stacks_root"));
        assert!(fields.contains(&"repository"));
        assert!(fields.contains(&"password"));
        assert!(fields.contains(&"timeouts.stop"));
        assert!(fields.contains(&"lifecycle.verify_retries"));
    }

    #[test]
    fn retention_needs_flag_and_a_count() {
        let mut policy = RetentionPolicy {
            keep_daily: Some(7),
            ..Default::default()
        };
        assert!(!policy.should_prune());
        policy.auto_prune = true;
        assert!(policy.should_prune());
        policy.keep_daily = None;
        assert!(!policy.should_prune());
        policy.keep_yearly = Some(0);
        policy.keep_weekly = Some(0);
        assert!(!policy.should_prune(), "zero counts prune nothing");
        policy.keep_weekly = Some(4);
        assert!(policy.should_prune());
    }

    #[test]
    fn start_and_stop_settle_times_are_separate() {
        let yaml = format!(
            "{}lifecycle:\n  stop_grace: 4\n  start_grace: 9\nmin_free_space_mb: 18446744073709551615\n",
            minimal_yaml()
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        let valid = cfg.validate().unwrap();
        assert_eq!(valid.lifecycle.stop_grace, Duration::from_secs(4));
        assert_eq!(valid.lifecycle.start_grace, Duration::from_secs(9));
        assert_eq!(valid.min_free_space_bytes, u64::MAX);
    }

    #[test]
    fn verification_can_be_disabled() {
        let yaml = format!("{}verify:\n  enabled: false\n  depth: data\n", minimal_yaml());
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.validate().unwrap().verify, None);
    }

    #[test]
    fn depth_parses_from_str() {
        assert_eq!("files".parse::<VerifyDepth>().unwrap(), VerifyDepth::Files);
        assert!("everything".parse::<VerifyDepth>().is_err());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut cfg = Config::new("/srv/stacks", "sftp:backup@host:/restic");
        cfg.password = Some("hunter2".into());
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.repository, "sftp:backup@host:/restic");
        assert!(loaded.validate().is_ok());
    }
}
