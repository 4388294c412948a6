use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failure classification shared by per-directory outcomes and the run
/// exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Config,
    Validation,
    Docker,
    Backup,
    Lock,
    Signal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Config => "ConfigError",
            FailureKind::Validation => "ValidationError",
            FailureKind::Docker => "DockerError",
            FailureKind::Backup => "BackupError",
            FailureKind::Lock => "LockError",
            FailureKind::Signal => "SignalError",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::Config => 2,
            FailureKind::Validation => 3,
            FailureKind::Docker => 4,
            FailureKind::Backup => 5,
            FailureKind::Lock => 6,
            FailureKind::Signal => 130,
        }
    }

    /// Global failures abort the run; local ones only fail one directory.
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            FailureKind::Config | FailureKind::Lock | FailureKind::Signal
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StackbackError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    InvalidConfig(Vec<String>),

    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("directory already registered: {0}")]
    DirectoryExists(String),

    #[error("invalid external path '{path}': {reason}")]
    InvalidExternalPath { path: String, reason: String },

    #[error("'{0}' is a discovered directory; only external directories can be removed")]
    NotExternal(String),

    #[error("stacks root does not exist or is not a directory: {}", .0.display())]
    StacksRootMissing(PathBuf),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("docker error: {0}")]
    Docker(String),

    #[error("backup error: {0}")]
    Backup(String),

    #[error("could not acquire lock {} within {timeout_secs}s", .path.display())]
    LockTimeout { path: PathBuf, timeout_secs: u64 },

    #[error("another run holds the instance lock {}", .0.display())]
    InstanceLocked(PathBuf),

    #[error("interrupted by {0}")]
    Signal(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StackbackError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StackbackError::Config(_)
            | StackbackError::InvalidConfig(_)
            | StackbackError::StacksRootMissing(_)
            | StackbackError::Yaml(_) => FailureKind::Config,
            StackbackError::DirectoryNotFound(_)
            | StackbackError::DirectoryExists(_)
            | StackbackError::InvalidExternalPath { .. }
            | StackbackError::NotExternal(_)
            | StackbackError::Validation(_) => FailureKind::Validation,
            StackbackError::Docker(_) => FailureKind::Docker,
            StackbackError::Backup(_)
            | StackbackError::Spawn { .. }
            | StackbackError::Io(_)
            | StackbackError::Json(_) => FailureKind::Backup,
            StackbackError::LockTimeout { .. } | StackbackError::InstanceLocked(_) => {
                FailureKind::Lock
            }
            StackbackError::Signal(_) => FailureKind::Signal,
        }
    }
}

pub type Result<T> = std::result::Result<T, StackbackError>;
