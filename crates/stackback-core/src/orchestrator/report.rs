//! Run statistics and the per-directory report.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::FailureKind;
use crate::lifecycle::StackState;
use crate::registry::SyncDelta;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { kind: FailureKind, message: String },
    /// The snapshot was stored but the stack did not come back up.
    RestartFailed { message: String },
}

impl Outcome {
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Succeeded => None,
            Outcome::Failed { kind, .. } => Some(*kind),
            Outcome::RestartFailed { .. } => Some(FailureKind::Docker),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    pub fn backup_stored(&self) -> bool {
        matches!(self, Outcome::Succeeded | Outcome::RestartFailed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryReport {
    pub identifier: String,
    pub initial_state: StackState,
    pub outcome: Outcome,
    /// Advisory problems (verification, retention) that did not fail the
    /// directory.
    pub warnings: Vec<String>,
    pub duration_secs: f64,
}

// ---------------------------------------------------------------------------
// RunStatistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub enabled: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed identifiers in processing order.
    pub failed_dirs: Vec<String>,
    /// Classification of the earliest failure. Set once.
    pub first_failure: Option<FailureKind>,
}

impl RunStatistics {
    pub fn new(enabled: usize) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn record(&mut self, identifier: &str, outcome: &Outcome) {
        self.processed += 1;
        match outcome.kind() {
            None => self.succeeded += 1,
            Some(kind) => {
                self.failed += 1;
                self.failed_dirs.push(identifier.to_string());
                if self.first_failure.is_none() {
                    self.first_failure = Some(kind);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub dry_run: bool,
    pub registry_delta: SyncDelta,
    pub directories: Vec<DirectoryReport>,
    pub stats: RunStatistics,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.stats.failed == 0
    }

    /// The run's classification: the first failure, sticky.
    pub fn classification(&self) -> Option<FailureKind> {
        self.stats.first_failure
    }

    pub fn exit_code(&self) -> i32 {
        self.classification().map(|k| k.exit_code()).unwrap_or(0)
    }

    /// Human-readable summary, one line per directory.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        for d in &self.directories {
            let line = match &d.outcome {
                Outcome::Succeeded => format!("  OK      {}", d.identifier),
                Outcome::Failed { kind, message } => {
                    format!("  FAILED  {} [{kind}] {message}", d.identifier)
                }
                Outcome::RestartFailed { message } => format!(
                    "  FAILED  {} [{}] backup stored, restart failed: {message}",
                    d.identifier,
                    FailureKind::Docker
                ),
            };
            out.push_str(&line);
            out.push('\n');
            for w in &d.warnings {
                out.push_str(&format!("          warning: {w}\n"));
            }
        }
        out.push_str(&format!(
            "{prefix}{} enabled, {} processed, {} succeeded, {} failed in {:.1}s",
            self.stats.enabled,
            self.stats.processed,
            self.stats.succeeded,
            self.stats.failed,
            self.duration_secs
        ));
        if let Some(kind) = self.classification() {
            out.push_str(&format!(" (exit reason: {kind}; failed: {})", self.stats.failed_dirs.join(", ")));
        }
        out
    }
}
