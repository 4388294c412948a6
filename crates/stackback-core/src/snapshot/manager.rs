use std::path::Path;

use serde::Serialize;

use crate::config::{RetentionPolicy, Timeouts, VerifyDepth};
use crate::error::{Result, StackbackError};
use crate::output::LineSink;

use super::{BackupTagSet, Snapshot, SnapshotTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionOutcome {
    /// Disabled, or no keep-count configured.
    Skipped,
    Pruned,
    DryRun,
}

/// Backup, verification and retention for one directory at a time, on top
/// of a `SnapshotTool`.
pub struct SnapshotManager<'a, S> {
    tool: &'a S,
    timeouts: Timeouts,
    hostname: Option<String>,
    dry_run: bool,
}

impl<'a, S: SnapshotTool> SnapshotManager<'a, S> {
    pub fn new(tool: &'a S, timeouts: Timeouts, hostname: Option<String>, dry_run: bool) -> Self {
        Self {
            tool,
            timeouts,
            hostname,
            dry_run,
        }
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Create a snapshot of `dir`. Output is forwarded to `sink` while the
    /// tool runs.
    pub async fn backup(&self, dir: &Path, tags: &BackupTagSet, sink: &dyn LineSink) -> Result<()> {
        if self.dry_run {
            tracing::info!(
                dir = %tags.identifier(),
                tags = ?tags.tags(),
                "[dry-run] would back up {}",
                dir.display()
            );
            return Ok(());
        }
        tracing::info!(dir = %tags.identifier(), "creating snapshot of {}", dir.display());
        let out = self
            .tool
            .backup(dir, tags, self.hostname(), self.timeouts.backup, sink)
            .await
            .map_err(|e| StackbackError::Backup(format!("{}: {e}", tags.identifier())))?;
        if !out.success() {
            return Err(StackbackError::Backup(format!(
                "{}: backup {}",
                tags.identifier(),
                out.describe()
            )));
        }
        Ok(())
    }

    /// Snapshots of this directory, oldest first.
    pub async fn list(&self, tags: &BackupTagSet) -> Result<Vec<Snapshot>> {
        let mut snaps = self
            .tool
            .list_snapshots(&tags.filter(self.hostname()), self.timeouts.status)
            .await?;
        snaps.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(snaps)
    }

    pub async fn latest(&self, tags: &BackupTagSet) -> Result<Option<Snapshot>> {
        Ok(self.list(tags).await?.pop())
    }

    /// Check the newest snapshot of this directory at `depth`. Returns the id
    /// that was verified. Callers treat an error as a warning only.
    pub async fn verify(&self, tags: &BackupTagSet, depth: VerifyDepth) -> Result<Option<String>> {
        if self.dry_run {
            tracing::info!(dir = %tags.identifier(), depth = depth.as_str(), "[dry-run] would verify latest snapshot");
            return Ok(None);
        }
        let snap = self.latest(tags).await?.ok_or_else(|| {
            StackbackError::Backup(format!("{}: no snapshot found to verify", tags.identifier()))
        })?;
        let out = self
            .tool
            .verify(&snap.id, depth, self.timeouts.verify)
            .await?;
        if !out.success() {
            return Err(StackbackError::Backup(format!(
                "{}: {} verification of {} {}",
                tags.identifier(),
                depth.as_str(),
                snap.display_id(),
                out.describe()
            )));
        }
        tracing::info!(dir = %tags.identifier(), snapshot = snap.display_id(), depth = depth.as_str(), "snapshot verified");
        Ok(Some(snap.id))
    }

    /// Prune this directory's history per `policy`. Scoped to the directory
    /// tag and, if configured, the hostname.
    pub async fn apply_retention(
        &self,
        tags: &BackupTagSet,
        policy: &RetentionPolicy,
    ) -> Result<RetentionOutcome> {
        if !policy.should_prune() {
            return Ok(RetentionOutcome::Skipped);
        }
        if self.dry_run {
            tracing::info!(dir = %tags.identifier(), ?policy, "[dry-run] would apply retention");
            return Ok(RetentionOutcome::DryRun);
        }
        let out = self
            .tool
            .forget(&tags.filter(self.hostname()), policy, self.timeouts.forget)
            .await?;
        if !out.success() {
            return Err(StackbackError::Backup(format!(
                "{}: retention {}",
                tags.identifier(),
                out.describe()
            )));
        }
        tracing::info!(dir = %tags.identifier(), "retention applied");
        Ok(RetentionOutcome::Pruned)
    }
}
