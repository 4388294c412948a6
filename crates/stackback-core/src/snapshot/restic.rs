use std::path::Path;
use std::time::Duration;

use crate::command::{self, CommandOutput, CommandSpec};
use crate::config::{RetentionPolicy, VerifyDepth};
use crate::error::{Result, StackbackError};
use crate::output::{LineSink, NullSink};
use crate::secret::Secret;

use super::{BackupTagSet, Snapshot, SnapshotTool, TagFilter};

/// The restic binary pointed at one repository.
#[derive(Debug, Clone)]
pub struct Restic {
    binary: String,
    repository: String,
    password: Option<Secret>,
}

impl Restic {
    pub fn new(binary: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            repository: repository.into(),
            password: None,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn base(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.binary)
            .arg("--repo")
            .arg(&self.repository);
        match &self.password {
            Some(pw) => spec.env("RESTIC_PASSWORD", pw.expose()),
            None => spec,
        }
    }

    fn backup_spec(&self, dir: &Path, tags: &BackupTagSet, host: Option<&str>) -> CommandSpec {
        let mut spec = self
            .base()
            .arg("backup")
            .arg(dir.to_string_lossy())
            .cwd(dir);
        for tag in tags.tags() {
            spec = spec.arg("--tag").arg(tag);
        }
        if let Some(h) = host {
            spec = spec.arg("--host").arg(h);
        }
        spec
    }

    fn filtered(&self, sub: &str, filter: &TagFilter) -> CommandSpec {
        let mut spec = self.base().arg(sub).arg("--tag").arg(filter.joined());
        if let Some(h) = &filter.host {
            spec = spec.arg("--host").arg(h);
        }
        spec
    }

    fn verify_spec(&self, snapshot_id: &str, depth: VerifyDepth) -> CommandSpec {
        match depth {
            VerifyDepth::Metadata => self.base().args(["cat", "snapshot", snapshot_id]),
            VerifyDepth::Files => self.base().args(["ls", snapshot_id]),
            VerifyDepth::Data => self.base().args(["check", "--read-data"]),
        }
    }

    fn forget_spec(&self, filter: &TagFilter, policy: &RetentionPolicy) -> CommandSpec {
        let mut spec = self.filtered("forget", filter);
        for (flag, count) in [
            ("--keep-daily", policy.keep_daily),
            ("--keep-weekly", policy.keep_weekly),
            ("--keep-monthly", policy.keep_monthly),
            ("--keep-yearly", policy.keep_yearly),
        ] {
            if let Some(n) = count.filter(|n| *n > 0) {
                spec = spec.arg(flag).arg(n.to_string());
            }
        }
        spec.arg("--prune")
    }
}

impl SnapshotTool for Restic {
    fn required_binary(&self) -> Option<&str> {
        Some(&self.binary)
    }

    fn set_password(&mut self, secret: Secret) {
        self.password = Some(secret);
    }

    async fn health(&self, timeout: Duration) -> Result<CommandOutput> {
        command::run_captured(&self.base().args(["cat", "config"]), timeout).await
    }

    async fn backup(
        &self,
        dir: &Path,
        tags: &BackupTagSet,
        host: Option<&str>,
        timeout: Duration,
        sink: &dyn LineSink,
    ) -> Result<CommandOutput> {
        command::run_streaming(&self.backup_spec(dir, tags, host), timeout, sink).await
    }

    async fn list_snapshots(&self, filter: &TagFilter, timeout: Duration) -> Result<Vec<Snapshot>> {
        let spec = self.filtered("snapshots", filter).arg("--json");
        let out = command::run_streaming(&spec, timeout, &NullSink).await?;
        if !out.success() {
            return Err(StackbackError::Backup(format!(
                "listing snapshots {}",
                out.describe()
            )));
        }
        parse_snapshots(&out.stdout)
    }

    async fn verify(
        &self,
        snapshot_id: &str,
        depth: VerifyDepth,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        command::run_captured(&self.verify_spec(snapshot_id, depth), timeout).await
    }

    async fn forget(
        &self,
        filter: &TagFilter,
        policy: &RetentionPolicy,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        command::run_captured(&self.forget_spec(filter, policy), timeout).await
    }
}

/// Decode `snapshots --json`. An empty body (no snapshots at all on some
/// versions) is an empty list.
pub fn parse_snapshots(json: &str) -> Result<Vec<Snapshot>> {
    let trimmed = json.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}
