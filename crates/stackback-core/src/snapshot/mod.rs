//! Snapshot backend: the tool contract, its restic implementation, the
//! per-directory tag scheme, and the manager the pipeline drives.

pub mod manager;
pub mod restic;
pub mod tags;

pub use manager::{RetentionOutcome, SnapshotManager};
pub use restic::Restic;
pub use tags::{BackupTagSet, TagFilter};

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandOutput;
use crate::config::{RetentionPolicy, VerifyDepth};
use crate::error::Result;
use crate::output::LineSink;
use crate::secret::Secret;

/// One entry of the tool's machine-readable snapshot listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub short_id: Option<String>,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Snapshot {
    pub fn display_id(&self) -> &str {
        self.short_id
            .as_deref()
            .unwrap_or_else(|| &self.id[..self.id.len().min(8)])
    }
}

#[allow(async_fn_in_trait)]
pub trait SnapshotTool {
    /// Program that must be on PATH for this tool to work.
    fn required_binary(&self) -> Option<&str> {
        None
    }

    /// Supply the repository password resolved during preflight.
    fn set_password(&mut self, secret: Secret);

    /// Cheap probe that the repository is reachable and readable.
    async fn health(&self, timeout: Duration) -> Result<CommandOutput>;

    async fn backup(
        &self,
        dir: &Path,
        tags: &BackupTagSet,
        host: Option<&str>,
        timeout: Duration,
        sink: &dyn LineSink,
    ) -> Result<CommandOutput>;

    async fn list_snapshots(&self, filter: &TagFilter, timeout: Duration) -> Result<Vec<Snapshot>>;

    async fn verify(
        &self,
        snapshot_id: &str,
        depth: VerifyDepth,
        timeout: Duration,
    ) -> Result<CommandOutput>;

    async fn forget(
        &self,
        filter: &TagFilter,
        policy: &RetentionPolicy,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}
