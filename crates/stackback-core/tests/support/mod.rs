//! Recording fakes for the compose and snapshot collaborators, plus a
//! stacks-root fixture.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use stackback_core::command::CommandOutput;
use stackback_core::compose::ComposeClient;
use stackback_core::config::{
    LifecycleTuning, RetentionPolicy, SecretSources, Timeouts, ValidatedConfig, VerifyDepth,
};
use stackback_core::output::{LineSink, Stream};
use stackback_core::registry::DirectoryRegistry;
use stackback_core::secret::Secret;
use stackback_core::snapshot::{BackupTagSet, Snapshot, SnapshotTool, TagFilter};
use stackback_core::{Result, StackbackError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Status(String),
    Stop(String),
    Start(String),
    Health,
    Backup { dir: String, tags: Vec<String> },
    List(String),
    Verify(String),
    Forget(String),
}

impl Call {
    /// Calls that change a stack or the repository.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Stop(_) | Call::Start(_) | Call::Backup { .. } | Call::Forget(_)
        )
    }
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn all(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Stop, start and backup calls only, in order.
    pub fn lifecycle(&self) -> Vec<Call> {
        self.all()
            .into_iter()
            .filter(|c| matches!(c, Call::Stop(_) | Call::Start(_) | Call::Backup { .. }))
            .collect()
    }

    pub fn mutating(&self) -> Vec<Call> {
        self.all().into_iter().filter(Call::is_mutating).collect()
    }
}

fn label(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn exit(code: i32) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: if code == 0 { String::new() } else { "simulated failure".into() },
        timed_out: false,
    }
}

// ---------------------------------------------------------------------------
// FakeCompose
// ---------------------------------------------------------------------------

/// Stacks are keyed by directory name.
#[derive(Default)]
pub struct FakeCompose {
    pub log: CallLog,
    running: Mutex<HashSet<String>>,
    /// `stop` exits non-zero and leaves the stack running.
    pub fail_stop: HashSet<String>,
    /// `start` exits non-zero and leaves the stack stopped.
    pub fail_start: HashSet<String>,
}

impl FakeCompose {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn set_running(&self, name: &str, running: bool) {
        let mut set = self.running.lock().unwrap();
        if running {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.lock().unwrap().contains(name)
    }
}

impl ComposeClient for FakeCompose {
    async fn running_count(&self, dir: &Path, _timeout: Duration) -> Result<usize> {
        let name = label(dir);
        self.log.push(Call::Status(name.clone()));
        Ok(usize::from(self.is_running(&name)) * 2)
    }

    async fn stop(&self, dir: &Path, _timeout: Duration) -> Result<CommandOutput> {
        let name = label(dir);
        self.log.push(Call::Stop(name.clone()));
        if self.fail_stop.contains(&name) {
            return Ok(exit(1));
        }
        self.set_running(&name, false);
        Ok(exit(0))
    }

    async fn start(&self, dir: &Path, _timeout: Duration) -> Result<CommandOutput> {
        let name = label(dir);
        self.log.push(Call::Start(name.clone()));
        if self.fail_start.contains(&name) {
            return Ok(exit(1));
        }
        self.set_running(&name, true);
        Ok(exit(0))
    }
}

// ---------------------------------------------------------------------------
// FakeSnapshot
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSnapshot {
    pub log: CallLog,
    pub password: Option<String>,
    pub unhealthy: bool,
    /// Directory names whose backup exits non-zero.
    pub fail_backup: HashSet<String>,
    /// Directory names deleted from disk by their own (failing) backup.
    pub vanish_on_backup: HashSet<String>,
    pub fail_verify: bool,
    pub fail_forget: bool,
    /// Backups never finish.
    pub hang_backup: bool,
    stored: Mutex<Vec<Snapshot>>,
}

impl FakeSnapshot {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn stored(&self) -> Vec<Snapshot> {
        self.stored.lock().unwrap().clone()
    }
}

impl SnapshotTool for FakeSnapshot {
    fn set_password(&mut self, secret: Secret) {
        self.password = Some(secret.expose().to_string());
    }

    async fn health(&self, _timeout: Duration) -> Result<CommandOutput> {
        self.log.push(Call::Health);
        Ok(exit(if self.unhealthy { 1 } else { 0 }))
    }

    async fn backup(
        &self,
        dir: &Path,
        tags: &BackupTagSet,
        _host: Option<&str>,
        _timeout: Duration,
        sink: &dyn LineSink,
    ) -> Result<CommandOutput> {
        let name = label(dir);
        self.log.push(Call::Backup {
            dir: name.clone(),
            tags: tags.tags(),
        });
        if self.hang_backup {
            std::future::pending::<()>().await;
        }
        sink.line(Stream::Stdout, &format!("processed 3 files in {name}"));
        if self.vanish_on_backup.contains(&name) {
            std::fs::remove_dir_all(dir).unwrap();
            return Ok(exit(1));
        }
        if self.fail_backup.contains(&name) {
            sink.line(Stream::Stderr, "Fatal: unable to save snapshot");
            return Ok(exit(1));
        }
        let mut stored = self.stored.lock().unwrap();
        let id = format!("{:016x}", stored.len() + 1);
        stored.push(Snapshot {
            short_id: Some(id[..8].to_string()),
            id,
            time: Utc::now(),
            hostname: "testhost".into(),
            paths: vec![dir.display().to_string()],
            tags: tags.tags(),
        });
        Ok(exit(0))
    }

    async fn list_snapshots(&self, filter: &TagFilter, _timeout: Duration) -> Result<Vec<Snapshot>> {
        let dir_tag = filter.tags.last().cloned().unwrap_or_default();
        self.log.push(Call::List(dir_tag));
        Ok(self
            .stored()
            .into_iter()
            .filter(|s| filter.tags.iter().all(|t| s.tags.contains(t)))
            .collect())
    }

    async fn verify(&self, snapshot_id: &str, _depth: VerifyDepth, _timeout: Duration) -> Result<CommandOutput> {
        self.log.push(Call::Verify(snapshot_id.to_string()));
        if self.fail_verify {
            return Err(StackbackError::Backup("pack file damaged".into()));
        }
        Ok(exit(0))
    }

    async fn forget(
        &self,
        filter: &TagFilter,
        _policy: &RetentionPolicy,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        self.log.push(Call::Forget(filter.joined()));
        Ok(exit(if self.fail_forget { 1 } else { 0 }))
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// A stacks root plus a separate directory for the lock file and externals.
pub struct Fixture {
    pub root: TempDir,
    pub state: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
        }
    }

    pub fn stacks_root(&self) -> &Path {
        self.root.path()
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.path().join(".stackback-dirs")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state.path().join("stackback.lock")
    }

    /// Create a discovered stack directory with a compose file.
    pub fn stack(&self, name: &str) -> PathBuf {
        let dir = self.root.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("compose.yaml"), "services: {}\n").unwrap();
        dir
    }

    /// Create a stack directory outside the stacks root.
    pub fn external_stack(&self, name: &str) -> PathBuf {
        let dir = self.state.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("docker-compose.yml"), "services: {}\n").unwrap();
        dir
    }

    /// Sync, enable `enabled`, and persist the registry.
    pub fn registry(&self, enabled: &[&str]) -> DirectoryRegistry {
        let mut reg = DirectoryRegistry::new(self.stacks_root(), self.registry_file());
        reg.sync().unwrap();
        for id in enabled {
            reg.set_enabled(id, true).unwrap();
        }
        reg.save().unwrap();
        reg
    }

    pub fn config(&self) -> ValidatedConfig {
        let t = Duration::from_secs(5);
        ValidatedConfig {
            stacks_root: self.stacks_root().to_path_buf(),
            registry_file: self.registry_file(),
            lock_file: self.lock_file(),
            repository: "/mnt/backup/restic".into(),
            secret: SecretSources {
                file: None,
                command: None,
                value: Some("correct horse".into()),
            },
            hostname: None,
            compose_command: vec!["docker".into(), "compose".into()],
            restic_binary: "restic".into(),
            min_free_space_bytes: 0,
            verify: Some(VerifyDepth::Metadata),
            retention: RetentionPolicy::default(),
            timeouts: Timeouts {
                stop: t,
                start: t,
                status: t,
                backup: t,
                verify: t,
                forget: t,
                registry_lock: t,
                secret_command: t,
            },
            lifecycle: LifecycleTuning::immediate(),
        }
    }
}
