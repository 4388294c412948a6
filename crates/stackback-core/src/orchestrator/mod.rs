//! The backup run: preflight, registry sync, initial-state capture, then the
//! per-directory stop/backup/verify/retain/start pipeline, one directory at
//! a time in identifier order.

mod preflight;
pub mod report;

pub use report::{DirectoryReport, Outcome, RunReport, RunStatistics};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;

use crate::compose::ComposeClient;
use crate::config::{RetentionPolicy, ValidatedConfig, VerifyDepth};
use crate::error::{FailureKind, Result, StackbackError};
use crate::lifecycle::{LifecycleController, StackState, StateTracker};
use crate::lock::InstanceLock;
use crate::output::{LineSink, Tee, TracingSink};
use crate::registry::{DirectoryRegistry, SyncDelta};
use crate::snapshot::{BackupTagSet, RetentionOutcome, SnapshotManager, SnapshotTool};

/// The directory currently between its stop and its start.
#[derive(Debug, Clone)]
struct InFlight {
    identifier: String,
    path: PathBuf,
    initial: StackState,
}

pub struct BackupOrchestrator<C, S> {
    config: ValidatedConfig,
    compose: C,
    snapshot: S,
    dry_run: bool,
    output: Option<Box<dyn LineSink>>,
    instance_lock: Option<InstanceLock>,
    in_flight: Option<InFlight>,
}

impl<C: ComposeClient, S: SnapshotTool> BackupOrchestrator<C, S> {
    pub fn new(config: ValidatedConfig, compose: C, snapshot: S) -> Self {
        Self {
            config,
            compose,
            snapshot,
            dry_run: false,
            output: None,
            instance_lock: None,
            in_flight: None,
        }
    }

    /// Run the whole pipeline but turn stop, start, backup and forget into
    /// logged no-ops.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Extra subscriber for snapshot-tool output, in addition to the log.
    pub fn with_output(mut self, sink: Box<dyn LineSink>) -> Self {
        self.output = Some(sink);
        self
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn compose(&self) -> &C {
        &self.compose
    }

    pub fn snapshot(&self) -> &S {
        &self.snapshot
    }

    /// Perform one full run. `Err` means a global failure (config, lock)
    /// and no stack was touched; directory failures are in the report.
    pub async fn run(&mut self, registry: &mut DirectoryRegistry) -> Result<RunReport> {
        let result = self.run_inner(registry).await;
        self.instance_lock = None;
        result
    }

    /// Like [`run`](Self::run), but abandon the run when `shutdown`
    /// resolves. The in-flight directory, if any, is brought back to its
    /// initial state before returning `Signal`.
    pub async fn run_until<F>(
        &mut self,
        registry: &mut DirectoryRegistry,
        shutdown: F,
    ) -> Result<RunReport>
    where
        F: Future<Output = String>,
    {
        let signal = tokio::select! {
            result = self.run(registry) => return result,
            name = shutdown => name,
        };
        tracing::warn!(signal = %signal, "run interrupted");
        self.recover_in_flight().await;
        self.instance_lock = None;
        Err(StackbackError::Signal(signal))
    }

    async fn run_inner(&mut self, registry: &mut DirectoryRegistry) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        if self.dry_run {
            tracing::info!("dry run: no stack, snapshot or registry will be modified");
        }

        let lock = preflight::check(&self.config, &self.compose, &mut self.snapshot).await?;
        self.instance_lock = Some(lock);

        let registry_delta = self.sync_registry(registry).await?;

        let enabled: Vec<(String, PathBuf)> = registry
            .enabled()
            .into_iter()
            .map(|e| {
                let path = registry.full_path(&e.identifier);
                (e.identifier, path)
            })
            .collect();
        tracing::info!(enabled = enabled.len(), registered = registry.len(), "starting backup run");

        let initial = StateTracker::new(&self.compose, self.config.timeouts.status)
            .store_initial_states(&enabled)
            .await;

        let pipeline = Pipeline {
            lifecycle: LifecycleController::new(
                &self.compose,
                self.config.timeouts,
                self.config.lifecycle,
                self.dry_run,
            ),
            snapshots: SnapshotManager::new(
                &self.snapshot,
                self.config.timeouts,
                self.config.hostname.clone(),
                self.dry_run,
            ),
            verify: self.config.verify,
            retention: &self.config.retention,
            output: self.output.as_deref(),
        };

        let mut stats = RunStatistics::new(enabled.len());
        let mut directories = Vec::with_capacity(enabled.len());
        for (id, path) in &enabled {
            let state = initial.get(id);
            self.in_flight = Some(InFlight {
                identifier: id.clone(),
                path: path.clone(),
                initial: state,
            });
            let report = pipeline.process_directory(id, path, state).await;
            self.in_flight = None;
            stats.record(id, &report.outcome);
            directories.push(report);
        }

        let report = RunReport {
            started_at,
            duration_secs: clock.elapsed().as_secs_f64(),
            dry_run: self.dry_run,
            registry_delta,
            directories,
            stats,
        };
        match report.classification() {
            None => tracing::info!(
                processed = report.stats.processed,
                "backup run finished without failures"
            ),
            Some(kind) => tracing::error!(
                processed = report.stats.processed,
                failed = report.stats.failed,
                reason = %kind,
                "backup run finished with failures"
            ),
        }
        Ok(report)
    }

    /// Bring the on-disk registry in line with the stacks root. Dry runs
    /// sync the in-memory copy only. The registry lock is polled on the
    /// blocking pool so a signal can still interrupt the wait.
    async fn sync_registry(&self, registry: &mut DirectoryRegistry) -> Result<SyncDelta> {
        let delta = if self.dry_run {
            registry.sync()?
        } else {
            let stacks_root = self.config.stacks_root.clone();
            let file = self.config.registry_file.clone();
            let lock_timeout = self.config.timeouts.registry_lock;
            let (delta, fresh) = tokio::task::spawn_blocking(move || {
                DirectoryRegistry::update(&stacks_root, &file, lock_timeout, |reg| {
                    Ok((reg.sync()?, reg.clone()))
                })
            })
            .await
            .map_err(|e| StackbackError::Io(std::io::Error::other(e)))??;
            *registry = fresh;
            delta
        };
        for id in &delta.added {
            tracing::info!(dir = %id, "new directory discovered (disabled until enabled)");
        }
        for id in &delta.removed {
            tracing::info!(dir = %id, "directory no longer present; removed from registry");
        }
        Ok(delta)
    }

    async fn recover_in_flight(&mut self) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        let lifecycle = LifecycleController::new(
            &self.compose,
            self.config.timeouts,
            self.config.lifecycle,
            self.dry_run,
        );
        match lifecycle
            .smart_start(&flight.identifier, &flight.path, flight.initial)
            .await
        {
            Ok(outcome) => {
                tracing::info!(dir = %flight.identifier, ?outcome, "in-flight directory restored")
            }
            Err(e) => tracing::error!(
                dir = %flight.identifier,
                "could not restore in-flight directory: {e}"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct Pipeline<'a, C, S> {
    lifecycle: LifecycleController<'a, C>,
    snapshots: SnapshotManager<'a, S>,
    verify: Option<VerifyDepth>,
    retention: &'a RetentionPolicy,
    output: Option<&'a dyn LineSink>,
}

impl<C: ComposeClient, S: SnapshotTool> Pipeline<'_, C, S> {
    async fn process_directory(&self, id: &str, path: &Path, initial: StackState) -> DirectoryReport {
        let clock = Instant::now();
        tracing::info!(dir = %id, initial = %initial, "processing directory");
        let mut warnings = Vec::new();
        let outcome = self.steps(id, path, initial, &mut warnings).await;
        match &outcome {
            Outcome::Succeeded => tracing::info!(dir = %id, "directory done"),
            Outcome::Failed { kind, message } => {
                tracing::error!(dir = %id, kind = %kind, "directory failed: {message}")
            }
            Outcome::RestartFailed { message } => tracing::error!(
                dir = %id,
                "backup stored but stack did not restart: {message}"
            ),
        }
        DirectoryReport {
            identifier: id.to_string(),
            initial_state: initial,
            outcome,
            warnings,
            duration_secs: clock.elapsed().as_secs_f64(),
        }
    }

    async fn steps(
        &self,
        id: &str,
        path: &Path,
        initial: StackState,
        warnings: &mut Vec<String>,
    ) -> Outcome {
        if initial == StackState::NotFound || !path.is_dir() {
            return failed(
                FailureKind::Validation,
                format!("{id}: directory {} does not exist", path.display()),
            );
        }

        if let Err(e) = self.lifecycle.smart_stop(id, path, initial).await {
            self.restore(id, path, initial, warnings).await;
            return failed(stop_kind(&e), e.to_string());
        }

        let tags = BackupTagSet::for_today(id);
        let label = TracingSink::new(id);
        let mut sink = Tee::new().with(&label);
        if let Some(extra) = self.output {
            sink = sink.with(extra);
        }
        if let Err(e) = self.snapshots.backup(path, &tags, &sink).await {
            self.restore(id, path, initial, warnings).await;
            return failed(FailureKind::Backup, e.to_string());
        }

        if let Some(depth) = self.verify {
            if let Err(e) = self.snapshots.verify(&tags, depth).await {
                tracing::warn!(dir = %id, "verification failed: {e}");
                warnings.push(format!("verification failed: {e}"));
            }
        }

        match self.snapshots.apply_retention(&tags, self.retention).await {
            Ok(RetentionOutcome::Skipped) => {}
            Ok(outcome) => tracing::debug!(dir = %id, ?outcome, "retention step done"),
            Err(e) => {
                tracing::warn!(dir = %id, "retention failed: {e}");
                warnings.push(format!("retention failed: {e}"));
            }
        }

        match self.lifecycle.smart_start(id, path, initial).await {
            Ok(_) => Outcome::Succeeded,
            Err(e) => Outcome::RestartFailed {
                message: e.to_string(),
            },
        }
    }

    /// Best-effort start after a failed step. The original failure stays
    /// the directory's classification.
    async fn restore(&self, id: &str, path: &Path, initial: StackState, warnings: &mut Vec<String>) {
        if initial == StackState::Running && !path.is_dir() {
            tracing::error!(dir = %id, "directory is gone; recovery start skipped");
            warnings.push("directory is gone; recovery start skipped".to_string());
            return;
        }
        if let Err(e) = self.lifecycle.smart_start(id, path, initial).await {
            tracing::error!(dir = %id, "recovery start failed: {e}");
            warnings.push(format!("recovery start failed: {e}"));
        }
    }
}

fn failed(kind: FailureKind, message: String) -> Outcome {
    Outcome::Failed { kind, message }
}

/// A directory that vanished between capture and stop is a validation
/// failure; anything else going wrong while stopping is a docker failure.
fn stop_kind(e: &StackbackError) -> FailureKind {
    match e.kind() {
        FailureKind::Validation => FailureKind::Validation,
        _ => FailureKind::Docker,
    }
}
