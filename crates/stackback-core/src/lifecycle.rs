//! Stack state tracking and restart-safe stop/start.
//!
//! The state of every enabled directory is captured once, before anything is
//! touched. Stop and start decisions are made against that captured state:
//! a stack that was not running is never stopped or started, and a stack that
//! was running is brought back. Exit codes of compose commands are not
//! trusted on their own; the outcome is re-checked against the live status.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::compose::ComposeClient;
use crate::config::{LifecycleTuning, Timeouts};
use crate::error::{Result, StackbackError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StackState {
    Running,
    Stopped,
    NotFound,
    /// The status query itself failed.
    Unknown,
}

impl StackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackState::Running => "running",
            StackState::Stopped => "stopped",
            StackState::NotFound => "not found",
            StackState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run snapshot of each enabled directory's state before any mutation.
/// There is no way to change an entry once captured.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitialStates {
    states: BTreeMap<String, StackState>,
}

impl InitialStates {
    /// Identifiers that were never captured report `Unknown`, which the
    /// controller never touches.
    pub fn get(&self, identifier: &str) -> StackState {
        self.states
            .get(identifier)
            .copied()
            .unwrap_or(StackState::Unknown)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, StackState)> {
        self.states.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl FromIterator<(String, StackState)> for InitialStates {
    fn from_iter<I: IntoIterator<Item = (String, StackState)>>(iter: I) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// StateTracker
// ---------------------------------------------------------------------------

pub struct StateTracker<'a, C> {
    compose: &'a C,
    timeout: Duration,
}

impl<'a, C: ComposeClient> StateTracker<'a, C> {
    pub fn new(compose: &'a C, timeout: Duration) -> Self {
        Self { compose, timeout }
    }

    pub async fn check_status(&self, dir: &Path) -> StackState {
        if !dir.is_dir() {
            return StackState::NotFound;
        }
        match self.compose.running_count(dir, self.timeout).await {
            Ok(n) if n > 0 => StackState::Running,
            Ok(_) => StackState::Stopped,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "status query failed: {e}");
                StackState::Unknown
            }
        }
    }

    /// Capture the state of every `(identifier, path)` pair.
    pub async fn store_initial_states(&self, dirs: &[(String, PathBuf)]) -> InitialStates {
        let mut states = BTreeMap::new();
        for (id, path) in dirs {
            let state = self.check_status(path).await;
            tracing::info!(dir = %id, state = %state, "initial state");
            states.insert(id.clone(), state);
        }
        InitialStates { states }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Initial state was not `Running`; nothing to do.
    Skipped,
    /// Already down when re-checked; no command issued.
    AlreadyStopped,
    Stopped,
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// Initial state was not `Running`; left as is.
    Skipped,
    AlreadyRunning,
    Started,
    DryRun,
}

// ---------------------------------------------------------------------------
// LifecycleController
// ---------------------------------------------------------------------------

pub struct LifecycleController<'a, C> {
    compose: &'a C,
    tracker: StateTracker<'a, C>,
    timeouts: Timeouts,
    tuning: LifecycleTuning,
    dry_run: bool,
}

impl<'a, C: ComposeClient> LifecycleController<'a, C> {
    pub fn new(compose: &'a C, timeouts: Timeouts, tuning: LifecycleTuning, dry_run: bool) -> Self {
        Self {
            compose,
            tracker: StateTracker::new(compose, timeouts.status),
            timeouts,
            tuning,
            dry_run,
        }
    }

    pub fn tracker(&self) -> &StateTracker<'a, C> {
        &self.tracker
    }

    pub async fn smart_stop(&self, id: &str, dir: &Path, initial: StackState) -> Result<StopOutcome> {
        if initial != StackState::Running {
            tracing::info!(dir = %id, initial = %initial, "not running at start of run; leaving untouched");
            return Ok(StopOutcome::Skipped);
        }

        match self.tracker.check_status(dir).await {
            StackState::Stopped => {
                tracing::info!(dir = %id, "already stopped; no stop issued");
                return Ok(StopOutcome::AlreadyStopped);
            }
            StackState::NotFound => {
                return Err(StackbackError::Validation(format!(
                    "{id}: directory disappeared before stop"
                )));
            }
            StackState::Running | StackState::Unknown => {}
        }

        if self.dry_run {
            tracing::info!(dir = %id, "[dry-run] would stop stack");
            return Ok(StopOutcome::DryRun);
        }

        tracing::info!(dir = %id, "stopping stack");
        let (command_ok, timed_out) = match self.compose.stop(dir, self.timeouts.stop).await {
            Ok(out) => {
                if !out.success() {
                    tracing::warn!(dir = %id, "stop command {}; verifying actual state", out.describe());
                }
                (out.success(), out.timed_out)
            }
            Err(e) => {
                tracing::warn!(dir = %id, "stop command failed: {e}; verifying actual state");
                (false, false)
            }
        };

        let grace = if timed_out {
            self.tuning.stop_grace_after_timeout
        } else {
            self.tuning.stop_grace
        };
        tokio::time::sleep(grace).await;

        match self.await_state(dir, false).await {
            Observed::Desired => Ok(StopOutcome::Stopped),
            Observed::Unverified if command_ok => {
                tracing::warn!(dir = %id, "could not verify stop; trusting command result");
                Ok(StopOutcome::Stopped)
            }
            Observed::Opposite | Observed::Unverified => Err(StackbackError::Docker(format!(
                "{id}: containers still running after stop ({} checks)",
                self.tuning.verify_retries
            ))),
        }
    }

    pub async fn smart_start(&self, id: &str, dir: &Path, initial: StackState) -> Result<StartOutcome> {
        if initial != StackState::Running {
            return Ok(StartOutcome::Skipped);
        }

        if self.tracker.check_status(dir).await == StackState::Running {
            tracing::info!(dir = %id, "already running; no start issued");
            return Ok(StartOutcome::AlreadyRunning);
        }

        if self.dry_run {
            tracing::info!(dir = %id, "[dry-run] would start stack");
            return Ok(StartOutcome::DryRun);
        }

        tracing::info!(dir = %id, "starting stack");
        let command_ok = match self.compose.start(dir, self.timeouts.start).await {
            Ok(out) => {
                if !out.success() {
                    tracing::warn!(dir = %id, "start command {}; verifying actual state", out.describe());
                }
                out.success()
            }
            Err(e) => {
                tracing::warn!(dir = %id, "start command failed: {e}; verifying actual state");
                false
            }
        };

        tokio::time::sleep(self.tuning.start_grace).await;

        match self.await_state(dir, true).await {
            Observed::Desired => Ok(StartOutcome::Started),
            Observed::Unverified if command_ok => {
                tracing::warn!(dir = %id, "could not verify start; trusting command result");
                Ok(StartOutcome::Started)
            }
            Observed::Opposite | Observed::Unverified => Err(StackbackError::Docker(format!(
                "{id}: no services running after start ({} checks)",
                self.tuning.verify_retries
            ))),
        }
    }

    /// Poll up to `verify_retries` times for the wanted state.
    async fn await_state(&self, dir: &Path, want_running: bool) -> Observed {
        let retries = self.tuning.verify_retries.max(1);
        let mut last = Observed::Unverified;
        for attempt in 1..=retries {
            let state = self.tracker.check_status(dir).await;
            last = match (state, want_running) {
                (StackState::Running, true) => return Observed::Desired,
                (StackState::Stopped | StackState::NotFound, false) => return Observed::Desired,
                (StackState::Unknown, _) => Observed::Unverified,
                _ => Observed::Opposite,
            };
            if attempt < retries {
                tracing::debug!(dir = %dir.display(), attempt, "state not settled yet");
                tokio::time::sleep(self.tuning.verify_interval).await;
            }
        }
        last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Desired,
    Opposite,
    Unverified,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
