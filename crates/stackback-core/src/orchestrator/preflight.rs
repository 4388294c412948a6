//! Global checks that must all pass before any stack is touched.

use crate::compose::ComposeClient;
use crate::config::ValidatedConfig;
use crate::error::{Result, StackbackError};
use crate::lock::InstanceLock;
use crate::secret;
use crate::snapshot::SnapshotTool;

/// Take the instance lock, then check binaries, secret, repository and
/// free space, in that order. The returned lock must be held for the
/// whole run.
pub(super) async fn check<C, S>(
    config: &ValidatedConfig,
    compose: &C,
    snapshot: &mut S,
) -> Result<InstanceLock>
where
    C: ComposeClient,
    S: SnapshotTool,
{
    let lock = InstanceLock::try_acquire(&config.lock_file)?;
    tracing::debug!(lock = %lock.path().display(), "instance lock acquired");

    for binary in [compose.required_binary(), snapshot.required_binary()]
        .into_iter()
        .flatten()
    {
        which::which(binary).map_err(|_| {
            StackbackError::Config(format!("required program '{binary}' not found on PATH"))
        })?;
    }

    let (password, source) = secret::resolve(&config.secret, config.timeouts.secret_command).await?;
    tracing::debug!(?source, "repository password resolved");
    snapshot.set_password(password);

    let health = snapshot
        .health(config.timeouts.status)
        .await
        .map_err(|e| unreachable_repo(config, &e.to_string()))?;
    if !health.success() {
        return Err(unreachable_repo(config, &health.describe()));
    }

    check_free_space(config)?;
    Ok(lock)
}

fn unreachable_repo(config: &ValidatedConfig, detail: &str) -> StackbackError {
    StackbackError::Config(format!(
        "repository {} is not reachable: {detail}",
        config.repository
    ))
}

fn check_free_space(config: &ValidatedConfig) -> Result<()> {
    if config.min_free_space_bytes == 0 {
        return Ok(());
    }
    let free = fs2::available_space(&config.stacks_root).map_err(|e| {
        StackbackError::Config(format!(
            "cannot determine free space at {}: {e}",
            config.stacks_root.display()
        ))
    })?;
    if free < config.min_free_space_bytes {
        return Err(StackbackError::Config(format!(
            "only {} MiB free at {}; at least {} MiB required",
            free / (1024 * 1024),
            config.stacks_root.display(),
            config.min_free_space_bytes / (1024 * 1024)
        )));
    }
    tracing::debug!(free_mib = free / (1024 * 1024), "free space ok");
    Ok(())
}
