use anyhow::Context;
use stackback_core::config::ValidatedConfig;
use stackback_core::secret;
use stackback_core::snapshot::{BackupTagSet, Restic, SnapshotManager, SnapshotTool};

use crate::output::{print_json, Table};

pub fn run(config: &ValidatedConfig, identifier: &str, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let snapshots = rt.block_on(async {
        let (password, _) = secret::resolve(&config.secret, config.timeouts.secret_command).await?;
        let mut restic = Restic::new(&config.restic_binary, &config.repository);
        restic.set_password(password);
        let manager = SnapshotManager::new(&restic, config.timeouts, config.hostname.clone(), false);
        manager.list(&BackupTagSet::for_today(identifier)).await
    })
    .with_context(|| format!("failed to list snapshots of {identifier}"))?;

    if json {
        return print_json(&snapshots);
    }
    let mut table = Table::new(&["ID", "TIME (UTC)", "HOST", "TAGS"]);
    for s in &snapshots {
        table.row(vec![
            s.display_id().to_string(),
            s.time.format("%Y-%m-%d %H:%M:%S").to_string(),
            s.hostname.clone(),
            s.tags.join(","),
        ]);
    }
    table.print_or(&format!("No snapshots of {identifier}."));
    Ok(())
}
