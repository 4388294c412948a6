use serde::Serialize;
use stackback_core::compose::DockerCompose;
use stackback_core::config::ValidatedConfig;
use stackback_core::lifecycle::{StackState, StateTracker};
use stackback_core::registry::DirectoryRegistry;

use crate::output::{print_json, yes_no, Table};

#[derive(Serialize)]
struct StatusRow {
    identifier: String,
    enabled: bool,
    state: StackState,
}

pub fn run(config: &ValidatedConfig, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let rows = rt.block_on(collect(config))?;

    if json {
        return print_json(&rows);
    }
    let mut table = Table::new(&["DIRECTORY", "ENABLED", "STATE"]);
    for r in rows {
        table.row(vec![r.identifier, yes_no(r.enabled), r.state.to_string()]);
    }
    table.print_or("No directories registered.");
    Ok(())
}

async fn collect(config: &ValidatedConfig) -> anyhow::Result<Vec<StatusRow>> {
    let (reg, _) = DirectoryRegistry::load(&config.stacks_root, &config.registry_file)?;
    let compose = DockerCompose::new(config.compose_command.clone());
    let tracker = StateTracker::new(&compose, config.timeouts.status);

    let mut rows = Vec::with_capacity(reg.len());
    for entry in reg.entries() {
        let state = tracker.check_status(&reg.full_path(&entry.identifier)).await;
        rows.push(StatusRow {
            identifier: entry.identifier,
            enabled: entry.enabled,
            state,
        });
    }
    Ok(rows)
}
