use anyhow::Context;
use serde::Serialize;
use stackback_core::config::ValidatedConfig;
use stackback_core::registry::{DirectoryEntry, DirectoryRegistry};
use std::path::Path;

use crate::output::{print_json, yes_no, Table};

/// Load, mutate and save the registry under its lock.
fn update<T, F>(config: &ValidatedConfig, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&mut DirectoryRegistry) -> stackback_core::Result<T>,
{
    DirectoryRegistry::update(
        &config.stacks_root,
        &config.registry_file,
        config.timeouts.registry_lock,
        f,
    )
    .with_context(|| format!("registry {}", config.registry_file.display()))
}

#[derive(Serialize)]
struct EntryRow {
    identifier: String,
    enabled: bool,
    external: bool,
    path: String,
}

fn rows(reg: &DirectoryRegistry, entries: Vec<DirectoryEntry>) -> Vec<EntryRow> {
    entries
        .into_iter()
        .map(|e| EntryRow {
            path: reg.full_path(&e.identifier).display().to_string(),
            external: e.is_external(),
            identifier: e.identifier,
            enabled: e.enabled,
        })
        .collect()
}

pub fn list(config: &ValidatedConfig, json: bool) -> anyhow::Result<()> {
    let (reg, _) = DirectoryRegistry::load(&config.stacks_root, &config.registry_file)
        .context("failed to load registry")?;
    let entries = rows(&reg, reg.entries());

    if json {
        return print_json(&entries);
    }
    let mut table = Table::new(&["DIRECTORY", "ENABLED", "KIND"]);
    for e in entries {
        let kind = if e.external { "external" } else { "discovered" };
        table.row(vec![e.identifier, yes_no(e.enabled), kind.to_string()]);
    }
    table.print_or("No directories registered. Run `stackback sync` to scan the stacks root.");
    Ok(())
}

pub fn sync(config: &ValidatedConfig, json: bool) -> anyhow::Result<()> {
    let delta = update(config, |reg| reg.sync())?;
    if json {
        return print_json(&delta);
    }
    if delta.is_empty() {
        println!("Registry up to date.");
        return Ok(());
    }
    for id in &delta.added {
        println!("added    {id} (disabled)");
    }
    for id in &delta.removed {
        println!("removed  {id}");
    }
    Ok(())
}

pub fn set_enabled(config: &ValidatedConfig, identifier: &str, enabled: bool) -> anyhow::Result<()> {
    let changed = update(config, |reg| reg.set_enabled(identifier, enabled))?;
    let verb = if enabled { "enabled" } else { "disabled" };
    if changed {
        println!("{identifier} {verb}");
    } else {
        println!("{identifier} already {verb}");
    }
    Ok(())
}

pub fn set_all(config: &ValidatedConfig, enabled: bool) -> anyhow::Result<()> {
    let changed = update(config, |reg| Ok(reg.set_all_enabled(enabled)))?;
    let verb = if enabled { "enabled" } else { "disabled" };
    println!("{changed} director{} {verb}", if changed == 1 { "y" } else { "ies" });
    Ok(())
}

pub fn add_external(
    config: &ValidatedConfig,
    path: &Path,
    enable: bool,
    json: bool,
) -> anyhow::Result<()> {
    let identifier = update(config, |reg| reg.add_external(path, enable))?;
    if json {
        return print_json(&DirectoryEntry {
            identifier,
            enabled: enable,
        });
    }
    let state = if enable { "enabled" } else { "disabled" };
    println!("registered {identifier} ({state})");
    Ok(())
}

pub fn remove_external(config: &ValidatedConfig, path: &str) -> anyhow::Result<()> {
    update(config, |reg| reg.remove_external(path))?;
    println!("removed {path}");
    Ok(())
}
