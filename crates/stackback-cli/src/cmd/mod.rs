pub mod dirs;
pub mod run;
pub mod snapshots;
pub mod status;

use anyhow::Context;
use stackback_core::config::{Config, ValidatedConfig};
use stackback_core::StackbackError;
use std::path::Path;

pub fn load_config(path: &Path) -> anyhow::Result<ValidatedConfig> {
    let config = Config::load(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    let validated = config.validate().map_err(StackbackError::from)?;
    Ok(validated)
}
