use stackback_core::compose::DockerCompose;
use stackback_core::config::ValidatedConfig;
use stackback_core::orchestrator::BackupOrchestrator;
use stackback_core::output::ConsoleSink;
use stackback_core::registry::DirectoryRegistry;
use stackback_core::signal::shutdown_signal;
use stackback_core::snapshot::Restic;
use stackback_core::FailureKind;

use crate::output::print_json;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes (no std::process::exit in library code)
// ---------------------------------------------------------------------------

/// A run that completed but had failing directories.
#[derive(Debug)]
pub struct RunExit {
    pub kind: FailureKind,
    pub failed: Vec<String>,
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} director{} failed (first failure: {}): {}",
            self.failed.len(),
            if self.failed.len() == 1 { "y" } else { "ies" },
            self.kind,
            self.failed.join(", ")
        )
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(config: ValidatedConfig, dry_run: bool, progress: bool, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(execute(config, dry_run, progress, json))
}

async fn execute(
    config: ValidatedConfig,
    dry_run: bool,
    progress: bool,
    json: bool,
) -> anyhow::Result<()> {
    let (mut registry, _) = DirectoryRegistry::load(&config.stacks_root, &config.registry_file)?;
    let compose = DockerCompose::new(config.compose_command.clone());
    let restic = Restic::new(&config.restic_binary, &config.repository);

    let mut orchestrator = BackupOrchestrator::new(config, compose, restic).dry_run(dry_run);
    if progress {
        orchestrator = orchestrator.with_output(Box::new(ConsoleSink));
    }
    let report = orchestrator
        .run_until(&mut registry, shutdown_signal())
        .await?;

    if json {
        print_json(&report)?;
    } else {
        println!("{}", report.summary());
    }

    match report.classification() {
        None => Ok(()),
        Some(kind) => Err(RunExit {
            kind,
            failed: report.stats.failed_dirs.clone(),
        }
        .into()),
    }
}
