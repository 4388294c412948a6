mod cmd;
mod output;

use clap::{Parser, Subcommand};
use stackback_core::{paths, StackbackError};
use std::path::PathBuf;

use cmd::run::RunExit;

#[derive(Parser)]
#[command(
    name = "stackback",
    about = "Selective, restart-safe backups of docker compose stacks",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "STACKBACK_CONFIG",
        default_value = paths::DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Log at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every enabled directory
    Run {
        /// Log what would happen without stopping, starting or backing up anything
        #[arg(long)]
        dry_run: bool,

        /// Print snapshot tool output to the terminal as it arrives
        #[arg(long)]
        progress: bool,
    },

    /// List registered directories
    List,

    /// Scan the stacks root and update the registry
    Sync,

    /// Enable a directory for backup
    Enable { identifier: String },

    /// Disable a directory
    Disable { identifier: String },

    /// Enable every registered directory
    EnableAll,

    /// Disable every registered directory
    DisableAll,

    /// Register a stack directory outside the stacks root
    AddExternal {
        /// Absolute path of the stack directory
        path: PathBuf,

        /// Enable it right away
        #[arg(long)]
        enable: bool,
    },

    /// Forget an external directory
    RemoveExternal { path: String },

    /// Show the current state of every registered stack
    Status,

    /// List snapshots of one directory
    Snapshots { identifier: String },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        match &cli.command {
            Commands::Run { .. } => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = cmd::load_config(&cli.config).and_then(|config| match cli.command {
        Commands::Run { dry_run, progress } => {
            cmd::run::run(config, dry_run, progress && !cli.json, cli.json)
        }
        Commands::List => cmd::dirs::list(&config, cli.json),
        Commands::Sync => cmd::dirs::sync(&config, cli.json),
        Commands::Enable { identifier } => cmd::dirs::set_enabled(&config, &identifier, true),
        Commands::Disable { identifier } => cmd::dirs::set_enabled(&config, &identifier, false),
        Commands::EnableAll => cmd::dirs::set_all(&config, true),
        Commands::DisableAll => cmd::dirs::set_all(&config, false),
        Commands::AddExternal { path, enable } => {
            cmd::dirs::add_external(&config, &path, enable, cli.json)
        }
        Commands::RemoveExternal { path } => cmd::dirs::remove_external(&config, &path),
        Commands::Status => cmd::status::run(&config, cli.json),
        Commands::Snapshots { identifier } => cmd::snapshots::run(&config, &identifier, cli.json),
    });

    if let Err(e) = result {
        if let Some(exit) = e.downcast_ref::<RunExit>() {
            eprintln!("error: {exit}");
            std::process::exit(exit.exit_code());
        }
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        let code = e
            .chain()
            .find_map(|c| c.downcast_ref::<StackbackError>())
            .map(|se| se.kind().exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
