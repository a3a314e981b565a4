use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    try_auto_sync, CollarCommand, ConfigCommand, IntervalCommand, OfflineCommand, SyncCommand,
    WorkflowCommand,
};
use drillsync::config::Config;
use drillsync::db::open_store;

#[derive(Parser)]
#[command(name = "drillsync")]
#[command(version)]
#[command(about = "Offline-first capture of drill hole records", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage drill hole collars
    Collar(CollarCommand),

    /// Log lithology intervals
    Interval(IntervalCommand),

    /// Move records through review
    Workflow(WorkflowCommand),

    /// Choose records kept on this device
    Offline(OfflineCommand),

    /// Sync with remote server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

impl Commands {
    /// Returns true if the command changes local data and should be
    /// followed by an auto-sync.
    fn is_write(&self) -> bool {
        match self {
            Commands::Collar(cmd) => cmd.is_write(),
            Commands::Interval(cmd) => cmd.is_write(),
            Commands::Workflow(cmd) => cmd.is_write(),
            Commands::Offline(_) | Commands::Sync(_) | Commands::Config(_) => false,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("drillsync=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let store = open_store(&config.database_path.value).await?;
    match &command {
        Commands::Collar(cmd) => cmd.run(&store, &config).await?,
        Commands::Interval(cmd) => cmd.run(&store, &config).await?,
        Commands::Workflow(cmd) => cmd.run(&store, &config).await?,
        Commands::Offline(cmd) => cmd.run(&store, &config).await?,
        Commands::Sync(cmd) => cmd.run(&store, &config).await?,
        Commands::Config(_) => {}
    }

    // Auto-sync AFTER write commands (only if command succeeded)
    if command.is_write() {
        try_auto_sync(&store, &config).await;
    }

    Ok(())
}
