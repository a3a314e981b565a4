//! Sync CLI commands for synchronizing with the server.

use clap::{Args, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use drillsync::config::Config;
use drillsync::db::LocalStore;
use drillsync::sync::{
    CycleReport, PullSummary, PushSummary, SyncEngine, SyncError, SyncHealth,
};

use super::OutputFormat;

/// Sync with remote server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Push local changes, then pull server changes (the default)
    Run,
    /// Only pull server changes
    Pull,
    /// Only push local changes
    Push,
    /// Show sync configuration and this device's sync position
    Status {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show pending changes, failures and open conflicts
    Health,
    /// Keep syncing on a fixed schedule until interrupted
    Watch {
        /// Seconds between cycles
        #[arg(long, default_value_t = 60)]
        every: u64,
    },
}

impl SyncCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None | Some(SyncSubcommand::Run) => {
                let engine = SyncEngine::from_config(store.clone(), config).await?;
                println!("Syncing with server...");
                let report = engine.run_cycle().await?;
                print_report(&report);
                Ok(())
            }
            Some(SyncSubcommand::Pull) => {
                let engine = SyncEngine::from_config(store.clone(), config).await?;
                match engine.pull_incremental().await {
                    Ok(summary) => {
                        print_pull(&summary);
                        Ok(())
                    }
                    Err(SyncError::Conflict(conflicts)) => {
                        println!("Pulled with {} conflict(s):", conflicts.len());
                        for c in &conflicts {
                            println!(
                                "  {}/{} local rv {} server rv {}",
                                c.table, c.entity_id, c.local_rv, c.server_rv
                            );
                        }
                        println!("Local edits were kept; the next push will rebase them.");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Some(SyncSubcommand::Push) => {
                let engine = SyncEngine::from_config(store.clone(), config).await?;
                let summary = engine.push_changes().await?;
                print_push(&summary);
                Ok(())
            }
            Some(SyncSubcommand::Status { format }) => self.status(store, config, format).await,
            Some(SyncSubcommand::Health) => {
                let health = SyncHealth::collect(store).await?;
                print!("{}", health);
                for warning in health.warnings() {
                    println!("warning: {}", warning);
                }
                Ok(())
            }
            Some(SyncSubcommand::Watch { every }) => {
                let engine = Arc::new(SyncEngine::from_config(store.clone(), config).await?);
                println!("Syncing every {}s, Ctrl-C to stop", every);
                let handle = engine.spawn_periodic(Duration::from_secs((*every).max(1)));
                tokio::signal::ctrl_c().await?;
                handle.abort();
                println!("Stopped.");
                Ok(())
            }
        }
    }

    async fn status(
        &self,
        store: &LocalStore,
        config: &Config,
        format: &OutputFormat,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if !config.sync.is_configured() {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    api_key: \"your-api-key\"");
            println!("    auto_sync: false");
            println!();
            println!("Or set environment variables:");
            println!("  DRILLSYNC_SYNC_URL");
            println!("  DRILLSYNC_SYNC_API_KEY");
            return Ok(());
        }

        let engine = SyncEngine::from_config(store.clone(), config).await?;
        let state = engine.client_state().await?;

        if let OutputFormat::Json = format {
            println!("{}", serde_json::to_string_pretty(&state)?);
            return Ok(());
        }

        let server_url = config.sync.server_url.as_deref().unwrap_or_default();
        let api_key = config.sync.api_key.as_deref().unwrap_or_default();
        println!("Server:    {}", server_url);
        println!(
            "API Key:   {}...",
            api_key.chars().take(8).collect::<String>()
        );
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!("Client:    {}", state.client_id);
        println!();
        println!("Pending changes:     {}", state.pending_change_count);
        println!("Change log position: {}", state.change_log_position);
        match state.last_sync_timestamp {
            Some(at) => println!("Last sync:           {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => println!("Last sync:           never"),
        }
        for (table, rv) in &state.per_table_last_revision {
            println!("  {:<18} rv {}", table, rv);
        }
        if let Some(error) = &state.last_error {
            println!();
            println!(
                "Last error ({} consecutive): {}",
                state.consecutive_failures, error
            );
        }
        Ok(())
    }
}

fn print_pull(summary: &PullSummary) {
    println!(
        "  pulled {} applied, {} unchanged, {} rejected",
        summary.applied, summary.skipped, summary.rejected
    );
}

fn print_push(summary: &PushSummary) {
    println!(
        "  pushed {} change(s) in {} chunk(s), {} acknowledged",
        summary.pushed, summary.chunks, summary.acknowledged
    );
    if summary.server_wins + summary.rebased > 0 {
        println!(
            "  conflicts: {} took the server version, {} rebased for the next push",
            summary.server_wins, summary.rebased
        );
    }
}

fn print_report(report: &CycleReport) {
    if report.resynced {
        println!("  server history was pruned; performed a full resync");
    }
    print_push(&report.push);
    print_pull(&report.pull);
    let conflicts: Vec<_> = report.conflicts().collect();
    if conflicts.is_empty() {
        println!("Sync complete.");
    } else {
        println!("Sync complete with {} conflict(s):", conflicts.len());
        for c in conflicts {
            println!("  {}/{} (server rv {})", c.table, c.entity_id, c.server_rv);
        }
    }
}

/// Runs one sync cycle if auto-sync is enabled.
///
/// Failures are reported but never fail the command: the local write has
/// already been committed and will go out with the next sync.
pub async fn try_auto_sync(store: &LocalStore, config: &Config) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    let engine = match SyncEngine::from_config(store.clone(), config).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Auto-sync: {}", e);
            return;
        }
    };

    match engine.trigger().await {
        Ok(_) => {}
        Err(e) if e.is_transient() => {
            eprintln!("Auto-sync: server unreachable, changes kept for the next sync");
            tracing::debug!(error = %e, "auto-sync failed");
        }
        Err(e) => eprintln!("Auto-sync: {}", e),
    }
}
