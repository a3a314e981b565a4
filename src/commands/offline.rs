use clap::{Args, Subcommand};

use drillsync::config::Config;
use drillsync::db::{CollarRepository, IntervalRepository, LocalStore, SyncMetadataIndex};

use super::resolve_collar;

/// Choose which holes stay available without a connection
#[derive(Args)]
pub struct OfflineCommand {
    #[command(subcommand)]
    pub command: OfflineSubcommand,
}

#[derive(Subcommand)]
pub enum OfflineSubcommand {
    /// Keep a collar and its intervals on this device
    Mark {
        /// Collar ID or hole id
        collar: String,
    },

    /// Stop keeping a collar offline
    Unmark {
        /// Collar ID or hole id
        collar: String,
    },

    /// List records kept offline
    List {
        /// Only records of this program
        #[arg(long)]
        program: Option<String>,
    },
}

impl OfflineCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let actor = &config.created_by.value;
        let collars = CollarRepository::new(store.clone(), actor);
        let intervals = IntervalRepository::new(store.clone(), actor);
        let index = SyncMetadataIndex::new(store.clone());

        match &self.command {
            OfflineSubcommand::Mark { collar } => {
                let collar = resolve_collar(&collars, collar).await?;
                collars.keep_offline(collar.id(), &index).await?;
                let children = intervals.list_for_collar(collar.id()).await?;
                for interval in &children {
                    intervals.keep_offline(interval.id(), &index).await?;
                }
                println!(
                    "Keeping {} offline ({} intervals)",
                    collar.data.hole_id,
                    children.len()
                );
                Ok(())
            }
            OfflineSubcommand::Unmark { collar } => {
                let collar = resolve_collar(&collars, collar).await?;
                if !index.clear_offline("Collar", collar.id()).await? {
                    println!("{} was not kept offline.", collar.data.hole_id);
                    return Ok(());
                }
                for meta in index.list_offline_for_collar(collar.id()).await? {
                    index.clear_offline(&meta.entity_type, &meta.entity_id).await?;
                }
                println!("No longer keeping {} offline", collar.data.hole_id);
                Ok(())
            }
            OfflineSubcommand::List { program } => {
                let entries = match program {
                    Some(program) => index.list_offline_for_program(program).await?,
                    None => {
                        let mut entries = Vec::new();
                        for entity_type in ["Collar", "DrillInterval"] {
                            for id in index.list_offline(entity_type).await? {
                                if let Some(meta) = index.get(entity_type, &id).await? {
                                    entries.push(meta);
                                }
                            }
                        }
                        entries
                    }
                };

                if entries.is_empty() {
                    println!("Nothing is kept offline.");
                    return Ok(());
                }
                println!("{:<14}  {:<36}  {:>6}", "TYPE", "ID", "RV");
                for meta in &entries {
                    println!(
                        "{:<14}  {:<36}  {:>6}",
                        meta.entity_type, meta.entity_id, meta.last_synced_revision
                    );
                }
                Ok(())
            }
        }
    }
}
