use clap::{Args, Subcommand};

use drillsync::config::Config;
use drillsync::db::{CollarRepository, IntervalRepository, LocalStore};
use drillsync::models::DrillInterval;

use super::{resolve_collar, OutputFormat};

#[derive(Args)]
pub struct IntervalCommand {
    #[command(subcommand)]
    pub command: IntervalSubcommand,
}

#[derive(Subcommand)]
pub enum IntervalSubcommand {
    /// Log a lithology interval down a hole
    Add {
        /// Collar ID or hole id
        collar: String,

        /// Top of the interval in metres
        #[arg(long)]
        from: f64,

        /// Bottom of the interval in metres
        #[arg(long)]
        to: f64,

        /// Lithology code
        #[arg(long)]
        lith: String,

        #[arg(long)]
        description: Option<String>,

        /// Logging geologist (defaults to created_by)
        #[arg(long)]
        logged_by: Option<String>,
    },

    /// List the intervals of a hole, shallowest first
    List {
        /// Collar ID or hole id
        collar: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl IntervalCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let actor = &config.created_by.value;
        let collars = CollarRepository::new(store.clone(), actor);
        let repo = IntervalRepository::new(store.clone(), actor);

        match &self.command {
            IntervalSubcommand::Add {
                collar,
                from,
                to,
                lith,
                description,
                logged_by,
            } => {
                let collar = resolve_collar(&collars, collar).await?;
                let mut interval = DrillInterval::new(collar.id(), *from, *to, lith)
                    .with_logged_by(logged_by.as_deref().unwrap_or(actor));
                if let Some(description) = description {
                    interval = interval.with_description(description);
                }

                let created = repo.create(interval).await?;
                println!(
                    "Logged interval {} on {}:",
                    created.meta.id, collar.data.hole_id
                );
                println!("{}", created.data);
                Ok(())
            }

            IntervalSubcommand::List { collar, format } => {
                let collar = resolve_collar(&collars, collar).await?;
                let intervals = repo.list_for_collar(collar.id()).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&intervals)?);
                    }
                    OutputFormat::Text => {
                        if intervals.is_empty() {
                            println!("No intervals logged for {}.", collar.data.hole_id);
                            return Ok(());
                        }
                        println!("{} ({} intervals)", collar.data.hole_id, intervals.len());
                        for interval in &intervals {
                            println!("{}  [{}]", interval.data, interval.meta.row_status);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.command, IntervalSubcommand::Add { .. })
    }
}
