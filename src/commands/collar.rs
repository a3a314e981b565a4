use clap::{Args, Subcommand};
use std::io::{self, Write};

use drillsync::config::Config;
use drillsync::db::{CollarRepository, LocalStore};
use drillsync::models::{Collar, Coordinate, RowStatus};

use super::{print_meta, resolve_collar, OutputFormat};

#[derive(Args)]
pub struct CollarCommand {
    #[command(subcommand)]
    pub command: CollarSubcommand,
}

#[derive(Subcommand)]
pub enum CollarSubcommand {
    /// Create a new drill hole collar
    Create {
        /// Hole identifier, e.g. BH-001
        hole_id: String,

        /// Hole type (DD, RC, RAB, AC)
        #[arg(long, default_value = "DD")]
        hole_type: String,

        /// Drilling program
        #[arg(long)]
        program: Option<String>,

        /// Coordinate grid of the collar location
        #[arg(long, requires_all = ["easting", "northing"])]
        grid: Option<String>,

        #[arg(long, allow_hyphen_values = true)]
        easting: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        northing: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        elevation: Option<f64>,

        /// Dip in degrees, negative downwards
        #[arg(long, default_value_t = -90.0, allow_hyphen_values = true)]
        dip: f64,

        /// Azimuth in degrees
        #[arg(long, default_value_t = 0.0)]
        azimuth: f64,

        /// Responsible geologist
        #[arg(long)]
        geologist: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,
    },

    /// List collars
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Filter by program
        #[arg(long)]
        program: Option<String>,

        /// Filter by workflow status
        #[arg(long)]
        status: Option<RowStatus>,

        /// Include deleted collars
        #[arg(long)]
        all: bool,
    },

    /// Show a collar's details
    Show {
        /// Collar ID or hole id
        identifier: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update a draft or rejected collar
    Update {
        /// Collar ID or hole id
        identifier: String,

        #[arg(long)]
        hole_id: Option<String>,

        #[arg(long)]
        hole_type: Option<String>,

        #[arg(long)]
        program: Option<String>,

        #[arg(long, allow_hyphen_values = true)]
        dip: Option<f64>,

        #[arg(long)]
        azimuth: Option<f64>,

        /// Final depth in metres
        #[arg(long)]
        total_depth: Option<f64>,

        #[arg(long)]
        geologist: Option<String>,

        #[arg(long)]
        start_date: Option<String>,

        #[arg(long)]
        end_date: Option<String>,

        #[arg(long)]
        comments: Option<String>,

        /// Also enforce the rules of the collar's current status
        #[arg(long)]
        strict: bool,
    },

    /// Delete a collar
    Delete {
        /// Collar ID or hole id
        identifier: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl CollarCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let repo = CollarRepository::new(store.clone(), &config.created_by.value);
        match &self.command {
            CollarSubcommand::Create {
                hole_id,
                hole_type,
                program,
                grid,
                easting,
                northing,
                elevation,
                dip,
                azimuth,
                geologist,
                start_date,
            } => {
                let mut collar = Collar::new(hole_id, hole_type).with_orientation(*dip, *azimuth);
                if let Some(program) = program {
                    collar = collar.with_program(program);
                }
                if let (Some(grid), Some(easting), Some(northing)) = (grid, easting, northing) {
                    let mut coordinate = Coordinate::new(grid, *easting, *northing).primary();
                    if let Some(elevation) = elevation {
                        coordinate = coordinate.with_elevation(*elevation);
                    }
                    collar = collar.with_coordinate(coordinate);
                }
                if let Some(geologist) = geologist {
                    collar = collar.with_geologist(geologist);
                }
                if let Some(start_date) = start_date {
                    collar = collar.with_dates(start_date, None);
                }

                if repo.find_by_hole_id(hole_id).await?.is_some() {
                    return Err(format!("A collar with hole id '{}' already exists", hole_id).into());
                }

                let created = repo.create(collar).await?;
                println!("Created collar:");
                print_meta(&created.meta);
                print!("{}", created.data);
                Ok(())
            }

            CollarSubcommand::List {
                format,
                program,
                status,
                all,
            } => {
                let mut collars = match (program, status) {
                    (Some(program), _) => repo.list_by_program(program).await?,
                    (None, Some(status)) => repo.list_by_status(*status).await?,
                    (None, None) if *all => repo.list_all().await?,
                    (None, None) => repo.list().await?,
                };
                if let Some(status) = status {
                    collars.retain(|c| c.meta.row_status == *status);
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&collars)?);
                    }
                    OutputFormat::Text => {
                        if collars.is_empty() {
                            println!("No collars found.");
                            return Ok(());
                        }
                        println!(
                            "{:<36}  {:<12}  {:<4}  {:<10}  {:<7}",
                            "ID", "HOLE", "TYPE", "STATUS", "SYNC"
                        );
                        for c in &collars {
                            println!(
                                "{:<36}  {:<12}  {:<4}  {:<10}  {:<7}",
                                c.meta.id,
                                c.data.hole_id,
                                c.data.hole_type,
                                c.meta.row_status,
                                if c.meta.is_dirty() { "pending" } else { "synced" }
                            );
                        }
                    }
                }
                Ok(())
            }

            CollarSubcommand::Show { identifier, format } => {
                let collar = resolve_collar(&repo, identifier).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&collar)?);
                    }
                    OutputFormat::Text => {
                        print_meta(&collar.meta);
                        println!();
                        print!("{}", collar.data);
                    }
                }
                Ok(())
            }

            CollarSubcommand::Update {
                identifier,
                hole_id,
                hole_type,
                program,
                dip,
                azimuth,
                total_depth,
                geologist,
                start_date,
                end_date,
                comments,
                strict,
            } => {
                let current = resolve_collar(&repo, identifier).await?;
                let mut collar = current.data;
                if let Some(hole_id) = hole_id {
                    collar.hole_id = hole_id.clone();
                }
                if let Some(hole_type) = hole_type {
                    collar.hole_type = hole_type.clone();
                }
                if program.is_some() {
                    collar.program_id = program.clone();
                }
                if let Some(dip) = dip {
                    collar.dip = *dip;
                }
                if let Some(azimuth) = azimuth {
                    collar.azimuth = *azimuth;
                }
                if total_depth.is_some() {
                    collar.total_depth = *total_depth;
                }
                if geologist.is_some() {
                    collar.geologist = geologist.clone();
                }
                if start_date.is_some() {
                    collar.start_date = start_date.clone();
                }
                if end_date.is_some() {
                    collar.end_date = end_date.clone();
                }
                if comments.is_some() {
                    collar.comments = comments.clone();
                }

                let updated = if *strict {
                    repo.business_save(&current.meta.id, collar).await?
                } else {
                    repo.update(&current.meta.id, collar).await?
                };
                println!("Updated collar:");
                print_meta(&updated.meta);
                print!("{}", updated.data);
                Ok(())
            }

            CollarSubcommand::Delete { identifier, force } => {
                let collar = resolve_collar(&repo, identifier).await?;

                if !force {
                    print!(
                        "Are you sure you want to delete collar '{}'? [y/N] ",
                        collar.data.hole_id
                    );
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Cancelled.");
                        return Ok(());
                    }
                }

                repo.soft_delete(&collar.meta.id).await?;
                println!("Deleted collar '{}'", collar.data.hole_id);
                Ok(())
            }
        }
    }

    /// Whether the subcommand changes local data.
    pub fn is_write(&self) -> bool {
        matches!(
            self.command,
            CollarSubcommand::Create { .. }
                | CollarSubcommand::Update { .. }
                | CollarSubcommand::Delete { .. }
        )
    }
}
