use clap::{Args, Subcommand, ValueEnum};

use drillsync::config::Config;
use drillsync::db::{CollarRepository, LocalStore};
use drillsync::models::{Collar, DrillInterval, Entity, Record, RecordMeta};
use drillsync::workflow::{WorkflowEngine, WorkflowError};

use super::{print_meta, resolve_collar, OutputFormat};

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum RecordKind {
    #[default]
    Collar,
    Interval,
}

#[derive(Args)]
pub struct WorkflowCommand {
    #[command(subcommand)]
    pub command: WorkflowSubcommand,
}

#[derive(Args)]
pub struct Target {
    /// Record ID (hole id also accepted for collars)
    identifier: String,

    /// Kind of record
    #[arg(long, value_enum, default_value = "collar")]
    kind: RecordKind,
}

#[derive(Subcommand)]
pub enum WorkflowSubcommand {
    /// Submit a draft for review
    Submit(Target),

    /// Approve a record under review
    Approve(Target),

    /// Reject a record under review or an approved one
    Reject {
        #[command(flatten)]
        target: Target,

        /// Why the record was rejected
        #[arg(long, short)]
        reason: Option<String>,
    },

    /// Replace an approved record with another one
    Supersede {
        #[command(flatten)]
        target: Target,

        /// ID of the replacing record
        #[arg(long)]
        by: String,
    },

    /// Return a rejected record to draft
    Reopen(Target),

    /// Show status history and comments
    History {
        #[command(flatten)]
        target: Target,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl WorkflowCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let actor = config.created_by.value.as_str();
        let workflow = WorkflowEngine::new(store.clone());

        match &self.command {
            WorkflowSubcommand::Submit(target) => {
                let id = resolve(store, config, target).await?;
                let meta = match target.kind {
                    RecordKind::Collar => {
                        meta_of(workflow.submit_for_review::<Collar>(&id, actor).await)
                    }
                    RecordKind::Interval => {
                        meta_of(workflow.submit_for_review::<DrillInterval>(&id, actor).await)
                    }
                };
                report("Submitted for review", meta)
            }
            WorkflowSubcommand::Approve(target) => {
                let id = resolve(store, config, target).await?;
                let meta = match target.kind {
                    RecordKind::Collar => meta_of(workflow.approve::<Collar>(&id, actor).await),
                    RecordKind::Interval => {
                        meta_of(workflow.approve::<DrillInterval>(&id, actor).await)
                    }
                };
                report("Approved", meta)
            }
            WorkflowSubcommand::Reject { target, reason } => {
                let id = resolve(store, config, target).await?;
                let reason = reason.as_deref();
                let meta = match target.kind {
                    RecordKind::Collar => {
                        meta_of(workflow.reject::<Collar>(&id, actor, reason).await)
                    }
                    RecordKind::Interval => {
                        meta_of(workflow.reject::<DrillInterval>(&id, actor, reason).await)
                    }
                };
                report("Rejected", meta)
            }
            WorkflowSubcommand::Supersede { target, by } => {
                let id = resolve(store, config, target).await?;
                let by = resolve(
                    store,
                    config,
                    &Target {
                        identifier: by.clone(),
                        kind: target.kind,
                    },
                )
                .await?;
                let meta = match target.kind {
                    RecordKind::Collar => {
                        meta_of(workflow.supersede::<Collar>(&id, &by, actor).await)
                    }
                    RecordKind::Interval => {
                        meta_of(workflow.supersede::<DrillInterval>(&id, &by, actor).await)
                    }
                };
                report("Superseded", meta)
            }
            WorkflowSubcommand::Reopen(target) => {
                let id = resolve(store, config, target).await?;
                let meta = match target.kind {
                    RecordKind::Collar => meta_of(workflow.reopen::<Collar>(&id, actor).await),
                    RecordKind::Interval => {
                        meta_of(workflow.reopen::<DrillInterval>(&id, actor).await)
                    }
                };
                report("Reopened", meta)
            }
            WorkflowSubcommand::History { target, format } => {
                let id = resolve(store, config, target).await?;
                let (history, comments) = match target.kind {
                    RecordKind::Collar => (
                        workflow.history::<Collar>(&id).await?,
                        workflow.comments::<Collar>(&id).await?,
                    ),
                    RecordKind::Interval => (
                        workflow.history::<DrillInterval>(&id).await?,
                        workflow.comments::<DrillInterval>(&id).await?,
                    ),
                };

                match format {
                    OutputFormat::Json => {
                        let out = serde_json::json!({
                            "history": history,
                            "comments": comments,
                        });
                        println!("{}", serde_json::to_string_pretty(&out)?);
                    }
                    OutputFormat::Text => {
                        if history.is_empty() {
                            println!("No transitions recorded for {}.", id);
                        }
                        for entry in &history {
                            println!("{}", entry);
                        }
                        if !comments.is_empty() {
                            println!();
                            println!("Comments:");
                            for comment in &comments {
                                println!(
                                    "  {} {}: {}",
                                    comment.created_on_dt.format("%Y-%m-%d %H:%M"),
                                    comment.author,
                                    comment.body
                                );
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self.command, WorkflowSubcommand::History { .. })
    }
}

fn meta_of<T: Entity>(
    result: Result<Record<T>, WorkflowError>,
) -> Result<RecordMeta, WorkflowError> {
    result.map(|r| r.meta)
}

fn report(
    verb: &str,
    result: Result<RecordMeta, WorkflowError>,
) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(meta) => {
            println!("{}:", verb);
            print_meta(&meta);
            Ok(())
        }
        Err(WorkflowError::Validation(e)) => {
            eprintln!("Cannot proceed, these fields need attention:");
            for error in e.errors() {
                eprintln!("  - {}", error);
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Record id for the target; collars may also be named by hole id.
async fn resolve(
    store: &LocalStore,
    config: &Config,
    target: &Target,
) -> Result<String, Box<dyn std::error::Error>> {
    match target.kind {
        RecordKind::Collar => {
            let repo = CollarRepository::new(store.clone(), &config.created_by.value);
            Ok(resolve_collar(&repo, &target.identifier).await?.meta.id)
        }
        RecordKind::Interval => Ok(target.identifier.clone()),
    }
}
