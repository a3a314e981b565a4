mod collar;
mod config_cmd;
mod interval;
mod offline;
mod sync_cmd;
mod workflow;

pub use collar::CollarCommand;
pub use config_cmd::ConfigCommand;
pub use interval::IntervalCommand;
pub use offline::OfflineCommand;
pub use sync_cmd::{try_auto_sync, SyncCommand};
pub use workflow::WorkflowCommand;

use clap::ValueEnum;

use drillsync::db::{CollarRepository, RepoError};
use drillsync::models::{Collar, Record, RecordMeta};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Looks a collar up by record id, falling back to its hole id.
pub(crate) async fn resolve_collar(
    repo: &CollarRepository,
    identifier: &str,
) -> Result<Record<Collar>, RepoError> {
    if let Some(collar) = repo.get(identifier).await? {
        return Ok(collar);
    }
    repo.find_by_hole_id(identifier)
        .await?
        .ok_or_else(|| RepoError::NotFound {
            table: "collars".to_string(),
            id: identifier.to_string(),
        })
}

pub(crate) fn print_meta(meta: &RecordMeta) {
    println!("ID: {}", meta.id);
    print!("Status: {}", meta.row_status);
    if meta.approved {
        print!(" (approved)");
    }
    if let Some(by) = &meta.superseded_by {
        print!(" -> superseded by {}", by);
    }
    println!();
    println!(
        "Sync: {} (rv {})",
        if meta.is_dirty() { "pending" } else { "synced" },
        meta.rv
    );
    println!(
        "Modified: {} by {}",
        meta.modified_on_dt.format("%Y-%m-%d %H:%M"),
        meta.modified_by
    );
}
