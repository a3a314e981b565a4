pub mod kv;
mod metadata;
mod repository;
mod store;
pub mod tables;
pub mod tracker;

pub use metadata::{record_synced_revision, SyncMetadataIndex};
pub use repository::{
    CollarRepository, IntervalRepository, ReferenceRepository, RepoError, Repository,
};
pub use store::{LocalStore, StoreError, StoreTx};
pub use tables::{table_spec, SchemaKind, TableSpec, TrackingPolicy, TRACKED_TABLES};
pub use tracker::WriteOrigin;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations/client").run(&pool).await?;

    Ok(pool)
}

/// Opens the local store at `path`, creating and migrating it if needed.
pub async fn open_store(path: &Path) -> Result<LocalStore, StoreError> {
    let pool = init_db(path).await?;
    Ok(LocalStore::new(pool))
}
