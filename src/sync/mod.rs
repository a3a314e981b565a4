//! Offline sync between the local store and the sync server.
//!
//! Local edits mark rows dirty. A sync cycle pushes dirty rows in chunks
//! over the change-log protocol, then pulls each tracked table by revision.
//! Every server row is applied through a sync-apply transaction, so applying
//! it never marks anything dirty.
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo(config: drillsync::config::Config) -> Result<(), Box<dyn std::error::Error>> {
//! use drillsync::db::open_store;
//! use drillsync::sync::SyncEngine;
//!
//! let store = open_store(&config.database_path.value).await?;
//! let engine = SyncEngine::from_config(store, &config).await?;
//! let report = engine.run_cycle().await?;
//! println!("pushed {}", report.push.pushed);
//! # Ok(())
//! # }
//! ```

pub mod conflict;
mod engine;
mod error;
mod health;
pub mod protocol;
mod retry;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

pub use conflict::Resolution;
pub use engine::{
    ensure_client_id, CycleReport, PullSummary, PushSummary, SyncEngine, TriggerOutcome,
};
pub use error::{SyncError, TransportError};
pub use health::{ClientSyncState, SyncHealth};
pub use protocol::SyncConflict;
pub use retry::{with_retry, RetryPolicy, Sleeper, TokioSleeper};
pub use transport::{HttpTransport, SyncTransport};
