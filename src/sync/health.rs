use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::conflict;
use crate::db::{kv, LocalStore, StoreError, TRACKED_TABLES};

/// Device-side view of how far behind the server this client is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHealth {
    pub pending: BTreeMap<String, i64>,
    pub total_pending: i64,
    pub oldest_unsynced: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub oldest_unsynced_age: Option<Duration>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub open_conflicts: usize,
}

impl SyncHealth {
    pub async fn collect(store: &LocalStore) -> Result<Self, StoreError> {
        let pending = store.pending_counts().await?;
        let total_pending = pending.values().sum();
        let oldest_unsynced = store.oldest_dirty().await?;
        let pool = store.pool();
        Ok(Self {
            pending,
            total_pending,
            oldest_unsynced,
            oldest_unsynced_age: oldest_unsynced.map(|dt| Utc::now() - dt),
            last_successful_sync: kv::get(pool, kv::LAST_SYNC_AT).await?,
            last_error: kv::get(pool, kv::LAST_ERROR).await?,
            consecutive_failures: kv::get(pool, kv::CONSECUTIVE_FAILURES)
                .await?
                .unwrap_or(0),
            open_conflicts: conflict::open_conflicts(pool).await?.len(),
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0 && self.open_conflicts == 0
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.consecutive_failures > 0 {
            warnings.push(format!(
                "{} consecutive sync failure(s), last: {}",
                self.consecutive_failures,
                self.last_error.as_deref().unwrap_or("unknown")
            ));
        }
        if self.open_conflicts > 0 {
            warnings.push(format!("{} unresolved conflict(s)", self.open_conflicts));
        }
        if let Some(age) = self.oldest_unsynced_age {
            if age > Duration::hours(24) {
                warnings.push(format!(
                    "oldest unsynced change is {} hours old",
                    age.num_hours()
                ));
            }
        }
        warnings
    }
}

impl fmt::Display for SyncHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pending changes: {}", self.total_pending)?;
        for (table, count) in &self.pending {
            writeln!(f, "  {:<18} {}", table, count)?;
        }
        match self.oldest_unsynced {
            Some(dt) => writeln!(f, "Oldest unsynced: {}", dt.format("%Y-%m-%d %H:%M:%S"))?,
            None => writeln!(f, "Oldest unsynced: -")?,
        }
        match self.last_successful_sync {
            Some(dt) => writeln!(f, "Last sync:       {}", dt.format("%Y-%m-%d %H:%M:%S"))?,
            None => writeln!(f, "Last sync:       never")?,
        }
        writeln!(f, "Failures:        {}", self.consecutive_failures)?;
        if let Some(e) = &self.last_error {
            writeln!(f, "Last error:      {}", e)?;
        }
        writeln!(f, "Open conflicts:  {}", self.open_conflicts)?;
        for warning in self.warnings() {
            writeln!(f, "warning: {}", warning)?;
        }
        Ok(())
    }
}

/// Per-device sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSyncState {
    pub client_id: String,
    pub per_table_last_revision: BTreeMap<String, i64>,
    pub pending_change_count: i64,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub change_log_position: i64,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl ClientSyncState {
    pub async fn load(store: &LocalStore, client_id: &str) -> Result<Self, StoreError> {
        let pool = store.pool();
        let mut per_table_last_revision = BTreeMap::new();
        for spec in TRACKED_TABLES {
            let rv: i64 = kv::get(pool, &kv::cursor_key(spec.name))
                .await?
                .unwrap_or(0);
            per_table_last_revision.insert(spec.name.to_string(), rv);
        }
        Ok(Self {
            client_id: client_id.to_string(),
            per_table_last_revision,
            pending_change_count: store.pending_counts().await?.values().sum(),
            last_sync_timestamp: kv::get(pool, kv::LAST_SYNC_AT).await?,
            change_log_position: kv::get(pool, kv::CHANGE_LOG_POSITION).await?.unwrap_or(0),
            last_error: kv::get(pool, kv::LAST_ERROR).await?,
            consecutive_failures: kv::get(pool, kv::CONSECUTIVE_FAILURES)
                .await?
                .unwrap_or(0),
        })
    }
}
