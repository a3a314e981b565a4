//! Sync cycles between the local store and the server.
//!
//! A cycle pushes dirty rows first, then pulls by revision. At most one
//! cycle runs at a time; [`SyncEngine::trigger`] folds requests that arrive
//! while a cycle is in flight into one extra run.

use chrono::Utc;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::conflict::{self, Resolution};
use super::error::SyncError;
use super::health::{ClientSyncState, SyncHealth};
use super::protocol::{
    change_for, decode_row, same_content, ConflictInfo, PullRequest, PushRequest, RowPayload,
    SyncConflict, TableCursor,
};
use super::retry::{with_retry, RetryPolicy, Sleeper, TokioSleeper};
use super::transport::{HttpTransport, SyncTransport};
use crate::config::Config;
use crate::db::{
    kv, record_synced_revision, table_spec, tables, LocalStore, StoreError, StoreTx, TableSpec,
    WriteOrigin, TRACKED_TABLES,
};
use crate::models::{RawRecord, SyncStatus};

/// Push passes per cycle. A pass that rebased rows is followed by another
/// so the rebased edits reach the server in the same cycle.
const MAX_PUSH_PASSES: usize = 3;

/// Outcome of applying one server row locally.
#[derive(Debug, Clone, PartialEq)]
enum Applied {
    Stored,
    /// Not newer than the local copy.
    Skipped,
    /// Failed to decode or failed Tier-1 validation.
    Rejected,
    Conflict(SyncConflict),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullSummary {
    pub applied: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub conflicts: Vec<SyncConflict>,
}

impl PullSummary {
    fn record(&mut self, outcome: Applied) {
        match outcome {
            Applied::Stored => self.applied += 1,
            Applied::Skipped => self.skipped += 1,
            Applied::Rejected => self.rejected += 1,
            Applied::Conflict(c) => self.conflicts.push(c),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushSummary {
    pub pushed: usize,
    pub chunks: usize,
    pub acknowledged: usize,
    /// Conflicted rows whose local edit matched the server.
    pub server_wins: usize,
    /// Conflicted rows kept dirty on top of the server revision.
    pub rebased: usize,
    pub inbound: PullSummary,
    pub change_log_position: i64,
}

impl PushSummary {
    fn merge(&mut self, other: PushSummary) {
        self.pushed += other.pushed;
        self.chunks += other.chunks;
        self.acknowledged += other.acknowledged;
        self.server_wins += other.server_wins;
        self.rebased += other.rebased;
        self.inbound.applied += other.inbound.applied;
        self.inbound.skipped += other.inbound.skipped;
        self.inbound.rejected += other.inbound.rejected;
        self.inbound.conflicts.extend(other.inbound.conflicts);
        self.change_log_position = self.change_log_position.max(other.change_log_position);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub push: PushSummary,
    pub pull: PullSummary,
    pub resynced: bool,
}

impl CycleReport {
    pub fn conflicts(&self) -> impl Iterator<Item = &SyncConflict> {
        self.push
            .inbound
            .conflicts
            .iter()
            .chain(self.pull.conflicts.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Completed(CycleReport),
    /// A cycle was already running; it will run once more.
    Coalesced,
}

/// Returns the device's client id. A configured id wins and is persisted;
/// otherwise the stored id is reused, or a new one is generated.
pub async fn ensure_client_id(
    store: &LocalStore,
    configured: Option<&str>,
) -> Result<String, StoreError> {
    if let Some(id) = configured {
        kv::set(store.pool(), kv::CLIENT_ID, id).await?;
        return Ok(id.to_string());
    }
    if let Some(id) = kv::get::<_, String>(store.pool(), kv::CLIENT_ID).await? {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    kv::set(store.pool(), kv::CLIENT_ID, &id).await?;
    tracing::info!(client_id = %id, "generated client id");
    Ok(id)
}

pub struct SyncEngine {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    chunk_size: usize,
    client_id: String,
    cycle_lock: Mutex<()>,
    rerun: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            sleeper: Arc::new(TokioSleeper),
            policy: RetryPolicy::default(),
            chunk_size: 100,
            client_id: client_id.into(),
            cycle_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Engine talking HTTP to the configured server.
    pub async fn from_config(store: LocalStore, config: &Config) -> Result<Self, SyncError> {
        let transport = HttpTransport::from_config(&config.sync).ok_or(SyncError::NotConfigured)?;
        let configured = config.client_id.as_ref().map(|c| c.value.as_str());
        let client_id = ensure_client_id(&store, configured).await?;
        Ok(Self::new(store, Arc::new(transport), client_id)
            .with_policy(RetryPolicy::from_config(&config.sync))
            .with_chunk_size(config.sync.chunk_size))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub async fn health(&self) -> Result<SyncHealth, SyncError> {
        Ok(SyncHealth::collect(&self.store).await?)
    }

    pub async fn client_state(&self) -> Result<ClientSyncState, SyncError> {
        Ok(ClientSyncState::load(&self.store, &self.client_id).await?)
    }

    /// Pulls every tracked table from its cursor. Non-conflicting rows are
    /// committed; if any dirty row conflicted, the conflicts are returned as
    /// [`SyncError::Conflict`] afterwards.
    pub async fn pull_incremental(&self) -> Result<PullSummary, SyncError> {
        let summary = self.pull_tables(false).await?;
        if !summary.conflicts.is_empty() {
            return Err(SyncError::Conflict(summary.conflicts));
        }
        Ok(summary)
    }

    /// `include_deleted` asks for soft-deleted rows even below a zero
    /// cursor.
    async fn pull_tables(&self, include_deleted: bool) -> Result<PullSummary, SyncError> {
        let mut cursors = Vec::with_capacity(TRACKED_TABLES.len());
        for spec in TRACKED_TABLES {
            let since_rv = kv::get(self.store.pool(), &kv::cursor_key(spec.name))
                .await?
                .unwrap_or(0);
            cursors.push(TableCursor {
                name: spec.name.to_string(),
                since_rv,
            });
        }
        let request = PullRequest {
            client_id: Some(self.client_id.clone()),
            tables: cursors,
            include_deleted,
        };

        let transport = &self.transport;
        let response = with_retry(&self.policy, self.sleeper.as_ref(), "pull", || {
            transport.pull(&request)
        })
        .await?;

        let mut summary = PullSummary::default();
        for mut table in response.tables {
            let Some(spec) = table_spec(&table.name) else {
                tracing::warn!(table = %table.name, "server sent unknown table");
                continue;
            };
            table.rows.sort_by_key(|r| r.rv);

            let mut tx = self.store.begin(WriteOrigin::SyncApply).await?;
            let key = kv::cursor_key(spec.name);
            let mut cursor: i64 = kv::get(tx.conn(), &key).await?.unwrap_or(0);
            for row in &table.rows {
                summary.record(apply_server_row(&mut tx, spec, row).await?);
                cursor = cursor.max(row.rv);
            }
            cursor = cursor.max(table.max_rv);
            kv::set(tx.conn(), &key, &cursor).await?;
            tx.commit().await?;

            tracing::debug!(
                table = spec.name,
                rows = table.rows.len(),
                cursor,
                "pulled table"
            );
        }

        for c in &summary.conflicts {
            tracing::warn!(
                table = %c.table,
                id = %c.entity_id,
                local_rv = c.local_rv,
                server_rv = c.server_rv,
                "server changed a locally edited record"
            );
        }
        Ok(summary)
    }

    /// Pushes all dirty rows. If the server has pruned this client's
    /// change-log position, a full resync runs and the push is retried once.
    pub async fn push_changes(&self) -> Result<PushSummary, SyncError> {
        match self.push_passes().await {
            Err(SyncError::ResyncRequired { current_position }) => {
                tracing::warn!(current_position, "change log position expired, resyncing");
                self.full_resync(current_position).await?;
                self.push_passes().await
            }
            other => other,
        }
    }

    async fn push_passes(&self) -> Result<PushSummary, SyncError> {
        let mut total = PushSummary::default();
        for _ in 0..MAX_PUSH_PASSES {
            let pass = self.push_once().await?;
            let rebased = pass.rebased;
            total.merge(pass);
            if rebased == 0 {
                break;
            }
        }
        Ok(total)
    }

    async fn push_once(&self) -> Result<PushSummary, SyncError> {
        let mut dirty: Vec<(&'static TableSpec, RawRecord)> = Vec::new();
        for spec in tables::pushable_tables() {
            for row in self.store.dirty_rows(spec.name).await? {
                dirty.push((spec, row));
            }
        }
        dirty.sort_by(|(_, a), (_, b)| {
            (a.meta.modified_on_dt, a.meta.local_seq, &a.meta.id).cmp(&(
                b.meta.modified_on_dt,
                b.meta.local_seq,
                &b.meta.id,
            ))
        });

        let mut summary = PushSummary::default();
        if dirty.is_empty() {
            return Ok(summary);
        }

        let chunk_count = dirty.len().div_ceil(self.chunk_size);
        for (index, chunk) in dirty.chunks(self.chunk_size).enumerate() {
            let position: i64 = kv::get(self.store.pool(), kv::CHANGE_LOG_POSITION)
                .await?
                .unwrap_or(0);
            let request = PushRequest {
                client_id: self.client_id.clone(),
                last_change_log_position: position,
                changes: chunk
                    .iter()
                    .map(|(spec, row)| change_for(spec.name, row))
                    .collect(),
                chunk_index: Some(index),
                chunk_count: Some(chunk_count),
            };
            let snapshot: HashMap<(String, String), i64> = chunk
                .iter()
                .map(|(spec, row)| {
                    ((spec.name.to_string(), row.meta.id.clone()), row.meta.local_seq)
                })
                .collect();

            let transport = &self.transport;
            let response = with_retry(&self.policy, self.sleeper.as_ref(), "push", || {
                transport.push(&request)
            })
            .await?;

            // Fetch authoritative rows for conflicts the server sent bare,
            // before the apply transaction opens.
            let authoritative = try_join_all(
                response
                    .conflicts
                    .iter()
                    .map(|info| self.authoritative_row(info)),
            )
            .await?;

            let mut tx = self.store.begin(WriteOrigin::SyncApply).await?;
            for applied in &response.applied {
                let seq = snapshot
                    .get(&(applied.table.clone(), applied.pk.clone()))
                    .copied()
                    .unwrap_or(-1);
                if tx
                    .acknowledge(&applied.table, &applied.pk, applied.rv, seq)
                    .await?
                {
                    summary.acknowledged += 1;
                }
            }
            for row in authoritative.iter().flatten() {
                match reapply(&mut tx, row).await? {
                    Some(Resolution::ServerWins) => summary.server_wins += 1,
                    Some(Resolution::Rebased) => summary.rebased += 1,
                    None => {}
                }
            }
            for row in &response.server_changes {
                let Some(spec) = table_spec(&row.table) else {
                    tracing::warn!(table = %row.table, "server sent unknown table");
                    continue;
                };
                summary
                    .inbound
                    .record(apply_server_row(&mut tx, spec, row).await?);
            }
            let new_position = response.new_change_log_position.max(position);
            kv::set(tx.conn(), kv::CHANGE_LOG_POSITION, &new_position).await?;
            tx.commit().await?;

            tracing::debug!(
                chunk = index + 1,
                of = chunk_count,
                applied = response.applied_count,
                conflicts = response.conflicts.len(),
                inbound = response.server_changes.len(),
                position = new_position,
                "pushed chunk"
            );
            summary.pushed += chunk.len();
            summary.chunks += 1;
            summary.change_log_position = new_position;
        }
        Ok(summary)
    }

    async fn authoritative_row(&self, info: &ConflictInfo) -> Result<Option<RowPayload>, SyncError> {
        if let Some(fields) = &info.server_row {
            return Ok(Some(RowPayload {
                table: info.table.clone(),
                pk: info.pk.clone(),
                rv: info.server_rv,
                fields: fields.clone(),
            }));
        }
        let transport = &self.transport;
        with_retry(&self.policy, self.sleeper.as_ref(), "fetch", || {
            transport.fetch_row(&info.table, &info.pk)
        })
        .await
    }

    /// Resets every pull cursor, pulls everything including soft-deleted
    /// rows and adopts the server's change-log position. Conflicts found on
    /// the way are recorded, not returned as errors.
    pub async fn full_resync(&self, current_position: i64) -> Result<PullSummary, SyncError> {
        let mut tx = self.store.begin(WriteOrigin::SyncApply).await?;
        for spec in TRACKED_TABLES {
            kv::set(tx.conn(), &kv::cursor_key(spec.name), &0i64).await?;
        }
        tx.commit().await?;

        let summary = self.pull_tables(true).await?;
        kv::set(self.store.pool(), kv::CHANGE_LOG_POSITION, &current_position).await?;
        tracing::info!(
            applied = summary.applied,
            conflicts = summary.conflicts.len(),
            position = current_position,
            "full resync finished"
        );
        Ok(summary)
    }

    /// Runs one push-then-pull cycle, waiting for any cycle in flight.
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let _guard = self.cycle_lock.lock().await;
        self.cycle().await
    }

    /// Runs a cycle now, or asks the cycle in flight to run once more.
    pub async fn trigger(&self) -> Result<TriggerOutcome, SyncError> {
        // Raised before try_lock: a holder drops the lock before checking
        // the flag, so a failed try_lock is always seen.
        self.rerun.store(true, Ordering::SeqCst);
        let mut last = None;
        loop {
            let report = {
                let Ok(_guard) = self.cycle_lock.try_lock() else {
                    return match last {
                        // the holder will see the rerun flag
                        Some(report) => Ok(TriggerOutcome::Completed(report)),
                        None => {
                            tracing::debug!("sync in flight, coalescing request");
                            Ok(TriggerOutcome::Coalesced)
                        }
                    };
                };
                self.rerun.store(false, Ordering::SeqCst);
                self.cycle().await
            };
            if !self.rerun.swap(false, Ordering::SeqCst) {
                return report.map(TriggerOutcome::Completed);
            }
            tracing::debug!("running coalesced sync");
            last = report.ok();
        }
    }

    async fn cycle(&self) -> Result<CycleReport, SyncError> {
        match self.cycle_inner().await {
            Ok(report) => {
                self.record_success().await?;
                tracing::info!(
                    pushed = report.push.pushed,
                    pulled = report.pull.applied,
                    conflicts = report.conflicts().count(),
                    resynced = report.resynced,
                    "sync cycle finished"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(store_err) = self.record_failure(&e).await {
                    tracing::error!(error = %store_err, "failed to record sync failure");
                }
                tracing::warn!(error = %e, "sync cycle failed");
                Err(e)
            }
        }
    }

    async fn cycle_inner(&self) -> Result<CycleReport, SyncError> {
        let mut report = CycleReport::default();
        report.push = match self.push_passes().await {
            Err(SyncError::ResyncRequired { current_position }) => {
                report.resynced = true;
                let resync = self.full_resync(current_position).await?;
                report.pull.conflicts.extend(resync.conflicts);
                self.push_passes().await?
            }
            other => other?,
        };
        let pull = self.pull_tables(false).await?;
        report.pull.applied += pull.applied;
        report.pull.skipped += pull.skipped;
        report.pull.rejected += pull.rejected;
        report.pull.conflicts.extend(pull.conflicts);
        Ok(report)
    }

    async fn record_success(&self) -> Result<(), StoreError> {
        let pool = self.store.pool();
        kv::set(pool, kv::LAST_SYNC_AT, &Utc::now()).await?;
        kv::set(pool, kv::CONSECUTIVE_FAILURES, &0u32).await?;
        kv::delete(pool, kv::LAST_ERROR).await
    }

    async fn record_failure(&self, error: &SyncError) -> Result<(), StoreError> {
        let pool = self.store.pool();
        let failures: u32 = kv::get(pool, kv::CONSECUTIVE_FAILURES).await?.unwrap_or(0);
        kv::set(pool, kv::CONSECUTIVE_FAILURES, &(failures + 1)).await?;
        kv::set(pool, kv::LAST_ERROR, &error.to_string()).await
    }

    /// Fetches one row from the server and applies it locally. Returns the
    /// local copy afterwards, or `None` if neither side has it.
    pub async fn fetch_remote(&self, table: &str, id: &str) -> Result<Option<RawRecord>, SyncError> {
        let spec = table_spec(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let transport = &self.transport;
        let row = with_retry(&self.policy, self.sleeper.as_ref(), "fetch", || {
            transport.fetch_row(spec.name, id)
        })
        .await?;

        if let Some(row) = row {
            let mut tx = self.store.begin(WriteOrigin::SyncApply).await?;
            let outcome = apply_server_row(&mut tx, spec, &row).await?;
            tx.commit().await?;
            if let Applied::Conflict(c) = outcome {
                tracing::warn!(table, id, server_rv = c.server_rv, "fetched row conflicts with local edit");
            }
        }
        Ok(self.store.get(spec.name, id).await?)
    }

    /// Runs [`trigger`](Self::trigger) every `every` on a background task.
    /// Failures are logged and the schedule continues.
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.trigger().await {
                    Ok(TriggerOutcome::Completed(report)) => {
                        tracing::debug!(pushed = report.push.pushed, "scheduled sync done")
                    }
                    Ok(TriggerOutcome::Coalesced) => {}
                    Err(e) => tracing::error!(error = %e, "scheduled sync failed"),
                }
            }
        })
    }
}

/// Applies one server row inside a sync-apply transaction.
///
/// A row not newer than the local copy is skipped, so re-applying a payload
/// changes nothing. A newer row replaces a clean local copy. Over a dirty
/// copy it is taken only if the content is the same; otherwise a conflict
/// is recorded and the local edit kept.
async fn apply_server_row(
    tx: &mut StoreTx,
    spec: &TableSpec,
    row: &RowPayload,
) -> Result<Applied, StoreError> {
    let incoming = match decode_row(row) {
        Ok(record) => record,
        Err(reason) => {
            tracing::warn!(table = spec.name, id = %row.pk, %reason, "skipping undecodable row");
            return Ok(Applied::Rejected);
        }
    };

    let local = tx.get(spec.name, &row.pk).await?;
    if let Some(local) = &local {
        if incoming.meta.rv <= local.meta.rv {
            return Ok(Applied::Skipped);
        }
        if local.meta.is_dirty() {
            if !same_content(local, &incoming) {
                let c = SyncConflict {
                    table: spec.name.to_string(),
                    entity_id: row.pk.clone(),
                    local_rv: local.meta.rv,
                    server_rv: incoming.meta.rv,
                    server_fields: row.fields.clone(),
                    detected_at: Utc::now(),
                };
                conflict::record(tx.conn(), &c).await?;
                return Ok(Applied::Conflict(c));
            }
            conflict::resolve(tx.conn(), spec.name, &row.pk, Resolution::ServerWins).await?;
        }
    }

    match tx.put(spec.name, incoming).await {
        Ok(_) => {}
        Err(StoreError::Validation { source, .. }) => {
            tracing::warn!(table = spec.name, id = %row.pk, error = %source, "skipping invalid server row");
            return Ok(Applied::Rejected);
        }
        Err(e) => return Err(e),
    }
    record_synced_revision(tx.conn(), spec.entity_type, &row.pk, row.rv).await?;
    Ok(Applied::Stored)
}

/// Pull-then-reapply for a row the server refused as stale. Equal content
/// takes the server row; otherwise the local edit stays dirty on top of the
/// server revision so the next push is accepted.
async fn reapply(tx: &mut StoreTx, row: &RowPayload) -> Result<Option<Resolution>, StoreError> {
    let Some(spec) = table_spec(&row.table) else {
        return Ok(None);
    };
    let server = match decode_row(row) {
        Ok(record) => record,
        Err(reason) => {
            tracing::warn!(table = spec.name, id = %row.pk, %reason, "cannot reapply over undecodable row");
            return Ok(None);
        }
    };
    let Some(mut local) = tx.get(spec.name, &row.pk).await? else {
        return Ok(None);
    };

    let resolution = if same_content(&local, &server) {
        tx.put(spec.name, server).await?;
        Resolution::ServerWins
    } else {
        local.meta.rv = row.rv;
        local.meta.sync_status = SyncStatus::Dirty;
        tx.put(spec.name, local).await?;
        Resolution::Rebased
    };
    conflict::resolve(tx.conn(), spec.name, &row.pk, resolution).await?;
    record_synced_revision(tx.conn(), spec.entity_type, &row.pk, row.rv).await?;
    tracing::warn!(
        table = spec.name,
        id = %row.pk,
        server_rv = row.rv,
        resolution = resolution.as_str(),
        "resolved push conflict"
    );
    Ok(Some(resolution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::TestContext;
    use crate::db::SyncMetadataIndex;
    use crate::models::{ParentIds, RecordMeta};
    use crate::server::ServerStore;
    use crate::sync::retry::test_support::RecordingSleeper;
    use crate::sync::testing::{FailingTransport, GatedTransport, InProcessTransport};
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        server: ServerStore,
        _server_dir: TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let server = ServerStore::open(&dir.path().join("server.db"), 72)
                .await
                .unwrap();
            Self {
                server,
                _server_dir: dir,
            }
        }

        fn engine(&self, ctx: &TestContext, client_id: &str) -> SyncEngine {
            SyncEngine::new(
                ctx.store.clone(),
                Arc::new(InProcessTransport::new(self.server.clone())),
                client_id,
            )
            .with_sleeper(Arc::new(RecordingSleeper::default()))
        }
    }

    fn interval(id: &str, lith: &str) -> RawRecord {
        RawRecord::new(
            RecordMeta::new_local(id, "geo1"),
            json!({"collarId": "BH-1", "depthFrom": 0.0, "depthTo": 1.5, "lithCode": lith})
                .as_object()
                .unwrap()
                .clone(),
        )
    }

    async fn put_local(store: &LocalStore, record: RawRecord) {
        let mut tx = store.begin(WriteOrigin::local("geo1")).await.unwrap();
        tx.put("drill_intervals", record).await.unwrap();
        tx.commit().await.unwrap();
    }

    async fn edit_lith(store: &LocalStore, id: &str, lith: &str) {
        let mut row = store.get("drill_intervals", id).await.unwrap().unwrap();
        row.data.insert("lithCode".into(), json!(lith));
        put_local(store, row).await;
    }

    async fn row(store: &LocalStore, id: &str) -> RawRecord {
        store.get("drill_intervals", id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_push_acknowledges_and_pull_distributes() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");

        put_local(&a.store, interval("i-1", "SH")).await;
        let push = engine_a.push_changes().await.unwrap();
        assert_eq!(push.pushed, 1);
        assert_eq!(push.acknowledged, 1);

        let pushed = row(&a.store, "i-1").await;
        assert!(!pushed.meta.is_dirty());
        assert_eq!(pushed.meta.rv, 1);

        let pull = engine_b.pull_incremental().await.unwrap();
        assert_eq!(pull.applied, 1);
        let copy = row(&b.store, "i-1").await;
        assert!(!copy.meta.is_dirty());
        assert_eq!(copy.meta.rv, 1);
        assert_eq!(copy.data["lithCode"], json!("SH"));
        assert_eq!(copy.meta.created_by, "geo1");
    }

    #[tokio::test]
    async fn test_pull_is_idempotent_and_rv_never_regresses() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");

        put_local(&a.store, interval("i-1", "SH")).await;
        engine_a.push_changes().await.unwrap();
        engine_b.pull_incremental().await.unwrap();
        let first = row(&b.store, "i-1").await;

        // same payload again from a reset cursor
        kv::set(b.store.pool(), &kv::cursor_key("drill_intervals"), &0i64)
            .await
            .unwrap();
        let again = engine_b.pull_incremental().await.unwrap();
        assert_eq!(again.applied, 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(row(&b.store, "i-1").await, first);

        edit_lith(&a.store, "i-1", "SS").await;
        engine_a.push_changes().await.unwrap();
        engine_b.pull_incremental().await.unwrap();
        let second = row(&b.store, "i-1").await;
        assert!(second.meta.rv > first.meta.rv);

        let state = engine_b.client_state().await.unwrap();
        assert_eq!(state.per_table_last_revision["drill_intervals"], second.meta.rv);
    }

    #[tokio::test]
    async fn test_pull_conflict_keeps_local_edit() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");

        // both devices hold the row at the same revision
        put_local(&b.store, interval("i-1", "SH")).await;
        engine_b.push_changes().await.unwrap();
        engine_a.pull_incremental().await.unwrap();
        let base_rv = row(&a.store, "i-1").await.meta.rv;

        edit_lith(&a.store, "i-1", "GR").await;
        edit_lith(&b.store, "i-1", "SS").await;
        engine_b.push_changes().await.unwrap();
        assert_eq!(row(&b.store, "i-1").await.meta.rv, base_rv + 1);

        match engine_a.pull_incremental().await {
            Err(SyncError::Conflict(conflicts)) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].local_rv, base_rv);
                assert_eq!(conflicts[0].server_rv, base_rv + 1);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        let local = row(&a.store, "i-1").await;
        assert!(local.meta.is_dirty());
        assert_eq!(local.meta.rv, base_rv);
        assert_eq!(local.data["lithCode"], json!("GR"));
        assert_eq!(engine_a.health().await.unwrap().open_conflicts, 1);

        // the next push rebases the edit onto the server revision
        let push = engine_a.push_changes().await.unwrap();
        assert_eq!(push.rebased, 1);
        let local = row(&a.store, "i-1").await;
        assert!(!local.meta.is_dirty());
        assert_eq!(local.meta.rv, base_rv + 2);
        assert_eq!(engine_a.health().await.unwrap().open_conflicts, 0);

        engine_b.pull_incremental().await.unwrap();
        assert_eq!(row(&b.store, "i-1").await.data["lithCode"], json!("GR"));
    }

    #[tokio::test]
    async fn test_equal_edit_takes_server_version() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");

        put_local(&b.store, interval("i-1", "SH")).await;
        engine_b.push_changes().await.unwrap();
        engine_a.pull_incremental().await.unwrap();

        edit_lith(&a.store, "i-1", "SS").await;
        edit_lith(&b.store, "i-1", "SS").await;
        engine_b.push_changes().await.unwrap();

        let pull = engine_a.pull_incremental().await.unwrap();
        assert_eq!(pull.applied, 1);
        let local = row(&a.store, "i-1").await;
        assert!(!local.meta.is_dirty());
        assert_eq!(local.meta.rv, 2);
    }

    #[tokio::test]
    async fn test_push_receives_other_clients_changes() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");

        put_local(&b.store, interval("i-b", "SH")).await;
        engine_b.push_changes().await.unwrap();

        put_local(&a.store, interval("i-a", "GR")).await;
        let push = engine_a.push_changes().await.unwrap();
        assert_eq!(push.inbound.applied, 1);
        assert_eq!(push.change_log_position, 2);
        assert!(!row(&a.store, "i-b").await.meta.is_dirty());
    }

    #[tokio::test]
    async fn test_push_chunks_in_order() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let engine = harness.engine(&a, "dev-a").with_chunk_size(2);

        for i in 0..5 {
            put_local(&a.store, interval(&format!("i-{}", i), "SH")).await;
        }
        let push = engine.push_changes().await.unwrap();
        assert_eq!(push.chunks, 3);
        assert_eq!(push.acknowledged, 5);
        for i in 0..5 {
            assert_eq!(row(&a.store, &format!("i-{}", i)).await.meta.rv, i + 1);
        }
        assert_eq!(
            kv::get::<_, i64>(a.store.pool(), kv::CHANGE_LOG_POSITION)
                .await
                .unwrap(),
            Some(5)
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_rows_dirty() {
        let a = TestContext::new().await;
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = Arc::new(FailingTransport::default());
        let engine = SyncEngine::new(a.store.clone(), transport.clone(), "dev-a")
            .with_sleeper(sleeper.clone());

        put_local(&a.store, interval("i-1", "SH")).await;
        let err = engine.trigger().await.unwrap_err();

        assert!(matches!(err, SyncError::Transient { attempts: 6, .. }));
        assert_eq!(transport.calls(), 6);
        assert_eq!(sleeper.delays_ms(), vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        assert!(row(&a.store, "i-1").await.meta.is_dirty());

        let health = engine.health().await.unwrap();
        assert_eq!(health.pending["drill_intervals"], 1);
        assert_eq!(health.consecutive_failures, 1);
        assert!(health.last_error.as_deref().unwrap().contains("6 attempts"));
        assert!(health.oldest_unsynced.is_some());
        assert!(!health.is_healthy());
    }

    #[tokio::test]
    async fn test_successful_cycle_clears_failures() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let engine = harness.engine(&a, "dev-a");
        kv::set(a.store.pool(), kv::CONSECUTIVE_FAILURES, &2u32)
            .await
            .unwrap();

        put_local(&a.store, interval("i-1", "SH")).await;
        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.push.pushed, 1);

        let health = engine.health().await.unwrap();
        assert!(health.is_healthy());
        assert_eq!(health.total_pending, 0);
        assert!(health.last_successful_sync.is_some());
    }

    #[tokio::test]
    async fn test_expired_position_triggers_resync() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");

        put_local(&b.store, interval("i-b", "SH")).await;
        engine_b.push_changes().await.unwrap();
        harness
            .server
            .prune_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        put_local(&a.store, interval("i-a", "GR")).await;
        let report = engine_a.run_cycle().await.unwrap();
        assert!(report.resynced);
        assert!(!row(&a.store, "i-a").await.meta.is_dirty());
        assert!(!row(&a.store, "i-b").await.meta.is_dirty());
    }

    #[tokio::test]
    async fn test_resync_brings_deletions_made_while_away() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");

        put_local(&b.store, interval("i-1", "SH")).await;
        engine_b.push_changes().await.unwrap();
        engine_a.run_cycle().await.unwrap();
        assert!(row(&a.store, "i-1").await.meta.active_ind);

        let mut deleted = row(&b.store, "i-1").await;
        deleted.meta.active_ind = false;
        put_local(&b.store, deleted).await;
        engine_b.push_changes().await.unwrap();
        harness
            .server
            .prune_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        put_local(&a.store, interval("i-a", "GR")).await;
        let report = engine_a.run_cycle().await.unwrap();
        assert!(report.resynced);

        let local = row(&a.store, "i-1").await;
        assert!(!local.meta.active_ind);
        assert!(!local.meta.is_dirty());
        assert_eq!(local.meta.rv, row(&b.store, "i-1").await.meta.rv);
        assert!(report.conflicts().next().is_none());

        // later cycles leave it deleted
        engine_a.run_cycle().await.unwrap();
        assert!(!row(&a.store, "i-1").await.meta.active_ind);
    }

    #[tokio::test]
    async fn test_pull_only_table_arrives_as_raw_bag() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let engine = harness.engine(&a, "dev-a");
        harness
            .server
            .upsert_row(
                "lookup_codes",
                "LITH-SH",
                json!({"category": "lith", "code": "SH", "extra": [1, 2]})
                    .as_object()
                    .unwrap(),
                "admin",
            )
            .await
            .unwrap();

        engine.pull_incremental().await.unwrap();
        let code = a.store.get("lookup_codes", "LITH-SH").await.unwrap().unwrap();
        assert_eq!(code.data["extra"], json!([1, 2]));
        assert!(!code.meta.is_dirty());
        assert_eq!(a.store.pending_counts().await.unwrap().get("lookup_codes"), None);
    }

    #[tokio::test]
    async fn test_pull_records_revision_for_offline_selection() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");
        let index = SyncMetadataIndex::new(b.store.clone());
        index
            .set_offline("DrillInterval", "i-1", ParentIds::collar("BH-1"))
            .await
            .unwrap();

        put_local(&a.store, interval("i-1", "SH")).await;
        engine_a.push_changes().await.unwrap();
        engine_b.pull_incremental().await.unwrap();

        let meta = index.get("DrillInterval", "i-1").await.unwrap().unwrap();
        assert_eq!(meta.last_synced_revision, 1);
    }

    #[tokio::test]
    async fn test_fetch_remote_applies_row() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let b = TestContext::new().await;
        let engine_a = harness.engine(&a, "dev-a");
        let engine_b = harness.engine(&b, "dev-b");

        put_local(&a.store, interval("i-1", "SH")).await;
        engine_a.push_changes().await.unwrap();

        let fetched = engine_b
            .fetch_remote("drill_intervals", "i-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.meta.rv, 1);
        assert!(!fetched.meta.is_dirty());
        assert!(engine_b
            .fetch_remote("drill_intervals", "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_trigger_coalesces_concurrent_requests() {
        let harness = Harness::new().await;
        let a = TestContext::new().await;
        let transport = Arc::new(GatedTransport::new(InProcessTransport::new(
            harness.server.clone(),
        )));
        let engine = Arc::new(
            SyncEngine::new(a.store.clone(), transport.clone(), "dev-a")
                .with_sleeper(Arc::new(RecordingSleeper::default())),
        );

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.trigger().await }
        });
        transport.wait_until_blocked().await;

        assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Coalesced);
        assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Coalesced);
        transport.open();

        assert!(matches!(
            first.await.unwrap().unwrap(),
            TriggerOutcome::Completed(_)
        ));
        // one cycle plus one coalesced rerun, each a single pull
        assert_eq!(transport.pulls(), 2);
    }

    #[tokio::test]
    async fn test_request_while_locked_stays_pending() {
        let a = TestContext::new().await;
        let engine = SyncEngine::new(
            a.store.clone(),
            Arc::new(FailingTransport::default()),
            "dev-a",
        )
        .with_sleeper(Arc::new(RecordingSleeper::default()));

        let guard = engine.cycle_lock.lock().await;
        assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Coalesced);
        // visible to the holder as soon as the failed attempt returns
        assert!(engine.rerun.load(Ordering::SeqCst));
        drop(guard);
    }

    #[tokio::test]
    async fn test_client_id_is_stable() {
        let a = TestContext::new().await;
        let generated = ensure_client_id(&a.store, None).await.unwrap();
        assert_eq!(ensure_client_id(&a.store, None).await.unwrap(), generated);
        assert_eq!(
            ensure_client_id(&a.store, Some("tablet-7")).await.unwrap(),
            "tablet-7"
        );
        assert_eq!(ensure_client_id(&a.store, None).await.unwrap(), "tablet-7");
    }
}
