use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::Transaction;
use std::collections::BTreeMap;
use thiserror::Error;

use super::tables::{self, TableSpec, TrackingPolicy};
use super::tracker::{self, WriteOrigin};
use crate::models::{
    format_timestamp, parse_timestamp, JsonMap, RawRecord, RecordMeta, RowStatus, SyncStatus,
};
use crate::validation::{checks, FieldError, ValidationError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{table}/{id}: {source}")]
    Validation {
        table: String,
        id: String,
        source: ValidationError,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("table '{0}' is pull-only and cannot be edited locally")]
    ReadOnly(String),
    #[error("corrupt row {table}/{id}: {reason}")]
    Corrupt {
        table: String,
        id: String,
        reason: String,
    },
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

const ENTITY_COLUMNS: &str = "id, fields, rv, active_ind, row_status, approved, superseded_by, \
     sync_status, local_seq, created_on_dt, created_by, modified_on_dt, modified_by";

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: String,
    fields: String,
    rv: i64,
    active_ind: bool,
    row_status: i64,
    approved: bool,
    superseded_by: Option<String>,
    sync_status: i64,
    local_seq: i64,
    created_on_dt: String,
    created_by: String,
    modified_on_dt: String,
    modified_by: String,
}

impl EntityRow {
    fn into_record(self, table: &str) -> Result<RawRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            table: table.to_string(),
            id: self.id.clone(),
            reason,
        };

        let row_status = RowStatus::from_ordinal(self.row_status)
            .ok_or_else(|| corrupt(format!("unknown row status {}", self.row_status)))?;
        let sync_status = SyncStatus::from_ordinal(self.sync_status)
            .ok_or_else(|| corrupt(format!("unknown sync status {}", self.sync_status)))?;
        let created_on_dt = parse_timestamp(&self.created_on_dt)
            .ok_or_else(|| corrupt(format!("bad timestamp '{}'", self.created_on_dt)))?;
        let modified_on_dt = parse_timestamp(&self.modified_on_dt)
            .ok_or_else(|| corrupt(format!("bad timestamp '{}'", self.modified_on_dt)))?;
        let data: JsonMap = serde_json::from_str(&self.fields)
            .map_err(|e| corrupt(format!("bad fields: {}", e)))?;

        Ok(RawRecord {
            meta: RecordMeta {
                id: self.id,
                active_ind: self.active_ind,
                rv: self.rv,
                row_status,
                approved: self.approved,
                superseded_by: self.superseded_by,
                sync_status,
                local_seq: self.local_seq,
                created_on_dt,
                created_by: self.created_by,
                modified_on_dt,
                modified_by: self.modified_by,
            },
            data,
        })
    }
}

fn resolve(table: &str) -> Result<&'static TableSpec, StoreError> {
    tables::table_spec(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))
}

async fn fetch_row<'e, E>(
    exec: E,
    spec: &TableSpec,
    id: &str,
) -> Result<Option<RawRecord>, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM {} WHERE id = ?", ENTITY_COLUMNS, spec.name);
    let row: Option<EntityRow> = sqlx::query_as(&sql).bind(id).fetch_optional(exec).await?;
    row.map(|r| r.into_record(spec.name)).transpose()
}

fn into_records(rows: Vec<EntityRow>, table: &str) -> Result<Vec<RawRecord>, StoreError> {
    rows.into_iter().map(|r| r.into_record(table)).collect()
}

/// Handle to the local database. Cheap to clone; one per process.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a write transaction. Every put inside it is stamped according
    /// to `origin`.
    pub async fn begin(&self, origin: WriteOrigin) -> Result<StoreTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(StoreTx { tx, origin })
    }

    pub async fn get(&self, table: &str, id: &str) -> Result<Option<RawRecord>, StoreError> {
        let spec = resolve(table)?;
        fetch_row(&self.pool, spec, id).await
    }

    pub async fn list(
        &self,
        table: &str,
        include_inactive: bool,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let spec = resolve(table)?;
        let filter = if include_inactive {
            ""
        } else {
            "WHERE active_ind = 1"
        };
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY created_on_dt, id",
            ENTITY_COLUMNS, spec.name, filter
        );
        let rows: Vec<EntityRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        into_records(rows, spec.name)
    }

    /// Active rows whose top-level payload field equals `value`.
    pub async fn find_by_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let spec = resolve(table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE active_ind = 1 AND json_extract(fields, ?) = ? \
             ORDER BY created_on_dt, id",
            ENTITY_COLUMNS, spec.name
        );
        let rows: Vec<EntityRow> = sqlx::query_as(&sql)
            .bind(format!("$.{}", field))
            .bind(value)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows, spec.name)
    }

    pub async fn list_by_status(
        &self,
        table: &str,
        status: RowStatus,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let spec = resolve(table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE active_ind = 1 AND row_status = ? ORDER BY modified_on_dt, id",
            ENTITY_COLUMNS, spec.name
        );
        let rows: Vec<EntityRow> = sqlx::query_as(&sql)
            .bind(status.ordinal())
            .fetch_all(&self.pool)
            .await?;
        into_records(rows, spec.name)
    }

    /// Dirty rows of one table in the order they must be pushed.
    pub async fn dirty_rows(&self, table: &str) -> Result<Vec<RawRecord>, StoreError> {
        let spec = resolve(table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE sync_status = 1 ORDER BY modified_on_dt, local_seq, id",
            ENTITY_COLUMNS, spec.name
        );
        let rows: Vec<EntityRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        into_records(rows, spec.name)
    }

    /// Dirty row count per pushable table.
    pub async fn pending_counts(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let mut counts = BTreeMap::new();
        for spec in tables::pushable_tables() {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE sync_status = 1", spec.name);
            let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
            counts.insert(spec.name.to_string(), count);
        }
        Ok(counts)
    }

    /// Modification time of the oldest dirty row in any table.
    pub async fn oldest_dirty(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut oldest: Option<DateTime<Utc>> = None;
        for spec in tables::pushable_tables() {
            let sql = format!(
                "SELECT MIN(modified_on_dt) FROM {} WHERE sync_status = 1",
                spec.name
            );
            let (min,): (Option<String>,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
            if let Some(dt) = min.as_deref().and_then(parse_timestamp) {
                oldest = Some(oldest.map_or(dt, |o| o.min(dt)));
            }
        }
        Ok(oldest)
    }
}

/// One all-or-nothing unit of writes. Dropping it without `commit` rolls
/// back.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
    origin: WriteOrigin,
}

impl StoreTx {
    pub fn origin(&self) -> &WriteOrigin {
        &self.origin
    }

    /// The underlying connection, for bookkeeping writes that must commit
    /// together with entity writes.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn get(&mut self, table: &str, id: &str) -> Result<Option<RawRecord>, StoreError> {
        let spec = resolve(table)?;
        fetch_row(&mut *self.tx, spec, id).await
    }

    /// Creates or replaces a row. All entity writes pass through here.
    pub async fn put(&mut self, table: &str, mut record: RawRecord) -> Result<RawRecord, StoreError> {
        let spec = resolve(table)?;
        let id = record.meta.id.clone();
        let invalid = |source: ValidationError| StoreError::Validation {
            table: spec.name.to_string(),
            id: id.clone(),
            source,
        };

        if matches!(self.origin, WriteOrigin::Local { .. })
            && spec.policy == TrackingPolicy::PullOnly
        {
            return Err(StoreError::ReadOnly(spec.name.to_string()));
        }
        if !checks::is_valid_id(&id) {
            return Err(invalid(ValidationError::Structural(vec![FieldError::new(
                "id",
                format!(
                    "must be 1-{} characters of letters, digits, '-' or '_'",
                    checks::MAX_ID_LEN
                ),
            )])));
        }

        record.data = spec.validate(record.data).into_structural().map_err(invalid)?;

        let previous = fetch_row(&mut *self.tx, spec, &id).await?;
        tracker::stamp(
            &mut record.meta,
            &self.origin,
            previous.as_ref().map(|p| &p.meta),
            Utc::now(),
        );

        let meta = &record.meta;
        let fields = serde_json::to_string(&record.data)?;
        let sql = format!(
            r#"
            INSERT INTO {} ({})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                fields = excluded.fields, rv = excluded.rv, active_ind = excluded.active_ind,
                row_status = excluded.row_status, approved = excluded.approved,
                superseded_by = excluded.superseded_by, sync_status = excluded.sync_status,
                local_seq = excluded.local_seq, created_on_dt = excluded.created_on_dt,
                created_by = excluded.created_by, modified_on_dt = excluded.modified_on_dt,
                modified_by = excluded.modified_by
            "#,
            spec.name, ENTITY_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&meta.id)
            .bind(&fields)
            .bind(meta.rv)
            .bind(meta.active_ind)
            .bind(meta.row_status.ordinal())
            .bind(meta.approved)
            .bind(&meta.superseded_by)
            .bind(meta.sync_status.ordinal())
            .bind(meta.local_seq)
            .bind(format_timestamp(&meta.created_on_dt))
            .bind(&meta.created_by)
            .bind(format_timestamp(&meta.modified_on_dt))
            .bind(&meta.modified_by)
            .execute(&mut *self.tx)
            .await?;

        tracing::debug!(
            table = spec.name,
            id = %meta.id,
            rv = meta.rv,
            dirty = meta.is_dirty(),
            "stored row"
        );
        Ok(record)
    }

    /// Records the server's acceptance of a pushed row. Writes only `rv` and
    /// the dirty flag, so it never re-dirties the row. Returns true if the
    /// row is now clean; false if it was edited again after `snapshot_seq`
    /// or no longer exists.
    pub async fn acknowledge(
        &mut self,
        table: &str,
        id: &str,
        server_rv: i64,
        snapshot_seq: i64,
    ) -> Result<bool, StoreError> {
        let spec = resolve(table)?;
        let Some(mut row) = fetch_row(&mut *self.tx, spec, id).await? else {
            return Ok(false);
        };
        let clean = tracker::acknowledge(&mut row.meta, server_rv, snapshot_seq);

        let sql = format!(
            "UPDATE {} SET rv = ?, sync_status = ? WHERE id = ?",
            spec.name
        );
        sqlx::query(&sql)
            .bind(row.meta.rv)
            .bind(row.meta.sync_status.ordinal())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(clean)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::TestContext;
    use serde_json::json;

    fn interval_fields(collar: &str, from: f64, to: f64) -> JsonMap {
        json!({"collarId": collar, "depthFrom": from, "depthTo": to, "lithCode": "sh"})
            .as_object()
            .unwrap()
            .clone()
    }

    fn server_row(id: &str, rv: i64) -> RawRecord {
        let mut meta = RecordMeta::new_local(id, "server");
        meta.sync_status = SyncStatus::Synced;
        meta.rv = rv;
        RawRecord::new(meta, interval_fields("BH-1", 0.0, 1.0))
    }

    #[tokio::test]
    async fn test_local_put_marks_dirty_and_normalizes() {
        let ctx = TestContext::new().await;
        let mut tx = ctx.store.begin(WriteOrigin::local("geo1")).await.unwrap();
        let record = RawRecord::new(
            RecordMeta::new_local("i-1", "geo1"),
            interval_fields("BH-1", 0.0, 1.0),
        );
        tx.put("drill_intervals", record).await.unwrap();
        tx.commit().await.unwrap();

        let stored = ctx.store.get("drill_intervals", "i-1").await.unwrap().unwrap();
        assert!(stored.meta.is_dirty());
        assert_eq!(stored.meta.local_seq, 1);
        assert_eq!(stored.data["lithCode"], json!("SH"));
    }

    #[tokio::test]
    async fn test_sync_apply_keeps_clean() {
        let ctx = TestContext::new().await;
        let mut tx = ctx.store.begin(WriteOrigin::SyncApply).await.unwrap();
        tx.put("drill_intervals", server_row("i-2", 4)).await.unwrap();
        tx.commit().await.unwrap();

        let stored = ctx.store.get("drill_intervals", "i-2").await.unwrap().unwrap();
        assert!(!stored.meta.is_dirty());
        assert_eq!(stored.meta.rv, 4);
        assert!(ctx.store.dirty_rows("drill_intervals").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_origins_do_not_leak() {
        let ctx = TestContext::new().await;
        let mut apply = ctx.store.begin(WriteOrigin::SyncApply).await.unwrap();
        apply.put("drill_intervals", server_row("i-3", 1)).await.unwrap();
        apply.commit().await.unwrap();

        let mut local = ctx.store.begin(WriteOrigin::local("geo1")).await.unwrap();
        let mut row = local.get("drill_intervals", "i-3").await.unwrap().unwrap();
        row.data.insert("description".into(), json!("shale"));
        local.put("drill_intervals", row).await.unwrap();
        local.commit().await.unwrap();

        let stored = ctx.store.get("drill_intervals", "i-3").await.unwrap().unwrap();
        assert!(stored.meta.is_dirty());
        assert_eq!(stored.meta.modified_by, "geo1");
    }

    #[tokio::test]
    async fn test_put_rejects_structural_errors() {
        let ctx = TestContext::new().await;
        let mut tx = ctx.store.begin(WriteOrigin::SyncApply).await.unwrap();
        let mut bad = server_row("i-4", 1);
        bad.data.insert("depthTo".into(), json!(-5.0));
        let err = tx.put("drill_intervals", bad).await.unwrap_err();
        match err {
            StoreError::Validation { source, .. } => assert!(source.names_field("depthTo")),
            other => panic!("unexpected error: {}", other),
        }

        let bad_id = server_row("has space", 1);
        assert!(matches!(
            tx.put("drill_intervals", bad_id).await,
            Err(StoreError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_table_and_pull_only() {
        let ctx = TestContext::new().await;
        assert!(matches!(
            ctx.store.get("dishes", "x").await,
            Err(StoreError::UnknownTable(_))
        ));

        let mut tx = ctx.store.begin(WriteOrigin::local("geo1")).await.unwrap();
        let code = RawRecord::new(
            RecordMeta::new_local("BIF", "geo1"),
            json!({"code": "BIF"}).as_object().unwrap().clone(),
        );
        assert!(matches!(
            tx.put("lookup_codes", code).await,
            Err(StoreError::ReadOnly(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let ctx = TestContext::new().await;
        let mut tx = ctx.store.begin(WriteOrigin::SyncApply).await.unwrap();
        tx.put("drill_intervals", server_row("i-5", 1)).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(ctx.store.get("drill_intervals", "i-5").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acknowledge_respects_later_edit() {
        let ctx = TestContext::new().await;
        let mut tx = ctx.store.begin(WriteOrigin::local("geo1")).await.unwrap();
        let record = RawRecord::new(
            RecordMeta::new_local("i-6", "geo1"),
            interval_fields("BH-1", 0.0, 1.0),
        );
        let pushed = tx.put("drill_intervals", record).await.unwrap();
        tx.commit().await.unwrap();

        // edited again while the push was in flight
        let mut tx = ctx.store.begin(WriteOrigin::local("geo1")).await.unwrap();
        tx.put("drill_intervals", pushed.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = ctx.store.begin(WriteOrigin::SyncApply).await.unwrap();
        let clean = tx
            .acknowledge("drill_intervals", "i-6", 9, pushed.meta.local_seq)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(!clean);
        let stored = ctx.store.get("drill_intervals", "i-6").await.unwrap().unwrap();
        assert!(stored.meta.is_dirty());
        assert_eq!(stored.meta.rv, 9);
    }

    #[tokio::test]
    async fn test_pending_counts_and_oldest() {
        let ctx = TestContext::new().await;
        assert_eq!(ctx.store.oldest_dirty().await.unwrap(), None);

        let mut tx = ctx.store.begin(WriteOrigin::local("geo1")).await.unwrap();
        for (i, from) in [0.0, 1.0].iter().enumerate() {
            let record = RawRecord::new(
                RecordMeta::new_local(format!("i-{}", i), "geo1"),
                interval_fields("BH-1", *from, from + 1.0),
            );
            tx.put("drill_intervals", record).await.unwrap();
        }
        tx.commit().await.unwrap();

        let counts = ctx.store.pending_counts().await.unwrap();
        assert_eq!(counts["drill_intervals"], 2);
        assert_eq!(counts["collars"], 0);
        assert!(ctx.store.oldest_dirty().await.unwrap().is_some());

        let found = ctx
            .store
            .find_by_field("drill_intervals", "collarId", "BH-1")
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }
}
