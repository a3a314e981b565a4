//! Server-side row storage and change log.
//!
//! Every accepted write gets the next global revision and a change-log
//! entry. Change-log entries older than the retention window are pruned;
//! a client whose position falls behind the pruned range must resync.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::db::tables;
use crate::models::{format_timestamp, parse_timestamp, JsonMap};
use crate::sync::protocol::{
    meta_keys, AppliedChange, ChangeOp, ClientStatus, ConflictInfo, PullRequest, PullResponse,
    PushRequest, PushResponse, RowPayload, ServerHealth, TableRows, TableStatus,
};

const PRUNED_THROUGH: &str = "pruned_through";

#[derive(Debug, Error)]
pub enum ServerStoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("client position is older than the retention window")]
    ResyncRequired { current_position: i64 },
}

#[derive(sqlx::FromRow)]
struct ServerRow {
    table_name: String,
    pk: String,
    rv: i64,
    fields: String,
}

impl ServerRow {
    fn into_payload(self) -> Result<RowPayload, ServerStoreError> {
        Ok(RowPayload {
            table: self.table_name,
            pk: self.pk,
            rv: self.rv,
            fields: serde_json::from_str(&self.fields)?,
        })
    }
}

#[derive(Clone)]
pub struct ServerStore {
    pool: SqlitePool,
    retention: Duration,
}

impl ServerStore {
    pub async fn open(path: &Path, retention_hours: i64) -> Result<Self, ServerStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations/server").run(&pool).await?;

        Ok(Self {
            pool,
            retention: Duration::hours(retention_hours),
        })
    }

    pub fn retention_hours(&self) -> i64 {
        self.retention.num_hours()
    }

    /// Applies one pushed chunk atomically.
    pub async fn push(&self, request: &PushRequest) -> Result<PushResponse, ServerStoreError> {
        self.prune_before(Utc::now() - self.retention).await?;

        let mut tx = self.pool.begin().await?;
        let pruned_through = pruned_through(&mut tx).await?;
        if request.last_change_log_position < pruned_through {
            let current_position = current_position(&mut tx).await?;
            tracing::info!(
                client = %request.client_id,
                position = request.last_change_log_position,
                pruned_through,
                "client must resync"
            );
            return Err(ServerStoreError::ResyncRequired { current_position });
        }

        let now = format_timestamp(&Utc::now());
        let mut response = PushResponse::default();
        let mut pushed = HashSet::new();

        for change in &request.changes {
            let spec = tables::table_spec(&change.table)
                .filter(|s| s.is_pushable())
                .ok_or_else(|| {
                    ServerStoreError::BadRequest(format!(
                        "table '{}' does not accept pushes",
                        change.table
                    ))
                })?;
            if !pushed.insert((change.table.clone(), change.pk.clone())) {
                return Err(ServerStoreError::BadRequest(format!(
                    "{}/{} appears twice in one chunk",
                    change.table, change.pk
                )));
            }

            let current: Option<ServerRow> = sqlx::query_as(
                "SELECT table_name, pk, rv, fields FROM server_rows WHERE table_name = ? AND pk = ?",
            )
            .bind(spec.name)
            .bind(&change.pk)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(current) = current {
                if change.local_rv != Some(current.rv) {
                    tracing::debug!(table = spec.name, pk = %change.pk, "stale revision");
                    response.conflicts.push(ConflictInfo {
                        table: change.table.clone(),
                        pk: change.pk.clone(),
                        local_rv: change.local_rv,
                        server_rv: current.rv,
                        server_row: Some(serde_json::from_str(&current.fields)?),
                    });
                    continue;
                }
            }

            let mut fields = change.fields.clone();
            if change.op == ChangeOp::Delete {
                fields.insert(meta_keys::ACTIVE_IND.into(), Value::Bool(false));
            }
            let active = fields
                .get(meta_keys::ACTIVE_IND)
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let modified = fields
                .get(meta_keys::MODIFIED_ON_DT)
                .and_then(Value::as_str)
                .unwrap_or(now.as_str())
                .to_string();

            let rv = next_rv(&mut tx).await?;
            sqlx::query(
                r#"
                INSERT INTO server_rows (table_name, pk, rv, active_ind, fields, modified_on_dt)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(table_name, pk) DO UPDATE SET
                    rv = excluded.rv, active_ind = excluded.active_ind,
                    fields = excluded.fields, modified_on_dt = excluded.modified_on_dt
                "#,
            )
            .bind(spec.name)
            .bind(&change.pk)
            .bind(rv)
            .bind(active)
            .bind(serde_json::to_string(&fields)?)
            .bind(&modified)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO change_log (table_name, pk, rv, origin_client, changed_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(spec.name)
            .bind(&change.pk)
            .bind(rv)
            .bind(&request.client_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            response.applied.push(AppliedChange {
                table: change.table.clone(),
                pk: change.pk.clone(),
                rv,
            });
        }

        // Changes from other clients since this client's position, latest
        // version of each row once.
        let rows: Vec<ServerRow> = sqlx::query_as(
            r#"
            SELECT r.table_name, r.pk, r.rv, r.fields
            FROM server_rows r
            WHERE EXISTS (
                SELECT 1 FROM change_log c
                WHERE c.table_name = r.table_name AND c.pk = r.pk
                  AND c.position > ? AND c.origin_client != ?
            )
            ORDER BY r.rv
            "#,
        )
        .bind(request.last_change_log_position)
        .bind(&request.client_id)
        .fetch_all(&mut *tx)
        .await?;
        for row in rows {
            if pushed.contains(&(row.table_name.clone(), row.pk.clone())) {
                continue;
            }
            response.server_changes.push(row.into_payload()?);
        }

        response.applied_count = response.applied.len();
        response.new_change_log_position = current_position(&mut tx)
            .await?
            .max(request.last_change_log_position);

        sqlx::query(
            r#"
            INSERT INTO client_positions (client_id, position, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(client_id) DO UPDATE SET position = excluded.position, updated_at = excluded.updated_at
            "#,
        )
        .bind(&request.client_id)
        .bind(response.new_change_log_position)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for applied in &response.applied {
            touch_client_table(&mut tx, &request.client_id, &applied.table, applied.rv, &now)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            client = %request.client_id,
            applied = response.applied_count,
            conflicts = response.conflicts.len(),
            server_changes = response.server_changes.len(),
            position = response.new_change_log_position,
            "push handled"
        );
        Ok(response)
    }

    /// Rows changed after each table's cursor. A zero cursor returns active
    /// rows only unless the request asks for deleted ones; otherwise
    /// soft-deleted rows are included so deletions propagate. `max_rv` is
    /// the table's highest revision whether or not that row was returned.
    pub async fn pull(&self, request: &PullRequest) -> Result<PullResponse, ServerStoreError> {
        let mut conn = self.pool.acquire().await?;
        let now = format_timestamp(&Utc::now());
        let mut response = PullResponse::default();

        for cursor in &request.tables {
            let Some(spec) = tables::table_spec(&cursor.name) else {
                tracing::debug!(table = %cursor.name, "ignoring unknown table in pull");
                continue;
            };
            let sql = if cursor.since_rv == 0 && !request.include_deleted {
                "SELECT table_name, pk, rv, fields FROM server_rows \
                 WHERE table_name = ? AND rv > ? AND active_ind = 1 ORDER BY rv"
            } else {
                "SELECT table_name, pk, rv, fields FROM server_rows \
                 WHERE table_name = ? AND rv > ? ORDER BY rv"
            };
            let rows: Vec<ServerRow> = sqlx::query_as(sql)
                .bind(spec.name)
                .bind(cursor.since_rv)
                .fetch_all(&mut *conn)
                .await?;

            let (table_max,): (Option<i64>,) =
                sqlx::query_as("SELECT MAX(rv) FROM server_rows WHERE table_name = ?")
                    .bind(spec.name)
                    .fetch_one(&mut *conn)
                    .await?;
            let max_rv = table_max.unwrap_or(0).max(cursor.since_rv);
            let rows = rows
                .into_iter()
                .map(ServerRow::into_payload)
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(client_id) = &request.client_id {
                touch_client_table(&mut conn, client_id, spec.name, max_rv, &now).await?;
            }
            response.tables.push(TableRows {
                name: spec.name.to_string(),
                rows,
                max_rv,
            });
        }
        Ok(response)
    }

    pub async fn fetch(&self, table: &str, pk: &str) -> Result<Option<RowPayload>, ServerStoreError> {
        let row: Option<ServerRow> = sqlx::query_as(
            "SELECT table_name, pk, rv, fields FROM server_rows WHERE table_name = ? AND pk = ?",
        )
        .bind(table)
        .bind(pk)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ServerRow::into_payload).transpose()
    }

    /// Seeds or replaces a row outside the push path, as an administrator
    /// loading reference data would. Returns the assigned revision.
    pub async fn upsert_row(
        &self,
        table: &str,
        pk: &str,
        fields: &JsonMap,
        origin: &str,
    ) -> Result<i64, ServerStoreError> {
        let mut tx = self.pool.begin().await?;
        let now = format_timestamp(&Utc::now());
        let active = fields
            .get(meta_keys::ACTIVE_IND)
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let rv = next_rv(&mut tx).await?;
        sqlx::query(
            r#"
            INSERT INTO server_rows (table_name, pk, rv, active_ind, fields, modified_on_dt)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(table_name, pk) DO UPDATE SET
                rv = excluded.rv, active_ind = excluded.active_ind,
                fields = excluded.fields, modified_on_dt = excluded.modified_on_dt
            "#,
        )
        .bind(table)
        .bind(pk)
        .bind(rv)
        .bind(active)
        .bind(serde_json::to_string(fields)?)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO change_log (table_name, pk, rv, origin_client, changed_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(table)
        .bind(pk)
        .bind(rv)
        .bind(origin)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(rv)
    }

    /// Drops change-log entries older than `cutoff`. Returns how many were
    /// removed.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ServerStoreError> {
        let mut tx = self.pool.begin().await?;
        let cutoff = format_timestamp(&cutoff);
        let (max_pruned,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(position) FROM change_log WHERE changed_at < ?")
                .bind(&cutoff)
                .fetch_one(&mut *tx)
                .await?;
        let Some(max_pruned) = max_pruned else {
            return Ok(0);
        };

        let result = sqlx::query("DELETE FROM change_log WHERE position <= ?")
            .bind(max_pruned)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO server_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(PRUNED_THROUGH)
        .bind(max_pruned.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(pruned = result.rows_affected(), through = max_pruned, "pruned change log");
        Ok(result.rows_affected())
    }

    pub async fn health(&self) -> Result<ServerHealth, ServerStoreError> {
        let mut conn = self.pool.acquire().await?;
        let (pending_row_count, oldest, newest): (i64, Option<String>, Option<String>) =
            sqlx::query_as("SELECT COUNT(*), MIN(changed_at), MAX(changed_at) FROM change_log")
                .fetch_one(&mut *conn)
                .await?;
        let pruned = pruned_through(&mut conn).await?;
        let stale: Vec<(String,)> =
            sqlx::query_as("SELECT client_id FROM client_positions WHERE position < ? ORDER BY client_id")
                .bind(pruned)
                .fetch_all(&mut *conn)
                .await?;

        let oldest_change = oldest.as_deref().and_then(parse_timestamp);
        let mut warnings: Vec<String> = stale
            .into_iter()
            .map(|(client,)| format!("client {} is behind the retention window", client))
            .collect();
        if let Some(oldest) = oldest_change {
            if Utc::now() - oldest > self.retention {
                warnings.push("change log holds entries past the retention window".to_string());
            }
        }

        Ok(ServerHealth {
            status: if warnings.is_empty() { "ok" } else { "degraded" }.to_string(),
            pending_row_count,
            oldest_change,
            newest_change: newest.as_deref().and_then(parse_timestamp),
            retention_window_hours: self.retention_hours(),
            warnings,
        })
    }

    pub async fn client_status(&self, client_id: &str) -> Result<ClientStatus, ServerStoreError> {
        let mut conn = self.pool.acquire().await?;
        let position: Option<(i64,)> =
            sqlx::query_as("SELECT position FROM client_positions WHERE client_id = ?")
                .bind(client_id)
                .fetch_optional(&mut *conn)
                .await?;
        let position = position.map(|(p,)| p).unwrap_or(0);

        let mut tables_out = Vec::new();
        for spec in tables::TRACKED_TABLES {
            let state: Option<(i64, Option<String>)> = sqlx::query_as(
                "SELECT last_sync_revision, last_sync_timestamp FROM client_state WHERE client_id = ? AND table_name = ?",
            )
            .bind(client_id)
            .bind(spec.name)
            .fetch_optional(&mut *conn)
            .await?;
            let (pending_changes,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM change_log WHERE table_name = ? AND position > ? AND origin_client != ?",
            )
            .bind(spec.name)
            .bind(position)
            .bind(client_id)
            .fetch_one(&mut *conn)
            .await?;

            let (last_sync_revision, last_sync_timestamp) = state.unwrap_or((0, None));
            tables_out.push(TableStatus {
                name: spec.name.to_string(),
                last_sync_revision,
                last_sync_timestamp: last_sync_timestamp.as_deref().and_then(parse_timestamp),
                pending_changes,
            });
        }

        Ok(ClientStatus {
            client_id: client_id.to_string(),
            tables: tables_out,
        })
    }
}

async fn pruned_through(conn: &mut SqliteConnection) -> Result<i64, ServerStoreError> {
    let value: Option<(String,)> = sqlx::query_as("SELECT value FROM server_meta WHERE key = ?")
        .bind(PRUNED_THROUGH)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value.and_then(|(v,)| v.parse().ok()).unwrap_or(0))
}

async fn current_position(conn: &mut SqliteConnection) -> Result<i64, ServerStoreError> {
    let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(position) FROM change_log")
        .fetch_one(&mut *conn)
        .await?;
    Ok(max.unwrap_or(0).max(pruned_through(conn).await?))
}

async fn next_rv(conn: &mut SqliteConnection) -> Result<i64, ServerStoreError> {
    let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(rv) FROM server_rows")
        .fetch_one(&mut *conn)
        .await?;
    Ok(max.unwrap_or(0) + 1)
}

async fn touch_client_table(
    conn: &mut SqliteConnection,
    client_id: &str,
    table: &str,
    rv: i64,
    now: &str,
) -> Result<(), ServerStoreError> {
    sqlx::query(
        r#"
        INSERT INTO client_state (client_id, table_name, last_sync_revision, last_sync_timestamp)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(client_id, table_name) DO UPDATE SET
            last_sync_revision = MAX(last_sync_revision, excluded.last_sync_revision),
            last_sync_timestamp = excluded.last_sync_timestamp
        "#,
    )
    .bind(client_id)
    .bind(table)
    .bind(rv)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::protocol::{Change, TableCursor};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_store() -> (ServerStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ServerStore::open(&temp_dir.path().join("server.db"), 72)
            .await
            .unwrap();
        (store, temp_dir)
    }

    fn change(pk: &str, op: ChangeOp, local_rv: Option<i64>, depth_to: f64) -> Change {
        Change {
            table: "drill_intervals".into(),
            op,
            pk: pk.into(),
            fields: json!({
                "collarId": "BH-1", "depthFrom": 0.0, "depthTo": depth_to, "lithCode": "SH",
                "ActiveInd": true, "RowStatus": 0
            })
            .as_object()
            .unwrap()
            .clone(),
            local_rv,
        }
    }

    fn push(client: &str, position: i64, changes: Vec<Change>) -> PushRequest {
        PushRequest {
            client_id: client.into(),
            last_change_log_position: position,
            changes,
            chunk_index: None,
            chunk_count: None,
        }
    }

    fn pull_all(since: i64) -> PullRequest {
        PullRequest {
            client_id: Some("reader".into()),
            tables: vec![TableCursor {
                name: "drill_intervals".into(),
                since_rv: since,
            }],
            include_deleted: false,
        }
    }

    #[tokio::test]
    async fn test_push_assigns_increasing_revisions() {
        let (store, _dir) = open_store().await;
        let response = store
            .push(&push(
                "a",
                0,
                vec![
                    change("i-1", ChangeOp::Insert, None, 1.0),
                    change("i-2", ChangeOp::Insert, None, 2.0),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.applied_count, 2);
        assert_eq!(response.applied[0].rv, 1);
        assert_eq!(response.applied[1].rv, 2);
        assert_eq!(response.new_change_log_position, 2);
        assert!(response.server_changes.is_empty());
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let (store, _dir) = open_store().await;
        store
            .push(&push("a", 0, vec![change("i-1", ChangeOp::Insert, None, 1.0)]))
            .await
            .unwrap();
        store
            .push(&push("a", 1, vec![change("i-1", ChangeOp::Update, Some(1), 3.0)]))
            .await
            .unwrap();

        let response = store
            .push(&push("b", 0, vec![change("i-1", ChangeOp::Update, Some(1), 5.0)]))
            .await
            .unwrap();
        assert_eq!(response.applied_count, 0);
        assert_eq!(response.conflicts.len(), 1);
        assert_eq!(response.conflicts[0].server_rv, 2);
        let server_row = response.conflicts[0].server_row.as_ref().unwrap();
        assert_eq!(server_row["depthTo"], json!(3.0));
        // the conflicting row is not echoed back as a server change
        assert!(response.server_changes.is_empty());
    }

    #[tokio::test]
    async fn test_server_changes_exclude_own_writes() {
        let (store, _dir) = open_store().await;
        store
            .push(&push("a", 0, vec![change("i-1", ChangeOp::Insert, None, 1.0)]))
            .await
            .unwrap();

        let own = store.push(&push("a", 0, vec![])).await.unwrap();
        assert!(own.server_changes.is_empty());

        let other = store.push(&push("b", 0, vec![])).await.unwrap();
        assert_eq!(other.server_changes.len(), 1);
        assert_eq!(other.server_changes[0].pk, "i-1");
        assert_eq!(other.new_change_log_position, 1);
    }

    #[tokio::test]
    async fn test_pull_hides_deleted_rows_on_first_sync() {
        let (store, _dir) = open_store().await;
        store
            .push(&push(
                "a",
                0,
                vec![
                    change("i-1", ChangeOp::Insert, None, 1.0),
                    change("i-2", ChangeOp::Insert, None, 2.0),
                ],
            ))
            .await
            .unwrap();
        store
            .push(&push("a", 2, vec![change("i-2", ChangeOp::Delete, Some(2), 2.0)]))
            .await
            .unwrap();

        let first = store.pull(&pull_all(0)).await.unwrap();
        let pks: Vec<_> = first.tables[0].rows.iter().map(|r| r.pk.as_str()).collect();
        assert_eq!(pks, vec!["i-1"]);
        // the cursor covers the hidden delete too
        assert_eq!(first.tables[0].max_rv, 3);

        let mut resync = pull_all(0);
        resync.include_deleted = true;
        let everything = store.pull(&resync).await.unwrap();
        let pks: Vec<_> = everything.tables[0].rows.iter().map(|r| r.pk.as_str()).collect();
        assert_eq!(pks, vec!["i-1", "i-2"]);
        assert_eq!(everything.tables[0].rows[1].fields["ActiveInd"], json!(false));

        let incremental = store.pull(&pull_all(1)).await.unwrap();
        let deleted = &incremental.tables[0].rows[0];
        assert_eq!(deleted.pk, "i-2");
        assert_eq!(deleted.fields["ActiveInd"], json!(false));
        assert_eq!(incremental.tables[0].max_rv, 3);
    }

    #[tokio::test]
    async fn test_pull_with_no_rows_keeps_cursor() {
        let (store, _dir) = open_store().await;
        let response = store.pull(&pull_all(7)).await.unwrap();
        assert!(response.tables[0].rows.is_empty());
        assert_eq!(response.tables[0].max_rv, 7);
    }

    #[tokio::test]
    async fn test_pruned_position_requires_resync() {
        let (store, _dir) = open_store().await;
        store
            .push(&push("a", 0, vec![change("i-1", ChangeOp::Insert, None, 1.0)]))
            .await
            .unwrap();
        store
            .prune_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();

        let err = store.push(&push("b", 0, vec![])).await.unwrap_err();
        match err {
            ServerStoreError::ResyncRequired { current_position } => {
                assert_eq!(current_position, 1)
            }
            other => panic!("unexpected error: {}", other),
        }

        // a client at the current position carries on
        assert!(store.push(&push("b", 1, vec![])).await.is_ok());
        let health = store.health().await.unwrap();
        assert_eq!(health.pending_row_count, 0);
        assert_eq!(health.retention_window_hours, 72);
    }

    #[tokio::test]
    async fn test_rejects_pull_only_tables() {
        let (store, _dir) = open_store().await;
        let mut lookup = change("BIF", ChangeOp::Insert, None, 1.0);
        lookup.table = "lookup_codes".into();
        assert!(matches!(
            store.push(&push("a", 0, vec![lookup])).await,
            Err(ServerStoreError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_client_status_counts_pending() {
        let (store, _dir) = open_store().await;
        store
            .push(&push("a", 0, vec![change("i-1", ChangeOp::Insert, None, 1.0)]))
            .await
            .unwrap();

        let status_a = store.client_status("a").await.unwrap();
        let intervals = status_a
            .tables
            .iter()
            .find(|t| t.name == "drill_intervals")
            .unwrap();
        assert_eq!(intervals.last_sync_revision, 1);
        assert_eq!(intervals.pending_changes, 0);

        let status_b = store.client_status("b").await.unwrap();
        let intervals = status_b
            .tables
            .iter()
            .find(|t| t.name == "drill_intervals")
            .unwrap();
        assert_eq!(intervals.pending_changes, 1);
        assert!(intervals.last_sync_timestamp.is_none());
    }
}
