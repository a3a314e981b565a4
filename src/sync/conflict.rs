//! Persistence of record conflicts raised by pulls.
//!
//! A conflict stays open until the next push resolves the row by
//! pull-then-reapply.

use chrono::Utc;
use sqlx::sqlite::{Sqlite, SqliteConnection};

use super::protocol::SyncConflict;
use crate::db::StoreError;
use crate::models::{format_timestamp, parse_timestamp, JsonMap};

/// How an open conflict was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Local fields matched the server; the server row was taken.
    ServerWins,
    /// The local edit was kept and rebased onto the server revision.
    Rebased,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::ServerWins => "server_wins",
            Resolution::Rebased => "rebased",
        }
    }
}

#[derive(sqlx::FromRow)]
struct ConflictRow {
    table_name: String,
    entity_id: String,
    local_rv: i64,
    server_rv: i64,
    server_fields: String,
    detected_at: String,
}

impl ConflictRow {
    fn into_conflict(self) -> Result<SyncConflict, StoreError> {
        let server_fields: JsonMap = serde_json::from_str(&self.server_fields)?;
        let detected_at =
            parse_timestamp(&self.detected_at).ok_or_else(|| StoreError::Corrupt {
                table: "sync_conflicts".to_string(),
                id: self.entity_id.clone(),
                reason: format!("bad timestamp '{}'", self.detected_at),
            })?;
        Ok(SyncConflict {
            table: self.table_name,
            entity_id: self.entity_id,
            local_rv: self.local_rv,
            server_rv: self.server_rv,
            server_fields,
            detected_at,
        })
    }
}

/// Records a conflict. An open conflict for the same row is replaced, so at
/// most one is open per row.
pub async fn record(conn: &mut SqliteConnection, conflict: &SyncConflict) -> Result<(), StoreError> {
    sqlx::query(
        "DELETE FROM sync_conflicts WHERE table_name = ? AND entity_id = ? AND resolved_at IS NULL",
    )
    .bind(&conflict.table)
    .bind(&conflict.entity_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO sync_conflicts (table_name, entity_id, local_rv, server_rv, server_fields, detected_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&conflict.table)
    .bind(&conflict.entity_id)
    .bind(conflict.local_rv)
    .bind(conflict.server_rv)
    .bind(serde_json::to_string(&conflict.server_fields)?)
    .bind(format_timestamp(&conflict.detected_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn resolve(
    conn: &mut SqliteConnection,
    table: &str,
    entity_id: &str,
    resolution: Resolution,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE sync_conflicts SET resolved_at = ?, resolution = ?
        WHERE table_name = ? AND entity_id = ? AND resolved_at IS NULL
        "#,
    )
    .bind(format_timestamp(&Utc::now()))
    .bind(resolution.as_str())
    .bind(table)
    .bind(entity_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn open_conflicts<'e, E>(exec: E) -> Result<Vec<SyncConflict>, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<ConflictRow> = sqlx::query_as(
        r#"
        SELECT table_name, entity_id, local_rv, server_rv, server_fields, detected_at
        FROM sync_conflicts WHERE resolved_at IS NULL ORDER BY id
        "#,
    )
    .fetch_all(exec)
    .await?;
    rows.into_iter().map(ConflictRow::into_conflict).collect()
}
