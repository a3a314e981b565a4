//! Key/value bookkeeping in the `sync_state` table.
//!
//! Values are stored as JSON text. Per-table pull cursors live under
//! `cursor:<table>`.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::Sqlite;

use super::store::StoreError;
use crate::models::format_timestamp;

pub const CLIENT_ID: &str = "client_id";
pub const CHANGE_LOG_POSITION: &str = "change_log_position";
pub const LAST_SYNC_AT: &str = "last_sync_at";
pub const LAST_ERROR: &str = "last_error";
pub const CONSECUTIVE_FAILURES: &str = "consecutive_failures";

pub fn cursor_key(table: &str) -> String {
    format!("cursor:{}", table)
}

pub async fn get<'e, E, T>(exec: E, key: &str) -> Result<Option<T>, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
    T: DeserializeOwned,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_state WHERE key = ?")
        .bind(key)
        .fetch_optional(exec)
        .await?;
    match row {
        Some((value,)) => Ok(Some(serde_json::from_str(&value)?)),
        None => Ok(None),
    }
}

pub async fn set<'e, E, T>(exec: E, key: &str, value: &T) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
    T: Serialize + ?Sized,
{
    let value = serde_json::to_string(value)?;
    sqlx::query(
        r#"
        INSERT INTO sync_state (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(&value)
    .bind(format_timestamp(&Utc::now()))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn delete<'e, E>(exec: E, key: &str) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM sync_state WHERE key = ?")
        .bind(key)
        .execute(exec)
        .await?;
    Ok(())
}
