use chrono::Utc;
use sqlx::sqlite::Sqlite;
use uuid::Uuid;

use super::store::{LocalStore, StoreError};
use crate::models::{format_timestamp, parse_timestamp, ParentIds, SyncMetadata};

#[derive(sqlx::FromRow)]
struct SyncMetadataRow {
    id: String,
    entity_type: String,
    entity_id: String,
    collar_id: Option<String>,
    program_id: Option<String>,
    is_offline: bool,
    last_synced_revision: i64,
    created_at: String,
    updated_at: String,
}

impl SyncMetadataRow {
    fn into_metadata(self) -> Result<SyncMetadata, StoreError> {
        let parse = |s: &str| {
            parse_timestamp(s).ok_or_else(|| StoreError::Corrupt {
                table: "sync_metadata".to_string(),
                id: self.id.clone(),
                reason: format!("bad timestamp '{}'", s),
            })
        };
        let created_at = parse(&self.created_at)?;
        let updated_at = parse(&self.updated_at)?;
        Ok(SyncMetadata {
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            collar_id: self.collar_id,
            program_id: self.program_id,
            is_offline: self.is_offline,
            last_synced_revision: self.last_synced_revision,
            created_at,
            updated_at,
        })
    }
}

/// Which entities the user has selected to keep available offline.
/// Selection is independent of dirty state.
pub struct SyncMetadataIndex {
    store: LocalStore,
}

impl SyncMetadataIndex {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn set_offline(
        &self,
        entity_type: &str,
        entity_id: &str,
        parents: ParentIds,
    ) -> Result<SyncMetadata, StoreError> {
        let now = format_timestamp(&Utc::now());
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (id, entity_type, entity_id, collar_id, program_id, is_offline, last_synced_revision, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, 0, ?, ?)
            ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                collar_id = excluded.collar_id,
                program_id = excluded.program_id,
                is_offline = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entity_type)
        .bind(entity_id)
        .bind(&parents.collar_id)
        .bind(&parents.program_id)
        .bind(&now)
        .bind(&now)
        .execute(self.store.pool())
        .await?;

        self.get(entity_type, entity_id)
            .await?
            .ok_or_else(|| StoreError::Sqlx(sqlx::Error::RowNotFound))
    }

    /// Drops the selection. The row is kept so its last synced revision
    /// survives re-selection.
    pub async fn clear_offline(&self, entity_type: &str, entity_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sync_metadata SET is_offline = 0, updated_at = ? WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(format_timestamp(&Utc::now()))
        .bind(entity_type)
        .bind(entity_id)
        .execute(self.store.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_offline(&self, entity_type: &str, entity_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .get(entity_type, entity_id)
            .await?
            .map(|m| m.is_offline)
            .unwrap_or(false))
    }

    pub async fn get(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<SyncMetadata>, StoreError> {
        let row: Option<SyncMetadataRow> = sqlx::query_as(
            "SELECT * FROM sync_metadata WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(self.store.pool())
        .await?;
        row.map(SyncMetadataRow::into_metadata).transpose()
    }

    pub async fn list_offline(&self, entity_type: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT entity_id FROM sync_metadata WHERE entity_type = ? AND is_offline = 1 ORDER BY entity_id",
        )
        .bind(entity_type)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn list_offline_for_collar(
        &self,
        collar_id: &str,
    ) -> Result<Vec<SyncMetadata>, StoreError> {
        self.list_where("collar_id", collar_id).await
    }

    pub async fn list_offline_for_program(
        &self,
        program_id: &str,
    ) -> Result<Vec<SyncMetadata>, StoreError> {
        self.list_where("program_id", program_id).await
    }

    async fn list_where(&self, column: &str, value: &str) -> Result<Vec<SyncMetadata>, StoreError> {
        let sql = format!(
            "SELECT * FROM sync_metadata WHERE {} = ? AND is_offline = 1 ORDER BY entity_type, entity_id",
            column
        );
        let rows: Vec<SyncMetadataRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_all(self.store.pool())
            .await?;
        rows.into_iter().map(SyncMetadataRow::into_metadata).collect()
    }
}

/// Bumps the last synced revision of a selected entity. Runs inside the
/// pull's apply transaction; entities that were never selected are ignored.
pub async fn record_synced_revision<'e, E>(
    exec: E,
    entity_type: &str,
    entity_id: &str,
    rv: i64,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE sync_metadata
        SET last_synced_revision = MAX(last_synced_revision, ?), updated_at = ?
        WHERE entity_type = ? AND entity_id = ?
        "#,
    )
    .bind(rv)
    .bind(format_timestamp(&Utc::now()))
    .bind(entity_type)
    .bind(entity_id)
    .execute(exec)
    .await?;
    Ok(())
}
