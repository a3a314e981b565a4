//! Audit trail of workflow transitions and reviewer comments. Both stay on
//! the device; only the record's status fields sync.

use chrono::Utc;
use sqlx::sqlite::{Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::{
    format_timestamp, parse_timestamp, RowStatus, StatusHistoryEntry, WorkflowComment,
};

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: String,
    entity_type: String,
    entity_id: String,
    from_status: i64,
    to_status: i64,
    transitioned_by: String,
    transitioned_on_dt: String,
    reason: Option<String>,
}

impl HistoryRow {
    fn into_entry(self) -> Result<StatusHistoryEntry, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            table: "status_history".to_string(),
            id: self.id.clone(),
            reason,
        };
        let from_status = RowStatus::from_ordinal(self.from_status)
            .ok_or_else(|| corrupt(format!("unknown status {}", self.from_status)))?;
        let to_status = RowStatus::from_ordinal(self.to_status)
            .ok_or_else(|| corrupt(format!("unknown status {}", self.to_status)))?;
        let transitioned_on_dt = parse_timestamp(&self.transitioned_on_dt)
            .ok_or_else(|| corrupt(format!("bad timestamp '{}'", self.transitioned_on_dt)))?;
        Ok(StatusHistoryEntry {
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            from_status,
            to_status,
            transitioned_by: self.transitioned_by,
            transitioned_on_dt,
            reason: self.reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: String,
    entity_type: String,
    entity_id: String,
    author: String,
    body: String,
    created_on_dt: String,
}

pub(crate) async fn append_history(
    conn: &mut SqliteConnection,
    entity_type: &str,
    entity_id: &str,
    from: RowStatus,
    to: RowStatus,
    actor: &str,
    reason: Option<&str>,
) -> Result<StatusHistoryEntry, StoreError> {
    let entry = StatusHistoryEntry {
        id: Uuid::new_v4().to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        from_status: from,
        to_status: to,
        transitioned_by: actor.to_string(),
        transitioned_on_dt: Utc::now(),
        reason: reason.map(str::to_string),
    };
    sqlx::query(
        r#"
        INSERT INTO status_history (id, entity_type, entity_id, from_status, to_status, transitioned_by, transitioned_on_dt, reason)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(from.ordinal())
    .bind(to.ordinal())
    .bind(&entry.transitioned_by)
    .bind(format_timestamp(&entry.transitioned_on_dt))
    .bind(&entry.reason)
    .execute(&mut *conn)
    .await?;
    Ok(entry)
}

pub(crate) async fn append_comment(
    conn: &mut SqliteConnection,
    entity_type: &str,
    entity_id: &str,
    author: &str,
    body: &str,
) -> Result<WorkflowComment, StoreError> {
    let comment = WorkflowComment {
        id: Uuid::new_v4().to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        author: author.to_string(),
        body: body.to_string(),
        created_on_dt: Utc::now(),
    };
    sqlx::query(
        r#"
        INSERT INTO workflow_comments (id, entity_type, entity_id, author, body, created_on_dt)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&comment.id)
    .bind(&comment.entity_type)
    .bind(&comment.entity_id)
    .bind(&comment.author)
    .bind(&comment.body)
    .bind(format_timestamp(&comment.created_on_dt))
    .execute(&mut *conn)
    .await?;
    Ok(comment)
}

pub(crate) async fn history<'e, E>(
    exec: E,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<StatusHistoryEntry>, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<HistoryRow> = sqlx::query_as(
        "SELECT * FROM status_history WHERE entity_type = ? AND entity_id = ? \
         ORDER BY transitioned_on_dt, rowid",
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(exec)
    .await?;
    rows.into_iter().map(HistoryRow::into_entry).collect()
}

pub(crate) async fn comments<'e, E>(
    exec: E,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<WorkflowComment>, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<CommentRow> = sqlx::query_as(
        "SELECT * FROM workflow_comments WHERE entity_type = ? AND entity_id = ? \
         ORDER BY created_on_dt, rowid",
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(exec)
    .await?;
    rows.into_iter()
        .map(|row| {
            let created_on_dt =
                parse_timestamp(&row.created_on_dt).ok_or_else(|| StoreError::Corrupt {
                    table: "workflow_comments".to_string(),
                    id: row.id.clone(),
                    reason: format!("bad timestamp '{}'", row.created_on_dt),
                })?;
            Ok(WorkflowComment {
                id: row.id,
                entity_type: row.entity_type,
                entity_id: row.entity_id,
                author: row.author,
                body: row.body,
                created_on_dt,
            })
        })
        .collect()
}
