//! JSON wire format shared by the HTTP transport and the sync server.
//!
//! Row payloads carry the entity fields plus a fixed set of PascalCase meta
//! keys (see [`meta_keys`]). `rv` and the primary key travel beside the
//! payload, never inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    format_timestamp, parse_timestamp, JsonMap, RawRecord, RecordMeta, RowStatus, SyncStatus,
};

pub mod meta_keys {
    pub const ACTIVE_IND: &str = "ActiveInd";
    pub const ROW_STATUS: &str = "RowStatus";
    pub const APPROVED: &str = "Approved";
    pub const SUPERSEDED_BY: &str = "SupersededBy";
    pub const CREATED_ON_DT: &str = "CreatedOnDt";
    pub const CREATED_BY: &str = "CreatedBy";
    pub const MODIFIED_ON_DT: &str = "ModifiedOnDt";
    pub const MODIFIED_BY: &str = "ModifiedBy";

    pub const ALL: [&str; 8] = [
        ACTIVE_IND,
        ROW_STATUS,
        APPROVED,
        SUPERSEDED_BY,
        CREATED_ON_DT,
        CREATED_BY,
        MODIFIED_ON_DT,
        MODIFIED_BY,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    /// Soft delete; the row is kept with `ActiveInd = false`.
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub table: String,
    pub op: ChangeOp,
    pub pk: String,
    pub fields: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_rv: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub client_id: String,
    pub last_change_log_position: i64,
    pub changes: Vec<Change>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
}

/// A pushed row the server accepted, with the revision it assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedChange {
    pub table: String,
    pub pk: String,
    pub rv: i64,
}

/// A pushed row the server refused because the client's revision was stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub table: String,
    pub pk: String,
    #[serde(default)]
    pub local_rv: Option<i64>,
    pub server_rv: i64,
    #[serde(default)]
    pub server_row: Option<JsonMap>,
}

/// A server row, as returned by pulls, push responses and single-row fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowPayload {
    pub table: String,
    pub pk: String,
    pub rv: i64,
    pub fields: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub new_change_log_position: i64,
    pub applied_count: usize,
    #[serde(default)]
    pub conflicts: Vec<ConflictInfo>,
    #[serde(default)]
    pub server_changes: Vec<RowPayload>,
    #[serde(default)]
    pub applied: Vec<AppliedChange>,
}

/// Body of a 410 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncRequired {
    pub resync_required: bool,
    pub current_position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCursor {
    pub name: String,
    pub since_rv: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub tables: Vec<TableCursor>,
    /// Return soft-deleted rows even for zero cursors. Set by a full
    /// resync so deletions made while the client was away still arrive.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRows {
    pub name: String,
    pub rows: Vec<RowPayload>,
    pub max_rv: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub tables: Vec<TableRows>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub status: String,
    pub pending_row_count: i64,
    pub oldest_change: Option<DateTime<Utc>>,
    pub newest_change: Option<DateTime<Utc>>,
    pub retention_window_hours: i64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatus {
    pub name: String,
    pub last_sync_revision: i64,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub pending_changes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub client_id: String,
    pub tables: Vec<TableStatus>,
}

/// Record conflict raised while pulling over a dirty local row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub table: String,
    pub entity_id: String,
    pub local_rv: i64,
    pub server_rv: i64,
    pub server_fields: JsonMap,
    pub detected_at: DateTime<Utc>,
}

/// Entity fields plus meta keys, as sent to the server.
pub fn encode_fields(record: &RawRecord) -> JsonMap {
    let meta = &record.meta;
    let mut fields = record.data.clone();
    fields.insert(meta_keys::ACTIVE_IND.into(), Value::Bool(meta.active_ind));
    fields.insert(
        meta_keys::ROW_STATUS.into(),
        Value::from(meta.row_status.ordinal()),
    );
    fields.insert(meta_keys::APPROVED.into(), Value::Bool(meta.approved));
    fields.insert(
        meta_keys::SUPERSEDED_BY.into(),
        meta.superseded_by.clone().map_or(Value::Null, Value::String),
    );
    fields.insert(
        meta_keys::CREATED_ON_DT.into(),
        Value::String(format_timestamp(&meta.created_on_dt)),
    );
    fields.insert(
        meta_keys::CREATED_BY.into(),
        Value::String(meta.created_by.clone()),
    );
    fields.insert(
        meta_keys::MODIFIED_ON_DT.into(),
        Value::String(format_timestamp(&meta.modified_on_dt)),
    );
    fields.insert(
        meta_keys::MODIFIED_BY.into(),
        Value::String(meta.modified_by.clone()),
    );
    fields
}

pub fn change_for(table: &str, record: &RawRecord) -> Change {
    let op = if !record.meta.active_ind {
        ChangeOp::Delete
    } else if record.meta.rv == 0 {
        ChangeOp::Insert
    } else {
        ChangeOp::Update
    };
    Change {
        table: table.to_string(),
        op,
        pk: record.meta.id.clone(),
        fields: encode_fields(record),
        local_rv: (record.meta.rv > 0).then_some(record.meta.rv),
    }
}

fn take_bool(fields: &mut JsonMap, key: &str, default: bool) -> Result<bool, String> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(b),
        Some(Value::Number(n)) => Ok(n.as_i64().unwrap_or(0) != 0),
        Some(other) => Err(format!("{} must be a boolean, got {}", key, other)),
    }
}

fn take_string(fields: &mut JsonMap, key: &str) -> Result<Option<String>, String> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(format!("{} must be a string, got {}", key, other)),
    }
}

fn take_timestamp(fields: &mut JsonMap, key: &str) -> Result<Option<DateTime<Utc>>, String> {
    match take_string(fields, key)? {
        None => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| format!("{} is not an RFC 3339 timestamp: '{}'", key, s)),
    }
}

/// Splits a server payload into a clean record. Fails on an unknown
/// `RowStatus` ordinal or a mistyped meta key.
pub fn decode_row(row: &RowPayload) -> Result<RawRecord, String> {
    let mut fields = row.fields.clone();

    let row_status = match fields.remove(meta_keys::ROW_STATUS) {
        None | Some(Value::Null) => RowStatus::Draft,
        Some(value) => value
            .as_i64()
            .and_then(RowStatus::from_ordinal)
            .ok_or_else(|| format!("{}/{}: unknown RowStatus {}", row.table, row.pk, value))?,
    };
    let active_ind = take_bool(&mut fields, meta_keys::ACTIVE_IND, true)?;
    let approved = take_bool(&mut fields, meta_keys::APPROVED, false)?;
    let superseded_by = take_string(&mut fields, meta_keys::SUPERSEDED_BY)?;
    let now = Utc::now();
    let created_on_dt = take_timestamp(&mut fields, meta_keys::CREATED_ON_DT)?.unwrap_or(now);
    let modified_on_dt =
        take_timestamp(&mut fields, meta_keys::MODIFIED_ON_DT)?.unwrap_or(created_on_dt);
    let created_by =
        take_string(&mut fields, meta_keys::CREATED_BY)?.unwrap_or_else(|| "server".into());
    let modified_by =
        take_string(&mut fields, meta_keys::MODIFIED_BY)?.unwrap_or_else(|| created_by.clone());

    Ok(RawRecord {
        meta: RecordMeta {
            id: row.pk.clone(),
            active_ind,
            rv: row.rv,
            row_status,
            approved,
            superseded_by,
            sync_status: SyncStatus::Synced,
            local_seq: 0,
            created_on_dt,
            created_by,
            modified_on_dt,
            modified_by,
        },
        data: fields,
    })
}

/// True if two versions of a row carry the same user-visible content.
/// Revisions, dirty flags and modification stamps are ignored.
pub fn same_content(a: &RawRecord, b: &RawRecord) -> bool {
    a.data == b.data
        && a.meta.active_ind == b.meta.active_ind
        && a.meta.row_status == b.meta.row_status
        && a.meta.approved == b.meta.approved
        && a.meta.superseded_by == b.meta.superseded_by
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> RawRecord {
        let mut meta = RecordMeta::new_local("c-1", "geo1");
        meta.row_status = RowStatus::InReview;
        RawRecord::new(meta, json!({"holeId": "BH-1"}).as_object().unwrap().clone())
    }

    #[test]
    fn test_change_op_follows_meta() {
        let mut r = record();
        assert_eq!(change_for("collars", &r).op, ChangeOp::Insert);
        assert_eq!(change_for("collars", &r).local_rv, None);
        r.meta.rv = 4;
        assert_eq!(change_for("collars", &r).op, ChangeOp::Update);
        assert_eq!(change_for("collars", &r).local_rv, Some(4));
        r.meta.active_ind = false;
        assert_eq!(change_for("collars", &r).op, ChangeOp::Delete);
    }

    #[test]
    fn test_encoded_fields_carry_meta_keys() {
        let fields = encode_fields(&record());
        assert_eq!(fields["RowStatus"], json!(1));
        assert_eq!(fields["ActiveInd"], json!(true));
        assert_eq!(fields["holeId"], json!("BH-1"));

        let decoded = decode_row(&RowPayload {
            table: "collars".into(),
            pk: "c-1".into(),
            rv: 3,
            fields,
        })
        .unwrap();
        assert!(same_content(&decoded, &record()));
        assert_eq!(decoded.meta.sync_status, SyncStatus::Synced);
        assert!(!decoded.data.contains_key("ModifiedBy"));
    }

    #[test]
    fn test_unknown_row_status_fails() {
        let row = RowPayload {
            table: "collars".into(),
            pk: "c-1".into(),
            rv: 3,
            fields: json!({"RowStatus": 9}).as_object().unwrap().clone(),
        };
        assert!(decode_row(&row).unwrap_err().contains("unknown RowStatus"));
    }

    #[test]
    fn test_push_request_wire_shape() {
        let req = PushRequest {
            client_id: "dev-1".into(),
            last_change_log_position: 12,
            changes: vec![change_for("collars", &record())],
            chunk_index: Some(0),
            chunk_count: Some(1),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["lastChangeLogPosition"], json!(12));
        assert_eq!(value["changes"][0]["op"], json!("insert"));
        assert!(value["changes"][0].get("localRv").is_none());
    }
}
