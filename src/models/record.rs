use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RowStatus;

pub type JsonMap = serde_json::Map<String, Value>;

/// A record whose payload is kept as an untyped field bag.
pub type RawRecord = Record<JsonMap>;

/// Dirty flag of a locally stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Synced,
    Dirty,
}

impl SyncStatus {
    pub fn ordinal(self) -> i64 {
        match self {
            SyncStatus::Synced => 0,
            SyncStatus::Dirty => 1,
        }
    }

    pub fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(SyncStatus::Synced),
            1 => Some(SyncStatus::Dirty),
            _ => None,
        }
    }

    pub fn is_dirty(self) -> bool {
        self == SyncStatus::Dirty
    }
}

/// Bookkeeping columns carried by every synced entity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: String,
    pub active_ind: bool,
    /// Server-assigned revision. Zero means the row has never been acknowledged.
    pub rv: i64,
    pub row_status: RowStatus,
    pub approved: bool,
    pub superseded_by: Option<String>,
    pub sync_status: SyncStatus,
    /// Local write counter, never sent to the server.
    pub local_seq: i64,
    pub created_on_dt: DateTime<Utc>,
    pub created_by: String,
    pub modified_on_dt: DateTime<Utc>,
    pub modified_by: String,
}

impl RecordMeta {
    /// Metadata for a row created on this device.
    pub fn new_local(id: impl Into<String>, actor: impl Into<String>) -> Self {
        let now = Utc::now();
        let actor = actor.into();
        Self {
            id: id.into(),
            active_ind: true,
            rv: 0,
            row_status: RowStatus::Draft,
            approved: false,
            superseded_by: None,
            sync_status: SyncStatus::Dirty,
            local_seq: 0,
            created_on_dt: now,
            created_by: actor.clone(),
            modified_on_dt: now,
            modified_by: actor,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.sync_status.is_dirty()
    }
}

/// A typed entity row together with its bookkeeping metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub meta: RecordMeta,
    pub data: T,
}

impl<T> Record<T> {
    pub fn new(meta: RecordMeta, data: T) -> Self {
        Self { meta, data }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Record<U> {
        Record {
            meta: self.meta,
            data: f(self.data),
        }
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
