use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Owning parents used to filter offline selections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentIds {
    pub collar_id: Option<String>,
    pub program_id: Option<String>,
}

impl ParentIds {
    pub fn collar(collar_id: impl Into<String>) -> Self {
        Self {
            collar_id: Some(collar_id.into()),
            program_id: None,
        }
    }

    pub fn program(program_id: impl Into<String>) -> Self {
        Self {
            collar_id: None,
            program_id: Some(program_id.into()),
        }
    }
}

/// Offline-retention selection for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub collar_id: Option<String>,
    pub program_id: Option<String>,
    pub is_offline: bool,
    pub last_synced_revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
