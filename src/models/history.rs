use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::RowStatus;

/// Append-only audit record of one workflow transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub from_status: RowStatus,
    pub to_status: RowStatus,
    pub transitioned_by: String,
    pub transitioned_on_dt: DateTime<Utc>,
    pub reason: Option<String>,
}

impl fmt::Display for StatusHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {} -> {}  by {}",
            self.transitioned_on_dt.format("%Y-%m-%d %H:%M"),
            self.from_status,
            self.to_status,
            self.transitioned_by
        )?;
        if let Some(reason) = &self.reason {
            write!(f, "  ({})", reason)?;
        }
        Ok(())
    }
}

/// Reviewer comment attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowComment {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub author: String,
    pub body: String,
    pub created_on_dt: DateTime<Utc>,
}
