mod collar;
mod history;
mod interval;
mod record;
mod row_status;
mod sync_metadata;

pub use collar::{Collar, Coordinate, HOLE_TYPES};
pub use history::{StatusHistoryEntry, WorkflowComment};
pub use interval::DrillInterval;
pub use record::{
    format_timestamp, parse_timestamp, JsonMap, RawRecord, Record, RecordMeta, SyncStatus,
};
pub use row_status::RowStatus;
pub use sync_metadata::{ParentIds, SyncMetadata};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::validation::Schema;

/// A typed entity stored in one tracked table.
pub trait Entity: Schema + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the tracked table holding this entity.
    const TABLE: &'static str;

    fn parent_ids(&self) -> ParentIds {
        ParentIds::default()
    }
}
