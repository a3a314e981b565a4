//! Change tracking for the local store.
//!
//! Every create or update passes through [`stamp`]. A local write marks the
//! row dirty and refreshes its modified fields; a write made while applying
//! server data leaves the flags exactly as the server supplied them. The
//! origin travels with each store transaction, so unrelated transactions
//! running at the same time never observe each other's marker.

use chrono::{DateTime, Utc};

use crate::models::{RecordMeta, SyncStatus};

/// Who is writing through a store transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A user edit on this device.
    Local { actor: String },
    /// Server data being applied by the sync engine.
    SyncApply,
}

impl WriteOrigin {
    pub fn local(actor: impl Into<String>) -> Self {
        WriteOrigin::Local {
            actor: actor.into(),
        }
    }

    pub fn is_sync_apply(&self) -> bool {
        matches!(self, WriteOrigin::SyncApply)
    }
}

/// Stamps `meta` for a write of the given origin. `previous` is the stored
/// version of the row, if any.
pub fn stamp(
    meta: &mut RecordMeta,
    origin: &WriteOrigin,
    previous: Option<&RecordMeta>,
    now: DateTime<Utc>,
) {
    match origin {
        WriteOrigin::SyncApply => {
            // rv never moves backwards
            if let Some(prev) = previous {
                meta.rv = meta.rv.max(prev.rv);
                meta.local_seq = meta.local_seq.max(prev.local_seq);
            }
        }
        WriteOrigin::Local { actor } => {
            if let Some(prev) = previous {
                meta.rv = prev.rv;
                meta.created_on_dt = prev.created_on_dt;
                meta.created_by = prev.created_by.clone();
                meta.local_seq = prev.local_seq;
            }
            meta.local_seq += 1;
            meta.sync_status = SyncStatus::Dirty;
            meta.modified_on_dt = now;
            meta.modified_by = actor.clone();
        }
    }
}

/// Applies a post-push acknowledgement. Only `rv` and the dirty flag change;
/// the flag is cleared only if no local write happened since the pushed
/// snapshot. Returns true if the row is now clean.
pub fn acknowledge(meta: &mut RecordMeta, server_rv: i64, snapshot_seq: i64) -> bool {
    meta.rv = meta.rv.max(server_rv);
    if meta.local_seq == snapshot_seq {
        meta.sync_status = SyncStatus::Synced;
        true
    } else {
        false
    }
}
