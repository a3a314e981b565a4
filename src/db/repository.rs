use serde_json::Value;
use std::marker::PhantomData;
use thiserror::Error;
use uuid::Uuid;

use super::metadata::SyncMetadataIndex;
use super::store::{LocalStore, StoreError};
use super::tables::{self, TableSpec};
use super::tracker::WriteOrigin;
use crate::models::{
    Collar, DrillInterval, Entity, JsonMap, RawRecord, Record, RecordMeta, RowStatus,
    SyncMetadata,
};
use crate::sync::{SyncEngine, SyncError};
use crate::validation::{parse_business, parse_structural, ValidationError};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{table}/{id} not found")]
    NotFound { table: String, id: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{table}/{id} is {status} and can no longer be edited")]
    Locked {
        table: String,
        id: String,
        status: RowStatus,
    },
    #[error("{table}/{id} does not match its schema: {message}")]
    Decode {
        table: String,
        id: String,
        message: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Typed access to one tracked table. All writes are local edits by `actor`.
pub struct Repository<T: Entity> {
    store: LocalStore,
    actor: String,
    _entity: PhantomData<fn() -> T>,
}

pub type CollarRepository = Repository<Collar>;
pub type IntervalRepository = Repository<DrillInterval>;

fn to_fields<T: Entity>(data: &T) -> Result<JsonMap, RepoError> {
    match serde_json::to_value(data).map_err(StoreError::from)? {
        Value::Object(fields) => Ok(fields),
        other => Err(RepoError::Decode {
            table: T::TABLE.to_string(),
            id: String::new(),
            message: format!("expected an object, got {}", other),
        }),
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(store: LocalStore, actor: impl Into<String>) -> Self {
        Self {
            store,
            actor: actor.into(),
            _entity: PhantomData,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    fn spec() -> Result<&'static TableSpec, StoreError> {
        tables::table_spec(T::TABLE).ok_or_else(|| StoreError::UnknownTable(T::TABLE.to_string()))
    }

    fn decode(raw: RawRecord) -> Result<Record<T>, RepoError> {
        let id = raw.meta.id.clone();
        let data = serde_json::from_value(Value::Object(raw.data)).map_err(|e| {
            RepoError::Decode {
                table: T::TABLE.to_string(),
                id,
                message: e.to_string(),
            }
        })?;
        Ok(Record::new(raw.meta, data))
    }

    fn not_found(id: &str) -> RepoError {
        RepoError::NotFound {
            table: T::TABLE.to_string(),
            id: id.to_string(),
        }
    }

    async fn write(&self, raw: RawRecord) -> Result<Record<T>, RepoError> {
        let mut tx = self.store.begin(WriteOrigin::local(&self.actor)).await?;
        let stored = tx.put(T::TABLE, raw).await?;
        tx.commit().await?;
        Self::decode(stored)
    }

    /// Creates a Draft record under a fresh id.
    pub async fn create(&self, data: T) -> Result<Record<T>, RepoError> {
        self.create_with_id(&Uuid::new_v4().to_string(), data).await
    }

    pub async fn create_with_id(&self, id: &str, data: T) -> Result<Record<T>, RepoError> {
        let data = parse_structural(data)?;
        let raw = RawRecord::new(RecordMeta::new_local(id, &self.actor), to_fields(&data)?);
        let record = self.write(raw).await?;
        tracing::debug!(table = T::TABLE, id, "created record");
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record<T>>, RepoError> {
        match self.store.get(T::TABLE, id).await? {
            Some(raw) => Self::decode(raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn require(&self, id: &str) -> Result<Record<T>, RepoError> {
        self.get(id).await?.ok_or_else(|| Self::not_found(id))
    }

    /// Active records, oldest first.
    pub async fn list(&self) -> Result<Vec<Record<T>>, RepoError> {
        self.store
            .list(T::TABLE, false)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    /// Soft-deleted records included.
    pub async fn list_all(&self) -> Result<Vec<Record<T>>, RepoError> {
        self.store
            .list(T::TABLE, true)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    pub async fn list_by_status(&self, status: RowStatus) -> Result<Vec<Record<T>>, RepoError> {
        self.store
            .list_by_status(T::TABLE, status)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    async fn find_by(&self, field: &str, value: &str) -> Result<Vec<Record<T>>, RepoError> {
        self.store
            .find_by_field(T::TABLE, field, value)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    fn editable(record: &Record<T>) -> Result<(), RepoError> {
        match record.meta.row_status {
            RowStatus::Draft | RowStatus::Rejected => Ok(()),
            status => Err(RepoError::Locked {
                table: T::TABLE.to_string(),
                id: record.meta.id.clone(),
                status,
            }),
        }
    }

    /// Reads the stored record and writes `edit`'s result in one local
    /// transaction. A workflow transition or sync apply committed after the
    /// read fails the write instead of being overwritten.
    async fn modify<F>(&self, id: &str, edit: F) -> Result<Record<T>, RepoError>
    where
        F: FnOnce(Record<T>) -> Result<RawRecord, RepoError>,
    {
        let mut tx = self.store.begin(WriteOrigin::local(&self.actor)).await?;
        let current = match tx.get(T::TABLE, id).await? {
            Some(raw) => Self::decode(raw)?,
            None => return Err(Self::not_found(id)),
        };
        let stored = tx.put(T::TABLE, edit(current)?).await?;
        tx.commit().await?;
        Self::decode(stored)
    }

    /// Replaces the payload of a Draft or Rejected record. Tier 1 only.
    pub async fn update(&self, id: &str, data: T) -> Result<Record<T>, RepoError> {
        let data = parse_structural(data)?;
        self.modify(id, |current| {
            Self::editable(&current)?;
            Ok(RawRecord::new(current.meta, to_fields(&data)?))
        })
        .await
    }

    /// Like [`update`](Self::update), but also enforces the Tier-2 rules of
    /// the record's current status.
    pub async fn business_save(&self, id: &str, data: T) -> Result<Record<T>, RepoError> {
        self.modify(id, |current| {
            Self::editable(&current)?;
            let data = parse_business(data, current.meta.row_status)?;
            Ok(RawRecord::new(current.meta, to_fields(&data)?))
        })
        .await
    }

    /// Marks the record inactive. The row is kept so the deletion syncs.
    pub async fn soft_delete(&self, id: &str) -> Result<Record<T>, RepoError> {
        let record = self
            .modify(id, |current| {
                let mut meta = current.meta;
                meta.active_ind = false;
                Ok(RawRecord::new(meta, to_fields(&current.data)?))
            })
            .await?;
        tracing::debug!(table = T::TABLE, id, "soft-deleted record");
        Ok(record)
    }

    /// Local copy if present, otherwise a one-row fetch from the server.
    /// Missing on both sides is [`RepoError::NotFound`].
    pub async fn get_or_fetch(&self, id: &str, engine: &SyncEngine) -> Result<Record<T>, RepoError> {
        if let Some(local) = self.get(id).await? {
            return Ok(local);
        }
        match engine.fetch_remote(T::TABLE, id).await? {
            Some(raw) => Self::decode(raw),
            None => Err(Self::not_found(id)),
        }
    }

    /// Re-fetches the record from the server. A transient failure returns
    /// the local copy, possibly stale.
    pub async fn refresh(
        &self,
        id: &str,
        engine: &SyncEngine,
    ) -> Result<Option<Record<T>>, RepoError> {
        match engine.fetch_remote(T::TABLE, id).await {
            Ok(Some(raw)) => Self::decode(raw).map(Some),
            Ok(None) => Ok(None),
            Err(e) if e.is_transient() => {
                tracing::warn!(table = T::TABLE, id, error = %e, "refresh failed, serving local copy");
                self.get(id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Selects the record for offline use, filed under its parents.
    pub async fn keep_offline(
        &self,
        id: &str,
        index: &SyncMetadataIndex,
    ) -> Result<SyncMetadata, RepoError> {
        let record = self.require(id).await?;
        let spec = Self::spec()?;
        Ok(index
            .set_offline(spec.entity_type, id, record.data.parent_ids())
            .await?)
    }
}

impl Repository<Collar> {
    pub async fn find_by_hole_id(&self, hole_id: &str) -> Result<Option<Record<Collar>>, RepoError> {
        Ok(self.find_by("holeId", hole_id.trim()).await?.into_iter().next())
    }

    pub async fn list_by_program(&self, program_id: &str) -> Result<Vec<Record<Collar>>, RepoError> {
        self.find_by("programId", program_id).await
    }
}

impl Repository<DrillInterval> {
    /// Active intervals of one collar, shallowest first.
    pub async fn list_for_collar(
        &self,
        collar_id: &str,
    ) -> Result<Vec<Record<DrillInterval>>, RepoError> {
        let mut intervals = self.find_by("collarId", collar_id).await?;
        intervals.sort_by(|a, b| a.data.depth_from.total_cmp(&b.data.depth_from));
        Ok(intervals)
    }
}

/// Read access to server-owned lookup rows, kept as raw field bags.
pub struct ReferenceRepository {
    store: LocalStore,
}

impl ReferenceRepository {
    pub const TABLE: &'static str = "lookup_codes";

    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<Option<RawRecord>, RepoError> {
        Ok(self.store.get(Self::TABLE, id).await?)
    }

    pub async fn list(&self) -> Result<Vec<RawRecord>, RepoError> {
        Ok(self.store.list(Self::TABLE, false).await?)
    }

    /// Rows whose `category` field equals `category`.
    pub async fn by_category(&self, category: &str) -> Result<Vec<RawRecord>, RepoError> {
        Ok(self
            .store
            .find_by_field(Self::TABLE, "category", category)
            .await?)
    }
}
