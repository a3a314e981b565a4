//! Record lifecycle: Draft → InReview → Approved, with rejection, reopening
//! and supersession.
//!
//! Each transition is one local store transaction. The status change marks
//! the row dirty so it syncs; the history entry and any comment commit with
//! it or not at all.

mod history;

use serde_json::Value;
use thiserror::Error;

use crate::db::{table_spec, LocalStore, StoreError, TableSpec, WriteOrigin};
use crate::models::{
    Entity, RawRecord, Record, RowStatus, StatusHistoryEntry, WorkflowComment,
};
use crate::validation::{validate_approval, validate_business, Validation, ValidationError};

/// Fixed set of legal transitions a class of entity follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowFamily {
    /// Field records that go through review.
    Review,
    /// Server-owned reference data; no transitions.
    Reference,
}

const REVIEW_TRANSITIONS: &[(RowStatus, RowStatus)] = &[
    (RowStatus::Draft, RowStatus::InReview),
    (RowStatus::InReview, RowStatus::Approved),
    (RowStatus::InReview, RowStatus::Rejected),
    (RowStatus::Approved, RowStatus::Rejected),
    (RowStatus::Approved, RowStatus::Superseded),
    (RowStatus::Rejected, RowStatus::Draft),
];

impl WorkflowFamily {
    pub fn transitions(self) -> &'static [(RowStatus, RowStatus)] {
        match self {
            WorkflowFamily::Review => REVIEW_TRANSITIONS,
            WorkflowFamily::Reference => &[],
        }
    }

    pub fn allows(self, from: RowStatus, to: RowStatus) -> bool {
        self.transitions().contains(&(from, to))
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: RowStatus, to: RowStatus },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{table}/{id} not found")]
    NotFound { table: String, id: String },
    #[error("an actor is required to {0}")]
    Unauthorized(&'static str),
    #[error("{table}/{id} cannot supersede the record: it must be another active record")]
    MissingSuperseding { table: String, id: String },
    #[error("{table}/{id} does not match its schema: {message}")]
    Decode {
        table: String,
        id: String,
        message: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Submission readiness: Tier 2 for InReview, which includes Tier 1.
pub fn can_submit_for_review<T: Entity>(data: &T) -> Validation<T> {
    validate_business(data.clone(), RowStatus::InReview)
}

/// Approval readiness. Always at least as strict as
/// [`can_submit_for_review`].
pub fn can_approve<T: Entity>(data: &T) -> Validation<T> {
    validate_approval(data.clone())
}

fn entity_spec<T: Entity>() -> Result<&'static TableSpec, StoreError> {
    table_spec(T::TABLE).ok_or_else(|| StoreError::UnknownTable(T::TABLE.to_string()))
}

fn decode<T: Entity>(raw: RawRecord) -> Result<Record<T>, WorkflowError> {
    let id = raw.meta.id.clone();
    let data = serde_json::from_value(Value::Object(raw.data)).map_err(|e| {
        WorkflowError::Decode {
            table: T::TABLE.to_string(),
            id,
            message: e.to_string(),
        }
    })?;
    Ok(Record::new(raw.meta, data))
}

/// What a transition does besides changing the status.
enum Step<'a> {
    Submit,
    Approve,
    Reject { reason: Option<&'a str> },
    Supersede { by: &'a str },
    Reopen,
}

impl Step<'_> {
    fn target(&self) -> RowStatus {
        match self {
            Step::Submit => RowStatus::InReview,
            Step::Approve => RowStatus::Approved,
            Step::Reject { .. } => RowStatus::Rejected,
            Step::Supersede { .. } => RowStatus::Superseded,
            Step::Reopen => RowStatus::Draft,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Step::Submit => "submit for review",
            Step::Approve => "approve",
            Step::Reject { .. } => "reject",
            Step::Supersede { .. } => "supersede",
            Step::Reopen => "reopen",
        }
    }
}

pub struct WorkflowEngine {
    store: LocalStore,
}

impl WorkflowEngine {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Draft → InReview. Fails with a business validation error naming
    /// every missing field.
    pub async fn submit_for_review<T: Entity>(
        &self,
        id: &str,
        actor: &str,
    ) -> Result<Record<T>, WorkflowError> {
        self.transition(id, actor, Step::Submit).await
    }

    /// InReview → Approved; sets the approved flag.
    pub async fn approve<T: Entity>(
        &self,
        id: &str,
        actor: &str,
    ) -> Result<Record<T>, WorkflowError> {
        self.transition(id, actor, Step::Approve).await
    }

    /// InReview or Approved → Rejected; clears the approved flag. The reason
    /// goes into the history entry and the comment trail.
    pub async fn reject<T: Entity>(
        &self,
        id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Record<T>, WorkflowError> {
        self.transition(id, actor, Step::Reject { reason }).await
    }

    /// Approved → Superseded, pointing at the replacing record. The original
    /// is kept.
    pub async fn supersede<T: Entity>(
        &self,
        id: &str,
        superseded_by: &str,
        actor: &str,
    ) -> Result<Record<T>, WorkflowError> {
        self.transition(id, actor, Step::Supersede { by: superseded_by })
            .await
    }

    /// Rejected → Draft, so the record can be edited and resubmitted.
    pub async fn reopen<T: Entity>(
        &self,
        id: &str,
        actor: &str,
    ) -> Result<Record<T>, WorkflowError> {
        self.transition(id, actor, Step::Reopen).await
    }

    pub async fn history<T: Entity>(
        &self,
        entity_id: &str,
    ) -> Result<Vec<StatusHistoryEntry>, WorkflowError> {
        let spec = entity_spec::<T>()?;
        Ok(history::history(self.store.pool(), spec.entity_type, entity_id).await?)
    }

    pub async fn comments<T: Entity>(
        &self,
        entity_id: &str,
    ) -> Result<Vec<WorkflowComment>, WorkflowError> {
        let spec = entity_spec::<T>()?;
        Ok(history::comments(self.store.pool(), spec.entity_type, entity_id).await?)
    }

    async fn transition<T: Entity>(
        &self,
        id: &str,
        actor: &str,
        step: Step<'_>,
    ) -> Result<Record<T>, WorkflowError> {
        let actor = actor.trim();
        if actor.is_empty() {
            return Err(WorkflowError::Unauthorized(step.verb()));
        }
        let spec = entity_spec::<T>()?;
        let not_found = |id: &str| WorkflowError::NotFound {
            table: T::TABLE.to_string(),
            id: id.to_string(),
        };

        let mut tx = self.store.begin(WriteOrigin::local(actor)).await?;
        let mut raw = tx
            .get(T::TABLE, id)
            .await?
            .filter(|r| r.meta.active_ind)
            .ok_or_else(|| not_found(id))?;

        let from = raw.meta.row_status;
        let to = step.target();
        if !spec.family.allows(from, to) {
            return Err(WorkflowError::IllegalTransition { from, to });
        }

        let record: Record<T> = decode(raw.clone())?;
        match &step {
            Step::Submit => {
                can_submit_for_review(&record.data).into_business()?;
            }
            Step::Approve => {
                can_approve(&record.data).into_business()?;
                raw.meta.approved = true;
            }
            Step::Reject { .. } => raw.meta.approved = false,
            Step::Supersede { by } => {
                let replacement = tx.get(T::TABLE, by).await?;
                if *by == id || !replacement.is_some_and(|r| r.meta.active_ind) {
                    return Err(WorkflowError::MissingSuperseding {
                        table: T::TABLE.to_string(),
                        id: by.to_string(),
                    });
                }
                raw.meta.superseded_by = Some(by.to_string());
            }
            Step::Reopen => {}
        }

        raw.meta.row_status = to;
        let stored = tx.put(T::TABLE, raw).await?;

        let reason = match &step {
            Step::Reject { reason } => reason.map(str::trim).filter(|r| !r.is_empty()),
            _ => None,
        };
        history::append_history(tx.conn(), spec.entity_type, id, from, to, actor, reason).await?;
        if let Some(reason) = reason {
            history::append_comment(tx.conn(), spec.entity_type, id, actor, reason).await?;
        }
        tx.commit().await?;

        tracing::info!(
            table = T::TABLE,
            id,
            %from,
            %to,
            actor,
            "workflow transition"
        );
        decode(stored)
    }
}
