//! Compile-time registry of tracked tables.

use crate::models::{Collar, DrillInterval, Entity, JsonMap};
use crate::validation::{validate_fields, Validation};
use crate::workflow::WorkflowFamily;

/// Which directions a table syncs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingPolicy {
    /// Local edits are pushed and server changes are pulled.
    Bidirectional,
    /// Server-owned reference data; local writes are refused.
    PullOnly,
}

/// How a table's payload is checked.
#[derive(Debug, Clone, Copy)]
pub enum SchemaKind {
    /// Typed entity: payload must deserialize and pass Tier-1 checks.
    Known(fn(JsonMap) -> Validation<JsonMap>),
    /// Loosely typed lookup rows kept as an untyped field bag.
    RawBag,
}

#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub entity_type: &'static str,
    pub family: WorkflowFamily,
    pub policy: TrackingPolicy,
    pub schema: SchemaKind,
}

impl TableSpec {
    /// Tier-1 check and normalization of a payload bound for this table.
    pub fn validate(&self, fields: JsonMap) -> Validation<JsonMap> {
        match self.schema {
            SchemaKind::Known(validate) => validate(fields),
            SchemaKind::RawBag => Validation::Valid(fields),
        }
    }

    pub fn is_pushable(&self) -> bool {
        self.policy == TrackingPolicy::Bidirectional
    }
}

pub static TRACKED_TABLES: &[TableSpec] = &[
    TableSpec {
        name: Collar::TABLE,
        entity_type: "Collar",
        family: WorkflowFamily::Review,
        policy: TrackingPolicy::Bidirectional,
        schema: SchemaKind::Known(validate_fields::<Collar>),
    },
    TableSpec {
        name: DrillInterval::TABLE,
        entity_type: "DrillInterval",
        family: WorkflowFamily::Review,
        policy: TrackingPolicy::Bidirectional,
        schema: SchemaKind::Known(validate_fields::<DrillInterval>),
    },
    TableSpec {
        name: "lookup_codes",
        entity_type: "LookupCode",
        family: WorkflowFamily::Reference,
        policy: TrackingPolicy::PullOnly,
        schema: SchemaKind::RawBag,
    },
];

pub fn table_spec(name: &str) -> Option<&'static TableSpec> {
    TRACKED_TABLES.iter().find(|spec| spec.name == name)
}

pub fn pushable_tables() -> impl Iterator<Item = &'static TableSpec> {
    TRACKED_TABLES.iter().filter(|spec| spec.is_pushable())
}
