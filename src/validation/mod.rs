//! Two-tier validation.
//!
//! Tier 1 (structural) checks types, formats, ranges and enum membership and
//! runs on every store write, sync-applies included. Tier 2 (business) adds
//! cross-field rules and the fields a target workflow status requires; it runs
//! on workflow transitions and explicit business saves only.
//!
//! Every validator comes in two flavours: `validate_*` returns a
//! [`Validation`] for inline display, `parse_*` returns a `Result` carrying a
//! [`ValidationError`].

pub mod checks;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::models::{JsonMap, RowStatus};

/// One failed check, addressed by a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Accumulates field errors while a schema is checked.
#[derive(Debug, Default)]
pub struct Violations {
    errors: Vec<FieldError>,
}

impl Violations {
    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(path, message));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn extend(&mut self, other: Violations) {
        self.errors.extend(other.errors);
    }

    pub fn into_errors(self) -> Vec<FieldError> {
        self.errors
    }

    fn finish<T>(self, value: T) -> Validation<T> {
        if self.errors.is_empty() {
            Validation::Valid(value)
        } else {
            Validation::Invalid(self.errors)
        }
    }
}

/// Discriminated outcome of a validator.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation<T> {
    Valid(T),
    Invalid(Vec<FieldError>),
}

impl<T> Validation<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }

    pub fn errors(&self) -> &[FieldError] {
        match self {
            Validation::Valid(_) => &[],
            Validation::Invalid(errors) => errors,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Validation<U> {
        match self {
            Validation::Valid(value) => Validation::Valid(f(value)),
            Validation::Invalid(errors) => Validation::Invalid(errors),
        }
    }

    pub fn into_structural(self) -> Result<T, ValidationError> {
        match self {
            Validation::Valid(value) => Ok(value),
            Validation::Invalid(errors) => Err(ValidationError::Structural(errors)),
        }
    }

    pub fn into_business(self) -> Result<T, ValidationError> {
        match self {
            Validation::Valid(value) => Ok(value),
            Validation::Invalid(errors) => Err(ValidationError::Business(errors)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("structural validation failed: {}", join_errors(.0))]
    Structural(Vec<FieldError>),
    #[error("business validation failed: {}", join_errors(.0))]
    Business(Vec<FieldError>),
}

impl ValidationError {
    pub fn errors(&self) -> &[FieldError] {
        match self {
            ValidationError::Structural(errors) | ValidationError::Business(errors) => errors,
        }
    }

    /// True if any failure is reported against `path`.
    pub fn names_field(&self, path: &str) -> bool {
        self.errors().iter().any(|e| e.path == path)
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Shape and rules of an entity payload.
pub trait Schema: Sized {
    /// Canonical form: trimmed strings, upper-case codes.
    fn normalize(self) -> Self;

    /// Tier-1 checks.
    fn check_structure(&self, violations: &mut Violations);

    /// Tier-2 cross-field checks and the fields `target` requires.
    fn check_business(&self, target: RowStatus, violations: &mut Violations);

    /// Checks that only gate approval. They always run after the
    /// submit-for-review checks, never instead of them.
    fn check_approval(&self, _violations: &mut Violations) {}
}

pub fn validate_structural<T: Schema>(value: T) -> Validation<T> {
    let value = value.normalize();
    let mut violations = Violations::default();
    value.check_structure(&mut violations);
    violations.finish(value)
}

/// Tier 2 for `target`, always including Tier 1.
pub fn validate_business<T: Schema>(value: T, target: RowStatus) -> Validation<T> {
    let value = value.normalize();
    let mut violations = Violations::default();
    value.check_structure(&mut violations);
    value.check_business(target, &mut violations);
    violations.finish(value)
}

pub fn parse_structural<T: Schema>(value: T) -> Result<T, ValidationError> {
    validate_structural(value).into_structural()
}

/// Structural failures stay [`ValidationError::Structural`]; only a
/// structurally sound value can fail with [`ValidationError::Business`].
pub fn parse_business<T: Schema>(value: T, target: RowStatus) -> Result<T, ValidationError> {
    let value = parse_structural(value)?;
    validate_business(value, target).into_business()
}

/// Approval readiness: every submit-for-review check, then the approval
/// extras. Anything that fails submission therefore fails approval too.
pub fn validate_approval<T: Schema>(value: T) -> Validation<T> {
    let value = value.normalize();
    let mut violations = Violations::default();
    value.check_structure(&mut violations);
    value.check_business(RowStatus::InReview, &mut violations);
    value.check_approval(&mut violations);
    violations.finish(value)
}

/// Tier-1 validation of a JSON field bag against a known schema, returning
/// the normalized bag.
pub fn validate_fields<T>(fields: JsonMap) -> Validation<JsonMap>
where
    T: Schema + Serialize + DeserializeOwned,
{
    let value: T = match serde_json::from_value(Value::Object(fields)) {
        Ok(value) => value,
        Err(e) => return Validation::Invalid(vec![FieldError::new("$", e.to_string())]),
    };

    match validate_structural(value) {
        Validation::Valid(value) => match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Validation::Valid(map),
            Ok(_) => Validation::Invalid(vec![FieldError::new("$", "expected an object")]),
            Err(e) => Validation::Invalid(vec![FieldError::new("$", e.to_string())]),
        },
        Validation::Invalid(errors) => Validation::Invalid(errors),
    }
}
