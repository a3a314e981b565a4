use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Entity, ParentIds, RowStatus};
use crate::validation::{checks, Schema, Violations};

/// A logged depth interval down a hole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillInterval {
    pub collar_id: String,
    pub depth_from: f64,
    pub depth_to: f64,
    pub lith_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logged_by: Option<String>,
}

impl DrillInterval {
    pub fn new(
        collar_id: impl Into<String>,
        depth_from: f64,
        depth_to: f64,
        lith_code: impl Into<String>,
    ) -> Self {
        Self {
            collar_id: collar_id.into(),
            depth_from,
            depth_to,
            lith_code: lith_code.into(),
            description: None,
            logged_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_logged_by(mut self, logged_by: impl Into<String>) -> Self {
        self.logged_by = Some(logged_by.into());
        self
    }

    pub fn length(&self) -> f64 {
        self.depth_to - self.depth_from
    }
}

impl Schema for DrillInterval {
    fn normalize(mut self) -> Self {
        self.collar_id = self.collar_id.trim().to_string();
        self.lith_code = self.lith_code.trim().to_uppercase();
        self.description = self
            .description
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self.logged_by = self
            .logged_by
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    fn check_structure(&self, v: &mut Violations) {
        checks::id(v, "collarId", &self.collar_id);
        checks::non_negative(v, "depthFrom", self.depth_from);
        checks::non_negative(v, "depthTo", self.depth_to);
        checks::required(v, "lithCode", &self.lith_code);
        if self.lith_code.len() > 8 || !self.lith_code.chars().all(|c| c.is_ascii_alphanumeric())
        {
            v.push("lithCode", "must be at most 8 letters or digits");
        }
    }

    fn check_business(&self, target: RowStatus, v: &mut Violations) {
        if self.depth_from >= self.depth_to {
            v.push("depthFrom", "must be less than depthTo");
        }
        if matches!(target, RowStatus::InReview | RowStatus::Approved) {
            checks::required_opt(v, "loggedBy", self.logged_by.as_deref());
        }
    }

    fn check_approval(&self, v: &mut Violations) {
        checks::required_opt(v, "description", self.description.as_deref());
    }
}

impl Entity for DrillInterval {
    const TABLE: &'static str = "drill_intervals";

    fn parent_ids(&self) -> ParentIds {
        ParentIds {
            collar_id: Some(self.collar_id.clone()),
            program_id: None,
        }
    }
}

impl fmt::Display for DrillInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>8.2} - {:<8.2} {}",
            self.depth_from, self.depth_to, self.lith_code
        )?;
        if let Some(description) = &self.description {
            write!(f, "  {}", description)?;
        }
        Ok(())
    }
}
