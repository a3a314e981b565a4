use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Entity, ParentIds, RowStatus};
use crate::validation::{checks, Schema, Violations};

/// Accepted drilling methods.
pub const HOLE_TYPES: &[&str] = &["DD", "RC", "RAB", "AC"];

/// A surveyed position of the collar in one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub grid: String,
    pub easting: f64,
    pub northing: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub is_primary: bool,
}

impl Coordinate {
    pub fn new(grid: impl Into<String>, easting: f64, northing: f64) -> Self {
        Self {
            grid: grid.into(),
            easting,
            northing,
            elevation: None,
            is_primary: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }
}

/// The surface location and header data of a drill hole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collar {
    pub hole_id: String,
    #[serde(default)]
    pub program_id: Option<String>,
    pub hole_type: String,
    #[serde(default)]
    pub coordinates: Vec<Coordinate>,
    /// Degrees, negative is down.
    #[serde(default = "default_dip")]
    pub dip: f64,
    #[serde(default)]
    pub azimuth: f64,
    #[serde(default)]
    pub planned_depth: Option<f64>,
    #[serde(default)]
    pub total_depth: Option<f64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub geologist: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

fn default_dip() -> f64 {
    -90.0
}

impl Collar {
    pub fn new(hole_id: impl Into<String>, hole_type: impl Into<String>) -> Self {
        Self {
            hole_id: hole_id.into(),
            program_id: None,
            hole_type: hole_type.into(),
            coordinates: Vec::new(),
            dip: default_dip(),
            azimuth: 0.0,
            planned_depth: None,
            total_depth: None,
            start_date: None,
            end_date: None,
            geologist: None,
            comments: None,
        }
    }

    pub fn with_program(mut self, program_id: impl Into<String>) -> Self {
        self.program_id = Some(program_id.into());
        self
    }

    pub fn with_coordinate(mut self, coordinate: Coordinate) -> Self {
        self.coordinates.push(coordinate);
        self
    }

    pub fn with_orientation(mut self, dip: f64, azimuth: f64) -> Self {
        self.dip = dip;
        self.azimuth = azimuth;
        self
    }

    pub fn with_total_depth(mut self, depth: f64) -> Self {
        self.total_depth = Some(depth);
        self
    }

    pub fn with_dates(mut self, start: impl Into<String>, end: Option<String>) -> Self {
        self.start_date = Some(start.into());
        self.end_date = end;
        self
    }

    pub fn with_geologist(mut self, geologist: impl Into<String>) -> Self {
        self.geologist = Some(geologist.into());
        self
    }

    pub fn primary_coordinate(&self) -> Option<&Coordinate> {
        self.coordinates.iter().find(|c| c.is_primary)
    }
}

fn trim_opt(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Schema for Collar {
    fn normalize(mut self) -> Self {
        self.hole_id = self.hole_id.trim().to_string();
        self.hole_type = self.hole_type.trim().to_uppercase();
        self.program_id = trim_opt(self.program_id);
        self.start_date = trim_opt(self.start_date);
        self.end_date = trim_opt(self.end_date);
        self.geologist = trim_opt(self.geologist);
        self.comments = trim_opt(self.comments);
        for coordinate in &mut self.coordinates {
            coordinate.grid = coordinate.grid.trim().to_uppercase();
        }
        self
    }

    fn check_structure(&self, v: &mut Violations) {
        checks::required(v, "holeId", &self.hole_id);
        checks::member(v, "holeType", &self.hole_type, HOLE_TYPES);
        if let Some(program_id) = &self.program_id {
            checks::id(v, "programId", program_id);
        }
        checks::range(v, "dip", self.dip, -90.0, 90.0);
        checks::range(v, "azimuth", self.azimuth, 0.0, 360.0);
        if let Some(depth) = self.planned_depth {
            checks::non_negative(v, "plannedDepth", depth);
        }
        if let Some(depth) = self.total_depth {
            checks::non_negative(v, "totalDepth", depth);
        }
        checks::date(v, "startDate", self.start_date.as_deref());
        checks::date(v, "endDate", self.end_date.as_deref());
        for (i, c) in self.coordinates.iter().enumerate() {
            checks::required(v, &format!("coordinates[{}].grid", i), &c.grid);
            checks::finite(v, &format!("coordinates[{}].easting", i), c.easting);
            checks::finite(v, &format!("coordinates[{}].northing", i), c.northing);
            if let Some(elevation) = c.elevation {
                checks::finite(v, &format!("coordinates[{}].elevation", i), elevation);
            }
        }
    }

    fn check_business(&self, target: RowStatus, v: &mut Violations) {
        let primaries = self.coordinates.iter().filter(|c| c.is_primary).count();
        if primaries != 1 {
            v.push(
                "coordinates",
                format!("exactly one primary coordinate required, found {}", primaries),
            );
        }

        if let (Some(start), Some(end)) = (
            checks::parse_date(self.start_date.as_deref()),
            checks::parse_date(self.end_date.as_deref()),
        ) {
            if start > end {
                v.push("endDate", "must not be before startDate");
            }
        }

        if matches!(target, RowStatus::InReview | RowStatus::Approved) {
            checks::required_opt(v, "programId", self.program_id.as_deref());
            checks::required_opt(v, "geologist", self.geologist.as_deref());
            checks::required_opt(v, "startDate", self.start_date.as_deref());
            if self.total_depth.is_none() {
                v.push("totalDepth", "is required");
            }
        }
    }

    fn check_approval(&self, v: &mut Violations) {
        checks::required_opt(v, "endDate", self.end_date.as_deref());
        if matches!(self.total_depth, Some(depth) if depth <= 0.0) {
            v.push("totalDepth", "must be greater than zero before approval");
        }
    }
}

impl Entity for Collar {
    const TABLE: &'static str = "collars";

    fn parent_ids(&self) -> ParentIds {
        ParentIds {
            collar_id: None,
            program_id: self.program_id.clone(),
        }
    }
}

impl fmt::Display for Collar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.hole_id, self.hole_type)?;
        if let Some(program_id) = &self.program_id {
            writeln!(f, "Program: {}", program_id)?;
        }
        if let Some(c) = self.primary_coordinate() {
            writeln!(f, "Location: {} E {} N [{}]", c.easting, c.northing, c.grid)?;
        }
        writeln!(f, "Dip/Azimuth: {}/{}", self.dip, self.azimuth)?;
        if let Some(depth) = self.total_depth {
            writeln!(f, "Total depth: {} m", depth)?;
        }
        if let Some(geologist) = &self.geologist {
            writeln!(f, "Geologist: {}", geologist)?;
        }
        Ok(())
    }
}
