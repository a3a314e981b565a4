//! Reusable Tier-1 checks.

use chrono::NaiveDate;

use super::Violations;

pub const MAX_ID_LEN: usize = 64;

pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn id(v: &mut Violations, path: &str, value: &str) {
    if !is_valid_id(value) {
        v.push(
            path,
            format!(
                "must be 1-{} characters of letters, digits, '-' or '_'",
                MAX_ID_LEN
            ),
        );
    }
}

pub fn required(v: &mut Violations, path: &str, value: &str) {
    if value.trim().is_empty() {
        v.push(path, "is required");
    }
}

pub fn required_opt(v: &mut Violations, path: &str, value: Option<&str>) {
    match value {
        Some(s) if !s.trim().is_empty() => {}
        _ => v.push(path, "is required"),
    }
}

pub fn date(v: &mut Violations, path: &str, value: Option<&str>) {
    if let Some(s) = value {
        if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
            v.push(path, format!("invalid date '{}', expected YYYY-MM-DD", s));
        }
    }
}

pub fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

pub fn finite(v: &mut Violations, path: &str, value: f64) -> bool {
    if value.is_finite() {
        true
    } else {
        v.push(path, "must be a finite number");
        false
    }
}

pub fn non_negative(v: &mut Violations, path: &str, value: f64) {
    if finite(v, path, value) && value < 0.0 {
        v.push(path, "must not be negative");
    }
}

/// Inclusive range check.
pub fn range(v: &mut Violations, path: &str, value: f64, min: f64, max: f64) {
    if finite(v, path, value) && (value < min || value > max) {
        v.push(path, format!("must be between {} and {}", min, max));
    }
}

pub fn member(v: &mut Violations, path: &str, value: &str, allowed: &[&str]) {
    if !allowed.contains(&value) {
        v.push(
            path,
            format!("'{}' is not one of: {}", value, allowed.join(", ")),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(v: Violations) -> Vec<String> {
        v.into_errors().into_iter().map(|e| e.path).collect()
    }

    #[test]
    fn test_id_format() {
        assert!(is_valid_id("COL-001_a"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id(&"x".repeat(65)));
    }

    #[test]
    fn test_date_format() {
        let mut v = Violations::default();
        date(&mut v, "start_date", Some("2025-02-30"));
        date(&mut v, "end_date", Some("2025-03-01"));
        date(&mut v, "other", None);
        assert_eq!(paths(v), vec!["start_date"]);
    }

    #[test]
    fn test_range_and_finite() {
        let mut v = Violations::default();
        range(&mut v, "dip", -90.0, -90.0, 90.0);
        range(&mut v, "azimuth", 360.5, 0.0, 360.0);
        non_negative(&mut v, "depth", f64::NAN);
        assert_eq!(paths(v), vec!["azimuth", "depth"]);
    }

    #[test]
    fn test_member() {
        let mut v = Violations::default();
        member(&mut v, "hole_type", "RC", &["DD", "RC"]);
        member(&mut v, "hole_type", "XX", &["DD", "RC"]);
        let errors = v.into_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("DD, RC"));
    }
}
