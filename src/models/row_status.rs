use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Workflow status of a record. Persisted and transmitted as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RowStatus {
    #[default]
    Draft,
    InReview,
    Approved,
    Rejected,
    Superseded,
}

impl RowStatus {
    pub const ALL: [RowStatus; 5] = [
        RowStatus::Draft,
        RowStatus::InReview,
        RowStatus::Approved,
        RowStatus::Rejected,
        RowStatus::Superseded,
    ];

    pub fn ordinal(self) -> i64 {
        match self {
            RowStatus::Draft => 0,
            RowStatus::InReview => 1,
            RowStatus::Approved => 2,
            RowStatus::Rejected => 3,
            RowStatus::Superseded => 4,
        }
    }

    pub fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(RowStatus::Draft),
            1 => Some(RowStatus::InReview),
            2 => Some(RowStatus::Approved),
            3 => Some(RowStatus::Rejected),
            4 => Some(RowStatus::Superseded),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RowStatus::Superseded)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Draft => write!(f, "draft"),
            RowStatus::InReview => write!(f, "in_review"),
            RowStatus::Approved => write!(f, "approved"),
            RowStatus::Rejected => write!(f, "rejected"),
            RowStatus::Superseded => write!(f, "superseded"),
        }
    }
}

impl FromStr for RowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "draft" | "0" => Ok(RowStatus::Draft),
            "in_review" | "inreview" | "review" | "1" => Ok(RowStatus::InReview),
            "approved" | "2" => Ok(RowStatus::Approved),
            "rejected" | "3" => Ok(RowStatus::Rejected),
            "superseded" | "4" => Ok(RowStatus::Superseded),
            _ => Err(format!(
                "Invalid status '{}'. Valid options: draft, in_review, approved, rejected, superseded",
                s
            )),
        }
    }
}

impl Serialize for RowStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.ordinal())
    }
}

impl<'de> Deserialize<'de> for RowStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        RowStatus::from_ordinal(value)
            .ok_or_else(|| serde::de::Error::custom(format!("undefined RowStatus {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_status_ordinals() {
        for status in RowStatus::ALL {
            assert_eq!(RowStatus::from_ordinal(status.ordinal()), Some(status));
        }
        assert_eq!(RowStatus::InReview.ordinal(), 1);
        assert_eq!(RowStatus::from_ordinal(5), None);
        assert_eq!(RowStatus::from_ordinal(-1), None);
    }

    #[test]
    fn test_row_status_from_str() {
        assert_eq!(RowStatus::from_str("DRAFT").unwrap(), RowStatus::Draft);
        assert_eq!(RowStatus::from_str("in-review").unwrap(), RowStatus::InReview);
        assert_eq!(RowStatus::from_str("2").unwrap(), RowStatus::Approved);
        assert!(RowStatus::from_str("archived").is_err());
    }

    #[test]
    fn test_row_status_serializes_as_ordinal() {
        let json = serde_json::to_string(&RowStatus::Rejected).unwrap();
        assert_eq!(json, "3");

        let parsed: RowStatus = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, RowStatus::Superseded);

        assert!(serde_json::from_str::<RowStatus>("9").is_err());
    }
}
