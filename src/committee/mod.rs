pub mod weights;

pub use weights::{MemberWeight, WeightComponents, WeightEngine, WeightTable};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Direction of a member's recent form, as reported by the ranking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Declining => write!(f, "declining"),
        }
    }
}

/// Read-only view of a committee member's track record.
///
/// Every field except the id may be absent or malformed; the weight engine
/// substitutes neutral defaults instead of rejecting the member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub accuracy: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub recent_trend: Option<Trend>,
    #[serde(default, deserialize_with = "lenient")]
    pub tenure: Option<u32>,
}

/// Reads any JSON value and keeps it only if it parses as `T`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

impl CommitteeMember {
    pub fn new(id: impl Into<String>, accuracy: f64, recent_trend: Trend, tenure: u32) -> Self {
        Self {
            id: id.into(),
            accuracy: Some(accuracy),
            recent_trend: Some(recent_trend),
            tenure: Some(tenure),
        }
    }

    /// Member with no track record at all.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            accuracy: None,
            recent_trend: None,
            tenure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_fields_become_absent() {
        let member: CommitteeMember = serde_json::from_str(
            r#"{"id": "m1", "accuracy": "high", "recent_trend": "hot", "tenure": -1}"#,
        )
        .unwrap();
        assert_eq!(member, CommitteeMember::unknown("m1"));
    }

    #[test]
    fn test_valid_fields_survive_alongside_bad_ones() {
        let member: CommitteeMember = serde_json::from_str(
            r#"{"id": "m2", "accuracy": 0.7, "recent_trend": "declining", "tenure": 2.5}"#,
        )
        .unwrap();
        assert_eq!(member.accuracy, Some(0.7));
        assert_eq!(member.recent_trend, Some(Trend::Declining));
        assert_eq!(member.tenure, None);
    }

    #[test]
    fn test_missing_id_is_still_an_error() {
        assert!(serde_json::from_str::<CommitteeMember>(r#"{"accuracy": 0.7}"#).is_err());
    }
}
