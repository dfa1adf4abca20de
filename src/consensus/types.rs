use serde::{Deserialize, Serialize};
use std::fmt;

use super::registry::DataType;

/// A single reported value. Booleans and numbers stay distinct; dispatch
/// never inspects the variant to decide how a category is aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpinionValue {
    Flag(bool),
    Number(f64),
    Label(String),
    Opaque(serde_json::Value),
}

impl OpinionValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            OpinionValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    /// Canonical key used to pool votes for the same choice.
    pub fn category_key(&self) -> Option<String> {
        match self {
            OpinionValue::Flag(b) => Some(b.to_string()),
            OpinionValue::Number(n) if n.is_finite() => Some(n.to_string()),
            OpinionValue::Label(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for OpinionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpinionValue::Flag(b) => write!(f, "{}", b),
            OpinionValue::Number(n) => write!(f, "{:.3}", n),
            OpinionValue::Label(s) => write!(f, "{}", s),
            OpinionValue::Opaque(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for OpinionValue {
    fn from(value: f64) -> Self {
        OpinionValue::Number(value)
    }
}

impl From<bool> for OpinionValue {
    fn from(value: bool) -> Self {
        OpinionValue::Flag(value)
    }
}

impl From<&str> for OpinionValue {
    fn from(value: &str) -> Self {
        OpinionValue::Label(value.to_string())
    }
}

/// One member's call on one category for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub member_id: String,
    pub category_id: String,
    pub value: OpinionValue,
    pub confidence: f64,
    /// Declared type of the category, as tagged by the producer.
    #[serde(default)]
    pub data_type: Option<DataType>,
}

impl Opinion {
    pub fn new(
        member_id: impl Into<String>,
        category_id: impl Into<String>,
        value: impl Into<OpinionValue>,
        confidence: f64,
    ) -> Self {
        Self {
            member_id: member_id.into(),
            category_id: category_id.into(),
            value: value.into(),
            confidence,
            data_type: None,
        }
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    WeightedMean,
    WeightedVote,
    HighestConviction,
    None,
}

impl fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusMethod::WeightedMean => write!(f, "weighted_mean"),
            ConsensusMethod::WeightedVote => write!(f, "weighted_vote"),
            ConsensusMethod::HighestConviction => write!(f, "highest_conviction"),
            ConsensusMethod::None => write!(f, "none"),
        }
    }
}

/// Committee consensus for one category of one game.
///
/// `consensus_value == None` means "not actionable", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAggregate {
    pub category_id: String,
    pub data_type: DataType,
    pub consensus_value: Option<OpinionValue>,
    pub confidence_score: f64,
    pub agreement_level: f64,
    pub total_weight: f64,
    pub participating_member_count: usize,
    pub method_used: ConsensusMethod,
}

impl CategoryAggregate {
    pub fn empty(category_id: impl Into<String>, data_type: DataType) -> Self {
        Self {
            category_id: category_id.into(),
            data_type,
            consensus_value: None,
            confidence_score: 0.0,
            agreement_level: 0.0,
            total_weight: 0.0,
            participating_member_count: 0,
            method_used: ConsensusMethod::None,
        }
    }

    /// Numeric aggregate with full agreement, handy for feeding the projector
    /// values produced elsewhere.
    pub fn numeric(category_id: impl Into<String>, value: f64) -> Self {
        Self {
            category_id: category_id.into(),
            data_type: DataType::Numeric,
            consensus_value: Some(OpinionValue::Number(value)),
            confidence_score: 1.0,
            agreement_level: 1.0,
            total_weight: 1.0,
            participating_member_count: 1,
            method_used: ConsensusMethod::WeightedMean,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.consensus_value.is_some()
    }

    /// Value eligible for coherence projection.
    pub fn numeric_value(&self) -> Option<f64> {
        if self.data_type != DataType::Numeric {
            return None;
        }
        self.consensus_value.as_ref().and_then(OpinionValue::as_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_values_keep_their_kind() {
        let flag: OpinionValue = serde_json::from_str("true").unwrap();
        let number: OpinionValue = serde_json::from_str("1").unwrap();
        let label: OpinionValue = serde_json::from_str("\"home\"").unwrap();
        let opaque: OpinionValue = serde_json::from_str(r#"{"pick": "home"}"#).unwrap();

        assert_eq!(flag, OpinionValue::Flag(true));
        assert_eq!(number, OpinionValue::Number(1.0));
        assert_eq!(label, OpinionValue::Label("home".to_string()));
        assert!(matches!(opaque, OpinionValue::Opaque(_)));

        assert_eq!(flag.as_number(), None);
        assert_eq!(flag.category_key().as_deref(), Some("true"));
        assert_eq!(opaque.category_key(), None);
    }

    #[test]
    fn test_numeric_value_respects_data_type() {
        let mut aggregate = CategoryAggregate::numeric("home_score", 24.0);
        assert_eq!(aggregate.numeric_value(), Some(24.0));

        aggregate.data_type = DataType::Categorical;
        assert_eq!(aggregate.numeric_value(), None);

        let empty = CategoryAggregate::empty("home_score", DataType::Numeric);
        assert!(!empty.is_actionable());
        assert_eq!(empty.method_used.to_string(), "none");
    }
}
