use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical category ids understood by the coherence constraints.
pub mod ids {
    pub const HOME_SCORE: &str = "home_score";
    pub const AWAY_SCORE: &str = "away_score";
    pub const TOTAL_SCORE: &str = "total_score";
    pub const Q1_TOTAL: &str = "q1_total";
    pub const Q2_TOTAL: &str = "q2_total";
    pub const Q3_TOTAL: &str = "q3_total";
    pub const Q4_TOTAL: &str = "q4_total";
    pub const FIRST_HALF_TOTAL: &str = "first_half_total";
    pub const SECOND_HALF_TOTAL: &str = "second_half_total";
    pub const HOME_WIN_PROBABILITY: &str = "home_win_probability";
    pub const AWAY_WIN_PROBABILITY: &str = "away_win_probability";
    pub const SPREAD_PREDICTION: &str = "spread_prediction";
    pub const WINNER_PREDICTION: &str = "winner_prediction";
    pub const OVER_UNDER: &str = "over_under";

    pub const QUARTERS: [&str; 4] = [Q1_TOTAL, Q2_TOTAL, Q3_TOTAL, Q4_TOTAL];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Numeric,
    Categorical,
    Other,
}

/// What a numeric category measures; selects its projection bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericScale {
    Score,
    Probability,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub category_id: String,
    pub data_type: DataType,
    #[serde(default)]
    pub scale: NumericScale,
}

impl CategorySpec {
    pub fn new(category_id: impl Into<String>, data_type: DataType, scale: NumericScale) -> Self {
        Self {
            category_id: category_id.into(),
            data_type,
            scale,
        }
    }
}

/// Upstream mapping from category id to declared type.
#[cfg_attr(test, mockall::automock)]
pub trait CategoryRegistry: Send + Sync {
    fn spec(&self, category_id: &str) -> Option<CategorySpec>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    specs: HashMap<String, CategorySpec>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the standard game categories.
    pub fn standard() -> Self {
        let mut registry = Self::new();

        for id in [
            ids::HOME_SCORE,
            ids::AWAY_SCORE,
            ids::TOTAL_SCORE,
            ids::Q1_TOTAL,
            ids::Q2_TOTAL,
            ids::Q3_TOTAL,
            ids::Q4_TOTAL,
            ids::FIRST_HALF_TOTAL,
            ids::SECOND_HALF_TOTAL,
        ] {
            registry.register(CategorySpec::new(id, DataType::Numeric, NumericScale::Score));
        }

        for id in [ids::HOME_WIN_PROBABILITY, ids::AWAY_WIN_PROBABILITY] {
            registry.register(CategorySpec::new(
                id,
                DataType::Numeric,
                NumericScale::Probability,
            ));
        }

        registry.register(CategorySpec::new(
            ids::SPREAD_PREDICTION,
            DataType::Numeric,
            NumericScale::Other,
        ));

        for id in [ids::WINNER_PREDICTION, ids::OVER_UNDER] {
            registry.register(CategorySpec::new(
                id,
                DataType::Categorical,
                NumericScale::Other,
            ));
        }

        registry
    }

    pub fn register(&mut self, spec: CategorySpec) {
        self.specs.insert(spec.category_id.clone(), spec);
    }

    pub fn with(mut self, spec: CategorySpec) -> Self {
        self.register(spec);
        self
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl CategoryRegistry for StaticRegistry {
    fn spec(&self, category_id: &str) -> Option<CategorySpec> {
        self.specs.get(category_id).cloned()
    }
}
