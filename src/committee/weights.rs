use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::{CommitteeMember, Trend};
use crate::core::config::{TrendScores, WeightCoefficients};

const NEUTRAL_ACCURACY: f64 = 0.5;
const NEUTRAL_TREND: Trend = Trend::Stable;
const NEUTRAL_CONFIDENCE: f64 = 0.5;
const NEUTRAL_TENURE: u32 = 1;

/// Tenure saturates once log(tenure + 1) reaches log(10).
const TENURE_SATURATION: f64 = 10.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightComponents {
    pub accuracy: f64,
    pub recency: f64,
    pub confidence: f64,
    pub tenure: f64,
}

impl WeightComponents {
    pub fn total(&self) -> f64 {
        self.accuracy + self.recency + self.confidence + self.tenure
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberWeight {
    pub member_id: String,
    pub normalized_weight: f64,
    pub raw_weight: f64,
    pub components: WeightComponents,
    /// True when at least one input was missing or unusable.
    pub defaults_applied: bool,
}

/// Normalized voting weights for one committee, one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub weights: Vec<MemberWeight>,
    /// Set when every raw weight was zero and equal weights were used.
    pub equal_weight_fallback: bool,
}

impl WeightTable {
    /// Table from already-normalized weights, for callers that rank
    /// members elsewhere.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let weights = pairs
            .into_iter()
            .map(|(id, weight)| MemberWeight {
                member_id: id.into(),
                normalized_weight: weight,
                raw_weight: weight,
                components: WeightComponents::default(),
                defaults_applied: false,
            })
            .collect();

        Self {
            weights,
            equal_weight_fallback: false,
        }
    }

    pub fn weight_of(&self, member_id: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|w| w.member_id == member_id)
            .map(|w| w.normalized_weight)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemberWeight> {
        self.weights.iter()
    }

    pub fn total(&self) -> f64 {
        self.weights.iter().map(|w| w.normalized_weight).sum()
    }
}

/// Turns committee track records into voting weights that sum to 1.
#[derive(Debug, Clone, Default)]
pub struct WeightEngine {
    coefficients: WeightCoefficients,
    trend_scores: TrendScores,
}

impl WeightEngine {
    pub fn new(coefficients: WeightCoefficients, trend_scores: TrendScores) -> Self {
        Self {
            coefficients,
            trend_scores,
        }
    }

    pub fn compute_weights(
        &self,
        members: &[CommitteeMember],
        confidences: &HashMap<String, f64>,
    ) -> WeightTable {
        let mut seen = HashSet::new();
        let mut weights = Vec::with_capacity(members.len());

        for member in members {
            if !seen.insert(member.id.as_str()) {
                tracing::warn!("Duplicate committee member '{}' ignored", member.id);
                continue;
            }

            let (components, defaults_applied) =
                self.components_for(member, confidences.get(&member.id).copied());

            if defaults_applied {
                tracing::warn!(
                    "⚠️  Member '{}' has missing or invalid fields, neutral defaults applied",
                    member.id
                );
            }

            let raw_weight = components.total();
            weights.push(MemberWeight {
                member_id: member.id.clone(),
                normalized_weight: 0.0,
                raw_weight,
                components,
                defaults_applied,
            });
        }

        if weights.is_empty() {
            return WeightTable::default();
        }

        let raw_total: f64 = weights.iter().map(|w| w.raw_weight).sum();
        let equal_weight_fallback = !(raw_total > 0.0 && raw_total.is_finite());

        if equal_weight_fallback {
            let share = 1.0 / weights.len() as f64;
            tracing::warn!(
                "Degenerate committee weights (sum={}), falling back to equal weights of {:.4}",
                raw_total,
                share
            );
            for w in &mut weights {
                w.normalized_weight = share;
            }
        } else {
            for w in &mut weights {
                w.normalized_weight = w.raw_weight / raw_total;
            }
        }

        tracing::debug!(
            "Computed weights for {} members (raw sum {:.4})",
            weights.len(),
            raw_total
        );

        WeightTable {
            weights,
            equal_weight_fallback,
        }
    }

    fn components_for(
        &self,
        member: &CommitteeMember,
        confidence: Option<f64>,
    ) -> (WeightComponents, bool) {
        let mut defaults_applied = false;

        let accuracy = match member.accuracy {
            Some(a) if a.is_finite() => a.clamp(0.0, 1.0),
            _ => {
                defaults_applied = true;
                NEUTRAL_ACCURACY
            }
        };

        let trend = member.recent_trend.unwrap_or_else(|| {
            defaults_applied = true;
            NEUTRAL_TREND
        });

        let confidence = match confidence {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            _ => {
                defaults_applied = true;
                NEUTRAL_CONFIDENCE
            }
        };

        let tenure = member.tenure.unwrap_or_else(|| {
            defaults_applied = true;
            NEUTRAL_TENURE
        });

        let c = &self.coefficients;
        let components = WeightComponents {
            accuracy: ((accuracy - 0.5) * 2.0).max(0.0) * c.accuracy,
            recency: self.trend_score(trend) * c.recency,
            confidence: confidence * c.confidence,
            tenure: tenure_factor(tenure) * c.tenure,
        };

        (components, defaults_applied)
    }

    fn trend_score(&self, trend: Trend) -> f64 {
        match trend {
            Trend::Improving => self.trend_scores.improving,
            Trend::Stable => self.trend_scores.stable,
            Trend::Declining => self.trend_scores.declining,
        }
    }
}

fn tenure_factor(tenure: u32) -> f64 {
    ((tenure as f64 + 1.0).ln() / TENURE_SATURATION.ln()).min(1.0)
}
