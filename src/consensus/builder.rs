use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::registry::{CategoryRegistry, DataType};
use super::types::{CategoryAggregate, ConsensusMethod, Opinion, OpinionValue};
use crate::committee::WeightTable;

const NEUTRAL_CONFIDENCE: f64 = 0.5;
const FALLBACK_AGREEMENT: f64 = 0.5;
const EPSILON: f64 = 1e-12;

/// Opinion admitted to aggregation with its effective voting weight.
#[derive(Debug, Clone)]
struct Vote<'a> {
    opinion: &'a Opinion,
    weight: f64,
    confidence: f64,
}

#[derive(Debug, Default)]
struct Tally<'a> {
    mass: f64,
    weighted_confidence: f64,
    confidence_sum: f64,
    supporters: usize,
    representative: Option<&'a OpinionValue>,
}

impl Tally<'_> {
    fn mean_confidence(&self) -> f64 {
        if self.supporters == 0 {
            0.0
        } else {
            self.confidence_sum / self.supporters as f64
        }
    }
}

/// Aggregates weighted opinions into one `CategoryAggregate` per category.
#[derive(Clone)]
pub struct ConsensusBuilder {
    registry: Arc<dyn CategoryRegistry>,
}

impl ConsensusBuilder {
    pub fn new(registry: Arc<dyn CategoryRegistry>) -> Self {
        Self { registry }
    }

    pub fn build_consensus(
        &self,
        opinions: &[Opinion],
        weights: &WeightTable,
        category_id: &str,
    ) -> CategoryAggregate {
        let relevant: Vec<&Opinion> = opinions
            .iter()
            .filter(|o| o.category_id == category_id)
            .collect();

        let data_type = self.resolve_data_type(category_id, &relevant);
        let votes = Self::collect_votes(&relevant, weights, data_type, category_id);

        if votes.is_empty() {
            tracing::debug!("No usable opinions for '{}'", category_id);
            return CategoryAggregate::empty(category_id, data_type);
        }

        let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
        let votes = Self::effective_votes(votes, category_id);

        let aggregate = match data_type {
            DataType::Numeric => Self::numeric_consensus(category_id, &votes),
            DataType::Categorical => Self::categorical_consensus(category_id, &votes),
            DataType::Other => Self::conviction_consensus(category_id, &votes),
        };

        let aggregate = CategoryAggregate {
            total_weight,
            participating_member_count: votes.len(),
            ..aggregate
        };

        tracing::debug!(
            "📊 {} [{}]: value={} confidence={:.3} agreement={:.3} members={}",
            aggregate.category_id,
            aggregate.method_used,
            aggregate
                .consensus_value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string()),
            aggregate.confidence_score,
            aggregate.agreement_level,
            aggregate.participating_member_count
        );

        aggregate
    }

    /// Registry first, then the producers' own tag, then `Other`.
    fn resolve_data_type(&self, category_id: &str, opinions: &[&Opinion]) -> DataType {
        if let Some(spec) = self.registry.spec(category_id) {
            return spec.data_type;
        }
        opinions
            .iter()
            .find_map(|o| o.data_type)
            .unwrap_or(DataType::Other)
    }

    fn collect_votes<'a>(
        opinions: &[&'a Opinion],
        weights: &WeightTable,
        data_type: DataType,
        category_id: &str,
    ) -> Vec<Vote<'a>> {
        let lookup: HashMap<&str, f64> = weights
            .iter()
            .map(|w| (w.member_id.as_str(), w.normalized_weight))
            .collect();
        let mut seen = HashSet::new();
        let mut votes = Vec::with_capacity(opinions.len());

        for &opinion in opinions {
            if !seen.insert(opinion.member_id.as_str()) {
                tracing::warn!(
                    "Duplicate opinion from '{}' on '{}' ignored",
                    opinion.member_id,
                    category_id
                );
                continue;
            }

            if let Some(tagged) = opinion.data_type {
                if tagged != data_type {
                    tracing::warn!(
                        "Opinion from '{}' tagged {:?} but '{}' is declared {:?}, skipped",
                        opinion.member_id,
                        tagged,
                        category_id,
                        data_type
                    );
                    continue;
                }
            }

            let admissible = match data_type {
                DataType::Numeric => opinion.value.as_number().is_some(),
                DataType::Categorical => opinion.value.category_key().is_some(),
                DataType::Other => true,
            };
            if !admissible {
                tracing::warn!(
                    "Opinion from '{}' on '{}' has a value unusable as {:?}, skipped",
                    opinion.member_id,
                    category_id,
                    data_type
                );
                continue;
            }

            let weight = lookup
                .get(opinion.member_id.as_str())
                .copied()
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(0.0);

            let confidence = if opinion.confidence.is_finite() {
                opinion.confidence.clamp(0.0, 1.0)
            } else {
                NEUTRAL_CONFIDENCE
            };

            votes.push(Vote {
                opinion,
                weight,
                confidence,
            });
        }

        votes
    }

    /// Equal weights among participants when none of them carries weight.
    fn effective_votes<'a>(mut votes: Vec<Vote<'a>>, category_id: &str) -> Vec<Vote<'a>> {
        let mass: f64 = votes.iter().map(|v| v.weight).sum();
        if mass <= 0.0 {
            tracing::warn!(
                "Participants on '{}' carry no committee weight, using equal weights",
                category_id
            );
            let share = 1.0 / votes.len() as f64;
            for vote in &mut votes {
                vote.weight = share;
            }
        }
        votes
    }

    fn numeric_consensus(category_id: &str, votes: &[Vote<'_>]) -> CategoryAggregate {
        let points: Vec<(f64, f64, f64)> = votes
            .iter()
            .filter_map(|v| v.opinion.value.as_number().map(|x| (x, v.weight, v.confidence)))
            .collect();

        let mass: f64 = points.iter().map(|(_, w, _)| w).sum();
        let min = points.iter().map(|(x, _, _)| *x).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(|(x, _, _)| *x).fold(f64::NEG_INFINITY, f64::max);

        let mean = points.iter().map(|(x, w, _)| x * w).sum::<f64>() / mass;
        let confidence = points.iter().map(|(_, w, c)| c * w).sum::<f64>() / mass;

        let values: Vec<f64> = points.iter().map(|(x, _, _)| *x).collect();

        CategoryAggregate {
            category_id: category_id.to_string(),
            data_type: DataType::Numeric,
            // Summation error must not push the mean outside the reported range.
            consensus_value: Some(OpinionValue::Number(mean.clamp(min, max))),
            confidence_score: confidence.clamp(0.0, 1.0),
            agreement_level: agreement_from_dispersion(&values),
            total_weight: mass,
            participating_member_count: points.len(),
            method_used: ConsensusMethod::WeightedMean,
        }
    }

    fn categorical_consensus<'a>(category_id: &str, votes: &[Vote<'a>]) -> CategoryAggregate {
        let mut tallies: BTreeMap<String, Tally<'a>> = BTreeMap::new();

        for vote in votes {
            let opinion: &'a Opinion = vote.opinion;
            let Some(key) = opinion.value.category_key() else {
                continue;
            };
            let tally = tallies.entry(key).or_default();
            tally.mass += vote.weight;
            tally.weighted_confidence += vote.weight * vote.confidence;
            tally.confidence_sum += vote.confidence;
            tally.supporters += 1;
            tally.representative.get_or_insert(&opinion.value);
        }

        let total_mass: f64 = tallies.values().map(|t| t.mass).sum();

        // BTreeMap order makes the lexicographic tie-break implicit: a later
        // key only wins on strictly more mass or confidence.
        let mut winner: Option<(&String, &Tally<'a>)> = None;
        for (key, tally) in &tallies {
            winner = match winner {
                None => Some((key, tally)),
                Some(current) => match compare_tallies(tally, current.1) {
                    Ordering::Greater => Some((key, tally)),
                    _ => Some(current),
                },
            };
        }

        let Some((key, tally)) = winner else {
            return CategoryAggregate::empty(category_id, DataType::Categorical);
        };

        let agreement = if total_mass > 0.0 {
            tally.mass / total_mass
        } else {
            0.0
        };
        let confidence = if tally.mass > 0.0 {
            tally.weighted_confidence / tally.mass
        } else {
            tally.mean_confidence()
        };

        tracing::trace!(
            "'{}' vote: '{}' wins with {:.3} of {:.3} mass",
            category_id,
            key,
            tally.mass,
            total_mass
        );

        CategoryAggregate {
            category_id: category_id.to_string(),
            data_type: DataType::Categorical,
            consensus_value: tally.representative.cloned(),
            confidence_score: confidence.clamp(0.0, 1.0),
            agreement_level: agreement.clamp(0.0, 1.0),
            total_weight: total_mass,
            participating_member_count: votes.len(),
            method_used: ConsensusMethod::WeightedVote,
        }
    }

    fn conviction_consensus(category_id: &str, votes: &[Vote<'_>]) -> CategoryAggregate {
        let mut best: Option<&Vote<'_>> = None;
        for vote in votes {
            let conviction = vote.confidence * vote.weight;
            match best {
                Some(b) if conviction <= b.confidence * b.weight => {}
                _ => best = Some(vote),
            }
        }

        let Some(best) = best else {
            return CategoryAggregate::empty(category_id, DataType::Other);
        };

        CategoryAggregate {
            category_id: category_id.to_string(),
            data_type: DataType::Other,
            consensus_value: Some(best.opinion.value.clone()),
            confidence_score: best.confidence,
            agreement_level: FALLBACK_AGREEMENT,
            total_weight: votes.iter().map(|v| v.weight).sum(),
            participating_member_count: votes.len(),
            method_used: ConsensusMethod::HighestConviction,
        }
    }
}

fn compare_tallies(a: &Tally<'_>, b: &Tally<'_>) -> Ordering {
    if (a.mass - b.mass).abs() > EPSILON {
        return a.mass.partial_cmp(&b.mass).unwrap_or(Ordering::Equal);
    }
    let (ca, cb) = (a.mean_confidence(), b.mean_confidence());
    if (ca - cb).abs() > EPSILON {
        return ca.partial_cmp(&cb).unwrap_or(Ordering::Equal);
    }
    Ordering::Equal
}

/// 1 - coefficient of variation, clamped to [0, 1].
fn agreement_from_dispersion(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 1.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if mean.abs() < EPSILON {
        return if std_dev < EPSILON { 1.0 } else { 0.0 };
    }

    (1.0 - std_dev / mean.abs()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::registry::{
        ids, CategorySpec, MockCategoryRegistry, NumericScale, StaticRegistry,
    };

    fn builder() -> ConsensusBuilder {
        ConsensusBuilder::new(Arc::new(StaticRegistry::standard()))
    }

    fn committee() -> WeightTable {
        WeightTable::from_pairs([("a", 0.5), ("b", 0.3), ("c", 0.2)])
    }

    #[test]
    fn test_weighted_mean() {
        let opinions = vec![
            Opinion::new("a", ids::HOME_SCORE, 24.0, 0.8),
            Opinion::new("b", ids::HOME_SCORE, 21.0, 0.6),
            Opinion::new("c", ids::HOME_SCORE, 27.0, 0.4),
        ];

        let agg = builder().build_consensus(&opinions, &committee(), ids::HOME_SCORE);
        let value = agg.numeric_value().unwrap();

        assert!((value - 23.7).abs() < 1e-9);
        assert_eq!(agg.method_used, ConsensusMethod::WeightedMean);
        assert_eq!(agg.participating_member_count, 3);
        assert!((agg.confidence_score - (0.5 * 0.8 + 0.3 * 0.6 + 0.2 * 0.4)).abs() < 1e-9);
        assert!(agg.agreement_level > 0.8 && agg.agreement_level < 1.0);
    }

    #[test]
    fn test_single_numeric_opinion_full_agreement() {
        let opinions = vec![Opinion::new("a", ids::TOTAL_SCORE, 44.5, 0.7)];
        let agg = builder().build_consensus(&opinions, &committee(), ids::TOTAL_SCORE);
        assert_eq!(agg.agreement_level, 1.0);
        assert_eq!(agg.numeric_value(), Some(44.5));
    }

    #[test]
    fn test_wide_dispersion_clamps_agreement() {
        let opinions = vec![
            Opinion::new("a", ids::SPREAD_PREDICTION, -10.0, 0.5),
            Opinion::new("b", ids::SPREAD_PREDICTION, 12.0, 0.5),
        ];
        let agg = builder().build_consensus(&opinions, &committee(), ids::SPREAD_PREDICTION);
        assert_eq!(agg.agreement_level, 0.0);
    }

    #[test]
    fn test_categorical_vote() {
        let weights = WeightTable::from_pairs([("a", 0.6), ("b", 0.4)]);
        let opinions = vec![
            Opinion::new("a", ids::WINNER_PREDICTION, "home", 0.7),
            Opinion::new("b", ids::WINNER_PREDICTION, "away", 0.9),
        ];

        let agg = builder().build_consensus(&opinions, &weights, ids::WINNER_PREDICTION);
        assert_eq!(agg.consensus_value, Some(OpinionValue::from("home")));
        assert!((agg.agreement_level - 0.6).abs() < 1e-12);
        // Only the winning side's confidence counts.
        assert!((agg.confidence_score - 0.7).abs() < 1e-12);
        assert_eq!(agg.method_used, ConsensusMethod::WeightedVote);
    }

    #[test]
    fn test_categorical_tie_breaks() {
        let weights = WeightTable::from_pairs([("a", 0.25), ("b", 0.25), ("c", 0.25), ("d", 0.25)]);

        // Equal mass, higher supporter confidence wins.
        let opinions = vec![
            Opinion::new("a", ids::OVER_UNDER, "over", 0.5),
            Opinion::new("b", ids::OVER_UNDER, "over", 0.5),
            Opinion::new("c", ids::OVER_UNDER, "under", 0.9),
            Opinion::new("d", ids::OVER_UNDER, "under", 0.7),
        ];
        let agg = builder().build_consensus(&opinions, &weights, ids::OVER_UNDER);
        assert_eq!(agg.consensus_value, Some(OpinionValue::from("under")));

        // Equal mass and confidence, lexicographic order decides.
        let opinions = vec![
            Opinion::new("a", ids::OVER_UNDER, "under", 0.6),
            Opinion::new("b", ids::OVER_UNDER, "over", 0.6),
        ];
        let agg = builder().build_consensus(&opinions, &weights, ids::OVER_UNDER);
        assert_eq!(agg.consensus_value, Some(OpinionValue::from("over")));
        assert!((agg.agreement_level - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_boolean_categories_keep_flags() {
        let registry = StaticRegistry::new().with(CategorySpec::new(
            "overtime",
            DataType::Categorical,
            NumericScale::Other,
        ));
        let builder = ConsensusBuilder::new(Arc::new(registry));
        let opinions = vec![
            Opinion::new("a", "overtime", false, 0.8),
            Opinion::new("b", "overtime", true, 0.8),
            Opinion::new("c", "overtime", false, 0.8),
        ];

        let agg = builder.build_consensus(&opinions, &committee(), "overtime");
        assert_eq!(agg.consensus_value, Some(OpinionValue::Flag(false)));
        assert!((agg.agreement_level - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_fallback_picks_highest_conviction() {
        let opinions = vec![
            Opinion::new("a", "first_td_scorer", "kelce", 0.4).with_data_type(DataType::Other),
            Opinion::new("b", "first_td_scorer", "pacheco", 0.9).with_data_type(DataType::Other),
            Opinion::new("c", "first_td_scorer", "rice", 0.95).with_data_type(DataType::Other),
        ];

        let agg = builder().build_consensus(&opinions, &committee(), "first_td_scorer");
        // 0.3 * 0.9 = 0.27 beats 0.5 * 0.4 = 0.20 and 0.2 * 0.95 = 0.19
        assert_eq!(agg.consensus_value, Some(OpinionValue::from("pacheco")));
        assert_eq!(agg.agreement_level, 0.5);
        assert!((agg.confidence_score - 0.9).abs() < 1e-12);
        assert_eq!(agg.method_used, ConsensusMethod::HighestConviction);
    }

    #[test]
    fn test_no_opinions_is_not_actionable() {
        let agg = builder().build_consensus(&[], &committee(), ids::HOME_SCORE);
        assert_eq!(agg.consensus_value, None);
        assert_eq!(agg.confidence_score, 0.0);
        assert_eq!(agg.method_used, ConsensusMethod::None);
        assert_eq!(agg.data_type, DataType::Numeric);
    }

    #[test]
    fn test_mismatched_values_are_skipped() {
        let opinions = vec![
            Opinion::new("a", ids::HOME_SCORE, 24.0, 0.8),
            Opinion::new("b", ids::HOME_SCORE, true, 0.9),
            Opinion::new("c", ids::HOME_SCORE, 30.0, 0.9).with_data_type(DataType::Categorical),
        ];

        let agg = builder().build_consensus(&opinions, &committee(), ids::HOME_SCORE);
        assert_eq!(agg.participating_member_count, 1);
        assert_eq!(agg.numeric_value(), Some(24.0));
    }

    #[test]
    fn test_unweighted_participants_share_equally() {
        let opinions = vec![
            Opinion::new("x", ids::HOME_SCORE, 20.0, 0.5),
            Opinion::new("y", ids::HOME_SCORE, 30.0, 0.5),
        ];

        let agg = builder().build_consensus(&opinions, &committee(), ids::HOME_SCORE);
        assert_eq!(agg.numeric_value(), Some(25.0));
        assert_eq!(agg.total_weight, 0.0);
    }

    #[test]
    fn test_dispatch_follows_registry() {
        let mut registry = MockCategoryRegistry::new();
        registry
            .expect_spec()
            .returning(|id| Some(CategorySpec::new(id, DataType::Categorical, NumericScale::Other)));

        let builder = ConsensusBuilder::new(Arc::new(registry));
        // Numbers reported for a categorical category are voted on, not averaged.
        let opinions = vec![
            Opinion::new("a", "coin_toss", 1.0, 0.5),
            Opinion::new("b", "coin_toss", 1.0, 0.5),
            Opinion::new("c", "coin_toss", 0.0, 0.5),
        ];

        let agg = builder.build_consensus(&opinions, &committee(), "coin_toss");
        assert_eq!(agg.method_used, ConsensusMethod::WeightedVote);
        assert_eq!(agg.consensus_value, Some(OpinionValue::Number(1.0)));
    }

    #[test]
    fn test_unregistered_category_uses_opinion_tag() {
        let mut registry = MockCategoryRegistry::new();
        registry.expect_spec().returning(|_| None);

        let builder = ConsensusBuilder::new(Arc::new(registry));
        let opinions = vec![
            Opinion::new("a", "rushing_yards", 88.0, 0.5).with_data_type(DataType::Numeric),
            Opinion::new("b", "rushing_yards", 112.0, 0.5).with_data_type(DataType::Numeric),
        ];

        let agg = builder.build_consensus(&opinions, &committee(), "rushing_yards");
        assert_eq!(agg.method_used, ConsensusMethod::WeightedMean);
        assert!((agg.numeric_value().unwrap() - (0.5 * 88.0 + 0.3 * 112.0) / 0.8).abs() < 1e-9);
    }
}
