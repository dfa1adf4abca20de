//! Per-game round orchestration: weights, then consensus, then projection.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::coherence::{CoherenceProjector, GameContext, ProjectionMetrics, ProjectionResult};
use crate::committee::{CommitteeMember, WeightEngine, WeightTable};
use crate::consensus::{CategoryAggregate, CategoryRegistry, ConsensusBuilder, Opinion};
use crate::core::config::EngineConfig;
use crate::core::error::EngineResult;

/// Everything the engine needs to settle one game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundInput {
    pub game_id: String,
    pub members: Vec<CommitteeMember>,
    #[serde(default, deserialize_with = "numeric_entries")]
    pub confidences: HashMap<String, f64>,
    pub opinions: Vec<Opinion>,
    #[serde(default)]
    pub context: Option<GameContext>,
}

/// Drops confidence entries that are not numbers; those members get the
/// neutral confidence.
fn numeric_entries<'de, D>(deserializer: D) -> Result<HashMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(id, value)| value.as_f64().map(|c| (id, c)))
        .collect())
}

impl RoundInput {
    pub fn from_json(raw: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    fn game_context(&self) -> GameContext {
        match &self.context {
            Some(context) if context.game_id.is_empty() => GameContext {
                game_id: self.game_id.clone(),
                ..context.clone()
            },
            Some(context) => context.clone(),
            None => GameContext::new(self.game_id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub game_id: String,
    pub weights: WeightTable,
    /// One per category, sorted by id, carrying projected values.
    pub aggregates: Vec<CategoryAggregate>,
    pub projection: ProjectionResult,
}

impl RoundOutcome {
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct RoundProcessor {
    weights: WeightEngine,
    consensus: ConsensusBuilder,
    projector: CoherenceProjector,
    metrics: Arc<ProjectionMetrics>,
}

impl RoundProcessor {
    pub fn new(config: EngineConfig, registry: Arc<dyn CategoryRegistry>) -> EngineResult<Self> {
        config.validate()?;

        let metrics = Arc::new(ProjectionMetrics::new(
            config.monitoring.latency_history_size,
        )?);
        let weights = WeightEngine::new(config.weights, config.trend_scores);
        let consensus = ConsensusBuilder::new(registry.clone());
        let projector = CoherenceProjector::new(config.coherence, registry, metrics.clone());

        Ok(Self {
            weights,
            consensus,
            projector,
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<ProjectionMetrics> {
        &self.metrics
    }

    pub fn process(&self, round: &RoundInput) -> RoundOutcome {
        let weights = self
            .weights
            .compute_weights(&round.members, &round.confidences);

        let categories: BTreeSet<&str> = round
            .opinions
            .iter()
            .map(|o| o.category_id.as_str())
            .collect();

        let mut aggregates: Vec<CategoryAggregate> = categories
            .into_iter()
            .map(|category| {
                self.consensus
                    .build_consensus(&round.opinions, &weights, category)
            })
            .collect();

        let context = round.game_context();
        let projection = self.projector.project(&aggregates, &context);
        projection.apply_to(&mut aggregates);

        let actionable = aggregates.iter().filter(|a| a.is_actionable()).count();
        tracing::info!(
            "🎯 Round '{}' settled: {} members, {} categories ({} actionable), coherent={}",
            round.game_id,
            weights.len(),
            aggregates.len(),
            actionable,
            projection.success
        );

        RoundOutcome {
            game_id: round.game_id.clone(),
            weights,
            aggregates,
            projection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::Trend;
    use crate::consensus::{ids, OpinionValue, StaticRegistry};
    use crate::core::error::EngineError;

    fn processor() -> RoundProcessor {
        RoundProcessor::new(EngineConfig::default(), Arc::new(StaticRegistry::standard())).unwrap()
    }

    fn round() -> RoundInput {
        let members = vec![
            CommitteeMember::new("ana", 0.8, Trend::Improving, 20),
            CommitteeMember::new("ben", 0.6, Trend::Stable, 5),
            CommitteeMember::unknown("cid"),
        ];
        let confidences = HashMap::from([("ana".to_string(), 0.9), ("ben".to_string(), 0.7)]);

        let mut opinions = Vec::new();
        for (member, home, away, total) in [
            ("ana", 27.0, 20.0, 52.0),
            ("ben", 24.0, 21.0, 50.0),
            ("cid", 23.0, 17.0, 49.0),
        ] {
            opinions.push(Opinion::new(member, ids::HOME_SCORE, home, 0.8));
            opinions.push(Opinion::new(member, ids::AWAY_SCORE, away, 0.8));
            opinions.push(Opinion::new(member, ids::TOTAL_SCORE, total, 0.8));
        }
        opinions.push(Opinion::new("ana", ids::WINNER_PREDICTION, "home", 0.9));
        opinions.push(Opinion::new("ben", ids::WINNER_PREDICTION, "home", 0.6));

        RoundInput {
            game_id: "g-100".to_string(),
            members,
            confidences,
            opinions,
            context: None,
        }
    }

    #[test]
    fn test_round_is_coherent_after_processing() {
        let outcome = processor().process(&round());

        assert_eq!(outcome.game_id, "g-100");
        assert_eq!(outcome.weights.len(), 3);
        assert!((outcome.weights.total() - 1.0).abs() < 1e-9);
        assert!(outcome.projection.success);

        let ids_seen: Vec<&str> = outcome
            .aggregates
            .iter()
            .map(|a| a.category_id.as_str())
            .collect();
        assert_eq!(
            ids_seen,
            vec!["away_score", "home_score", "total_score", "winner_prediction"]
        );

        let value = |id: &str| {
            outcome
                .aggregates
                .iter()
                .find(|a| a.category_id == id)
                .and_then(|a| a.numeric_value())
                .unwrap()
        };
        assert!((value("home_score") + value("away_score") - value("total_score")).abs() < 1e-9);

        let winner = outcome
            .aggregates
            .iter()
            .find(|a| a.category_id == ids::WINNER_PREDICTION)
            .unwrap();
        assert_eq!(winner.consensus_value, Some(OpinionValue::from("home")));
    }

    #[test]
    fn test_context_inherits_game_id() {
        let mut input = round();
        input.context = Some(GameContext {
            game_id: String::new(),
            spread: Some(-3.5),
        });
        let outcome = processor().process(&input);
        assert_eq!(outcome.projection.game_id, "g-100");
    }

    #[test]
    fn test_empty_round() {
        let input = RoundInput {
            game_id: "empty".to_string(),
            ..RoundInput::default()
        };
        let processor = processor();
        let outcome = processor.process(&input);

        assert!(outcome.weights.is_empty());
        assert!(outcome.aggregates.is_empty());
        assert!(outcome.projection.success);
        assert_eq!(processor.metrics().projections(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.weights.accuracy = 0.9;
        assert!(RoundProcessor::new(config, Arc::new(StaticRegistry::standard())).is_err());
    }

    #[test]
    fn test_round_input_from_json() {
        let json = r#"{
            "game_id": "g-7",
            "members": [{"id": "m1", "accuracy": 0.7, "recent_trend": "improving", "tenure": 4}],
            "opinions": [
                {"member_id": "m1", "category_id": "home_score", "value": 21, "confidence": 0.8}
            ],
            "context": {"game_id": "g-7", "spread": -2.5}
        }"#;
        let input = RoundInput::from_json(json).unwrap();
        assert_eq!(input.members[0].recent_trend, Some(Trend::Improving));
        assert_eq!(input.context.as_ref().and_then(|c| c.spread), Some(-2.5));

        let outcome = processor().process(&input);
        assert_eq!(outcome.aggregates[0].numeric_value(), Some(21.0));
        assert!(outcome.to_json().unwrap().contains("\"game_id\": \"g-7\""));
    }

    #[test]
    fn test_loose_member_records_are_accepted() {
        let json = r#"{
            "game_id": "g-8",
            "members": [
                {"id": "m1", "accuracy": 0.7, "recent_trend": "hot", "tenure": -1},
                {"id": "m2", "accuracy": 0.6}
            ],
            "confidences": {"m1": 0.9, "m2": "sure"},
            "opinions": [
                {"member_id": "m1", "category_id": "home_win_probability", "value": 0.3, "confidence": 0.8}
            ],
            "context": {"spread": -7.0}
        }"#;
        let input = RoundInput::from_json(json).unwrap();
        assert_eq!(input.members[0].recent_trend, None);
        assert_eq!(input.members[0].tenure, None);
        assert_eq!(input.confidences.len(), 1);

        let outcome = processor().process(&input);
        assert_eq!(outcome.weights.len(), 2);
        assert_eq!(outcome.projection.game_id, "g-8");
        assert_eq!(
            outcome.aggregates[0].numeric_value().map(|p| (p * 1e9).round() / 1e9),
            Some(0.4)
        );
    }

    #[test]
    fn test_malformed_round_is_an_error() {
        assert!(matches!(
            RoundInput::from_json("{\"game_id\": 7}"),
            Err(EngineError::Serialization(_))
        ));
        assert!(matches!(
            RoundInput::from_file("/nonexistent/round.json"),
            Err(EngineError::Io(_))
        ));
    }
}
