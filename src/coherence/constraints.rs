use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::consensus::ids;
use crate::core::config::CoherenceConfig;

/// Slack below the favorite floor still counted as sitting on it.
const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    ScoreSum,
    QuarterSum,
    HalfSum,
    TeamTotalBound,
    WinnerMargin,
}

impl ConstraintType {
    /// Soft constraints are nudged through bounds rather than equalities.
    pub fn is_soft(&self) -> bool {
        matches!(self, ConstraintType::WinnerMargin)
    }
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintType::ScoreSum => "score_sum",
            ConstraintType::QuarterSum => "quarter_sum",
            ConstraintType::HalfSum => "half_sum",
            ConstraintType::TeamTotalBound => "team_total_bound",
            ConstraintType::WinnerMargin => "winner_margin",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Severe,
}

impl Severity {
    /// `None` for residuals small enough to be rounding noise.
    pub fn classify(magnitude: f64, config: &CoherenceConfig) -> Option<Severity> {
        if magnitude < config.noise_threshold {
            None
        } else if magnitude > config.severe_threshold {
            Some(Severity::Severe)
        } else if magnitude >= config.moderate_threshold {
            Some(Severity::Moderate)
        } else {
            Some(Severity::Minor)
        }
    }

    pub fn penalty(&self, config: &CoherenceConfig) -> f64 {
        match self {
            Severity::Severe => config.penalties.severe,
            Severity::Moderate => config.penalties.moderate,
            Severity::Minor => config.penalties.minor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub constraint_type: ConstraintType,
    pub category_id: String,
    pub expected_value: f64,
    pub actual_value: f64,
    pub delta: f64,
    pub severity: Severity,
}

impl ConstraintViolation {
    /// Identity of the constraint instance, stable across passes.
    pub fn key(&self) -> ConstraintKey {
        ConstraintKey {
            constraint_type: self.constraint_type,
            category_id: self.category_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintKey {
    pub constraint_type: ConstraintType,
    pub category_id: String,
}

/// Auxiliary facts about the game that are not aggregates themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameContext {
    /// Empty when the context rides inside a round that names the game.
    #[serde(default)]
    pub game_id: String,
    /// Posted home spread; negative when the home side is favored.
    #[serde(default)]
    pub spread: Option<f64>,
}

impl GameContext {
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            spread: None,
        }
    }

    pub fn with_spread(mut self, spread: f64) -> Self {
        self.spread = Some(spread);
        self
    }

    /// Win-probability category of the side the spread favors, if it
    /// favors one strongly enough.
    pub fn favored_probability_category(&self, trigger: f64) -> Option<&'static str> {
        let spread = self.spread.filter(|s| s.is_finite())?;
        if spread.abs() <= trigger {
            return None;
        }
        Some(if spread < 0.0 {
            ids::HOME_WIN_PROBABILITY
        } else {
            ids::AWAY_WIN_PROBABILITY
        })
    }

    /// Mirror of [`Self::favored_probability_category`].
    pub fn underdog_probability_category(&self, trigger: f64) -> Option<&'static str> {
        self.favored_probability_category(trigger)
            .map(|favored| match favored {
                ids::HOME_WIN_PROBABILITY => ids::AWAY_WIN_PROBABILITY,
                _ => ids::HOME_WIN_PROBABILITY,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equal,
    AtMost,
}

/// One linear row `Σ coefficient · x (= | ≤) rhs` over named categories.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRow {
    pub terms: Vec<(&'static str, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

/// Every violation of the catalog among the present numeric values.
pub fn detect_violations(
    values: &BTreeMap<String, f64>,
    context: &GameContext,
    config: &CoherenceConfig,
) -> Vec<ConstraintViolation> {
    let mut violations = Vec::new();

    let get = |id: &str| values.get(id).copied();

    if let (Some(home), Some(away), Some(total)) = (
        get(ids::HOME_SCORE),
        get(ids::AWAY_SCORE),
        get(ids::TOTAL_SCORE),
    ) {
        push_residual(
            &mut violations,
            ConstraintType::ScoreSum,
            ids::TOTAL_SCORE,
            total,
            home + away,
            config,
        );
    }

    let quarters: Option<Vec<f64>> = ids::QUARTERS.iter().map(|q| get(*q)).collect();
    if let (Some(quarters), Some(total)) = (quarters, get(ids::TOTAL_SCORE)) {
        push_residual(
            &mut violations,
            ConstraintType::QuarterSum,
            ids::TOTAL_SCORE,
            total,
            quarters.iter().sum(),
            config,
        );
    }

    if let (Some(first), Some(second), Some(total)) = (
        get(ids::FIRST_HALF_TOTAL),
        get(ids::SECOND_HALF_TOTAL),
        get(ids::TOTAL_SCORE),
    ) {
        push_residual(
            &mut violations,
            ConstraintType::HalfSum,
            ids::TOTAL_SCORE,
            total,
            first + second,
            config,
        );
    }

    if let Some(total) = get(ids::TOTAL_SCORE) {
        let ceiling = config.team_total_fraction * total;
        for team in [ids::HOME_SCORE, ids::AWAY_SCORE] {
            let Some(team_total) = get(team) else {
                continue;
            };
            let excess = team_total - ceiling;
            if excess <= 0.0 {
                continue;
            }
            if let Some(severity) = Severity::classify(excess, config) {
                violations.push(ConstraintViolation {
                    constraint_type: ConstraintType::TeamTotalBound,
                    category_id: team.to_string(),
                    expected_value: ceiling,
                    actual_value: team_total,
                    delta: ceiling - team_total,
                    severity,
                });
            }
        }
    }

    // The favored side's probability is checked when present, otherwise
    // the underdog's against the mirrored ceiling.
    let favored = context
        .favored_probability_category(config.spread_trigger)
        .and_then(|c| get(c).map(|p| (c, p)));
    let underdog = context
        .underdog_probability_category(config.spread_trigger)
        .and_then(|c| get(c).map(|p| (c, p)));
    let ceiling = 1.0 - config.favorite_floor;

    let margin = match (favored, underdog) {
        (Some((category, p)), _) if p < config.favorite_floor - PROBABILITY_TOLERANCE => {
            Some((category, config.favorite_floor, p))
        }
        (None, Some((category, p))) if p > ceiling + PROBABILITY_TOLERANCE => {
            Some((category, ceiling, p))
        }
        _ => None,
    };
    if let Some((category, expected, probability)) = margin {
        violations.push(ConstraintViolation {
            constraint_type: ConstraintType::WinnerMargin,
            category_id: category.to_string(),
            expected_value: expected,
            actual_value: probability,
            delta: expected - probability,
            severity: Severity::Minor,
        });
    }

    violations
}

fn push_residual(
    violations: &mut Vec<ConstraintViolation>,
    constraint_type: ConstraintType,
    category_id: &str,
    expected: f64,
    actual: f64,
    config: &CoherenceConfig,
) {
    let delta = expected - actual;
    if let Some(severity) = Severity::classify(delta.abs(), config) {
        violations.push(ConstraintViolation {
            constraint_type,
            category_id: category_id.to_string(),
            expected_value: expected,
            actual_value: actual,
            delta,
            severity,
        });
    }
}

/// Row enforcing a hard constraint instance: sums are equalities, the
/// team-total bound stays an inequality. `None` for soft constraints and
/// for instances whose categories are absent.
pub fn linear_row(
    key: &ConstraintKey,
    values: &BTreeMap<String, f64>,
    config: &CoherenceConfig,
) -> Option<LinearRow> {
    let present = |needed: &[&str]| needed.iter().all(|id| values.contains_key(*id));

    match key.constraint_type {
        ConstraintType::ScoreSum => present(&[ids::HOME_SCORE, ids::AWAY_SCORE, ids::TOTAL_SCORE])
            .then(|| LinearRow {
                terms: vec![
                    (ids::HOME_SCORE, 1.0),
                    (ids::AWAY_SCORE, 1.0),
                    (ids::TOTAL_SCORE, -1.0),
                ],
                relation: Relation::Equal,
                rhs: 0.0,
            }),
        ConstraintType::QuarterSum => {
            let mut needed = ids::QUARTERS.to_vec();
            needed.push(ids::TOTAL_SCORE);
            present(&needed).then(|| {
                let mut terms: Vec<(&'static str, f64)> =
                    ids::QUARTERS.iter().map(|q| (*q, 1.0)).collect();
                terms.push((ids::TOTAL_SCORE, -1.0));
                LinearRow {
                    terms,
                    relation: Relation::Equal,
                    rhs: 0.0,
                }
            })
        }
        ConstraintType::HalfSum => present(&[
            ids::FIRST_HALF_TOTAL,
            ids::SECOND_HALF_TOTAL,
            ids::TOTAL_SCORE,
        ])
        .then(|| LinearRow {
            terms: vec![
                (ids::FIRST_HALF_TOTAL, 1.0),
                (ids::SECOND_HALF_TOTAL, 1.0),
                (ids::TOTAL_SCORE, -1.0),
            ],
            relation: Relation::Equal,
            rhs: 0.0,
        }),
        ConstraintType::TeamTotalBound => {
            let team = [ids::HOME_SCORE, ids::AWAY_SCORE]
                .into_iter()
                .find(|id| *id == key.category_id)?;
            present(&[team, ids::TOTAL_SCORE]).then(|| LinearRow {
                terms: vec![(team, 1.0), (ids::TOTAL_SCORE, -config.team_total_fraction)],
                relation: Relation::AtMost,
                rhs: 0.0,
            })
        }
        ConstraintType::WinnerMargin => None,
    }
}
