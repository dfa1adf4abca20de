use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::constraints::{
    detect_violations, linear_row, ConstraintKey, ConstraintType, ConstraintViolation,
    GameContext, Relation,
};
use super::metrics::ProjectionMetrics;
use super::solver::{BoundedLeastSquares, Problem};
use crate::consensus::{CategoryAggregate, CategoryRegistry, NumericScale, OpinionValue};
use crate::core::config::CoherenceConfig;

/// Final, internally consistent forecast for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionResult {
    pub projection_id: Uuid,
    pub game_id: String,
    pub success: bool,
    pub original_predictions: BTreeMap<String, f64>,
    pub projected_predictions: BTreeMap<String, f64>,
    /// Violations still present in `projected_predictions`.
    pub violations: Vec<ConstraintViolation>,
    /// Projected minus original, omitting changes below the reporting floor.
    pub adjustments: BTreeMap<String, f64>,
    pub constraints_applied: Vec<ConstraintType>,
    pub solver_iterations: usize,
    /// Solves performed; more than one when a pass exposed new violations.
    pub solver_passes: usize,
    pub solver_error: Option<String>,
    pub processing_time_ms: f64,
    pub constraint_satisfaction: f64,
    pub computed_at: DateTime<Utc>,
}

impl ProjectionResult {
    /// Writes projected values back onto numeric aggregates. Categorical and
    /// opaque aggregates are left untouched.
    pub fn apply_to(&self, aggregates: &mut [CategoryAggregate]) -> usize {
        let mut rewritten = 0;
        for aggregate in aggregates.iter_mut() {
            if aggregate.numeric_value().is_none() {
                continue;
            }
            if let Some(projected) = self.projected_predictions.get(&aggregate.category_id) {
                aggregate.consensus_value = Some(OpinionValue::Number(*projected));
                rewritten += 1;
            }
        }
        rewritten
    }

    pub fn processing_time(&self) -> Duration {
        Duration::from_secs_f64(self.processing_time_ms / 1000.0)
    }
}

/// Minimally adjusts numeric aggregates so the constraint catalog holds.
pub struct CoherenceProjector {
    config: CoherenceConfig,
    registry: Arc<dyn CategoryRegistry>,
    solver: BoundedLeastSquares,
    metrics: Arc<ProjectionMetrics>,
}

impl CoherenceProjector {
    pub fn new(
        config: CoherenceConfig,
        registry: Arc<dyn CategoryRegistry>,
        metrics: Arc<ProjectionMetrics>,
    ) -> Self {
        let solver = BoundedLeastSquares::new(config.max_iterations);
        Self {
            config,
            registry,
            solver,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<ProjectionMetrics> {
        &self.metrics
    }

    pub fn project(
        &self,
        aggregates: &[CategoryAggregate],
        context: &GameContext,
    ) -> ProjectionResult {
        let started = Instant::now();

        let mut original = BTreeMap::new();
        for aggregate in aggregates {
            if let Some(value) = aggregate.numeric_value() {
                original.entry(aggregate.category_id.clone()).or_insert(value);
            }
        }

        let initial = detect_violations(&original, context, &self.config);
        if initial.is_empty() {
            tracing::debug!("Game '{}' already coherent", context.game_id);
            return self.finish(
                context,
                original.clone(),
                original,
                SolveSummary::default(),
                started,
            );
        }

        tracing::debug!(
            "Game '{}': {} violation(s) detected before projection",
            context.game_id,
            initial.len()
        );

        let mut active: BTreeSet<ConstraintKey> = initial.iter().map(|v| v.key()).collect();
        let mut projected = original.clone();
        let mut summary = SolveSummary::default();

        for pass in 1..=self.config.max_passes {
            summary.passes = pass;
            let problem = self.build_problem(&original, &active, context);
            match self.solver.solve(&problem.problem) {
                Ok(solution) => {
                    summary.iterations += solution.iterations;
                    projected = problem
                        .categories
                        .iter()
                        .cloned()
                        .zip(solution.values)
                        .collect();
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️  Projection for game '{}' failed on pass {}: {}. Keeping unprojected aggregates",
                        context.game_id,
                        pass,
                        e
                    );
                    projected = original.clone();
                    summary.error = Some(e.to_string());
                    break;
                }
            }

            let newly_violated: Vec<ConstraintKey> =
                detect_violations(&projected, context, &self.config)
                    .iter()
                    .map(|v| v.key())
                    .filter(|k| !active.contains(k))
                    .collect();
            if newly_violated.is_empty() {
                break;
            }
            tracing::debug!(
                "Pass {} exposed {} new constraint(s), re-solving",
                pass,
                newly_violated.len()
            );
            active.extend(newly_violated);
        }

        if summary.error.is_none() {
            summary.applied = active
                .iter()
                .map(|k| k.constraint_type)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
        }

        self.finish(context, original, projected, summary, started)
    }

    fn finish(
        &self,
        context: &GameContext,
        original: BTreeMap<String, f64>,
        projected: BTreeMap<String, f64>,
        summary: SolveSummary,
        started: Instant,
    ) -> ProjectionResult {
        let SolveSummary {
            applied: constraints_applied,
            iterations: solver_iterations,
            passes: solver_passes,
            error: solver_error,
        } = summary;

        let violations = detect_violations(&projected, context, &self.config);
        let success = solver_error.is_none() && violations.is_empty();

        let adjustments: BTreeMap<String, f64> = projected
            .iter()
            .filter_map(|(id, value)| {
                let delta = value - original.get(id)?;
                (delta.abs() >= self.config.delta_floor).then(|| (id.clone(), delta))
            })
            .collect();

        let penalty: f64 = violations
            .iter()
            .map(|v| v.severity.penalty(&self.config))
            .sum();
        let constraint_satisfaction = (1.0 - penalty).clamp(0.0, 1.0);

        let elapsed = started.elapsed().max(Duration::from_nanos(1));
        self.metrics.record(elapsed, solver_error.is_some());

        let processing_time_ms = elapsed.as_secs_f64() * 1000.0;
        if processing_time_ms > self.config.latency_target_ms {
            tracing::warn!(
                "🐢 Projection for game '{}' took {:.1}ms (target {:.0}ms)",
                context.game_id,
                processing_time_ms,
                self.config.latency_target_ms
            );
        }

        if !adjustments.is_empty() || !violations.is_empty() {
            tracing::info!(
                "Game '{}' projected: success={} adjusted={} remaining={} satisfaction={:.2}",
                context.game_id,
                success,
                adjustments.len(),
                violations.len(),
                constraint_satisfaction
            );
        }

        ProjectionResult {
            projection_id: Uuid::new_v4(),
            game_id: context.game_id.clone(),
            success,
            original_predictions: original,
            projected_predictions: projected,
            violations,
            adjustments,
            constraints_applied,
            solver_iterations,
            solver_passes,
            solver_error,
            processing_time_ms,
            constraint_satisfaction,
            computed_at: Utc::now(),
        }
    }

    fn build_problem(
        &self,
        original: &BTreeMap<String, f64>,
        active: &BTreeSet<ConstraintKey>,
        context: &GameContext,
    ) -> IndexedProblem {
        let categories: Vec<String> = original.keys().cloned().collect();
        let index = |id: &str| categories.iter().position(|c| c == id);

        let target: Vec<f64> = original.values().copied().collect();
        let mut lower = Vec::with_capacity(target.len());
        let mut upper = Vec::with_capacity(target.len());
        for (id, value) in original {
            let (lo, hi) = self.bounds_for(id, *value);
            lower.push(lo);
            upper.push(hi);
        }

        let favored = context.favored_probability_category(self.config.spread_trigger);

        let mut rows = Vec::new();
        let mut rhs = Vec::new();
        let mut inequalities = Vec::new();
        let mut limits = Vec::new();
        for key in active {
            if key.constraint_type.is_soft() {
                // Favored side stays above the floor, underdog below the ceiling.
                if let Some(i) = index(&key.category_id) {
                    if favored == Some(key.category_id.as_str()) {
                        lower[i] = lower[i].max(self.config.favorite_floor).min(upper[i]);
                    } else {
                        upper[i] = upper[i].min(1.0 - self.config.favorite_floor).max(lower[i]);
                    }
                }
                continue;
            }

            let Some(row) = linear_row(key, original, &self.config) else {
                continue;
            };
            let mut dense = vec![0.0; categories.len()];
            for (id, coefficient) in &row.terms {
                if let Some(i) = index(id) {
                    dense[i] += coefficient;
                }
            }
            match row.relation {
                Relation::Equal => {
                    rows.push(dense);
                    rhs.push(row.rhs);
                }
                Relation::AtMost => {
                    inequalities.push(dense);
                    limits.push(row.rhs);
                }
            }
        }

        tracing::trace!(
            "Game '{}': {} variables, {} equality rows, {} inequality rows",
            context.game_id,
            categories.len(),
            rows.len(),
            inequalities.len()
        );

        IndexedProblem {
            categories,
            problem: Problem {
                target,
                lower,
                upper,
                rows,
                rhs,
                inequalities,
                limits,
            },
        }
    }

    fn bounds_for(&self, category_id: &str, original: f64) -> (f64, f64) {
        let scale = self
            .registry
            .spec(category_id)
            .map(|s| s.scale)
            .unwrap_or_default();

        match scale {
            NumericScale::Probability => (self.config.probability_min, self.config.probability_max),
            NumericScale::Score => (
                (original - self.config.score_bound).max(0.0),
                original + self.config.score_bound,
            ),
            NumericScale::Other => (
                original - self.config.default_bound,
                original + self.config.default_bound,
            ),
        }
    }
}

#[derive(Debug, Default)]
struct SolveSummary {
    applied: Vec<ConstraintType>,
    iterations: usize,
    passes: usize,
    error: Option<String>,
}

struct IndexedProblem {
    categories: Vec<String>,
    problem: Problem,
}
