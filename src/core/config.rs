use serde::{Deserialize, Serialize};
use std::env;

use super::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: WeightCoefficients,
    pub trend_scores: TrendScores,
    pub coherence: CoherenceConfig,
    pub monitoring: MonitoringConfig,
}

/// Share of each component in a member's raw weight. Must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightCoefficients {
    pub accuracy: f64,
    pub recency: f64,
    pub confidence: f64,
    pub tenure: f64,
}

impl Default for WeightCoefficients {
    fn default() -> Self {
        Self {
            accuracy: 0.40,
            recency: 0.30,
            confidence: 0.20,
            tenure: 0.10,
        }
    }
}

impl WeightCoefficients {
    pub fn sum(&self) -> f64 {
        self.accuracy + self.recency + self.confidence + self.tenure
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendScores {
    pub improving: f64,
    pub stable: f64,
    pub declining: f64,
}

impl Default for TrendScores {
    fn default() -> Self {
        Self {
            improving: 1.0,
            stable: 0.6,
            declining: 0.2,
        }
    }
}

/// Severity-weighted penalty subtracted from constraint satisfaction per
/// remaining violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityPenalties {
    pub severe: f64,
    pub moderate: f64,
    pub minor: f64,
}

impl Default for SeverityPenalties {
    fn default() -> Self {
        Self {
            severe: 0.30,
            moderate: 0.15,
            minor: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherenceConfig {
    // Residual classification
    pub noise_threshold: f64,         // below: rounding noise
    pub moderate_threshold: f64,      // minor up to here
    pub severe_threshold: f64,        // moderate up to here, severe above

    // Box bounds around the independent aggregate
    pub score_bound: f64,
    pub default_bound: f64,
    pub probability_min: f64,
    pub probability_max: f64,

    // Policy knobs
    pub team_total_fraction: f64,
    pub spread_trigger: f64,
    pub favorite_floor: f64,

    // Solver
    pub max_iterations: usize,
    pub max_passes: usize,

    // Reporting
    pub delta_floor: f64,
    pub penalties: SeverityPenalties,
    pub latency_target_ms: f64,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            noise_threshold: 0.5,
            moderate_threshold: 1.0,
            severe_threshold: 3.0,
            score_bound: 10.0,
            default_bound: 5.0,
            probability_min: 0.0,
            probability_max: 1.0,
            team_total_fraction: 0.8,
            spread_trigger: 1.0,
            favorite_floor: 0.4,
            max_iterations: 100,
            max_passes: 3,
            delta_floor: 0.01,
            penalties: SeverityPenalties::default(),
            latency_target_ms: 150.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub latency_history_size: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            latency_history_size: 1000,
        }
    }
}

impl EngineConfig {
    /// Defaults, then an optional file, then `CONSENSUS__SECTION__FIELD`
    /// environment overrides.
    pub fn load(path: Option<&str>) -> EngineResult<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CONSENSUS")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: EngineConfig = builder.build()?.try_deserialize()?;

        if let Ok(level) = env::var("LOG_LEVEL") {
            loaded.monitoring.log_level = level;
        }

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn from_env() -> EngineResult<Self> {
        let path = env::var("CONSENSUS_CONFIG").ok();
        Self::load(path.as_deref())
    }

    pub fn validate(&self) -> EngineResult<()> {
        let w = &self.weights;
        if [w.accuracy, w.recency, w.confidence, w.tenure]
            .iter()
            .any(|c| !c.is_finite() || *c < 0.0)
        {
            return Err(EngineError::InvalidConfig(
                "weight coefficients must be finite and non-negative".to_string(),
            ));
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(EngineError::InvalidConfig(format!(
                "weight coefficients must sum to 1, got {:.6}",
                w.sum()
            )));
        }

        let t = &self.trend_scores;
        if [t.improving, t.stable, t.declining]
            .iter()
            .any(|s| !(0.0..=1.0).contains(s))
        {
            return Err(EngineError::InvalidConfig(
                "trend scores must lie in [0, 1]".to_string(),
            ));
        }

        let c = &self.coherence;
        if c.max_iterations == 0 || c.max_passes == 0 {
            return Err(EngineError::InvalidConfig(
                "solver iteration and pass caps must be positive".to_string(),
            ));
        }
        if c.score_bound <= 0.0 || c.default_bound <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "box bound widths must be positive".to_string(),
            ));
        }
        if c.probability_min >= c.probability_max {
            return Err(EngineError::InvalidConfig(
                "probability range is empty".to_string(),
            ));
        }
        if !(c.team_total_fraction > 0.0 && c.team_total_fraction <= 1.0) {
            return Err(EngineError::InvalidConfig(
                "team_total_fraction must lie in (0, 1]".to_string(),
            ));
        }
        if !(c.favorite_floor > 0.0 && c.favorite_floor <= 0.5) {
            return Err(EngineError::InvalidConfig(
                "favorite_floor must lie in (0, 0.5]".to_string(),
            ));
        }
        if !(c.noise_threshold <= c.moderate_threshold && c.moderate_threshold <= c.severe_threshold)
        {
            return Err(EngineError::InvalidConfig(
                "severity thresholds must be non-decreasing".to_string(),
            ));
        }

        Ok(())
    }
}
