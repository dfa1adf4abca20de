pub mod config;
pub mod error;
pub mod logging;

pub use config::{CoherenceConfig, EngineConfig, TrendScores, WeightCoefficients};
pub use error::{EngineError, EngineResult, SolverError};
