use thiserror::Error;

/// Errors surfaced by configuration, I/O and metrics setup.
///
/// Aggregation itself never fails: missing inputs, degenerate weights and
/// solver trouble all degrade to a flagged best-available answer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Failure modes of the bounded least-squares solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("solver did not converge within {iterations} iterations")]
    NonConvergence { iterations: usize },

    #[error("constraints cannot be satisfied within the category bounds")]
    Infeasible,

    #[error("constraint system is numerically singular")]
    Singular,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
