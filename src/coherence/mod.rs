pub mod constraints;
pub mod metrics;
pub mod projector;
pub mod solver;

pub use constraints::{
    detect_violations, ConstraintKey, ConstraintType, ConstraintViolation, GameContext, Severity,
};
pub use metrics::{LatencySnapshot, ProjectionMetrics};
pub use projector::{CoherenceProjector, ProjectionResult};
pub use solver::{BoundedLeastSquares, Problem, Solution};
