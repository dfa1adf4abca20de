pub mod builder;
pub mod registry;
pub mod types;

pub use builder::ConsensusBuilder;
pub use registry::{ids, CategoryRegistry, CategorySpec, DataType, NumericScale, StaticRegistry};
pub use types::{CategoryAggregate, ConsensusMethod, Opinion, OpinionValue};
