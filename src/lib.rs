pub mod coherence;
pub mod committee;
pub mod consensus;
pub mod core;
pub mod pipeline;
