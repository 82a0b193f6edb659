//! Domain layer types and invariants.

pub mod jobs;
pub mod types;
