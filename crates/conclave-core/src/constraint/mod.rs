//! Constraint Engine: hard-ban and escalation-trigger evaluation.

pub mod engine;
pub mod matcher;

pub use engine::{ConstraintEngine, DEFAULT_CONFIDENCE_THRESHOLD};
