//! Deterministic interpreter over the spec DSL.
//!
//! [`Evaluator`] is the entry point: it consults the spec store, applies
//! local overrides, interprets rules and conditions, and stamps every result
//! with provenance details. [`client_init`] projects the whole catalog into a
//! client bootstrap payload.
pub mod client_init;

mod conditions;
mod details;
mod evaluator;
mod result;

pub use details::{EvaluationDetails, EvaluationReason};
pub use evaluator::Evaluator;
pub use result::{EvaluationResult, SecondaryExposure};
