//! Parsed representation of the spec catalog served by the control plane.
mod models;

pub use models::{
    ConfigCondition, ConfigRule, ConfigSpec, ConditionKind, SpecSet, SpecType, SpecsResponse,
};
