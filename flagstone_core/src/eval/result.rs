use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::details::EvaluationDetails;

/// A record of a nested gate check consulted during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecondaryExposure {
    pub gate: String,
    #[serde(rename = "gateValue")]
    pub gate_value: String,
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

impl SecondaryExposure {
    pub fn new(
        gate: impl Into<String>,
        gate_value: bool,
        rule_id: impl Into<String>,
    ) -> SecondaryExposure {
        SecondaryExposure {
            gate: gate.into(),
            gate_value: gate_value.to_string(),
            rule_id: rule_id.into(),
        }
    }
}

/// Outcome of evaluating one spec for one user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    /// For gates: whether the gate passed. For configs and layers: whether a
    /// rule matched and the user passed its allocation.
    pub value: bool,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub secondary_exposures: Vec<SecondaryExposure>,
    /// The value the matched rule (or the spec default) returned.
    pub json_value: Value,
    pub explicit_parameters: Option<Vec<String>>,
    /// Name of the spec the matched rule delegated to, if any.
    pub config_delegate: Option<String>,
    /// Exposures gathered before the delegation point. `None` when no
    /// delegation happened, in which case it is the same as
    /// `secondary_exposures`.
    pub undelegated_secondary_exposures: Option<Vec<SecondaryExposure>>,
    pub is_experiment_group: bool,
    /// The spec used a condition or operator this library does not know.
    pub unsupported: bool,
    pub config_version: Option<i64>,
    pub evaluation_details: Option<EvaluationDetails>,
}

impl EvaluationResult {
    /// A boolean result with the given rule ID, e.g. for overrides.
    pub fn boolean(value: bool, rule_id: impl Into<String>) -> EvaluationResult {
        EvaluationResult {
            value,
            rule_id: rule_id.into(),
            ..Default::default()
        }
    }

    /// The exposures gathered before any delegation. Falls back to all
    /// exposures when no delegation happened.
    pub fn undelegated_exposures(&self) -> &[SecondaryExposure] {
        self.undelegated_secondary_exposures
            .as_deref()
            .unwrap_or(&self.secondary_exposures)
    }
}

/// Deduplicate exposures on the `(gate, gateValue, ruleID)` triple, keeping
/// first occurrences, and drop gates prefixed with `segment:`. Applied only
/// at boundaries the host observes; internal accumulation stays raw to
/// preserve ordering context.
pub fn clean_exposures(exposures: &[SecondaryExposure]) -> Vec<SecondaryExposure> {
    let mut seen = HashSet::new();
    let mut cleaned = Vec::new();
    for exposure in exposures {
        if exposure.gate.starts_with("segment:") {
            continue;
        }
        if seen.insert(exposure) {
            cleaned.push(exposure.clone());
        }
    }
    cleaned
}
