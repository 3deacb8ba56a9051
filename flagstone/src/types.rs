use serde::de::DeserializeOwned;
use serde_json::Value;

use flagstone_core::eval::{EvaluationDetails, EvaluationResult};

/// Result of a gate check.
#[derive(Debug, Clone)]
pub struct FeatureGate {
    pub name: String,
    pub value: bool,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub details: Option<EvaluationDetails>,
}

impl FeatureGate {
    pub(crate) fn from_result(name: &str, result: EvaluationResult) -> FeatureGate {
        FeatureGate {
            name: name.to_owned(),
            value: result.value,
            rule_id: result.rule_id,
            group_name: result.group_name,
            details: result.evaluation_details,
        }
    }
}

/// Result of a dynamic config or experiment evaluation.
#[derive(Debug, Clone)]
pub struct DynamicConfig {
    pub name: String,
    /// The evaluated parameter map.
    pub value: Value,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub details: Option<EvaluationDetails>,
}

impl DynamicConfig {
    pub(crate) fn from_result(name: &str, result: EvaluationResult) -> DynamicConfig {
        DynamicConfig {
            name: name.to_owned(),
            value: result.json_value,
            rule_id: result.rule_id,
            group_name: result.group_name,
            details: result.evaluation_details,
        }
    }

    /// One parameter of the config, if present.
    pub fn get(&self, parameter: &str) -> Option<&Value> {
        self.value.get(parameter)
    }

    /// One parameter deserialized into `T`, or `default` when absent or of
    /// the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, parameter: &str, default: T) -> T {
        self.get(parameter)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }
}

/// Result of a layer evaluation.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    /// Parameter values, possibly delegated to an experiment.
    pub value: Value,
    pub rule_id: String,
    pub group_name: Option<String>,
    /// The experiment the layer delegated to, if any.
    pub allocated_experiment: Option<String>,
    pub details: Option<EvaluationDetails>,
}

impl Layer {
    pub(crate) fn from_result(name: &str, result: EvaluationResult) -> Layer {
        Layer {
            name: name.to_owned(),
            value: result.json_value,
            rule_id: result.rule_id,
            group_name: result.group_name,
            allocated_experiment: result.config_delegate,
            details: result.evaluation_details,
        }
    }

    /// One parameter of the layer, if present.
    pub fn get(&self, parameter: &str) -> Option<&Value> {
        self.value.get(parameter)
    }

    /// One parameter deserialized into `T`, or `default` when absent or of
    /// the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, parameter: &str, default: T) -> T {
        self.get(parameter)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }
}
