use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a spec, as declared by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecType {
    FeatureGate,
    DynamicConfig,
    Experiment,
    Autotune,
    Layer,
    Segment,
    Holdout,
    /// Spec types this library does not know about yet. Kept so that a newer
    /// control plane does not break catalog rotation.
    #[serde(other)]
    Unknown,
}

/// A single gate, dynamic config, experiment, layer, segment, or holdout
/// spec. Immutable once installed in the store; catalog rotation replaces the
/// map entry wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub spec_type: SpecType,
    pub salt: String,
    pub enabled: bool,
    #[serde(default)]
    pub default_value: Value,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    #[serde(default)]
    pub rules: Vec<ConfigRule>,
    /// Parameter names a layer exposes directly (as opposed to delegating).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_parameters: Option<Vec<String>>,
    /// Whether an experiment shares its layer's default parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_shared_params: Option<bool>,
    /// Whether an experiment is still active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

fn default_id_type() -> String {
    "userID".to_owned()
}

/// One rule of a spec. Rules are evaluated in declaration order and the first
/// passing rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRule {
    pub id: String,
    /// Allocation salt. Falls back to `id` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    pub pass_percentage: f64,
    #[serde(default)]
    pub return_value: Value,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_experiment_group: Option<bool>,
    /// Name of the spec this rule delegates to when it passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_delegate: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConfigCondition>,
}

impl ConfigRule {
    /// Salt used for pass-percentage bucketing.
    pub fn allocation_salt(&self) -> &str {
        self.salt.as_deref().unwrap_or(&self.id)
    }
}

/// Kind of check a condition performs. Unknown kinds short-circuit the whole
/// evaluation to `unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Public,
    PassGate,
    FailGate,
    MultiPassGate,
    MultiFailGate,
    IpBased,
    UaBased,
    UserField,
    EnvironmentField,
    CurrentTime,
    UserBucket,
    UnitId,
    #[serde(other)]
    Unknown,
}

/// One condition of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub target_value: Value,
    /// Operator name, matched case-insensitively at evaluation time. Unknown
    /// operators yield `unsupported`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_type: Option<String>,
    /// Free-form extras; `user_bucket` conditions carry their salt here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_values: Option<HashMap<String, Value>>,
}

impl ConfigCondition {
    /// The salt for `user_bucket` conditions, from `additional_values`.
    pub fn bucket_salt(&self) -> &str {
        self.additional_values
            .as_ref()
            .and_then(|extra| extra.get("salt"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// Raw `download_config_specs` response. Spec sections are kept as loose JSON
/// so that `has_updates: false` payloads (which omit them) still parse; the
/// store validates and constructs specs from them in one shot.
#[derive(Debug, Default, Deserialize)]
pub struct SpecsResponse {
    #[serde(default)]
    pub has_updates: bool,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub feature_gates: Option<Value>,
    #[serde(default)]
    pub dynamic_configs: Option<Value>,
    #[serde(default)]
    pub layer_configs: Option<Value>,
    /// Layer name to the experiments allocated inside it.
    #[serde(default)]
    pub layers: Option<HashMap<String, Vec<String>>>,
    /// Diagnostics sampling rates, keyed by context.
    #[serde(default)]
    pub diagnostics: Option<HashMap<String, Value>>,
}

/// One immutable generation of the spec catalog. The store publishes a fresh
/// `SpecSet` atomically on every accepted update; readers hold an
/// `Arc<SpecSet>` and never observe a partial rotation.
#[derive(Debug, Default)]
pub struct SpecSet {
    pub feature_gates: HashMap<String, Arc<ConfigSpec>>,
    pub dynamic_configs: HashMap<String, Arc<ConfigSpec>>,
    pub layer_configs: HashMap<String, Arc<ConfigSpec>>,
    /// Inverse of the response's `layers` section: experiment name to the
    /// layer it is allocated in. 1:1 from experiment to layer.
    pub experiment_to_layer: HashMap<String, String>,
    /// Control-plane timestamp of this generation, in epoch milliseconds.
    pub time: i64,
}
