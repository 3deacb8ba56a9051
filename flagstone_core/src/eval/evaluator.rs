use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::{json, Value};

use crate::hashing::{sha256_to_u64, CONDITION_SEGMENT_COUNT, USER_BUCKET_COUNT};
use crate::spec_store::{InitReason, SpecStore};
use crate::specs::{ConditionKind, ConfigCondition, ConfigRule, ConfigSpec};
use crate::User;

use super::client_init::{self, ClientInitArgs, ClientInitializeResponse};
use super::conditions::{apply_operator, string_of, MAX_PARSED_VALUE_LEN};
use super::details::{EvaluationDetails, EvaluationReason};
use super::result::{clean_exposures, EvaluationResult, SecondaryExposure};

/// Rule ID attached to results served from a local override.
const OVERRIDE_RULE_ID: &'static str = "override";

/// The rule evaluator: a deterministic interpreter over the spec DSL.
///
/// Public entry points never panic and never error; failures degrade to
/// default-false results whose [`EvaluationDetails`] carry the reason.
pub struct Evaluator {
    store: Arc<SpecStore>,
    gate_overrides: RwLock<HashMap<String, HashMap<String, bool>>>,
    config_overrides: RwLock<HashMap<String, HashMap<String, Value>>>,
    layer_overrides: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl Evaluator {
    pub fn new(store: Arc<SpecStore>) -> Evaluator {
        Evaluator {
            store,
            gate_overrides: RwLock::new(HashMap::new()),
            config_overrides: RwLock::new(HashMap::new()),
            layer_overrides: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &SpecStore {
        &self.store
    }

    /// Evaluate a feature gate for the user.
    pub fn check_gate(&self, user: &User, gate_name: &str) -> EvaluationResult {
        if let Some(value) = lookup_override(&self.gate_overrides, gate_name, user) {
            let mut result = EvaluationResult::boolean(value, OVERRIDE_RULE_ID);
            result.evaluation_details = Some(EvaluationDetails::from_store(
                &self.store,
                EvaluationReason::LocalOverride,
            ));
            return result;
        }
        if self.store.get_init_reason() == InitReason::Uninitialized {
            return self.default_result(EvaluationReason::Uninitialized);
        }
        let Some(spec) = self.store.get_gate(gate_name) else {
            return self.default_result(EvaluationReason::Unrecognized);
        };
        self.finalize(self.eval_spec(user, &spec))
    }

    /// Evaluate a dynamic config or experiment for the user.
    pub fn get_config(&self, user: &User, config_name: &str) -> EvaluationResult {
        if let Some(value) = lookup_override(&self.config_overrides, config_name, user) {
            return self.override_value_result(value);
        }
        if self.store.get_init_reason() == InitReason::Uninitialized {
            return self.default_result(EvaluationReason::Uninitialized);
        }
        let Some(spec) = self.store.get_config(config_name) else {
            return self.default_result(EvaluationReason::Unrecognized);
        };
        self.finalize(self.eval_spec(user, &spec))
    }

    /// Evaluate a layer for the user.
    pub fn get_layer(&self, user: &User, layer_name: &str) -> EvaluationResult {
        if let Some(value) = lookup_override(&self.layer_overrides, layer_name, user) {
            return self.override_value_result(value);
        }
        if self.store.get_init_reason() == InitReason::Uninitialized {
            return self.default_result(EvaluationReason::Uninitialized);
        }
        let Some(spec) = self.store.get_layer(layer_name) else {
            return self.default_result(EvaluationReason::Unrecognized);
        };
        self.finalize(self.eval_spec(user, &spec))
    }

    /// Project the whole catalog, evaluated against `user`, into a client
    /// bootstrap payload. Returns `None` until the store serves a catalog.
    pub fn get_client_initialize_response(
        &self,
        user: &User,
        args: ClientInitArgs,
    ) -> Option<ClientInitializeResponse> {
        client_init::client_initialize_response(self, user, args)
    }

    pub fn override_gate(&self, gate_name: &str, value: bool, user_id: Option<&str>) {
        insert_override(&self.gate_overrides, gate_name, value, user_id);
    }

    pub fn override_config(&self, config_name: &str, value: Value, user_id: Option<&str>) {
        insert_override(&self.config_overrides, config_name, value, user_id);
    }

    pub fn override_layer(&self, layer_name: &str, value: Value, user_id: Option<&str>) {
        insert_override(&self.layer_overrides, layer_name, value, user_id);
    }

    pub fn remove_gate_override(&self, gate_name: &str, user_id: Option<&str>) {
        remove_override(&self.gate_overrides, gate_name, user_id);
    }

    pub fn remove_config_override(&self, config_name: &str, user_id: Option<&str>) {
        remove_override(&self.config_overrides, config_name, user_id);
    }

    pub fn remove_layer_override(&self, layer_name: &str, user_id: Option<&str>) {
        remove_override(&self.layer_overrides, layer_name, user_id);
    }

    pub fn clear_all_gate_overrides(&self) {
        self.gate_overrides
            .write()
            .expect("thread holding override lock should not panic")
            .clear();
    }

    pub fn clear_all_config_overrides(&self) {
        self.config_overrides
            .write()
            .expect("thread holding override lock should not panic")
            .clear();
    }

    pub fn clear_all_layer_overrides(&self) {
        self.layer_overrides
            .write()
            .expect("thread holding override lock should not panic")
            .clear();
    }

    pub fn clear_all_overrides(&self) {
        self.clear_all_gate_overrides();
        self.clear_all_config_overrides();
        self.clear_all_layer_overrides();
    }

    /// Stop the store's background work. Evaluation keeps serving the last
    /// committed catalog.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }

    fn default_result(&self, reason: EvaluationReason) -> EvaluationResult {
        EvaluationResult {
            json_value: json!({}),
            evaluation_details: Some(EvaluationDetails::from_store(&self.store, reason)),
            ..Default::default()
        }
    }

    fn override_value_result(&self, value: Value) -> EvaluationResult {
        EvaluationResult {
            value: true,
            rule_id: OVERRIDE_RULE_ID.to_owned(),
            json_value: value,
            evaluation_details: Some(EvaluationDetails::from_store(
                &self.store,
                EvaluationReason::LocalOverride,
            )),
            ..Default::default()
        }
    }

    /// Deduplicate exposures and stamp provenance. Applied once, at the
    /// public boundary; internal recursion keeps raw exposures to preserve
    /// ordering context.
    fn finalize(&self, mut result: EvaluationResult) -> EvaluationResult {
        if result.unsupported {
            result.evaluation_details = Some(EvaluationDetails::from_store(
                &self.store,
                EvaluationReason::Unsupported,
            ));
            return result;
        }
        result.undelegated_secondary_exposures =
            Some(clean_exposures(result.undelegated_exposures()));
        result.secondary_exposures = clean_exposures(&result.secondary_exposures);
        result.evaluation_details = Some(EvaluationDetails::from_store(
            &self.store,
            self.store.get_init_reason().into(),
        ));
        result
    }

    /// Interpret one spec. The first passing rule wins; a rule with a
    /// delegate hands the evaluation off to the delegate spec.
    pub(crate) fn eval_spec(&self, user: &User, spec: &ConfigSpec) -> EvaluationResult {
        if !spec.enabled {
            return EvaluationResult {
                value: false,
                rule_id: "disabled".to_owned(),
                json_value: spec.default_value.clone(),
                config_version: spec.version,
                ..Default::default()
            };
        }

        let mut exposures: Vec<SecondaryExposure> = Vec::new();

        for rule in &spec.rules {
            let outcome = self.eval_rule(user, rule);
            if outcome.unsupported {
                return EvaluationResult {
                    unsupported: true,
                    ..Default::default()
                };
            }
            exposures.extend(outcome.exposures);
            if !outcome.passed {
                continue;
            }

            if let Some(delegate_name) = &rule.config_delegate {
                if let Some(delegate) = self.store.get_config(delegate_name) {
                    return self.eval_delegate(user, rule, delegate_name, &delegate, exposures);
                }
                // Missing delegate: evaluate the rule without delegation.
            }

            let passed_allocation = eval_pass_percentage(user, rule, spec);
            return EvaluationResult {
                value: passed_allocation,
                rule_id: rule.id.clone(),
                group_name: rule.group_name.clone(),
                is_experiment_group: rule.is_experiment_group.unwrap_or(false),
                json_value: if passed_allocation {
                    rule.return_value.clone()
                } else {
                    spec.default_value.clone()
                },
                secondary_exposures: exposures,
                explicit_parameters: spec.explicit_parameters.clone(),
                config_version: spec.version,
                ..Default::default()
            };
        }

        EvaluationResult {
            value: false,
            rule_id: "default".to_owned(),
            json_value: spec.default_value.clone(),
            secondary_exposures: exposures,
            explicit_parameters: spec.explicit_parameters.clone(),
            config_version: spec.version,
            ..Default::default()
        }
    }

    fn eval_delegate(
        &self,
        user: &User,
        rule: &ConfigRule,
        delegate_name: &str,
        delegate: &ConfigSpec,
        exposures: Vec<SecondaryExposure>,
    ) -> EvaluationResult {
        let mut result = self.eval_spec(user, delegate);
        if result.unsupported {
            return result;
        }
        result.config_delegate = Some(delegate_name.to_owned());
        result.undelegated_secondary_exposures = Some(exposures.clone());
        result.explicit_parameters = delegate.explicit_parameters.clone();

        let mut combined = exposures;
        combined.extend(std::mem::take(&mut result.secondary_exposures));
        result.secondary_exposures = combined;

        // The delegate's group name wins only when it set one.
        if result.group_name.is_none() {
            result.group_name = rule.group_name.clone();
        }
        result
    }

    fn eval_rule(&self, user: &User, rule: &ConfigRule) -> RuleOutcome {
        let mut passed = true;
        let mut exposures = Vec::new();
        for condition in &rule.conditions {
            let outcome = self.eval_condition(user, condition);
            if outcome.unsupported {
                return RuleOutcome {
                    passed: false,
                    unsupported: true,
                    exposures: Vec::new(),
                };
            }
            exposures.extend(outcome.exposures);
            if !outcome.passed {
                passed = false;
            }
        }
        RuleOutcome {
            passed,
            unsupported: false,
            exposures,
        }
    }

    fn eval_condition(&self, user: &User, condition: &ConfigCondition) -> ConditionOutcome {
        let field = condition.field.as_deref().unwrap_or("");

        let value = match condition.kind {
            ConditionKind::Public => return ConditionOutcome::pass(),
            ConditionKind::PassGate => return self.eval_gate_condition(user, condition, true),
            ConditionKind::FailGate => return self.eval_gate_condition(user, condition, false),
            ConditionKind::MultiPassGate => {
                return self.eval_multi_gate_condition(user, condition, true)
            }
            ConditionKind::MultiFailGate => {
                return self.eval_multi_gate_condition(user, condition, false)
            }
            ConditionKind::Unknown => return ConditionOutcome::unsupported(),

            ConditionKind::IpBased | ConditionKind::UserField => {
                user.get_field(field).unwrap_or(Value::Null)
            }
            ConditionKind::UaBased => user
                .get_field(field)
                .or_else(|| ua_field(user, field))
                .unwrap_or(Value::Null),
            ConditionKind::EnvironmentField => user
                .get_environment_field(field)
                .map(Value::String)
                .unwrap_or(Value::Null),
            ConditionKind::CurrentTime => json!(Utc::now().timestamp_millis()),
            ConditionKind::UserBucket => {
                let unit_id = user.unit_id(condition.id_type.as_deref()).unwrap_or("");
                let input = format!("{}.{}", condition.bucket_salt(), unit_id);
                json!(sha256_to_u64(&input) % USER_BUCKET_COUNT)
            }
            ConditionKind::UnitId => user
                .unit_id(condition.id_type.as_deref())
                .map(|id| Value::String(id.to_owned()))
                .unwrap_or(Value::Null),
        };

        let Some(operator) = &condition.operator else {
            return ConditionOutcome::unsupported();
        };
        match apply_operator(operator, &value, &condition.target_value, &self.store) {
            Some(passed) => ConditionOutcome {
                passed,
                unsupported: false,
                exposures: Vec::new(),
            },
            None => ConditionOutcome::unsupported(),
        }
    }

    fn eval_gate_condition(
        &self,
        user: &User,
        condition: &ConfigCondition,
        want_pass: bool,
    ) -> ConditionOutcome {
        let Some(gate_name) = string_of(&condition.target_value) else {
            return ConditionOutcome::fail();
        };
        let inner = self.eval_nested_gate(user, &gate_name);
        if inner.unsupported {
            return ConditionOutcome::unsupported();
        }
        let mut exposures = inner.secondary_exposures;
        exposures.push(SecondaryExposure::new(gate_name, inner.value, inner.rule_id));
        ConditionOutcome {
            passed: if want_pass { inner.value } else { !inner.value },
            unsupported: false,
            exposures,
        }
    }

    /// Short-circuit OR over the target gates: the first gate matching the
    /// wanted polarity passes the condition. Exposures accumulate for every
    /// gate checked up to that point.
    fn eval_multi_gate_condition(
        &self,
        user: &User,
        condition: &ConfigCondition,
        want_pass: bool,
    ) -> ConditionOutcome {
        let Value::Array(gate_names) = &condition.target_value else {
            return ConditionOutcome::fail();
        };
        let mut passed = false;
        let mut exposures = Vec::new();
        for gate_name in gate_names {
            let Some(gate_name) = string_of(gate_name) else {
                continue;
            };
            let inner = self.eval_nested_gate(user, &gate_name);
            if inner.unsupported {
                return ConditionOutcome::unsupported();
            }
            let inner_value = inner.value;
            exposures.extend(inner.secondary_exposures);
            exposures.push(SecondaryExposure::new(gate_name, inner_value, inner.rule_id));
            if inner_value == want_pass {
                passed = true;
                break;
            }
        }
        ConditionOutcome {
            passed,
            unsupported: false,
            exposures,
        }
    }

    fn eval_nested_gate(&self, user: &User, gate_name: &str) -> EvaluationResult {
        match self.store.get_gate(gate_name) {
            Some(spec) => self.eval_spec(user, &spec),
            None => EvaluationResult::default(),
        }
    }
}

struct RuleOutcome {
    passed: bool,
    unsupported: bool,
    exposures: Vec<SecondaryExposure>,
}

struct ConditionOutcome {
    passed: bool,
    unsupported: bool,
    exposures: Vec<SecondaryExposure>,
}

impl ConditionOutcome {
    fn pass() -> ConditionOutcome {
        ConditionOutcome {
            passed: true,
            unsupported: false,
            exposures: Vec::new(),
        }
    }

    fn fail() -> ConditionOutcome {
        ConditionOutcome {
            passed: false,
            unsupported: false,
            exposures: Vec::new(),
        }
    }

    fn unsupported() -> ConditionOutcome {
        ConditionOutcome {
            passed: false,
            unsupported: true,
            exposures: Vec::new(),
        }
    }
}

/// Salted traffic allocation: the user passes iff
/// `sha256_u64("{spec.salt}.{rule.salt}.{unit_id}") mod 10000` lands below
/// `pass_percentage * 100`.
fn eval_pass_percentage(user: &User, rule: &ConfigRule, spec: &ConfigSpec) -> bool {
    if rule.pass_percentage >= 100.0 {
        return true;
    }
    if rule.pass_percentage <= 0.0 {
        return false;
    }
    let unit_id = user.unit_id(Some(&rule.id_type)).unwrap_or("");
    let input = format!("{}.{}.{}", spec.salt, rule.allocation_salt(), unit_id);
    let bucket = sha256_to_u64(&input) % CONDITION_SEGMENT_COUNT;
    (bucket as f64) < rule.pass_percentage * 100.0
}

/// Fields backed by parsing the user agent. Over-long user agents are not
/// parsed.
fn ua_field(user: &User, field: &str) -> Option<Value> {
    let user_agent = user.user_agent.as_deref()?;
    if user_agent.len() > MAX_PARSED_VALUE_LEN {
        return None;
    }
    let parsed = woothee::parser::Parser::new().parse(user_agent)?;
    let value = match field.to_lowercase().as_str() {
        "os_name" | "osname" => parsed.os.to_string(),
        "os_version" | "osversion" => parsed.os_version.to_string(),
        "browser_name" | "browsername" => parsed.name.to_string(),
        "browser_version" | "browserversion" => parsed.version.to_string(),
        _ => return None,
    };
    Some(Value::String(value))
}

fn lookup_override<T: Clone>(
    overrides: &RwLock<HashMap<String, HashMap<String, T>>>,
    name: &str,
    user: &User,
) -> Option<T> {
    let overrides = overrides
        .read()
        .expect("thread holding override lock should not panic");
    let entry = overrides.get(name)?;
    if let Some(user_id) = &user.user_id {
        if let Some(value) = entry.get(user_id) {
            return Some(value.clone());
        }
    }
    // The empty key is the explicit all-users sentinel.
    entry.get("").cloned()
}

fn insert_override<T>(
    overrides: &RwLock<HashMap<String, HashMap<String, T>>>,
    name: &str,
    value: T,
    user_id: Option<&str>,
) {
    overrides
        .write()
        .expect("thread holding override lock should not panic")
        .entry(name.to_owned())
        .or_default()
        .insert(user_id.unwrap_or("").to_owned(), value);
}

fn remove_override<T>(
    overrides: &RwLock<HashMap<String, HashMap<String, T>>>,
    name: &str,
    user_id: Option<&str>,
) {
    let mut overrides = overrides
        .write()
        .expect("thread holding override lock should not panic");
    if let Some(entry) = overrides.get_mut(name) {
        entry.remove(user_id.unwrap_or(""));
        if entry.is_empty() {
            overrides.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::diagnostics::NoopDiagnostics;
    use crate::network::testing::ScriptedFetcher;
    use crate::network::LocalFetcher;
    use crate::spec_store::{IdListsInitStrategy, SpecStoreConfig};
    use crate::SdkMetadata;

    const METADATA: SdkMetadata = SdkMetadata {
        name: "flagstone-test",
        version: "0.0.0",
    };

    fn quiet_config() -> SpecStoreConfig {
        let mut config = SpecStoreConfig::new("secret-test", METADATA);
        config.disable_rulesets_sync = true;
        config.disable_id_lists_sync = true;
        config.id_lists_init_strategy = IdListsInitStrategy::None;
        config
    }

    fn catalog() -> String {
        json!({
            "has_updates": true,
            "time": 100,
            "feature_gates": [
                {
                    "name": "fifty_fifty",
                    "type": "feature_gate",
                    "salt": "s",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "rule_1",
                        "salt": "r",
                        "passPercentage": 50.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{"type": "public"}],
                    }],
                },
                {
                    "name": "disabled_gate",
                    "type": "feature_gate",
                    "salt": "s",
                    "enabled": false,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [],
                },
                {
                    "name": "segment:beta",
                    "type": "segment",
                    "salt": "s",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "segment_rule",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{"type": "public"}],
                    }],
                },
                {
                    "name": "dependent_gate",
                    "type": "feature_gate",
                    "salt": "s2",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "dep_rule",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [
                            {"type": "pass_gate", "targetValue": "fifty_fifty"},
                            {"type": "pass_gate", "targetValue": "segment:beta"},
                            {"type": "pass_gate", "targetValue": "fifty_fifty"},
                        ],
                    }],
                },
                {
                    "name": "bucket_gate",
                    "type": "feature_gate",
                    "salt": "s3",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "bucket_rule",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{
                            "type": "user_bucket",
                            "operator": "lt",
                            "targetValue": 70,
                            "idType": "userID",
                            "additionalValues": {"salt": "bkt"},
                        }],
                    }],
                },
                {
                    "name": "multi_gate",
                    "type": "feature_gate",
                    "salt": "s4",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "multi_rule",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{
                            "type": "multi_pass_gate",
                            "targetValue": ["missing_gate", "fifty_fifty"],
                        }],
                    }],
                },
                {
                    "name": "custom_id_gate",
                    "type": "feature_gate",
                    "salt": "s5",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "custom_rule",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{
                            "type": "unit_id",
                            "idType": "companyID",
                            "operator": "any",
                            "targetValue": ["c9"],
                        }],
                    }],
                },
                {
                    "name": "env_gate",
                    "type": "feature_gate",
                    "salt": "s6",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "env_rule",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{
                            "type": "environment_field",
                            "field": "tier",
                            "operator": "any",
                            "targetValue": ["staging"],
                        }],
                    }],
                },
                {
                    "name": "unsupported_gate",
                    "type": "feature_gate",
                    "salt": "s7",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "future_rule",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{"type": "brand_new_check"}],
                    }],
                },
                {
                    "name": "segment_list_gate",
                    "type": "feature_gate",
                    "salt": "s8",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "list_rule",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{
                            "type": "unit_id",
                            "idType": "userID",
                            "operator": "in_segment_list",
                            "targetValue": "list_1",
                        }],
                    }],
                },
            ],
            "dynamic_configs": [
                {
                    "name": "exp_a",
                    "type": "experiment",
                    "salt": "exp_a_salt",
                    "enabled": true,
                    "defaultValue": {"param_a": "a_default"},
                    "idType": "userID",
                    "rules": [{
                        "id": "delegating_rule",
                        "passPercentage": 100.0,
                        "returnValue": {},
                        "idType": "userID",
                        "groupName": "outer_group",
                        "configDelegate": "exp_b",
                        "conditions": [{"type": "public"}],
                    }],
                },
                {
                    "name": "exp_b",
                    "type": "experiment",
                    "salt": "exp_salt",
                    "enabled": true,
                    "defaultValue": {"param_a": "b_default"},
                    "idType": "userID",
                    "isActive": true,
                    "explicitParameters": ["param_a"],
                    "rules": [{
                        "id": "grp",
                        "salt": "grp",
                        "passPercentage": 100.0,
                        "returnValue": {"param_a": "b_value"},
                        "idType": "userID",
                        "groupName": "control",
                        "isExperimentGroup": true,
                        "conditions": [{"type": "public"}],
                    }],
                },
                {
                    "name": "plain_config",
                    "type": "dynamic_config",
                    "salt": "plain_salt",
                    "enabled": true,
                    "defaultValue": {"k": 0},
                    "idType": "userID",
                    "rules": [{
                        "id": "plain_rule",
                        "passPercentage": 100.0,
                        "returnValue": {"k": 1},
                        "idType": "userID",
                        "conditions": [{"type": "public"}],
                    }],
                },
                {
                    "name": "exp_c",
                    "type": "experiment",
                    "salt": "exp_c_salt",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "outer_rule",
                        "passPercentage": 100.0,
                        "returnValue": {},
                        "idType": "userID",
                        "groupName": "outer_only",
                        "configDelegate": "plain_config",
                        "conditions": [{"type": "public"}],
                    }],
                },
                {
                    "name": "exp_d",
                    "type": "experiment",
                    "salt": "exp_d_salt",
                    "enabled": true,
                    "defaultValue": {"x": 0},
                    "idType": "userID",
                    "rules": [{
                        "id": "dangling_rule",
                        "passPercentage": 100.0,
                        "returnValue": {"x": 1},
                        "idType": "userID",
                        "configDelegate": "does_not_exist",
                        "conditions": [{"type": "public"}],
                    }],
                },
            ],
            "layer_configs": [],
            "layers": {},
        })
        .to_string()
    }

    fn evaluator() -> Evaluator {
        let store = SpecStore::new(
            quiet_config(),
            Arc::new(LocalFetcher),
            None,
            Arc::new(NoopDiagnostics),
        );
        store.sync_bootstrap_values(&catalog()).unwrap();
        Evaluator::new(store)
    }

    fn user(user_id: &str) -> User {
        User::with_user_id(user_id)
    }

    #[test]
    fn pass_percentage_buckets_deterministically() {
        let evaluator = evaluator();

        // sha256_u64("s.r.u1") % 10000 == 4917, under the 50% cut.
        let result = evaluator.check_gate(&user("u1"), "fifty_fifty");
        assert!(result.value);
        assert_eq!(result.rule_id, "rule_1");
        assert_eq!(result.json_value, json!(true));

        // sha256_u64("s.r.user-1") % 10000 == 5587, over the cut: the rule
        // still matches but the allocation fails.
        let result = evaluator.check_gate(&user("user-1"), "fifty_fifty");
        assert!(!result.value);
        assert_eq!(result.rule_id, "rule_1");
        assert_eq!(result.json_value, json!({}));

        let details = result.evaluation_details.unwrap();
        assert_eq!(details.reason, EvaluationReason::Bootstrap);
        assert_eq!(details.config_sync_time, 100);
    }

    #[test]
    fn evaluation_is_deterministic_across_runs() {
        let evaluator = evaluator();
        for name in ["fifty_fifty", "dependent_gate", "bucket_gate", "multi_gate"] {
            let first = evaluator.check_gate(&user("u1"), name);
            let second = evaluator.check_gate(&user("u1"), name);
            assert_eq!(first.value, second.value, "{name}");
            assert_eq!(first.rule_id, second.rule_id, "{name}");
            assert_eq!(first.json_value, second.json_value, "{name}");
            assert_eq!(
                first.secondary_exposures, second.secondary_exposures,
                "{name}"
            );
        }
    }

    #[test]
    fn disabled_spec_short_circuits() {
        let result = evaluator().check_gate(&user("u1"), "disabled_gate");
        assert!(!result.value);
        assert_eq!(result.rule_id, "disabled");
    }

    #[test]
    fn no_matching_rule_returns_default() {
        let result = evaluator().check_gate(&user("u1"), "env_gate");
        assert!(!result.value);
        assert_eq!(result.rule_id, "default");

        let mut staging_user = user("u1");
        staging_user.environment = Some(
            [("tier".to_owned(), "staging".to_owned())]
                .into_iter()
                .collect(),
        );
        let result = evaluator().check_gate(&staging_user, "env_gate");
        assert!(result.value);
        assert_eq!(result.rule_id, "env_rule");
    }

    #[test]
    fn user_bucket_uses_salted_thousand_buckets() {
        let evaluator = evaluator();

        // sha256_u64("bkt.u2") % 1000 == 69, under the lt-70 target.
        assert!(evaluator.check_gate(&user("u2"), "bucket_gate").value);
        // sha256_u64("bkt.alice") % 1000 == 419.
        let result = evaluator.check_gate(&user("alice"), "bucket_gate");
        assert!(!result.value);
        assert_eq!(result.rule_id, "default");
    }

    #[test]
    fn nested_gates_record_deduped_exposures_without_segments() {
        let result = evaluator().check_gate(&user("u1"), "dependent_gate");

        assert!(result.value);
        // Three conditions ran (two on the same gate, one on a segment), but
        // the cleaned exposures keep one entry and drop the segment.
        assert_eq!(
            result.secondary_exposures,
            vec![SecondaryExposure::new("fifty_fifty", true, "rule_1")]
        );
    }

    #[test]
    fn multi_pass_gate_short_circuits_and_accumulates_exposures() {
        let result = evaluator().check_gate(&user("u1"), "multi_gate");

        assert!(result.value);
        assert_eq!(
            result.secondary_exposures,
            vec![
                SecondaryExposure::new("missing_gate", false, ""),
                SecondaryExposure::new("fifty_fifty", true, "rule_1"),
            ]
        );
    }

    #[test]
    fn custom_id_types_resolve_against_custom_ids() {
        let evaluator = evaluator();

        let mut with_company = user("u1");
        with_company.custom_ids = Some(
            [("companyID".to_owned(), "c9".to_owned())]
                .into_iter()
                .collect(),
        );
        assert!(evaluator.check_gate(&with_company, "custom_id_gate").value);
        assert!(!evaluator.check_gate(&user("u1"), "custom_id_gate").value);
    }

    #[test]
    fn delegation_hands_off_to_the_delegate() {
        let result = evaluator().get_config(&user("u1"), "exp_a");

        assert!(result.value);
        assert_eq!(result.config_delegate.as_deref(), Some("exp_b"));
        assert_eq!(result.rule_id, "grp");
        // The delegate set a group name, so it wins over the rule's.
        assert_eq!(result.group_name.as_deref(), Some("control"));
        assert!(result.is_experiment_group);
        assert_eq!(result.json_value, json!({"param_a": "b_value"}));
        assert_eq!(result.explicit_parameters, Some(vec!["param_a".to_owned()]));
        assert_eq!(result.undelegated_secondary_exposures, Some(vec![]));
    }

    #[test]
    fn delegate_without_group_name_falls_back_to_rule() {
        let result = evaluator().get_config(&user("u1"), "exp_c");
        assert_eq!(result.config_delegate.as_deref(), Some("plain_config"));
        assert_eq!(result.rule_id, "plain_rule");
        assert_eq!(result.group_name.as_deref(), Some("outer_only"));
    }

    #[test]
    fn missing_delegate_falls_through_to_the_rule() {
        let result = evaluator().get_config(&user("u1"), "exp_d");
        assert_eq!(result.config_delegate, None);
        assert_eq!(result.rule_id, "dangling_rule");
        assert_eq!(result.json_value, json!({"x": 1}));
    }

    #[test]
    fn unsupported_condition_poisons_the_evaluation() {
        let result = evaluator().check_gate(&user("u1"), "unsupported_gate");
        assert!(result.unsupported);
        assert!(!result.value);
        assert_eq!(
            result.evaluation_details.unwrap().reason,
            EvaluationReason::Unsupported
        );
    }

    #[test]
    fn unrecognized_spec_returns_default_false() {
        let result = evaluator().check_gate(&user("u1"), "no_such_gate");
        assert!(!result.value);
        assert_eq!(
            result.evaluation_details.unwrap().reason,
            EvaluationReason::Unrecognized
        );
    }

    #[test]
    fn uninitialized_store_returns_default_false() {
        let store = SpecStore::new(
            quiet_config(),
            Arc::new(LocalFetcher),
            None,
            Arc::new(NoopDiagnostics),
        );
        let evaluator = Evaluator::new(store);

        let result = evaluator.check_gate(&user("u1"), "fifty_fifty");
        assert!(!result.value);
        assert_eq!(
            result.evaluation_details.unwrap().reason,
            EvaluationReason::Uninitialized
        );

        // Overrides are consulted before the initialization check.
        evaluator.override_gate("fifty_fifty", true, None);
        let result = evaluator.check_gate(&user("u1"), "fifty_fifty");
        assert!(result.value);
        assert_eq!(
            result.evaluation_details.unwrap().reason,
            EvaluationReason::LocalOverride
        );
    }

    #[test]
    fn gate_overrides_prefer_user_entries_over_global() {
        let evaluator = evaluator();

        evaluator.override_gate("fifty_fifty", false, Some("u1"));
        evaluator.override_gate("fifty_fifty", true, None);

        let for_u1 = evaluator.check_gate(&user("u1"), "fifty_fifty");
        assert!(!for_u1.value);
        assert_eq!(for_u1.rule_id, "override");
        assert_eq!(
            for_u1.evaluation_details.unwrap().reason,
            EvaluationReason::LocalOverride
        );

        // Any other user hits the global sentinel entry.
        assert!(evaluator.check_gate(&user("user-1"), "fifty_fifty").value);

        evaluator.remove_gate_override("fifty_fifty", Some("u1"));
        assert!(evaluator.check_gate(&user("u1"), "fifty_fifty").value);

        evaluator.clear_all_overrides();
        let result = evaluator.check_gate(&user("user-1"), "fifty_fifty");
        assert_ne!(result.rule_id, "override");
    }

    #[test]
    fn config_overrides_return_the_override_map() {
        let evaluator = evaluator();
        evaluator.override_config("exp_a", json!({"param_a": "forced"}), None);

        let result = evaluator.get_config(&user("u1"), "exp_a");
        assert!(result.value);
        assert_eq!(result.rule_id, "override");
        assert_eq!(result.json_value, json!({"param_a": "forced"}));
    }

    #[tokio::test]
    async fn segment_list_membership_checks_hashed_ids() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let store = SpecStore::new(
            quiet_config(),
            fetcher.clone(),
            None,
            Arc::new(NoopDiagnostics),
        );
        store.sync_bootstrap_values(&catalog()).unwrap();

        fetcher.ok(
            "get_id_lists",
            &json!({
                "list_1": {"url": "https://cdn.example.com/list_1", "fileID": "f1", "creationTime": 1, "size": 10},
            })
            .to_string(),
            None,
        );
        // sha256("a-user") starts with 67f84428.
        fetcher.ok("cdn.example.com/list_1", "+67f84428\n", Some(10));
        store.sync_id_lists().await;

        let evaluator = Evaluator::new(store);
        assert!(evaluator.check_gate(&user("a-user"), "segment_list_gate").value);
        assert!(!evaluator.check_gate(&user("bob"), "segment_list_gate").value);
    }

    #[test]
    fn user_agent_fields_fall_back_to_parsing() {
        let mut ua_user = user("u1");
        ua_user.user_agent = Some(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_owned(),
        );

        assert_eq!(
            super::ua_field(&ua_user, "browser_name"),
            Some(json!("Chrome"))
        );
        assert_eq!(super::ua_field(&ua_user, "os_name"), Some(json!("Windows 10")));
        assert_eq!(super::ua_field(&ua_user, "not_a_ua_field"), None);

        // Over-long user agents are never parsed.
        ua_user.user_agent = Some("a".repeat(MAX_PARSED_VALUE_LEN + 1));
        assert_eq!(super::ua_field(&ua_user, "browser_name"), None);
    }
}
