//! One-shot projection of the whole spec catalog, evaluated against one
//! user, into the payload client SDKs bootstrap from.
use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::hashing::HashAlgorithm;
use crate::specs::SpecType;
use crate::User;

use super::evaluator::Evaluator;
use super::result::{clean_exposures, SecondaryExposure};

/// Options for [`Evaluator::get_client_initialize_response`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientInitArgs {
    /// Hash applied to spec names in the emitted payload.
    pub hash: HashAlgorithm,
}

#[derive(Debug, Serialize)]
pub struct SdkInfo {
    #[serde(rename = "sdkType")]
    pub sdk_type: String,
    #[serde(rename = "sdkVersion")]
    pub sdk_version: String,
}

#[derive(Debug, Serialize)]
pub struct GateEntry {
    pub name: String,
    pub value: bool,
    pub rule_id: String,
    pub secondary_exposures: Vec<SecondaryExposure>,
}

#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub name: String,
    pub value: Value,
    pub rule_id: String,
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub secondary_exposures: Vec<SecondaryExposure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_user_in_experiment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_experiment_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_in_layer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_parameters: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct LayerEntry {
    pub name: String,
    pub value: Value,
    pub rule_id: String,
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub secondary_exposures: Vec<SecondaryExposure>,
    pub undelegated_secondary_exposures: Vec<SecondaryExposure>,
    pub explicit_parameters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated_experiment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_experiment_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_user_in_experiment: Option<bool>,
}

/// The full client bootstrap payload.
#[derive(Debug, Serialize)]
pub struct ClientInitializeResponse {
    pub feature_gates: HashMap<String, GateEntry>,
    pub dynamic_configs: HashMap<String, ConfigEntry>,
    pub layer_configs: HashMap<String, LayerEntry>,
    #[serde(rename = "sdkParams")]
    pub sdk_params: Map<String, Value>,
    pub has_updates: bool,
    pub generator: String,
    #[serde(rename = "sdkInfo")]
    pub sdk_info: SdkInfo,
    pub time: i64,
    pub evaluated_keys: HashMap<String, Value>,
    pub hash_used: String,
    /// The user the payload was evaluated for, with private attributes
    /// stripped.
    pub user: Value,
}

pub(crate) fn client_initialize_response(
    evaluator: &Evaluator,
    user: &User,
    args: ClientInitArgs,
) -> Option<ClientInitializeResponse> {
    let store = evaluator.store();
    if !store.is_serving_checks() {
        return None;
    }
    // One snapshot for the whole walk: every entry reflects the same catalog
    // generation.
    let specs = store.current();

    let mut feature_gates = HashMap::new();
    for (name, spec) in &specs.feature_gates {
        if matches!(spec.spec_type, SpecType::Segment | SpecType::Holdout) {
            continue;
        }
        let result = evaluator.eval_spec(user, spec);
        let hashed = args.hash.hash_name(name);
        feature_gates.insert(
            hashed.clone(),
            GateEntry {
                name: hashed,
                value: !result.unsupported && result.value,
                rule_id: result.rule_id,
                secondary_exposures: clean_exposures(&result.secondary_exposures),
            },
        );
    }

    let mut dynamic_configs = HashMap::new();
    for (name, spec) in &specs.dynamic_configs {
        let result = evaluator.eval_spec(user, spec);
        let hashed = args.hash.hash_name(name);

        let mut value = if result.unsupported {
            json!({})
        } else {
            result.json_value.clone()
        };
        let mut entry = ConfigEntry {
            name: hashed.clone(),
            value: Value::Null,
            rule_id: result.rule_id.clone(),
            group: result.rule_id,
            group_name: result.group_name,
            secondary_exposures: clean_exposures(&result.secondary_exposures),
            is_user_in_experiment: None,
            is_experiment_active: None,
            is_in_layer: None,
            explicit_parameters: None,
        };

        if spec.spec_type == SpecType::Experiment {
            entry.is_user_in_experiment = Some(result.is_experiment_group);
            entry.is_experiment_active = Some(spec.is_active.unwrap_or(false));
            if spec.has_shared_params == Some(true) {
                entry.is_in_layer = Some(true);
                entry.explicit_parameters =
                    Some(spec.explicit_parameters.clone().unwrap_or_default());
                // Layer defaults first, the evaluated value overlays them.
                if let Some(layer_spec) = specs
                    .experiment_to_layer
                    .get(name)
                    .and_then(|layer_name| specs.layer_configs.get(layer_name))
                {
                    value = merge_objects(&layer_spec.default_value, &value);
                }
            }
        }

        entry.value = value;
        dynamic_configs.insert(hashed, entry);
    }

    let mut layer_configs = HashMap::new();
    for (name, spec) in &specs.layer_configs {
        let result = evaluator.eval_spec(user, spec);
        let hashed = args.hash.hash_name(name);

        let mut entry = LayerEntry {
            name: hashed.clone(),
            value: if result.unsupported {
                json!({})
            } else {
                result.json_value.clone()
            },
            rule_id: result.rule_id.clone(),
            group: result.rule_id.clone(),
            group_name: result.group_name.clone(),
            secondary_exposures: clean_exposures(&result.secondary_exposures),
            undelegated_secondary_exposures: clean_exposures(result.undelegated_exposures()),
            explicit_parameters: spec.explicit_parameters.clone().unwrap_or_default(),
            allocated_experiment_name: None,
            is_experiment_active: None,
            is_user_in_experiment: None,
        };

        if let Some(delegate_name) = &result.config_delegate {
            entry.allocated_experiment_name = Some(args.hash.hash_name(delegate_name));
            if let Some(delegate_spec) = specs.dynamic_configs.get(delegate_name) {
                entry.is_experiment_active = Some(delegate_spec.is_active.unwrap_or(false));
                entry.is_user_in_experiment = Some(result.is_experiment_group);
                entry.explicit_parameters =
                    delegate_spec.explicit_parameters.clone().unwrap_or_default();
            }
        }

        layer_configs.insert(hashed, entry);
    }

    let mut evaluated_keys = HashMap::new();
    if let Some(user_id) = &user.user_id {
        evaluated_keys.insert("userID".to_owned(), json!(user_id));
    }
    if let Some(custom_ids) = &user.custom_ids {
        evaluated_keys.insert("customIDs".to_owned(), json!(custom_ids));
    }

    let metadata = store.sdk_metadata();
    Some(ClientInitializeResponse {
        feature_gates,
        dynamic_configs,
        layer_configs,
        sdk_params: Map::new(),
        has_updates: true,
        generator: metadata.name.to_owned(),
        sdk_info: SdkInfo {
            sdk_type: metadata.name.to_owned(),
            sdk_version: metadata.version.to_owned(),
        },
        time: specs.time,
        evaluated_keys,
        hash_used: args.hash.as_str().to_owned(),
        // Private attributes are stripped by the user's serialization.
        user: serde_json::to_value(user).unwrap_or(json!({})),
    })
}

fn merge_objects(base: &Value, overlay: &Value) -> Value {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    if let Some(overlay) = overlay.as_object() {
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}
