use std::borrow::Cow;
use std::sync::Arc;

use serde_json::Value;

use flagstone_core::diagnostics::NoopDiagnostics;
use flagstone_core::eval::client_init::{ClientInitArgs, ClientInitializeResponse};
use flagstone_core::eval::Evaluator;
use flagstone_core::network::{Fetcher, HttpFetcher, LocalFetcher};
use flagstone_core::spec_store::{SpecStore, SpecStoreConfig};
use flagstone_core::{Result, SdkMetadata, User};

use crate::types::{DynamicConfig, FeatureGate, Layer};
use crate::ClientConfig;

const SDK_METADATA: SdkMetadata = SdkMetadata {
    name: "flagstone-rust",
    version: env!("CARGO_PKG_VERSION"),
};

/// A Flagstone client.
///
/// Create one per process via [`ClientConfig::to_client`], call
/// [`Client::initialize`] once at startup, and share the client across
/// request handlers. Evaluation calls never block on the network and never
/// panic; before the first catalog arrives they return default-false results.
pub struct Client {
    store: Arc<SpecStore>,
    evaluator: Evaluator,
    environment: Option<String>,
    init_timeout: Option<std::time::Duration>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Client {
        let fetcher: Arc<dyn Fetcher> = if config.local_mode {
            Arc::new(LocalFetcher)
        } else {
            Arc::new(HttpFetcher::new())
        };

        let mut store_config = SpecStoreConfig::new(config.sdk_key, SDK_METADATA);
        if let Some(api_base) = config.api_base {
            store_config.api_base = api_base;
        }
        if let Some(dcs_base) = config.dcs_base {
            store_config.dcs_base = dcs_base;
        }
        store_config.bootstrap_values = config.bootstrap_values;
        if let Some(interval) = config.rulesets_sync_interval {
            store_config = store_config.with_rulesets_sync_interval(interval);
        }
        if let Some(interval) = config.id_lists_sync_interval {
            store_config = store_config.with_id_lists_sync_interval(interval);
        }
        store_config.disable_rulesets_sync = config.disable_rulesets_sync;
        store_config.disable_id_lists_sync = config.disable_id_lists_sync;
        store_config.id_lists_init_strategy = config.id_lists_init_strategy;
        store_config.rules_updated_callback = config.rules_updated_callback;

        let diagnostics = config
            .diagnostics
            .unwrap_or_else(|| Arc::new(NoopDiagnostics));
        let store = SpecStore::new(
            store_config,
            fetcher,
            config.data_adapter,
            diagnostics,
        );

        Client {
            evaluator: Evaluator::new(store.clone()),
            store,
            environment: config.environment,
            init_timeout: config.init_timeout,
        }
    }

    /// Seed the spec catalog and start background syncing.
    ///
    /// Blocks until the initial catalog is resolved (or the configured init
    /// timeout elapses, in which case the client comes up uninitialized and
    /// keeps syncing in the background).
    pub fn initialize(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        match self.init_timeout {
            Some(timeout) => {
                let initialized = runtime
                    .block_on(async { tokio::time::timeout(timeout, self.store.initialize()).await });
                match initialized {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        log::warn!(target: "flagstone", "initialize timed out after {timeout:?}; continuing in the background");
                        self.store.start_polling();
                        Ok(())
                    }
                }
            }
            None => runtime.block_on(self.store.initialize()),
        }
    }

    /// Whether the user passes the gate.
    pub fn check_gate(&self, user: &User, gate_name: &str) -> bool {
        self.get_feature_gate(user, gate_name).value
    }

    /// The gate result with rule and provenance attached.
    pub fn get_feature_gate(&self, user: &User, gate_name: &str) -> FeatureGate {
        let user = self.normalize_user(user);
        FeatureGate::from_result(gate_name, self.evaluator.check_gate(&user, gate_name))
    }

    /// The dynamic config value for the user.
    pub fn get_config(&self, user: &User, config_name: &str) -> DynamicConfig {
        let user = self.normalize_user(user);
        DynamicConfig::from_result(config_name, self.evaluator.get_config(&user, config_name))
    }

    /// The experiment variant for the user. Experiments are dynamic configs
    /// with group semantics; this is `get_config` under a clearer name.
    pub fn get_experiment(&self, user: &User, experiment_name: &str) -> DynamicConfig {
        self.get_config(user, experiment_name)
    }

    /// The layer parameter values for the user.
    pub fn get_layer(&self, user: &User, layer_name: &str) -> Layer {
        let user = self.normalize_user(user);
        Layer::from_result(layer_name, self.evaluator.get_layer(&user, layer_name))
    }

    /// The full catalog evaluated for one user, in the shape client SDKs
    /// bootstrap from. `None` until the first catalog arrives.
    pub fn get_client_initialize_response(
        &self,
        user: &User,
        args: ClientInitArgs,
    ) -> Option<ClientInitializeResponse> {
        let user = self.normalize_user(user);
        self.evaluator.get_client_initialize_response(&user, args)
    }

    /// Force a gate's value. `user_id: None` applies to all users; a
    /// user-specific override wins over the global one.
    pub fn override_gate(&self, gate_name: &str, value: bool, user_id: Option<&str>) {
        self.evaluator.override_gate(gate_name, value, user_id);
    }

    /// Force a config's value map.
    pub fn override_config(&self, config_name: &str, value: Value, user_id: Option<&str>) {
        self.evaluator.override_config(config_name, value, user_id);
    }

    /// Force a layer's value map.
    pub fn override_layer(&self, layer_name: &str, value: Value, user_id: Option<&str>) {
        self.evaluator.override_layer(layer_name, value, user_id);
    }

    pub fn remove_gate_override(&self, gate_name: &str, user_id: Option<&str>) {
        self.evaluator.remove_gate_override(gate_name, user_id);
    }

    pub fn remove_config_override(&self, config_name: &str, user_id: Option<&str>) {
        self.evaluator.remove_config_override(config_name, user_id);
    }

    pub fn remove_layer_override(&self, layer_name: &str, user_id: Option<&str>) {
        self.evaluator.remove_layer_override(layer_name, user_id);
    }

    pub fn clear_all_overrides(&self) {
        self.evaluator.clear_all_overrides();
    }

    /// Watchdog hook for request paths: restarts background sync if its
    /// pollers have quiesced. Returns a description of what was kicked.
    pub fn reset_sync_timer_if_exited(&self) -> Option<String> {
        self.store.reset_sync_timer_if_exited()
    }

    /// Stop background syncing. Evaluation keeps serving the last catalog.
    pub fn shutdown(&self) {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.store.shutdown()),
            Err(err) => {
                log::error!(target: "flagstone", "failed to build shutdown runtime: {err}");
            }
        }
    }

    /// Stamp the configured environment tier onto users that do not carry
    /// one.
    fn normalize_user<'a>(&self, user: &'a User) -> Cow<'a, User> {
        match (&self.environment, &user.environment) {
            (Some(tier), None) => {
                let mut user = user.clone();
                user.environment = Some(
                    [("tier".to_owned(), tier.clone())].into_iter().collect(),
                );
                Cow::Owned(user)
            }
            _ => Cow::Borrowed(user),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::HashAlgorithm;

    fn catalog() -> String {
        json!({
            "has_updates": true,
            "time": 100,
            "feature_gates": [
                {
                    "name": "release_gate",
                    "type": "feature_gate",
                    "salt": "s",
                    "enabled": true,
                    "defaultValue": {},
                    "idType": "userID",
                    "rules": [{
                        "id": "rule_1",
                        "passPercentage": 100.0,
                        "returnValue": true,
                        "idType": "userID",
                        "conditions": [{"type": "public"}],
                    }],
                },
                {
                    "name": "staging_gate",
                    "type": "feature_gate",
                    "salt": "s",
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
            ],
            "dynamic_configs": [{
                "name": "pricing",
                "type": "dynamic_config",
                "salt": "s",
                "enabled": true,
                "defaultValue": {"tier_price": 0},
                "idType": "userID",
                "rules": [{
                    "id": "rule_1",
                    "passPercentage": 100.0,
                    "returnValue": {"tier_price": 42},
                    "idType": "userID",
                    "conditions": [{"type": "public"}],
                }],
            }],
            "layer_configs": [],
            "layers": {},
        })
        .to_string()
    }

    fn local_client() -> Client {
        let client = ClientConfig::new("secret-test")
            .local_mode(true)
            .bootstrap_values(catalog())
            .disable_rulesets_sync(true)
            .disable_id_lists_sync(true)
            .to_client();
        client.initialize().unwrap();
        client
    }

    #[test]
    fn local_mode_serves_bootstrap_values() {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = local_client();

        let user = User::with_user_id("user-1");
        assert!(client.check_gate(&user, "release_gate"));

        let config = client.get_config(&user, "pricing");
        assert_eq!(config.get_or("tier_price", 0), 42);
        assert_eq!(config.rule_id, "rule_1");

        // Experiments are configs under a clearer name.
        let experiment = client.get_experiment(&user, "pricing");
        assert_eq!(experiment.value, config.value);

        let response = client
            .get_client_initialize_response(
                &user,
                ClientInitArgs {
                    hash: HashAlgorithm::None,
                },
            )
            .unwrap();
        assert!(response.feature_gates.contains_key("release_gate"));

        client.shutdown();
    }

    #[test]
    fn uninitialized_client_fails_closed() {
        let client = ClientConfig::new("secret-test")
            .local_mode(true)
            .disable_rulesets_sync(true)
            .disable_id_lists_sync(true)
            .to_client();
        client.initialize().unwrap();

        let user = User::with_user_id("user-1");
        assert!(!client.check_gate(&user, "release_gate"));
        let gate = client.get_feature_gate(&user, "release_gate");
        assert_eq!(
            gate.details.unwrap().reason,
            crate::EvaluationReason::Uninitialized
        );

        client.override_gate("release_gate", true, None);
        assert!(client.check_gate(&user, "release_gate"));
    }

    #[test]
    fn environment_tier_is_stamped_onto_users() {
        let client = ClientConfig::new("secret-test")
            .local_mode(true)
            .bootstrap_values(catalog())
            .disable_rulesets_sync(true)
            .disable_id_lists_sync(true)
            .environment("staging")
            .to_client();
        client.initialize().unwrap();

        let user = User::with_user_id("user-1");
        assert!(client.check_gate(&user, "staging_gate"));

        // A user-supplied environment wins over the client default.
        let mut prod_user = User::with_user_id("user-1");
        prod_user.environment = Some(
            [("tier".to_owned(), "production".to_owned())]
                .into_iter()
                .collect(),
        );
        assert!(!client.check_gate(&prod_user, "staging_gate"));

        client.shutdown();
    }

    #[test]
    fn init_timeout_degrades_to_background_sync() {
        let client = ClientConfig::new("secret-test")
            .local_mode(true)
            .disable_rulesets_sync(true)
            .disable_id_lists_sync(true)
            .init_timeout(Duration::from_millis(50))
            .to_client();

        // Local mode resolves instantly, so this completes inside the
        // timeout; the point is that the timeout path is well-formed.
        client.initialize().unwrap();
        client.shutdown();
    }
}
