use std::sync::Arc;
use std::time::Duration;

use flagstone_core::data_adapter::DataAdapter;
use flagstone_core::diagnostics::Diagnostics;
use flagstone_core::spec_store::{IdListsInitStrategy, RulesUpdatedCallback};

use crate::Client;

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use flagstone::ClientConfig;
/// # use std::time::Duration;
/// let client = ClientConfig::new("secret-...")
///     .rulesets_sync_interval(Duration::from_secs(30))
///     .local_mode(true)
///     .to_client();
/// ```
pub struct ClientConfig {
    pub(crate) sdk_key: String,
    pub(crate) api_base: Option<String>,
    pub(crate) dcs_base: Option<String>,
    pub(crate) bootstrap_values: Option<String>,
    pub(crate) rulesets_sync_interval: Option<Duration>,
    pub(crate) id_lists_sync_interval: Option<Duration>,
    pub(crate) disable_rulesets_sync: bool,
    pub(crate) disable_id_lists_sync: bool,
    pub(crate) id_lists_init_strategy: IdListsInitStrategy,
    pub(crate) data_adapter: Option<Arc<dyn DataAdapter>>,
    pub(crate) diagnostics: Option<Arc<dyn Diagnostics>>,
    pub(crate) rules_updated_callback: Option<RulesUpdatedCallback>,
    pub(crate) local_mode: bool,
    pub(crate) environment: Option<String>,
    pub(crate) init_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Create a default configuration using the specified server SDK key.
    pub fn new(sdk_key: impl Into<String>) -> ClientConfig {
        ClientConfig {
            sdk_key: sdk_key.into(),
            api_base: None,
            dcs_base: None,
            bootstrap_values: None,
            rulesets_sync_interval: None,
            id_lists_sync_interval: None,
            disable_rulesets_sync: false,
            disable_id_lists_sync: false,
            id_lists_init_strategy: IdListsInitStrategy::default(),
            data_adapter: None,
            diagnostics: None,
            rules_updated_callback: None,
            local_mode: false,
            environment: None,
            init_timeout: None,
        }
    }

    /// Override the base URL for API calls. Most deployments should keep the
    /// default.
    pub fn api_base(mut self, api_base: impl Into<String>) -> ClientConfig {
        self.api_base = Some(api_base.into());
        self
    }

    /// Override the base URL for spec downloads.
    pub fn dcs_base(mut self, dcs_base: impl Into<String>) -> ClientConfig {
        self.dcs_base = Some(dcs_base.into());
        self
    }

    /// Seed the catalog from a previously-saved specs payload instead of
    /// waiting for the first network fetch.
    pub fn bootstrap_values(mut self, bootstrap_values: impl Into<String>) -> ClientConfig {
        self.bootstrap_values = Some(bootstrap_values.into());
        self
    }

    /// How often to poll for spec updates. Values below the 5 second floor
    /// are clamped up.
    pub fn rulesets_sync_interval(mut self, interval: Duration) -> ClientConfig {
        self.rulesets_sync_interval = Some(interval);
        self
    }

    /// How often to poll for ID-list updates. Values below the 30 second
    /// floor are clamped up.
    pub fn id_lists_sync_interval(mut self, interval: Duration) -> ClientConfig {
        self.id_lists_sync_interval = Some(interval);
        self
    }

    pub fn disable_rulesets_sync(mut self, disable: bool) -> ClientConfig {
        self.disable_rulesets_sync = disable;
        self
    }

    pub fn disable_id_lists_sync(mut self, disable: bool) -> ClientConfig {
        self.disable_id_lists_sync = disable;
        self
    }

    /// When the initial ID-list fetch happens relative to `initialize`.
    pub fn id_lists_init_strategy(mut self, strategy: IdListsInitStrategy) -> ClientConfig {
        self.id_lists_init_strategy = strategy;
        self
    }

    /// Install a data adapter (e.g. a Redis-backed cache shared across
    /// processes). Takes precedence over `bootstrap_values`.
    pub fn data_adapter(mut self, adapter: Arc<dyn DataAdapter>) -> ClientConfig {
        self.data_adapter = Some(adapter);
        self
    }

    /// Install a diagnostics sink for sync markers.
    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> ClientConfig {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Callback fired with the raw specs payload after every accepted
    /// network sync. Useful for persisting bootstrap values.
    pub fn rules_updated_callback(
        mut self,
        callback: impl Fn(&str, i64) + Send + Sync + 'static,
    ) -> ClientConfig {
        self.rules_updated_callback = Some(Arc::new(callback));
        self
    }

    /// Run without any network access. Evaluations rely on bootstrap values
    /// and overrides only.
    pub fn local_mode(mut self, local_mode: bool) -> ClientConfig {
        self.local_mode = local_mode;
        self
    }

    /// Environment tier (e.g. `"staging"`) stamped onto users that do not
    /// carry one.
    pub fn environment(mut self, tier: impl Into<String>) -> ClientConfig {
        self.environment = Some(tier.into());
        self
    }

    /// Upper bound on how long `initialize` may block. On timeout the client
    /// comes up uninitialized and keeps syncing in the background.
    pub fn init_timeout(mut self, timeout: Duration) -> ClientConfig {
        self.init_timeout = Some(timeout);
        self
    }

    /// Create a new [`Client`] using this configuration.
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}
