//! The authoritative in-memory spec catalog and its synchronization engine.
//!
//! [`SpecStore`] owns four name-keyed maps (gates, dynamic configs, layers,
//! ID lists), keeps them fresh via background pollers, and supports seeding
//! from a bootstrap payload or a host-supplied data adapter. Catalog rotation
//! is atomic: an accepted update publishes a whole new [`SpecSet`] behind one
//! pointer swap, so readers never observe a partially-installed update.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use crate::data_adapter::{DataAdapter, RULESETS_KEY};
use crate::diagnostics::{keys, steps, Diagnostics, MAX_SAMPLING_RATE};
use crate::id_lists::{IdList, ManifestEntry};
use crate::network::Fetcher;
use crate::poller::{PollerConfig, PollerThread};
use crate::specs::{ConfigSpec, SpecSet, SpecsResponse};
use crate::{Error, Result, SdkMetadata};

/// A poller that has not stamped its last-active timestamp for longer than
/// `max(SYNC_OUTDATED_MAX_MS, interval)` is considered dead and is restarted
/// by [`SpecStore::reset_sync_timer_if_exited`].
pub const SYNC_OUTDATED_MAX_MS: i64 = 120_000;

/// How the store resolved its first catalog. Attached (as the evaluation
/// reason) to every result served from that catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitReason {
    Uninitialized,
    Bootstrap,
    DataAdapter,
    Network,
}

impl InitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitReason::Uninitialized => "Uninitialized",
            InitReason::Bootstrap => "Bootstrap",
            InitReason::DataAdapter => "DataAdapter",
            InitReason::Network => "Network",
        }
    }
}

/// When the initial ID-list fetch happens relative to `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdListsInitStrategy {
    /// Fetch synchronously before `initialize` returns.
    #[default]
    Await,
    /// Defer the initial fetch to the ID-list poller's first tick.
    Lazy,
    /// Skip the initial fetch entirely.
    None,
}

/// Callback fired with the raw specs payload and its timestamp after every
/// accepted network sync.
pub type RulesUpdatedCallback = Arc<dyn Fn(&str, i64) + Send + Sync>;

/// Configuration for [`SpecStore`].
#[derive(Clone)]
pub struct SpecStoreConfig {
    pub sdk_key: String,
    /// Base URL for API calls (`get_id_lists`).
    pub api_base: String,
    /// Base URL for spec downloads.
    pub dcs_base: String,
    /// JSON payload to seed the catalog from, in `download_config_specs`
    /// response format. Ignored (with a warning) when a data adapter is also
    /// supplied.
    pub bootstrap_values: Option<String>,
    pub rulesets_sync_interval: Duration,
    pub id_lists_sync_interval: Duration,
    pub disable_rulesets_sync: bool,
    pub disable_id_lists_sync: bool,
    pub id_lists_init_strategy: IdListsInitStrategy,
    pub rules_updated_callback: Option<RulesUpdatedCallback>,
    pub sdk_metadata: SdkMetadata,
}

impl SpecStoreConfig {
    /// Default interval between rulesets syncs.
    pub const DEFAULT_RULESETS_SYNC_INTERVAL: Duration = Duration::from_secs(10);
    /// Minimum accepted rulesets sync interval.
    pub const MIN_RULESETS_SYNC_INTERVAL: Duration = Duration::from_secs(5);
    /// Default interval between ID-list syncs.
    pub const DEFAULT_ID_LISTS_SYNC_INTERVAL: Duration = Duration::from_secs(60);
    /// Minimum accepted ID-list sync interval.
    pub const MIN_ID_LISTS_SYNC_INTERVAL: Duration = Duration::from_secs(30);

    pub fn new(sdk_key: impl Into<String>, sdk_metadata: SdkMetadata) -> SpecStoreConfig {
        SpecStoreConfig {
            sdk_key: sdk_key.into(),
            api_base: crate::network::DEFAULT_API_BASE.to_owned(),
            dcs_base: crate::network::DEFAULT_DCS_BASE.to_owned(),
            bootstrap_values: None,
            rulesets_sync_interval: SpecStoreConfig::DEFAULT_RULESETS_SYNC_INTERVAL,
            id_lists_sync_interval: SpecStoreConfig::DEFAULT_ID_LISTS_SYNC_INTERVAL,
            disable_rulesets_sync: false,
            disable_id_lists_sync: false,
            id_lists_init_strategy: IdListsInitStrategy::default(),
            rules_updated_callback: None,
            sdk_metadata,
        }
    }

    /// Update the rulesets sync interval, clamped to the minimum.
    pub fn with_rulesets_sync_interval(mut self, interval: Duration) -> SpecStoreConfig {
        self.rulesets_sync_interval = interval.max(SpecStoreConfig::MIN_RULESETS_SYNC_INTERVAL);
        self
    }

    /// Update the ID-list sync interval, clamped to the minimum.
    pub fn with_id_lists_sync_interval(mut self, interval: Duration) -> SpecStoreConfig {
        self.id_lists_sync_interval = interval.max(SpecStoreConfig::MIN_ID_LISTS_SYNC_INTERVAL);
        self
    }
}

/// The spec store. See the module documentation.
pub struct SpecStore {
    config: SpecStoreConfig,
    fetcher: Arc<dyn Fetcher>,
    adapter: Option<Arc<dyn DataAdapter>>,
    diagnostics: Arc<dyn Diagnostics>,
    /// Handle to ourselves for poller job closures; `Weak` so a store whose
    /// host dropped it does not keep itself alive through its pollers.
    weak_self: Weak<SpecStore>,

    values: RwLock<Arc<SpecSet>>,
    id_lists: RwLock<HashMap<String, IdList>>,

    init_reason: RwLock<InitReason>,
    /// Timestamp of the first catalog the store served, or `-1` when
    /// initialization finished without any catalog.
    initial_update_time: AtomicI64,
    /// Timestamp of the currently-served catalog. Monotonically
    /// non-decreasing across successful updates.
    last_update_time: AtomicI64,

    rulesets_poller: Mutex<Option<PollerThread>>,
    id_lists_poller: Mutex<Option<PollerThread>>,
    rulesets_last_active: Arc<AtomicI64>,
    id_lists_last_active: Arc<AtomicI64>,

    sync_failure_count: AtomicU32,
    is_shutdown: AtomicBool,
}

impl SpecStore {
    pub fn new(
        config: SpecStoreConfig,
        fetcher: Arc<dyn Fetcher>,
        adapter: Option<Arc<dyn DataAdapter>>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Arc<SpecStore> {
        Arc::new_cyclic(|weak_self| SpecStore {
            config,
            fetcher,
            adapter,
            diagnostics,
            weak_self: weak_self.clone(),
            values: RwLock::new(Arc::new(SpecSet::default())),
            id_lists: RwLock::new(HashMap::new()),
            init_reason: RwLock::new(InitReason::Uninitialized),
            initial_update_time: AtomicI64::new(0),
            last_update_time: AtomicI64::new(0),
            rulesets_poller: Mutex::new(None),
            id_lists_poller: Mutex::new(None),
            rulesets_last_active: Arc::new(AtomicI64::new(0)),
            id_lists_last_active: Arc::new(AtomicI64::new(0)),
            sync_failure_count: AtomicU32::new(0),
            is_shutdown: AtomicBool::new(false),
        })
    }

    /// Seed the catalog and start background polling.
    ///
    /// Seeding resolution order: bootstrap payload (unless a data adapter is
    /// supplied, which wins), then the data adapter, then a cold-start
    /// network fetch. Initialization never fails the caller on bad seed
    /// data; the store simply starts empty and keeps trying in the
    /// background.
    pub async fn initialize(&self) -> Result<()> {
        let mut bootstrapped = false;

        if let Some(bootstrap) = self.config.bootstrap_values.clone() {
            if self.adapter.is_some() {
                log::warn!(target: "flagstone", "both bootstrap values and a data adapter were supplied; bootstrap values are ignored");
            } else {
                self.diagnostics.mark(
                    "initialize",
                    keys::BOOTSTRAP,
                    "start",
                    Some(steps::PROCESS),
                    None,
                );
                match self.process_specs_json(&bootstrap) {
                    Ok(true) => {
                        *self
                            .init_reason
                            .write()
                            .expect("thread holding init reason lock should not panic") =
                            InitReason::Bootstrap;
                        self.initial_update_time
                            .store(self.last_update_time(), Ordering::Relaxed);
                        bootstrapped = true;
                    }
                    Ok(false) => {
                        log::warn!(target: "flagstone", "bootstrap values contained no updates");
                    }
                    Err(err) => {
                        log::warn!(target: "flagstone", "failed to process bootstrap values: {err}");
                    }
                }
                self.diagnostics.mark(
                    "initialize",
                    keys::BOOTSTRAP,
                    "end",
                    Some(steps::PROCESS),
                    Some(json!({"success": bootstrapped})),
                );
            }
        }

        if let Some(adapter) = &self.adapter {
            if let Err(err) = adapter.initialize().await {
                log::warn!(target: "flagstone", "failed to initialize data adapter: {err}");
            }
        }

        if bootstrapped {
            self.start_polling();
            self.diagnostics.log_diagnostics("initialize");
            return Ok(());
        }

        if self.adapter.is_some() {
            self.fetch_specs_from_adapter().await;
        }
        if self.last_update_time() == 0 {
            self.fetch_specs_from_server(true).await;
        }

        let last = self.last_update_time();
        self.initial_update_time
            .store(if last == 0 { -1 } else { last }, Ordering::Relaxed);

        match self.config.id_lists_init_strategy {
            IdListsInitStrategy::Await => self.sync_id_lists().await,
            // Lazy defers to the poller's first tick; None skips entirely.
            IdListsInitStrategy::Lazy | IdListsInitStrategy::None => {}
        }

        self.start_polling();
        self.diagnostics.log_diagnostics("initialize");
        Ok(())
    }

    /// Run one rulesets sync. Reads from the data adapter when it supports
    /// polling updates, otherwise from the network.
    pub async fn sync_values(&self, cold_start: bool) {
        let adapter_polls = self
            .adapter
            .as_ref()
            .is_some_and(|adapter| adapter.supports_polling_updates_for(RULESETS_KEY));
        if adapter_polls && !cold_start {
            self.fetch_specs_from_adapter().await;
        } else {
            self.fetch_specs_from_server(cold_start).await;
        }
    }

    /// Feed a caller-supplied specs payload through catalog rotation.
    /// Returns `Ok(true)` if the catalog advanced.
    pub fn sync_bootstrap_values(&self, specs_json: &str) -> Result<bool> {
        let updated = self.process_specs_json(specs_json)?;
        if updated {
            *self
                .init_reason
                .write()
                .expect("thread holding init reason lock should not panic") =
                InitReason::Bootstrap;
            if self.initial_update_time.load(Ordering::Relaxed) <= 0 {
                self.initial_update_time
                    .store(self.last_update_time(), Ordering::Relaxed);
            }
        }
        Ok(updated)
    }

    /// Validate and install a `download_config_specs` payload.
    ///
    /// Returns `Ok(true)` when the catalog rotated, `Ok(false)` for accepted
    /// no-ops (`has_updates: false`, stale timestamp, shut-down store), and
    /// an error when the payload is malformed. A rejected payload leaves all
    /// four maps and `last_update_time` untouched.
    pub fn process_specs_json(&self, specs_json: &str) -> Result<bool> {
        let response: SpecsResponse = serde_json::from_str(specs_json)?;
        if !response.has_updates {
            return Ok(false);
        }
        if response.time < self.last_update_time() {
            return Ok(false);
        }

        let feature_gates = parse_spec_section(response.feature_gates, "feature_gates")?;
        let dynamic_configs = parse_spec_section(response.dynamic_configs, "dynamic_configs")?;
        let layer_configs = parse_spec_section(response.layer_configs, "layer_configs")?;

        let mut experiment_to_layer = HashMap::new();
        if let Some(layers) = response.layers {
            for (layer_name, experiments) in layers {
                for experiment in experiments {
                    experiment_to_layer.insert(experiment, layer_name.clone());
                }
            }
        }

        let sampling_rates = response.diagnostics.map(|rates| {
            rates
                .into_iter()
                .filter_map(|(context, rate)| {
                    let rate = rate.as_f64()?;
                    Some((context, (rate.max(0.0) as u64).min(MAX_SAMPLING_RATE)))
                })
                .collect::<HashMap<_, _>>()
        });

        {
            let mut slot = self
                .values
                .write()
                .expect("thread holding spec values lock should not panic");
            if self.is_shutdown.load(Ordering::Relaxed) {
                return Ok(false);
            }
            // Writers serialize on this lock; re-check staleness under it.
            if response.time < slot.time {
                return Ok(false);
            }
            *slot = Arc::new(SpecSet {
                feature_gates,
                dynamic_configs,
                layer_configs,
                experiment_to_layer,
                time: response.time,
            });
            self.last_update_time.store(response.time, Ordering::Relaxed);
        }

        if let Some(rates) = sampling_rates {
            self.diagnostics.set_sampling_rates(rates);
        }

        log::debug!(target: "flagstone", "installed specs catalog at time {}", response.time);
        Ok(true)
    }

    async fn fetch_specs_from_server(&self, cold_start: bool) {
        let url = format!(
            "{}/download_config_specs/{}.json?sinceTime={}",
            self.config.dcs_base,
            self.config.sdk_key,
            self.last_update_time(),
        );

        log::debug!(target: "flagstone", "fetching specs catalog");
        self.diagnostics.mark(
            "config_sync",
            keys::DOWNLOAD_CONFIG_SPECS,
            "start",
            Some(steps::NETWORK_REQUEST),
            None,
        );
        let response = self.fetcher.get(&url, None).await;
        self.diagnostics.mark(
            "config_sync",
            keys::DOWNLOAD_CONFIG_SPECS,
            "end",
            Some(steps::NETWORK_REQUEST),
            Some(json!({"success": response.is_ok()})),
        );

        let response = match response {
            Ok(response) => response,
            Err(Error::LocalModeNetwork) => return,
            Err(err) => {
                self.note_sync_failure(cold_start, &err);
                return;
            }
        };

        self.diagnostics.mark(
            "config_sync",
            keys::DOWNLOAD_CONFIG_SPECS,
            "start",
            Some(steps::PROCESS),
            None,
        );
        match self.process_specs_json(&response.text) {
            Ok(updated) => {
                self.sync_failure_count.store(0, Ordering::Relaxed);
                if updated {
                    *self
                        .init_reason
                        .write()
                        .expect("thread holding init reason lock should not panic") =
                        InitReason::Network;
                    if let Some(callback) = &self.config.rules_updated_callback {
                        callback(&response.text, self.last_update_time());
                    }
                    if let Some(adapter) = &self.adapter {
                        let time = self.last_update_time();
                        if let Err(err) =
                            adapter.set(RULESETS_KEY, &response.text, Some(time)).await
                        {
                            log::warn!(target: "flagstone", "failed to push specs to data adapter: {err}");
                        }
                    }
                }
            }
            Err(err) => {
                log::warn!(target: "flagstone", "rejected specs payload: {err}");
            }
        }
        self.diagnostics.mark(
            "config_sync",
            keys::DOWNLOAD_CONFIG_SPECS,
            "end",
            Some(steps::PROCESS),
            None,
        );
    }

    async fn fetch_specs_from_adapter(&self) {
        let Some(adapter) = &self.adapter else {
            return;
        };
        match adapter.get(RULESETS_KEY).await {
            Ok(entry) => match entry.result {
                Some(specs_json) => match self.process_specs_json(&specs_json) {
                    Ok(true) => {
                        *self
                            .init_reason
                            .write()
                            .expect("thread holding init reason lock should not panic") =
                            InitReason::DataAdapter;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        log::warn!(target: "flagstone", "rejected specs payload from data adapter: {err}");
                    }
                },
                None => {
                    log::debug!(target: "flagstone", "data adapter holds no rulesets");
                }
            },
            Err(err) => {
                log::warn!(target: "flagstone", "failed to read rulesets from data adapter: {err}");
            }
        }
    }

    fn note_sync_failure(&self, cold_start: bool, err: &Error) {
        if cold_start {
            log::error!(target: "flagstone", "failed cold-start specs fetch: {err}");
            return;
        }
        let failures = self.sync_failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let interval_ms = self.config.rulesets_sync_interval.as_millis() as i64;
        if failures as i64 * interval_ms >= SYNC_OUTDATED_MAX_MS {
            log::warn!(
                target: "flagstone",
                "specs catalog has not refreshed for at least {}ms: {err}",
                failures as i64 * interval_ms,
            );
            self.sync_failure_count.store(0, Ordering::Relaxed);
        }
    }

    /// Run one ID-list sync: refresh the manifest, then fetch outstanding
    /// byte ranges for each advertised list.
    pub async fn sync_id_lists(&self) {
        let url = format!("{}/get_id_lists", self.config.api_base);
        let body = json!({
            "statsigMetadata": {
                "sdkType": self.config.sdk_metadata.name,
                "sdkVersion": self.config.sdk_metadata.version,
            }
        });

        self.diagnostics.mark(
            "config_sync",
            keys::GET_ID_LIST_SOURCES,
            "start",
            Some(steps::NETWORK_REQUEST),
            None,
        );
        let response = self.fetcher.post(&url, &body).await;
        self.diagnostics.mark(
            "config_sync",
            keys::GET_ID_LIST_SOURCES,
            "end",
            Some(steps::NETWORK_REQUEST),
            Some(json!({"success": response.is_ok()})),
        );

        let response = match response {
            Ok(response) => response,
            Err(Error::LocalModeNetwork) => return,
            Err(err) => {
                log::warn!(target: "flagstone", "failed to fetch id list manifest: {err}");
                return;
            }
        };

        let manifest: HashMap<String, Value> = match serde_json::from_str(&response.text) {
            Ok(manifest) => manifest,
            Err(err) => {
                log::warn!(target: "flagstone", "failed to parse id list manifest: {err}");
                return;
            }
        };

        self.apply_id_list_manifest(manifest).await;
    }

    async fn apply_id_list_manifest(&self, manifest: HashMap<String, Value>) {
        let mut to_fetch: Vec<(String, ManifestEntry, u64)> = Vec::new();
        {
            let mut lists = self
                .id_lists
                .write()
                .expect("thread holding id lists lock should not panic");
            if self.is_shutdown.load(Ordering::Relaxed) {
                return;
            }

            for (name, raw) in &manifest {
                let Some(entry) = ManifestEntry::from_value(raw) else {
                    continue;
                };
                match lists.get(name) {
                    Some(existing) if entry.creation_time < existing.creation_time => continue,
                    Some(existing) if existing.file_id != entry.file_id => {
                        // New generation: drop everything and restart at
                        // offset 0.
                        lists.insert(
                            name.clone(),
                            IdList::new(
                                name.clone(),
                                entry.url.clone(),
                                entry.file_id.clone(),
                                entry.creation_time,
                            ),
                        );
                    }
                    Some(_) => {}
                    None => {
                        lists.insert(
                            name.clone(),
                            IdList::new(
                                name.clone(),
                                entry.url.clone(),
                                entry.file_id.clone(),
                                entry.creation_time,
                            ),
                        );
                    }
                }

                let read_bytes = lists.get(name).map(|list| list.read_bytes).unwrap_or(0);
                if entry.size > read_bytes {
                    to_fetch.push((name.clone(), entry, read_bytes));
                }
            }

            lists.retain(|name, _| manifest.contains_key(name));
        }

        for (name, entry, offset) in to_fetch {
            self.fetch_id_list_chunk(&name, &entry, offset).await;
        }
    }

    async fn fetch_id_list_chunk(&self, name: &str, entry: &ManifestEntry, offset: u64) {
        self.diagnostics.mark(
            "config_sync",
            keys::GET_ID_LIST,
            "start",
            Some(steps::NETWORK_REQUEST),
            Some(json!({"name": name})),
        );
        let response = self.fetcher.get(&entry.url, Some(offset)).await;
        self.diagnostics.mark(
            "config_sync",
            keys::GET_ID_LIST,
            "end",
            Some(steps::NETWORK_REQUEST),
            Some(json!({"name": name, "success": response.is_ok()})),
        );

        let response = match response {
            Ok(response) => response,
            Err(Error::LocalModeNetwork) => return,
            Err(err) => {
                log::warn!(target: "flagstone", "failed to fetch id list {name}: {err}");
                return;
            }
        };

        let mut lists = self
            .id_lists
            .write()
            .expect("thread holding id lists lock should not panic");
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }
        let Some(list) = lists.get_mut(name) else {
            return;
        };
        // The generation or offset moved while the fetch was in flight:
        // discard this chunk rather than interleave byte ranges. The next
        // sync re-reads from the list's own offset.
        if list.file_id != entry.file_id || list.read_bytes != offset {
            return;
        }
        if let Err(err) = list.apply_chunk(&response.text, response.content_length) {
            log::error!(target: "flagstone", "invalid id list payload for {name}: {err}; dropping the list");
            lists.remove(name);
        }
    }

    /// Start any pollers that are enabled and not already running.
    pub fn start_polling(&self) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }
        self.start_rulesets_poller(false);
        self.start_id_lists_poller(
            self.config.id_lists_init_strategy == IdListsInitStrategy::Lazy,
        );
    }

    fn start_rulesets_poller(&self, run_immediately: bool) {
        if self.config.disable_rulesets_sync {
            return;
        }
        let mut slot = self
            .rulesets_poller
            .lock()
            .expect("thread holding poller lock should not panic");
        if slot.is_some() {
            return;
        }

        let weak = self.weak_self.clone();
        let poller = PollerThread::start(
            "rulesets",
            PollerConfig::new(self.config.rulesets_sync_interval).run_immediately(run_immediately),
            self.rulesets_last_active.clone(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(store) = weak.upgrade() {
                        store.sync_values(false).await;
                    }
                }
            },
        );
        match poller {
            Ok(poller) => *slot = Some(poller),
            Err(err) => {
                log::error!(target: "flagstone", "failed to start rulesets poller: {err}");
            }
        }
    }

    fn start_id_lists_poller(&self, run_immediately: bool) {
        if self.config.disable_id_lists_sync {
            return;
        }
        let mut slot = self
            .id_lists_poller
            .lock()
            .expect("thread holding poller lock should not panic");
        if slot.is_some() {
            return;
        }

        let weak = self.weak_self.clone();
        let poller = PollerThread::start(
            "id-lists",
            PollerConfig::new(self.config.id_lists_sync_interval).run_immediately(run_immediately),
            self.id_lists_last_active.clone(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(store) = weak.upgrade() {
                        store.sync_id_lists().await;
                    }
                }
            },
        );
        match poller {
            Ok(poller) => *slot = Some(poller),
            Err(err) => {
                log::error!(target: "flagstone", "failed to start id list poller: {err}");
            }
        }
    }

    /// Watchdog for quiesced pollers. A poller whose last-active stamp is
    /// older than `max(SYNC_OUTDATED_MAX_MS, interval)` is assumed dead: it
    /// is cleared, an immediate sync is kicked, and polling restarts.
    /// Returns a description of what was forced, for the host to log.
    /// Idempotent under rapid invocation.
    pub fn reset_sync_timer_if_exited(&self) -> Option<String> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return None;
        }
        let now = Utc::now().timestamp_millis();
        let mut forced = Vec::new();

        if !self.config.disable_rulesets_sync {
            let threshold =
                SYNC_OUTDATED_MAX_MS.max(self.config.rulesets_sync_interval.as_millis() as i64);
            let last = self.rulesets_last_active.load(Ordering::Relaxed);
            // last == 0 means the poller was never started; nothing to reset.
            if last != 0 && now - last > threshold {
                if let Some(poller) = self
                    .rulesets_poller
                    .lock()
                    .expect("thread holding poller lock should not panic")
                    .take()
                {
                    poller.stop();
                }
                self.rulesets_last_active.store(now, Ordering::Relaxed);
                self.start_rulesets_poller(true);
                forced.push(format!("rulesets sync timer reset after {}ms", now - last));
            }
        }

        if !self.config.disable_id_lists_sync {
            let threshold =
                SYNC_OUTDATED_MAX_MS.max(self.config.id_lists_sync_interval.as_millis() as i64);
            let last = self.id_lists_last_active.load(Ordering::Relaxed);
            if last != 0 && now - last > threshold {
                if let Some(poller) = self
                    .id_lists_poller
                    .lock()
                    .expect("thread holding poller lock should not panic")
                    .take()
                {
                    poller.stop();
                }
                self.id_lists_last_active.store(now, Ordering::Relaxed);
                self.start_id_lists_poller(true);
                forced.push(format!("id list sync timer reset after {}ms", now - last));
            }
        }

        if forced.is_empty() {
            None
        } else {
            Some(forced.join("; "))
        }
    }

    /// Stop both pollers and shut down the adapter. Reads keep serving the
    /// last committed state; in-flight syncs are prevented from committing.
    pub async fn shutdown(&self) {
        self.is_shutdown.store(true, Ordering::Relaxed);
        if let Some(poller) = self
            .rulesets_poller
            .lock()
            .expect("thread holding poller lock should not panic")
            .take()
        {
            poller.stop();
        }
        if let Some(poller) = self
            .id_lists_poller
            .lock()
            .expect("thread holding poller lock should not panic")
            .take()
        {
            poller.stop();
        }
        if let Some(adapter) = &self.adapter {
            if let Err(err) = adapter.shutdown().await {
                log::warn!(target: "flagstone", "failed to shut down data adapter: {err}");
            }
        }
    }

    /// Snapshot of the current catalog generation.
    pub fn current(&self) -> Arc<SpecSet> {
        self.values
            .read()
            .expect("thread holding spec values lock should not panic")
            .clone()
    }

    pub fn get_gate(&self, name: &str) -> Option<Arc<ConfigSpec>> {
        self.current().feature_gates.get(name).cloned()
    }

    pub fn get_config(&self, name: &str) -> Option<Arc<ConfigSpec>> {
        self.current().dynamic_configs.get(name).cloned()
    }

    pub fn get_layer(&self, name: &str) -> Option<Arc<ConfigSpec>> {
        self.current().layer_configs.get(name).cloned()
    }

    /// The layer an experiment is allocated in, if any.
    pub fn get_experiment_layer(&self, experiment_name: &str) -> Option<String> {
        self.current()
            .experiment_to_layer
            .get(experiment_name)
            .cloned()
    }

    pub fn get_all_gates(&self) -> Vec<Arc<ConfigSpec>> {
        self.current().feature_gates.values().cloned().collect()
    }

    pub fn get_all_configs(&self) -> Vec<Arc<ConfigSpec>> {
        self.current().dynamic_configs.values().cloned().collect()
    }

    pub fn get_all_layers(&self) -> Vec<Arc<ConfigSpec>> {
        self.current().layer_configs.values().cloned().collect()
    }

    /// Copy of one ID list's state.
    pub fn get_id_list(&self, name: &str) -> Option<IdList> {
        self.id_lists
            .read()
            .expect("thread holding id lists lock should not panic")
            .get(name)
            .cloned()
    }

    /// Membership check used by segment-list conditions.
    pub fn id_list_contains(&self, list_name: &str, hashed_id: &str) -> bool {
        self.id_lists
            .read()
            .expect("thread holding id lists lock should not panic")
            .get(list_name)
            .is_some_and(|list| list.ids.contains(hashed_id))
    }

    pub fn get_init_reason(&self) -> InitReason {
        *self
            .init_reason
            .read()
            .expect("thread holding init reason lock should not panic")
    }

    pub fn get_initial_update_time(&self) -> i64 {
        self.initial_update_time.load(Ordering::Relaxed)
    }

    pub fn last_update_time(&self) -> i64 {
        self.last_update_time.load(Ordering::Relaxed)
    }

    /// Whether the store has ever served a catalog.
    pub fn is_serving_checks(&self) -> bool {
        self.last_update_time() != 0
    }

    pub fn sdk_metadata(&self) -> SdkMetadata {
        self.config.sdk_metadata
    }
}

fn parse_spec_section(
    section: Option<Value>,
    which: &'static str,
) -> Result<HashMap<String, Arc<ConfigSpec>>> {
    let Some(section) = section else {
        return Err(Error::SpecsPayload(which));
    };
    if !section.is_array() {
        return Err(Error::SpecsPayload(which));
    }
    // One bad spec aborts the whole rotation.
    let specs: Vec<ConfigSpec> = serde_json::from_value(section)?;
    Ok(specs
        .into_iter()
        .map(|spec| (spec.name.clone(), Arc::new(spec)))
        .collect())
}
