//! Seam for the diagnostics marker subsystem.
//!
//! The store reports markers around its sync work; the marker pipeline itself
//! (sampling, batching, upload) is host-supplied. [`NoopDiagnostics`] is
//! installed when the host does not care.
use std::collections::HashMap;

use serde_json::Value;

/// Maximum accepted sampling rate. Rates from the control plane are clamped
/// into `[0, MAX_SAMPLING_RATE]`.
pub const MAX_SAMPLING_RATE: u64 = 10_000;

/// Marker keys the store reports.
pub mod keys {
    pub const BOOTSTRAP: &'static str = "bootstrap";
    pub const DOWNLOAD_CONFIG_SPECS: &'static str = "download_config_specs";
    pub const GET_ID_LIST_SOURCES: &'static str = "get_id_list_sources";
    pub const GET_ID_LIST: &'static str = "get_id_list";
}

/// Marker steps the store reports.
pub mod steps {
    pub const PROCESS: &'static str = "process";
    pub const NETWORK_REQUEST: &'static str = "network_request";
}

/// Host-supplied diagnostics sink.
pub trait Diagnostics: Send + Sync {
    /// Record one marker.
    fn mark(
        &self,
        context: &str,
        key: &str,
        action: &str,
        step: Option<&str>,
        value: Option<Value>,
    );

    /// Flush markers recorded under `context`.
    fn log_diagnostics(&self, context: &str);

    /// Install sampling rates received from the control plane. Rates arrive
    /// already clamped to `[0, MAX_SAMPLING_RATE]`.
    fn set_sampling_rates(&self, _rates: HashMap<String, u64>) {}
}

/// Diagnostics sink that drops everything.
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn mark(
        &self,
        _context: &str,
        _key: &str,
        _action: &str,
        _step: Option<&str>,
        _value: Option<Value>,
    ) {
    }

    fn log_diagnostics(&self, _context: &str) {}
}
