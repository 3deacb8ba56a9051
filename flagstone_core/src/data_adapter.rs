//! External key/value cache of spec payloads, possibly shared across
//! processes (e.g. Redis). Optional: when supplied it takes precedence over a
//! bootstrap payload during initialization.
use async_trait::async_trait;

use crate::Result;

/// Adapter key for the full rulesets payload.
pub const RULESETS_KEY: &'static str = "rulesets";
/// Adapter key for the ID-list manifest.
pub const ID_LISTS_KEY: &'static str = "id_lists";

/// Adapter key for the contents of a single ID list.
pub fn id_list_key(name: &str) -> String {
    format!("id_list::{name}")
}

/// A value read back from the adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterEntry {
    /// Stored payload, if any.
    pub result: Option<String>,
    /// Timestamp the payload was stored with, in epoch milliseconds.
    pub time: Option<i64>,
}

/// Host-supplied spec cache.
///
/// The store calls `initialize` once during client initialization and
/// `shutdown` once during client shutdown. Successful network syncs are
/// pushed through `set` so that other processes sharing the adapter can
/// bootstrap without hitting the network.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<AdapterEntry>;

    async fn set(&self, key: &str, value: &str, time: Option<i64>) -> Result<()>;

    /// Whether the store should poll this adapter for `key` updates instead
    /// of the network.
    fn supports_polling_updates_for(&self, _key: &str) -> bool {
        false
    }
}
