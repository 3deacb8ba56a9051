use chrono::Utc;
use serde::Serialize;

use crate::spec_store::{InitReason, SpecStore};

/// Why an evaluation produced the result it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvaluationReason {
    /// Served from a catalog fetched over the network.
    Network,
    /// Served from a caller-supplied override.
    LocalOverride,
    /// The spec does not exist in the catalog.
    Unrecognized,
    /// The store has not served any catalog yet.
    Uninitialized,
    /// Served from a catalog seeded by a bootstrap payload.
    Bootstrap,
    /// Served from a catalog seeded by the data adapter.
    DataAdapter,
    /// The spec uses a condition or operator this library does not know.
    Unsupported,
}

impl From<InitReason> for EvaluationReason {
    fn from(reason: InitReason) -> EvaluationReason {
        match reason {
            InitReason::Uninitialized => EvaluationReason::Uninitialized,
            InitReason::Bootstrap => EvaluationReason::Bootstrap,
            InitReason::DataAdapter => EvaluationReason::DataAdapter,
            InitReason::Network => EvaluationReason::Network,
        }
    }
}

/// Provenance attached to every evaluation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetails {
    pub reason: EvaluationReason,
    /// Timestamp of the catalog the result was served from.
    pub config_sync_time: i64,
    /// Timestamp of the first catalog the store served (`-1` if
    /// initialization finished empty).
    pub init_time: i64,
    /// Wall-clock time of the evaluation.
    pub server_time: i64,
}

impl EvaluationDetails {
    pub fn new(reason: EvaluationReason, config_sync_time: i64, init_time: i64) -> Self {
        EvaluationDetails {
            reason,
            config_sync_time,
            init_time,
            server_time: Utc::now().timestamp_millis(),
        }
    }

    /// Details carrying the store's current timestamps and the given reason.
    pub fn from_store(store: &SpecStore, reason: EvaluationReason) -> Self {
        EvaluationDetails::new(
            reason,
            store.last_update_time(),
            store.get_initial_update_time(),
        )
    }
}
