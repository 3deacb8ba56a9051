//! Flagstone server-side SDK.
//!
//! The SDK keeps a local catalog of feature gates, dynamic configs,
//! experiments, and layers in sync with the Flagstone control plane and
//! evaluates them in-process, so a check is a hash and a few map lookups
//! rather than a network call.
//!
//! # Examples
//! ```no_run
//! use flagstone::{Client, ClientConfig, User};
//!
//! let client = ClientConfig::new("secret-...").to_client();
//! client.initialize().expect("failed to initialize");
//!
//! let user = User::with_user_id("user-1");
//! if client.check_gate(&user, "new_checkout_flow") {
//!     // serve the new flow
//! }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod config;
mod types;

pub use client::Client;
pub use config::ClientConfig;
pub use types::{DynamicConfig, FeatureGate, Layer};

pub use flagstone_core::data_adapter::DataAdapter;
pub use flagstone_core::diagnostics::Diagnostics;
pub use flagstone_core::eval::client_init::{ClientInitArgs, ClientInitializeResponse};
pub use flagstone_core::eval::{EvaluationDetails, EvaluationReason};
pub use flagstone_core::hashing::HashAlgorithm;
pub use flagstone_core::spec_store::IdListsInitStrategy;
pub use flagstone_core::{Error, Result, User};
