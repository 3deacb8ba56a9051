use std::sync::Arc;

/// Result type used throughout the library.
///
/// This `Result` type is a standard Rust `Result` type where the error variant
/// is defined by the [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the library.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid base URL configuration.
    #[error("invalid base url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid SDK key.
    #[error("unauthorized, sdk key is likely invalid")]
    Unauthorized,

    /// A network call was attempted while running in local mode. Treated as a
    /// quiet failure: callers neither warn nor count it against sync health.
    #[error("network access is disabled in local mode")]
    LocalModeNetwork,

    /// Failed to parse a specs or ID-list payload.
    #[error("failed to parse payload: {0}")]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    Parse(Arc<serde_json::Error>),

    /// The specs payload was structurally invalid (e.g. a spec section was
    /// not an array). The whole update is rejected.
    #[error("bad specs payload: {0}")]
    SpecsPayload(&'static str),

    /// A data adapter call failed.
    #[error("data adapter error: {0}")]
    Adapter(String),

    /// An ID-list body could not be ingested; the list is dropped.
    #[error("bad id list payload: {0}")]
    IdListPayload(&'static str),

    /// Indicates that a poller thread panicked. This should normally never
    /// happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Parse(Arc::new(value))
    }
}
