//! HTTP transport for spec and ID-list synchronization.
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde_json::Value;

use crate::{Error, Result};

/// Default base URL for control-plane API calls (`get_id_lists`).
pub const DEFAULT_API_BASE: &'static str = "https://api.flagstone.dev/v1";
/// Default base URL for spec downloads. Served from a CDN, so it is separate
/// from [`DEFAULT_API_BASE`].
pub const DEFAULT_DCS_BASE: &'static str = "https://dcs.flagstone.dev/v1";

/// Body of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub text: String,
    /// `Content-Length` advertised by the server, when present.
    pub content_length: Option<u64>,
}

/// Transport used by the spec store. The store only needs plain GET/POST with
/// an optional resume offset; abstracting it keeps the sync logic testable
/// without sockets.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`. When `range_start` is set, requests `Range: bytes={n}-`.
    async fn get(&self, url: &str, range_start: Option<u64>) -> Result<FetchResponse>;

    /// POST `body` to `url` as JSON.
    async fn post(&self, url: &str, body: &Value) -> Result<FetchResponse>;
}

/// Production [`Fetcher`] backed by `reqwest`.
pub struct HttpFetcher {
    // Client holds a connection pool internally, so we're reusing the client
    // between requests.
    client: reqwest::Client,
    /// If we receive a 401/403 error during a request, the SDK key is not
    /// valid. We cache this error so we don't issue additional requests to
    /// the server.
    unauthorized: AtomicBool,
}

impl HttpFetcher {
    pub fn new() -> HttpFetcher {
        HttpFetcher {
            client: reqwest::Client::new(),
            unauthorized: AtomicBool::new(false),
        }
    }

    fn check_unauthorized(&self) -> Result<()> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    fn classify(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            log::warn!(target: "flagstone", "request was not authorized, check your SDK key");
            self.unauthorized.store(true, Ordering::Relaxed);
            return Err(Error::Unauthorized);
        }
        response.error_for_status().map_err(Error::from)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        HttpFetcher::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str, range_start: Option<u64>) -> Result<FetchResponse> {
        self.check_unauthorized()?;

        let mut request = self.client.get(url);
        if let Some(offset) = range_start {
            request = request.header(header::RANGE, format!("bytes={offset}-"));
        }
        let response = self.classify(request.send().await?)?;

        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());

        Ok(FetchResponse {
            text: response.text().await?,
            content_length,
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<FetchResponse> {
        self.check_unauthorized()?;

        let response = self.classify(self.client.post(url).json(body).send().await?)?;
        let content_length = response.content_length();

        Ok(FetchResponse {
            text: response.text().await?,
            content_length,
        })
    }
}

/// [`Fetcher`] installed in local mode. Every call fails with the
/// [`Error::LocalModeNetwork`] sentinel, which the store treats as a quiet
/// failure.
pub struct LocalFetcher;

#[async_trait]
impl Fetcher for LocalFetcher {
    async fn get(&self, _url: &str, _range_start: Option<u64>) -> Result<FetchResponse> {
        Err(Error::LocalModeNetwork)
    }

    async fn post(&self, _url: &str, _body: &Value) -> Result<FetchResponse> {
        Err(Error::LocalModeNetwork)
    }
}
