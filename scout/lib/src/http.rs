//! reqwest-backed transports for pages and probes.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::DEFAULT_API_BASE_URL;
use crate::error::{FetchError, ProbeError};
use crate::harvest::{MAX_PAGE_BYTES, PageFetcher};
use crate::validator::{ModelProbe, ProbeResponse};

/// API version header sent with every probe.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const USER_AGENT: &str = concat!("scout/", env!("CARGO_PKG_VERSION"));

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// Fetches pages over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpPageFetcher {
    /// Creates a fetcher with its own connection pool.
    pub fn new() -> Self {
        Self { client: client() }
    }

    /// Creates a fetcher sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn fetch_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else if let Some(status) = err.status() {
        FetchError::Http {
            status: status.as_u16(),
        }
    } else {
        FetchError::Transport(err.to_string())
    }
}

impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| fetch_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }
        if let Some(len) = response.content_length() {
            if len as usize > MAX_PAGE_BYTES {
                return Err(FetchError::TooLarge(len as usize));
            }
        }

        // Servers may omit Content-Length, so the cap is enforced while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(e, timeout))? {
            let total = body.len() + chunk.len();
            if total > MAX_PAGE_BYTES {
                return Err(FetchError::TooLarge(total));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(url, bytes = body.len(), "fetched page");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Probes identifiers with the provider's model lookup endpoint.
///
/// `GET {base}/v1/models/{identifier}` bills no tokens and answers 200 for
/// identifiers that exist and 404 for those that do not.
#[derive(Clone)]
pub struct HttpModelProbe {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpModelProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModelProbe")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpModelProbe {
    /// Creates a probe against the default API base URL.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_BASE_URL)
    }

    /// Creates a probe against a custom base URL.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn model_url(&self, identifier: &str) -> String {
        format!("{}/v1/models/{identifier}", self.base_url)
    }
}

impl ModelProbe for HttpModelProbe {
    async fn probe(&self, identifier: &str) -> Result<ProbeResponse, ProbeError> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.model_url(identifier))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(started.elapsed())
                } else {
                    ProbeError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        Ok(ProbeResponse {
            success: status.is_success(),
            status: status.as_u16(),
            latency: started.elapsed(),
        })
    }
}
