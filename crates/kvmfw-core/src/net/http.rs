//! reqwest-based fetcher.

use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use tracing::{debug, instrument};

use super::traits::{FetchError, HttpFetch, HttpResponse};

/// Blocking HTTP client with bounded requests.
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    /// Build a client whose requests fail after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .user_agent(concat!("kvmfw/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetch for ReqwestFetcher {
    #[instrument(skip_all, fields(url = %url))]
    fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Request(e.to_string())
            }
        };

        let response = self.client.get(url.clone()).send().map_err(map_err)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(map_err)?.to_vec();

        debug!(status, bytes = body.len(), "Fetch complete");
        Ok(HttpResponse { status, body })
    }
}
