//! The fetch module issues the outbound HTTP requests of a pipeline run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;

/// Source of remote documents. The pipeline only talks to the network through this.
#[async_trait(?Send)]
pub trait Fetcher {
    /// Fetches `url` and returns its body decoded as text.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or exceeds `timeout`.
    async fn fetch_text(&self, url: &str, timeout: Option<Duration>) -> Result<String>;

    /// Fetches `url` and returns its raw body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// `Fetcher` backed by a shared `reqwest` client.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str, timeout: Option<Duration>) -> Result<String> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;
        debug!("Fetched {url} with {}", response.status());

        response
            .text()
            .await
            .with_context(|| format!("Unable to read body of {url}"))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("Unable to download {url}"))?;
        debug!("Downloaded {url}");

        Ok(response.bytes().await?.to_vec())
    }
}
