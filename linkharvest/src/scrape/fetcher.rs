//! `reqwest`-backed [`Fetcher`] implementation.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Instant;
use url::Url;

use super::protocols::{FetchedBody, Fetcher};
use crate::clock::duration_millis;
use crate::config::{check_seconds, FetchConfig};
use crate::errors::{FetchError, HarvestError};

/// HTTP fetcher with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Builds a client from the fetch configuration.
    pub fn new(config: FetchConfig) -> Result<Self, HarvestError> {
        check_seconds("fetch.timeout_seconds", config.timeout_seconds)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| HarvestError::config(format!("invalid header name '{name}': {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| HarvestError::config(format!("invalid value for header '{name}': {err}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .redirect(Policy::limited(config.max_redirects))
            .default_headers(headers)
            .build()
            .map_err(|err| HarvestError::config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self { client, config })
    }

    /// Gets the configuration.
    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn classify(&self, url: &Url, err: &reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::timeout(url.as_str(), duration_millis(self.config.timeout()))
        } else if let Some(status) = err.status() {
            FetchError::status(url.as_str(), status.as_u16())
        } else {
            FetchError::transport(url.as_str(), err.to_string())
        }
    }

    fn too_large(&self, url: &Url) -> FetchError {
        FetchError::TooLarge {
            url: url.to_string(),
            limit: self.config.max_response_size,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedBody, FetchError> {
        let started = Instant::now();
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| self.classify(url, &err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::status(url.as_str(), status.as_u16()));
        }

        let limit = self.config.max_response_size;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(self.too_large(url));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| self.classify(url, &err))?
        {
            if body.len() + chunk.len() > limit {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedBody {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
