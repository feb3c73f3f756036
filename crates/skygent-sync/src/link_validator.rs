//! HTTP-backed link validation for the `HasValidLinks` filter leaf.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable as _};
use reqwest::StatusCode;
use skygent_filter::{CapabilityError, LinkValidator};
use tracing::debug;
use url::Url;

use crate::LOG_TARGET;
use crate::cache::TtlCache;

const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const DEFAULT_CACHE_CAPACITY: usize = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Validates links with a `HEAD` request (falling back to `GET` where the
/// server rejects `HEAD`), caching verdicts for a TTL.
///
/// Non-HTTP(S) URLs are invalid by definition and never touch the network.
pub struct HttpLinkValidator {
    client: reqwest::Client,
    cache: TtlCache<String, bool>,
}

impl Default for HttpLinkValidator {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl HttpLinkValidator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Client builds"),
            cache: TtlCache::new(ttl, DEFAULT_CACHE_CAPACITY),
        }
    }

    async fn probe(&self, url: &Url) -> Result<bool, CapabilityError> {
        let response = (|| async { self.client.head(url.clone()).send().await })
            .retry(ExponentialBuilder::default().with_max_times(2))
            .await
            .map_err(CapabilityError::request)?;

        let status = response.status();
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            debug!(target: LOG_TARGET, %url, %status, "HEAD rejected; retrying with GET");
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(CapabilityError::request)?;
            return Ok(response.status().is_success());
        }
        Ok(status.is_success() || status.is_redirection())
    }
}

#[async_trait]
impl LinkValidator for HttpLinkValidator {
    async fn is_valid(&self, url: &Url) -> Result<bool, CapabilityError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Ok(false);
        }

        let key = url.as_str().to_owned();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let valid = self.probe(url).await?;
        self.cache.insert(key, valid);
        Ok(valid)
    }
}
