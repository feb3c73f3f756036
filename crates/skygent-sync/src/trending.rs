//! Cached trending-topic lookups for the `Trending` filter leaf.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use skygent_filter::{CapabilityError, TrendingTopics};

use crate::cache::TtlCache;
use crate::source::ProfileApi;

const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Serves `is_trending` from a cached topic list (default TTL 15 min).
///
/// Comparison strips the leading `#` and folds case on both sides.
pub struct CachedTrendingTopics {
    api: Arc<dyn ProfileApi>,
    cache: TtlCache<(), Vec<String>>,
}

impl CachedTrendingTopics {
    pub fn new(api: Arc<dyn ProfileApi>) -> Self {
        Self::with_ttl(api, DEFAULT_TTL)
    }

    pub fn with_ttl(api: Arc<dyn ProfileApi>, ttl: Duration) -> Self {
        Self {
            api,
            cache: TtlCache::new(ttl, 1),
        }
    }

    pub fn invalidate(&self) {
        self.cache.clear();
    }

    async fn topics(&self) -> Result<Vec<String>, CapabilityError> {
        if let Some(topics) = self.cache.get(&()) {
            return Ok(topics);
        }
        let topics: Vec<String> = self
            .api
            .get_trending_topics()
            .await
            .map_err(CapabilityError::request)?
            .into_iter()
            .map(|t| t.trim_start_matches('#').to_lowercase())
            .collect();
        self.cache.insert((), topics.clone());
        Ok(topics)
    }
}

#[async_trait]
impl TrendingTopics for CachedTrendingTopics {
    async fn is_trending(&self, tag: &str) -> Result<bool, CapabilityError> {
        let needle = tag.trim_start_matches('#').to_lowercase();
        Ok(self.topics().await?.iter().any(|t| *t == needle))
    }
}
