//! DID → handle resolution with batching and an identity cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use skygent_core::{Did, Handle};

use crate::cache::TtlCache;
use crate::source::{PostSourceError, ProfileApi};

/// Hard cap of the remote profile endpoint per request.
const BATCH_LIMIT: usize = 25;
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_CACHE_CAPACITY: usize = 16 * 1024;

pub struct ProfileResolver {
    api: Arc<dyn ProfileApi>,
    cache: TtlCache<Did, Handle>,
}

impl ProfileResolver {
    pub fn new(api: Arc<dyn ProfileApi>) -> Self {
        Self {
            api,
            cache: TtlCache::new(DEFAULT_TTL, DEFAULT_CACHE_CAPACITY),
        }
    }

    pub async fn handle_for_did(&self, did: &Did) -> Result<Option<Handle>, PostSourceError> {
        let resolved = self.handles_for_dids(std::slice::from_ref(did)).await?;
        Ok(resolved.get(did).cloned())
    }

    /// Resolve many DIDs, batching cache misses at most [`BATCH_LIMIT`] per
    /// upstream request.
    pub async fn handles_for_dids(
        &self,
        dids: &[Did],
    ) -> Result<HashMap<Did, Handle>, PostSourceError> {
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();
        for did in dids {
            match self.cache.get(did) {
                Some(handle) => {
                    resolved.insert(did.clone(), handle);
                }
                None => missing.push(did.clone()),
            }
        }
        missing.dedup();

        for batch in missing.chunks(BATCH_LIMIT) {
            for (did, handle) in self.api.get_profiles(batch).await? {
                self.cache.insert(did.clone(), handle.clone());
                resolved.insert(did, handle);
            }
        }
        Ok(resolved)
    }
}
