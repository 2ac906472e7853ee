//! Opportunistic result cache for the read path.
//!
//! List and aggregation responses are cached for a short TTL under a key
//! derived from the collection, the canonicalised query, and the tenant.
//! There is no invalidation on writes; the TTL is the documented
//! eventual-consistency window.

use crate::metrics_defs::{RESULT_CACHE_HIT, RESULT_CACHE_MISS};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use moka::sync::Cache;
use shared::counter;
use std::time::Duration;

const SIZE: u64 = 50_000;

pub struct ResultCache {
    cache: Cache<String, Bytes>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(SIZE)
            .time_to_live(ttl)
            .build();

        ResultCache { cache }
    }

    /// Keys are tenant-scoped: the same query against two environments can
    /// never collide.
    pub fn key(collection: &str, canonical_query: &str, resource_environment_id: &str) -> String {
        BASE64.encode(format!(
            "{collection}-{canonical_query}-{resource_environment_id}"
        ))
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let hit = self.cache.get(key);
        let metric_def = if hit.is_some() {
            RESULT_CACHE_HIT
        } else {
            RESULT_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        hit
    }

    pub fn set(&self, key: String, value: Bytes) {
        self.cache.insert(key, value);
    }
}
