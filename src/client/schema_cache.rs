//! Datasource schema caching so repeated introspection skips the broker.
//!
//! Uses moka for thread-safe caching with TTL-based expiration.

use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::query::schema::DatasourceSchema;

/// Introspected schemas keyed by datasource name
pub struct SchemaCache {
    cache: Cache<String, DatasourceSchema>,
    hits: AtomicU64,
    misses: AtomicU64,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::with_config(256, Duration::from_secs(300))
    }

    pub fn with_config(max_entries: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ttl,
        }
    }

    pub fn get(&self, datasource: &str) -> Option<DatasourceSchema> {
        if let Some(schema) = self.cache.get(datasource) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(schema)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, schema: DatasourceSchema) {
        self.cache.insert(schema.name.clone(), schema);
    }

    /// Drop the entry for one datasource
    pub fn invalidate_table(&self, datasource: &str) {
        self.cache.invalidate(datasource);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
            ttl_secs: self.ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
    pub entry_count: u64,
    pub ttl_secs: u64,
}
