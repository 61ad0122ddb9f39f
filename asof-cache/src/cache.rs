//! The cache facade.

use std::fmt;
use std::sync::Arc;

use asof_core::{AdjustKeyProvider, AsofResult, CacheConfig, CacheKey, HistorySource};

use crate::engine::QueryCore;
use crate::query::Query;
use crate::segment::Segment;
use crate::stats::CacheStats;

/// Point-in-time cache over a [`HistorySource`].
///
/// Holds the loaded entries, the horizon provider and statistics. Lookups go
/// through [`HistoricalCache::query`]; every query handle shares this cache's
/// store, so data loaded by one is visible to all.
///
/// # Example
///
/// ```ignore
/// let cache = HistoricalCache::new(source, CacheConfig::default())?;
/// let close = cache.query().get_value(as_of)?;
/// let last_five = cache.query().get_previous_values(as_of, 5)?;
/// ```
pub struct HistoricalCache<K: CacheKey, V> {
    core: Arc<QueryCore<K, V>>,
}

impl<K: CacheKey, V> Clone for HistoricalCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<K: CacheKey, V: Clone + Send + Sync + 'static> fmt::Debug for HistoricalCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoricalCache")
            .field("config", self.core.config())
            .finish_non_exhaustive()
    }
}

impl<K: CacheKey, V: Clone + Send + Sync + 'static> HistoricalCache<K, V> {
    /// Create a cache after validating `config`.
    pub fn new(source: Arc<dyn HistorySource<K, V>>, config: CacheConfig) -> AsofResult<Self> {
        config.validate()?;
        tracing::debug!(cache = %config.name, "Created historical cache");
        Ok(Self {
            core: Arc::new(QueryCore::new(source, config)),
        })
    }

    /// Create a cache with default configuration.
    pub fn with_defaults(source: Arc<dyn HistorySource<K, V>>) -> Self {
        Self {
            core: Arc::new(QueryCore::new(source, CacheConfig::default())),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        self.core.config()
    }

    /// A fresh query with default settings.
    pub fn query(&self) -> Query<K, V> {
        Query::new(Arc::clone(&self.core))
    }

    /// Replace the horizon provider. Takes effect for calls that start
    /// afterwards.
    pub fn set_adjust_key_provider(
        &self,
        provider: Arc<dyn AdjustKeyProvider<K>>,
    ) -> AsofResult<()> {
        self.core.set_adjust_key_provider(provider)
    }

    pub fn adjust_key_provider(&self) -> AsofResult<Arc<dyn AdjustKeyProvider<K>>> {
        self.core.adjust_key_provider()
    }

    /// Evict everything. The next lookup starts from an empty store.
    pub fn clear(&self) -> AsofResult<()> {
        self.core.clear()
    }

    pub fn stats(&self) -> AsofResult<CacheStats> {
        self.core.stats()
    }

    pub fn entry_count(&self) -> AsofResult<usize> {
        Ok(self.core.read_store()?.len())
    }

    /// Lowest key the cache can answer for without the source.
    pub fn lowest_loaded(&self) -> AsofResult<Option<K>> {
        Ok(self.core.read_store()?.lowest_loaded())
    }

    /// Highest key the cache can answer for without the source.
    pub fn highest_loaded(&self) -> AsofResult<Option<K>> {
        Ok(self.core.read_store()?.highest_loaded())
    }

    /// Whether the source has been read to its end.
    pub fn is_fully_loaded(&self) -> AsofResult<bool> {
        Ok(self.core.read_store()?.is_fully_loaded())
    }

    /// Key intervals currently known to be complete, ascending.
    pub fn segments(&self) -> AsofResult<Vec<Segment<K>>> {
        Ok(self.core.read_store()?.segments().to_vec())
    }
}
