//! Source collaborator contract.
//!
//! The cache never owns data. Everything it serves was handed over by a
//! [`HistorySource`], which is typically backed by a database table, a
//! file of bars, or a live feed. Calls are synchronous and may block on I/O;
//! the cache surfaces their latency and their errors to the caller that
//! triggered the load.

use crate::error::AsofResult;
use crate::key::CacheKey;

/// One page of a bulk ascending load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePage<V> {
    /// Values in strictly ascending key order.
    pub values: Vec<V>,
    /// True when nothing follows the last value of this page.
    pub exhausted: bool,
}

impl<V> SourcePage<V> {
    /// A page that ends the data going forward.
    pub fn complete(values: Vec<V>) -> Self {
        Self {
            values,
            exhausted: true,
        }
    }

    /// A truncated page; more values may follow the last one.
    pub fn partial(values: Vec<V>) -> Self {
        let exhausted = values.is_empty();
        Self { values, exhausted }
    }

    /// Empty pages always count as exhausted, whatever the flag says.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted || self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Supplies entities on demand.
///
/// # Implementation Requirements
///
/// - `read_all_values_ascending_from` returns values with keys `>= key`,
///   strictly ascending. It may truncate the result; the page flag tells the
///   cache whether to ask again.
/// - `read_latest_value_for` returns the value with the greatest key `<= key`.
/// - `calculate_previous_key` returns the closest key strictly before `key` at
///   the source's resolution. No entity may sit strictly between the result
///   and `key`, which is what lets a floor lookup at the result find the
///   immediate predecessor.
/// - `calculate_next_key` is the mirror image: an adjacent key strictly after
///   `key`. Pagination normally resumes at the last loaded key; it only steps
///   with this function when a page returns nothing past that key, which
///   happens with sources that truncate pages to a single value.
pub trait HistorySource<K: CacheKey, V>: Send + Sync {
    /// Bulk ascending load starting at `key` (inclusive).
    fn read_all_values_ascending_from(&self, key: &K) -> AsofResult<SourcePage<V>>;

    /// Single-entity floor lookup.
    fn read_latest_value_for(&self, key: &K) -> AsofResult<Option<V>>;

    /// Key of an entity.
    fn extract_key(&self, value: &V) -> K;

    /// Adjacent key before `key`.
    fn calculate_previous_key(&self, key: &K) -> K;

    /// Adjacent key after `key`.
    fn calculate_next_key(&self, key: &K) -> K;
}
