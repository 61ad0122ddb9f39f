//! Entry filters and their scoping.
//!
//! Two layers restrict what a query may surface:
//!
//! - the sticky element filter, set with `with_element_filter`
//! - the scoped filter, installed through a [`ScopedFilterGuard`] and
//!   restored when the guard drops, on every exit path
//!
//! Bound checks for individual calls never touch either slot. The query
//! builds a [`CallScope`] per call and narrows it with the implied key bound,
//! so nested and concurrent calls cannot see each other's bounds.

use std::fmt;
use std::ops::{Bound, Deref, DerefMut, RangeBounds};
use std::sync::Arc;

use asof_core::CacheKey;

type Predicate<K, V> = dyn Fn(&K, &V) -> bool + Send + Sync;

/// Predicate over an entry.
pub struct EntryFilter<K, V> {
    predicate: Arc<Predicate<K, V>>,
}

impl<K, V> Clone for EntryFilter<K, V> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<K, V> fmt::Debug for EntryFilter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntryFilter(..)")
    }
}

impl<K: 'static, V: 'static> EntryFilter<K, V> {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn accepts(&self, key: &K, value: &V) -> bool {
        (self.predicate)(key, value)
    }

    /// Logical AND of both filters.
    pub fn and(&self, other: &Self) -> Self {
        let left = Arc::clone(&self.predicate);
        let right = Arc::clone(&other.predicate);
        Self::new(move |key, value| left(key, value) && right(key, value))
    }
}

impl<K: CacheKey, V: 'static> EntryFilter<K, V> {
    /// Accepts keys within `(lower, upper)`.
    pub fn key_range(lower: Bound<K>, upper: Bound<K>) -> Self {
        Self::new(move |key, _| (lower.clone(), upper.clone()).contains(key))
    }
}

/// AND of two optional filters; `None` accepts everything.
pub(crate) fn combine<K: 'static, V: 'static>(
    left: Option<&EntryFilter<K, V>>,
    right: Option<&EntryFilter<K, V>>,
) -> Option<EntryFilter<K, V>> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l.and(r)),
        (Some(f), None) | (None, Some(f)) => Some(f.clone()),
        (None, None) => None,
    }
}

pub(crate) fn accepts<K: 'static, V: 'static>(
    filter: Option<&EntryFilter<K, V>>,
    key: &K,
    value: &V,
) -> bool {
    filter.map_or(true, |f| f.accepts(key, value))
}

// ============================================================================
// PER-CALL SCOPE (filtering decorator)
// ============================================================================

/// Filters and policies in force for a single query call.
#[derive(Debug, Clone)]
pub(crate) struct CallScope<K, V> {
    filter: Option<EntryFilter<K, V>>,
    filter_duplicate_keys: bool,
}

impl<K: CacheKey, V: 'static> CallScope<K, V> {
    pub(crate) fn new(
        element: Option<&EntryFilter<K, V>>,
        scoped: Option<&EntryFilter<K, V>>,
        filter_duplicate_keys: bool,
    ) -> Self {
        Self {
            filter: combine(element, scoped),
            filter_duplicate_keys,
        }
    }

    /// Scope with no filtering at all, used by the `compute_*` lookups.
    pub(crate) fn unfiltered(filter_duplicate_keys: bool) -> Self {
        Self {
            filter: None,
            filter_duplicate_keys,
        }
    }

    /// The same scope with `bound` ANDed onto its filter.
    ///
    /// This is the filtering decorator: a call that must never surface keys
    /// outside `bound` delegates through the narrowed scope. The original
    /// scope is untouched, so nothing has to be restored afterwards.
    pub(crate) fn narrowed(&self, lower: Bound<K>, upper: Bound<K>) -> Self {
        let bound = EntryFilter::key_range(lower, upper);
        Self {
            filter: combine(self.filter.as_ref(), Some(&bound)),
            filter_duplicate_keys: self.filter_duplicate_keys,
        }
    }

    pub(crate) fn filter(&self) -> Option<&EntryFilter<K, V>> {
        self.filter.as_ref()
    }

    pub(crate) fn accepts(&self, key: &K, value: &V) -> bool {
        accepts(self.filter.as_ref(), key, value)
    }

    pub(crate) fn filter_duplicate_keys(&self) -> bool {
        self.filter_duplicate_keys
    }
}

// ============================================================================
// SCOPED FILTER GUARD
// ============================================================================

/// Anything carrying a scoped filter slot.
pub trait ScopedFilterSlot {
    type Key;
    type Value;

    fn scoped_filter_slot(&mut self) -> &mut Option<EntryFilter<Self::Key, Self::Value>>;
}

/// Installs a scoped filter and puts the previous one back on drop.
///
/// Dereferences to the guarded query, so calls made through the guard see
/// the installed filter. Restoration happens on success, on early `?`
/// returns and while unwinding.
pub struct ScopedFilterGuard<'q, Q: ScopedFilterSlot> {
    query: &'q mut Q,
    previous: Option<EntryFilter<Q::Key, Q::Value>>,
}

impl<'q, Q: ScopedFilterSlot> ScopedFilterGuard<'q, Q> {
    pub(crate) fn install(query: &'q mut Q, filter: Option<EntryFilter<Q::Key, Q::Value>>) -> Self {
        let previous = std::mem::replace(query.scoped_filter_slot(), filter);
        Self { query, previous }
    }
}

/// Install `predicate` as the scoped filter of `query`, ANDed onto the
/// current one when `compose` is set.
pub(crate) fn install_scoped<Q, F>(
    query: &mut Q,
    predicate: F,
    compose: bool,
) -> ScopedFilterGuard<'_, Q>
where
    Q: ScopedFilterSlot,
    Q::Key: 'static,
    Q::Value: 'static,
    F: Fn(&Q::Key, &Q::Value) -> bool + Send + Sync + 'static,
{
    let filter = EntryFilter::new(predicate);
    let installed = match (compose, query.scoped_filter_slot().as_ref()) {
        (true, Some(existing)) => existing.and(&filter),
        _ => filter,
    };
    ScopedFilterGuard::install(query, Some(installed))
}

impl<Q: ScopedFilterSlot> Deref for ScopedFilterGuard<'_, Q> {
    type Target = Q;

    fn deref(&self) -> &Q {
        self.query
    }
}

impl<Q: ScopedFilterSlot> DerefMut for ScopedFilterGuard<'_, Q> {
    fn deref_mut(&mut self) -> &mut Q {
        self.query
    }
}

impl<Q: ScopedFilterSlot> Drop for ScopedFilterGuard<'_, Q> {
    fn drop(&mut self) {
        *self.query.scoped_filter_slot() = self.previous.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot {
        filter: Option<EntryFilter<i64, &'static str>>,
    }

    impl ScopedFilterSlot for Slot {
        type Key = i64;
        type Value = &'static str;

        fn scoped_filter_slot(&mut self) -> &mut Option<EntryFilter<i64, &'static str>> {
            &mut self.filter
        }
    }

    #[test]
    fn test_and_requires_both() {
        let even = EntryFilter::<i64, ()>::new(|k, _| k % 2 == 0);
        let positive = EntryFilter::new(|k: &i64, _: &()| *k > 0);
        let both = even.and(&positive);

        assert!(both.accepts(&4, &()));
        assert!(!both.accepts(&3, &()));
        assert!(!both.accepts(&-2, &()));
    }

    #[test]
    fn test_key_range_bounds() {
        let filter = EntryFilter::<i64, ()>::key_range(Bound::Included(1), Bound::Excluded(3));
        assert!(!filter.accepts(&0, &()));
        assert!(filter.accepts(&1, &()));
        assert!(filter.accepts(&2, &()));
        assert!(!filter.accepts(&3, &()));
    }

    #[test]
    fn test_narrowed_scope_leaves_original_untouched() {
        let scope = CallScope::<i64, ()>::new(None, None, true);
        let narrowed = scope.narrowed(Bound::Unbounded, Bound::Included(5));

        assert!(scope.accepts(&9, &()));
        assert!(!narrowed.accepts(&9, &()));
        assert!(narrowed.accepts(&5, &()));
    }

    #[test]
    fn test_narrowed_composes_with_existing_filter() {
        let odd = EntryFilter::<i64, ()>::new(|k, _| k % 2 != 0);
        let scope = CallScope::new(Some(&odd), None, true);
        let narrowed = scope.narrowed(Bound::Included(3), Bound::Unbounded);

        assert!(!narrowed.accepts(&1, &()));
        assert!(!narrowed.accepts(&4, &()));
        assert!(narrowed.accepts(&5, &()));
    }

    #[test]
    fn test_guard_restores_previous_filter() {
        let mut slot = Slot {
            filter: Some(EntryFilter::new(|_, v: &&str| *v == "outer")),
        };

        {
            let guard = ScopedFilterGuard::install(
                &mut slot,
                Some(EntryFilter::new(|_, v: &&str| *v == "inner")),
            );
            let installed = guard.filter.as_ref().unwrap();
            assert!(installed.accepts(&0, &"inner"));
        }

        let restored = slot.filter.as_ref().unwrap();
        assert!(restored.accepts(&0, &"outer"));
        assert!(!restored.accepts(&0, &"inner"));
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let mut slot = Slot { filter: None };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let reject_all: EntryFilter<i64, &str> = EntryFilter::new(|_, _| false);
            let _guard = ScopedFilterGuard::install(&mut slot, Some(reject_all));
            panic!("boom");
        }));

        assert!(result.is_err());
        assert!(slot.filter.is_none());
    }
}
