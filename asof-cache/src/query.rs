//! Query objects: the public face of the cache.
//!
//! A [`Query`] is a cheap handle onto the shared cache plus its own settings.
//! Configuration methods mutate the handle and chain; lookups take `&self`
//! and never change settings. Clone a query to hand it to another thread.
//!
//! Forward-looking operations live on [`FutureQuery`], obtained through
//! [`Query::with_future`], so code that must stay point-in-time cannot call
//! them by accident.

use std::fmt;
use std::ops::{Bound, Deref, DerefMut};
use std::sync::Arc;

use asof_core::{describe_key, AsofResult, CacheKey, Entry, QueryError};
use serde::{Deserialize, Serialize};

use crate::engine::{Operation, QueryCore};
use crate::filter::{install_scoped, CallScope, EntryFilter, ScopedFilterGuard, ScopedFilterSlot};
use crate::sequence::{EntrySequence, KeySequence, Reload, Sequence, ValueSequence};

/// Consistency check applied to point lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertValue {
    /// Floor semantics: any key at or before the requested one is fine.
    #[default]
    Off,
    /// A returned entry must sit exactly at the requested key.
    ExactKey,
}

/// Settings carried by a [`Query`].
pub struct QuerySettings<K, V> {
    element_filter: Option<EntryFilter<K, V>>,
    scoped_filter: Option<EntryFilter<K, V>>,
    filter_duplicate_keys: bool,
    default_filter_duplicate_keys: bool,
    future_enabled: bool,
    assert_value: AssertValue,
    configured: bool,
}

impl<K, V> Clone for QuerySettings<K, V> {
    fn clone(&self) -> Self {
        Self {
            element_filter: self.element_filter.clone(),
            scoped_filter: self.scoped_filter.clone(),
            filter_duplicate_keys: self.filter_duplicate_keys,
            default_filter_duplicate_keys: self.default_filter_duplicate_keys,
            future_enabled: self.future_enabled,
            assert_value: self.assert_value,
            configured: self.configured,
        }
    }
}

impl<K, V> fmt::Debug for QuerySettings<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySettings")
            .field("element_filter", &self.element_filter.is_some())
            .field("scoped_filter", &self.scoped_filter.is_some())
            .field("filter_duplicate_keys", &self.filter_duplicate_keys)
            .field("future_enabled", &self.future_enabled)
            .field("assert_value", &self.assert_value)
            .field("configured", &self.configured)
            .finish()
    }
}

impl<K, V> QuerySettings<K, V> {
    fn new(filter_duplicate_keys: bool) -> Self {
        Self {
            element_filter: None,
            scoped_filter: None,
            filter_duplicate_keys,
            default_filter_duplicate_keys: filter_duplicate_keys,
            future_enabled: false,
            assert_value: AssertValue::Off,
            configured: false,
        }
    }

    pub fn has_element_filter(&self) -> bool {
        self.element_filter.is_some()
    }

    pub fn has_scoped_filter(&self) -> bool {
        self.scoped_filter.is_some()
    }

    pub fn filter_duplicate_keys(&self) -> bool {
        self.filter_duplicate_keys
    }

    pub fn is_future_enabled(&self) -> bool {
        self.future_enabled
    }

    pub fn assert_value(&self) -> AssertValue {
        self.assert_value
    }

    /// False until a `with_*` method or `copy_query_settings` runs, and
    /// again after `reset_query_settings`.
    pub fn is_configured(&self) -> bool {
        self.configured
    }
}

/// Handle for running lookups against a cache.
pub struct Query<K: CacheKey, V> {
    core: Arc<QueryCore<K, V>>,
    settings: QuerySettings<K, V>,
}

impl<K: CacheKey, V> Clone for Query<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            settings: self.settings.clone(),
        }
    }
}

impl<K: CacheKey, V> fmt::Debug for Query<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<K: CacheKey, V> ScopedFilterSlot for Query<K, V> {
    type Key = K;
    type Value = V;

    fn scoped_filter_slot(&mut self) -> &mut Option<EntryFilter<K, V>> {
        &mut self.settings.scoped_filter
    }
}

impl<K: CacheKey, V: Clone + Send + Sync + 'static> Query<K, V> {
    pub(crate) fn new(core: Arc<QueryCore<K, V>>) -> Self {
        let settings = QuerySettings::new(core.config().filter_duplicate_keys);
        Self { core, settings }
    }

    pub fn settings(&self) -> &QuerySettings<K, V> {
        &self.settings
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    /// Only surface entries accepted by `predicate`. Replaces any previous
    /// element filter and stays until replaced or reset.
    ///
    /// Filters run with no cache lock held, so `predicate` may itself query
    /// the same cache.
    pub fn with_element_filter<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        self.settings.element_filter = Some(EntryFilter::new(predicate));
        self.settings.configured = true;
        self
    }

    /// Install `predicate` as the scoped filter for as long as the returned
    /// guard lives. The previous scoped filter comes back when it drops.
    ///
    /// Like element filters, it runs with no cache lock held.
    pub fn with_thread_local_element_filter<F>(
        &mut self,
        predicate: F,
    ) -> ScopedFilterGuard<'_, Self>
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        install_scoped(self, predicate, false)
    }

    /// Like [`Query::with_thread_local_element_filter`], but ANDs `predicate`
    /// onto the scoped filter already in place.
    pub fn compose_thread_local_element_filter<F>(
        &mut self,
        predicate: F,
    ) -> ScopedFilterGuard<'_, Self>
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        install_scoped(self, predicate, true)
    }

    /// When true, batch and shifted lookups never repeat the boundary entry
    /// once the data runs out; they come back short instead.
    pub fn with_filter_duplicate_keys(&mut self, enabled: bool) -> &mut Self {
        self.settings.filter_duplicate_keys = enabled;
        self.settings.configured = true;
        self
    }

    pub fn with_assert_value(&mut self, mode: AssertValue) -> &mut Self {
        self.settings.assert_value = mode;
        self.settings.configured = true;
        self
    }

    /// Disable forward-looking operations on this handle.
    pub fn with_future_null(&mut self) -> &mut Self {
        self.settings.future_enabled = false;
        self.settings.configured = true;
        self
    }

    /// A copy of this query with forward-looking operations enabled.
    pub fn with_future(&self) -> FutureQuery<K, V> {
        let mut query = self.clone();
        query.settings.future_enabled = true;
        query.settings.configured = true;
        FutureQuery { query }
    }

    /// Take over the element filter, duplicate-key policy and assert mode of
    /// `other`. Scoped filters and future access stay as they are.
    pub fn copy_query_settings(&mut self, other: &Query<K, V>) -> &mut Self {
        self.settings.element_filter = other.settings.element_filter.clone();
        self.settings.filter_duplicate_keys = other.settings.filter_duplicate_keys;
        self.settings.assert_value = other.settings.assert_value;
        self.settings.configured = true;
        self
    }

    /// Back to the settings of a fresh query.
    pub fn reset_query_settings(&mut self) -> &mut Self {
        self.settings = QuerySettings::new(self.settings.default_filter_duplicate_keys);
        self
    }

    // ========================================================================
    // POINT LOOKUPS
    // ========================================================================

    /// Latest entry at or before `key` (clamped to the horizon).
    pub fn get_entry(&self, key: K) -> AsofResult<Option<Entry<K, V>>> {
        let scope = self.scope();
        self.point_lookup(key, &scope)
    }

    pub fn get_value(&self, key: K) -> AsofResult<Option<V>> {
        Ok(self.get_entry(key)?.map(Entry::into_value))
    }

    pub fn get_key(&self, key: K) -> AsofResult<Option<K>> {
        Ok(self.get_entry(key)?.map(Entry::into_key))
    }

    /// Point lookup that ignores every filter on this query.
    ///
    /// Horizon clamping and the assert mode still apply.
    pub fn compute_entry(&self, key: K) -> AsofResult<Option<Entry<K, V>>> {
        let scope = CallScope::unfiltered(self.settings.filter_duplicate_keys);
        self.point_lookup(key, &scope)
    }

    pub fn compute_value(&self, key: K) -> AsofResult<Option<V>> {
        Ok(self.compute_entry(key)?.map(Entry::into_value))
    }

    pub fn compute_key(&self, key: K) -> AsofResult<Option<K>> {
        Ok(self.compute_entry(key)?.map(Entry::into_key))
    }

    // ========================================================================
    // BACKWARD LOOKUPS
    // ========================================================================

    /// The entry `shift_back_units` accepted entries before the anchor of
    /// `key`; shift 0 is the anchor itself.
    pub fn get_previous_entry(
        &self,
        key: K,
        shift_back_units: usize,
    ) -> AsofResult<Option<Entry<K, V>>> {
        let op = self.core.begin()?;
        let anchor = op.adjust(key)?;
        let scope = self.up_to(&anchor);
        let walk = self
            .core
            .walk_previous(&op, &scope, anchor, shift_back_units.saturating_add(1))?;
        self.pick_shifted(walk.target, walk.exhausted, walk.earliest, &scope)
    }

    pub fn get_previous_value(&self, key: K, shift_back_units: usize) -> AsofResult<Option<V>> {
        Ok(self
            .get_previous_entry(key, shift_back_units)?
            .map(Entry::into_value))
    }

    pub fn get_previous_key(&self, key: K, shift_back_units: usize) -> AsofResult<Option<K>> {
        Ok(self
            .get_previous_entry(key, shift_back_units)?
            .map(Entry::into_key))
    }

    /// Up to `shift_back_units` accepted entries ending at the anchor of
    /// `key`, ascending.
    ///
    /// With `filter_duplicate_keys` off, a walk that runs out of data is
    /// padded at the front with the earliest entry, so the result always has
    /// exactly `shift_back_units` elements when anything exists.
    pub fn get_previous_entries(
        &self,
        key: K,
        shift_back_units: usize,
    ) -> AsofResult<EntrySequence<K, V>> {
        if shift_back_units == 0 {
            return Ok(Sequence::empty(self.core.shared_store()));
        }
        let op = self.core.begin()?;
        let anchor = op.adjust(key)?;
        let scope = self.up_to(&anchor);
        let walk = self.core.walk_previous(&op, &scope, anchor, shift_back_units)?;

        let (Some(earliest), Some(latest)) = (walk.earliest, walk.latest) else {
            return Ok(Sequence::empty(self.core.shared_store()));
        };
        let padding = self.padding(walk.exhausted, shift_back_units, walk.found, &scope);
        let reload = self.reloader(earliest.clone(), latest.clone());
        Ok(Sequence::entries(
            self.core.shared_store(),
            Bound::Included(earliest),
            Bound::Included(latest),
            scope.filter().cloned(),
        )
        .reloading(reload)
        .padded_front(padding)
        .with_expected_len(walk.found + padding))
    }

    pub fn get_previous_values(
        &self,
        key: K,
        shift_back_units: usize,
    ) -> AsofResult<ValueSequence<K, V>> {
        Ok(self
            .get_previous_entries(key, shift_back_units)?
            .map(Entry::into_value))
    }

    pub fn get_previous_keys(
        &self,
        key: K,
        shift_back_units: usize,
    ) -> AsofResult<KeySequence<K, V>> {
        Ok(self
            .get_previous_entries(key, shift_back_units)?
            .map(Entry::into_key))
    }

    // ========================================================================
    // RANGES
    // ========================================================================

    /// Accepted entries with keys in `[from, to]`, ascending. `to` is clamped
    /// to the horizon; an inverted range is empty.
    pub fn get_entries(&self, from: K, to: K) -> AsofResult<EntrySequence<K, V>> {
        let op = self.core.begin()?;
        let to = op.adjust(to)?;
        if from > to {
            return Ok(Sequence::empty(self.core.shared_store()));
        }
        self.core.ensure_loaded(&op, from.clone(), to.clone())?;

        let scope = self.between(&from, &to);
        let reload = self.reloader(from.clone(), to.clone());
        Ok(Sequence::entries(
            self.core.shared_store(),
            Bound::Included(from),
            Bound::Included(to),
            scope.filter().cloned(),
        )
        .reloading(reload))
    }

    pub fn get_values(&self, from: K, to: K) -> AsofResult<ValueSequence<K, V>> {
        Ok(self.get_entries(from, to)?.map(Entry::into_value))
    }

    pub fn get_keys(&self, from: K, to: K) -> AsofResult<KeySequence<K, V>> {
        Ok(self.get_entries(from, to)?.map(Entry::into_key))
    }

    // ========================================================================
    // BACKWARD VALUE SEARCHES
    // ========================================================================

    /// Latest entry in `[from, to]` whose value equals `value`.
    pub fn get_previous_entry_with_same_value_between(
        &self,
        from: K,
        to: K,
        value: &V,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        V: PartialEq,
    {
        self.search_back_between(from, to, |candidate| candidate == value)
    }

    /// Latest entry in `[from, to]` whose value differs from `value`.
    pub fn get_previous_entry_with_different_value_between(
        &self,
        from: K,
        to: K,
        value: &V,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        V: PartialEq,
    {
        self.search_back_between(from, to, |candidate| candidate != value)
    }

    pub fn get_previous_key_with_same_value_between(
        &self,
        from: K,
        to: K,
        value: &V,
    ) -> AsofResult<Option<K>>
    where
        V: PartialEq,
    {
        Ok(self
            .get_previous_entry_with_same_value_between(from, to, value)?
            .map(Entry::into_key))
    }

    pub fn get_previous_key_with_different_value_between(
        &self,
        from: K,
        to: K,
        value: &V,
    ) -> AsofResult<Option<K>>
    where
        V: PartialEq,
    {
        Ok(self
            .get_previous_entry_with_different_value_between(from, to, value)?
            .map(Entry::into_key))
    }

    /// First entry, walking back from the anchor of `key` for at most
    /// `max_shift_back_units` steps, whose value equals `value`.
    pub fn get_previous_entry_with_same_value(
        &self,
        key: K,
        max_shift_back_units: usize,
        value: &V,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        V: PartialEq,
    {
        self.search_back_within(key, max_shift_back_units, |candidate| candidate == value)
    }

    /// First entry, walking back from the anchor of `key` for at most
    /// `max_shift_back_units` steps, whose value differs from `value`.
    pub fn get_previous_entry_with_different_value(
        &self,
        key: K,
        max_shift_back_units: usize,
        value: &V,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        V: PartialEq,
    {
        self.search_back_within(key, max_shift_back_units, |candidate| candidate != value)
    }

    pub fn get_previous_key_with_same_value(
        &self,
        key: K,
        max_shift_back_units: usize,
        value: &V,
    ) -> AsofResult<Option<K>>
    where
        V: PartialEq,
    {
        Ok(self
            .get_previous_entry_with_same_value(key, max_shift_back_units, value)?
            .map(Entry::into_key))
    }

    pub fn get_previous_key_with_different_value(
        &self,
        key: K,
        max_shift_back_units: usize,
        value: &V,
    ) -> AsofResult<Option<K>>
    where
        V: PartialEq,
    {
        Ok(self
            .get_previous_entry_with_different_value(key, max_shift_back_units, value)?
            .map(Entry::into_key))
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn scope(&self) -> CallScope<K, V> {
        CallScope::new(
            self.settings.element_filter.as_ref(),
            self.settings.scoped_filter.as_ref(),
            self.settings.filter_duplicate_keys,
        )
    }

    /// Scope that can never surface a key after `anchor`.
    fn up_to(&self, anchor: &K) -> CallScope<K, V> {
        self.scope()
            .narrowed(Bound::Unbounded, Bound::Included(anchor.clone()))
    }

    /// Scope that can never surface a key outside `[from, to]`.
    fn between(&self, from: &K, to: &K) -> CallScope<K, V> {
        self.scope()
            .narrowed(Bound::Included(from.clone()), Bound::Included(to.clone()))
    }

    /// Scope that can never surface a key beyond the horizon.
    fn up_to_horizon(&self, op: &Operation<'_, K, V>) -> AsofResult<CallScope<K, V>> {
        Ok(match op.horizon()? {
            Some(horizon) => self.up_to(&horizon),
            None => self.scope(),
        })
    }

    /// Loads `[from, to]` again for a sequence that outlived a clear.
    fn reloader(&self, from: K, to: K) -> Reload {
        let core = Arc::clone(&self.core);
        Arc::new(move || {
            let op = core.begin()?;
            core.ensure_loaded(&op, from.clone(), to.clone())
        })
    }

    fn point_lookup(&self, key: K, scope: &CallScope<K, V>) -> AsofResult<Option<Entry<K, V>>> {
        let op = self.core.begin()?;
        let adjusted = op.adjust(key.clone())?;
        let entry = self.core.floor(&op, scope, adjusted)?;
        self.check_exact(&key, entry.as_ref())?;
        Ok(entry)
    }

    fn check_exact(&self, requested: &K, entry: Option<&Entry<K, V>>) -> AsofResult<()> {
        match (self.settings.assert_value, entry) {
            (AssertValue::ExactKey, Some(found)) if found.key != *requested => {
                tracing::warn!(
                    requested = ?requested,
                    returned = ?found.key,
                    "Strict key check failed"
                );
                Err(QueryError::KeyMismatch {
                    requested: describe_key(requested),
                    returned: describe_key(&found.key),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    fn require_future(&self, operation: &str) -> AsofResult<()> {
        if self.settings.future_enabled {
            Ok(())
        } else {
            Err(QueryError::FutureNotEnabled {
                operation: operation.to_string(),
            }
            .into())
        }
    }

    /// The target of a shifted walk, or its boundary entry when the walk ran
    /// out of data and duplicates are allowed.
    fn pick_shifted(
        &self,
        target: Option<Entry<K, V>>,
        exhausted: bool,
        boundary: Option<K>,
        scope: &CallScope<K, V>,
    ) -> AsofResult<Option<Entry<K, V>>> {
        if target.is_some() {
            return Ok(target);
        }
        match boundary {
            Some(key) if exhausted && !scope.filter_duplicate_keys() => self.core.stored(&key),
            _ => Ok(None),
        }
    }

    fn padding(
        &self,
        exhausted: bool,
        requested: usize,
        found: usize,
        scope: &CallScope<K, V>,
    ) -> usize {
        if exhausted && !scope.filter_duplicate_keys() {
            requested.saturating_sub(found)
        } else {
            0
        }
    }

    fn search_back_between<P>(&self, from: K, to: K, matches: P) -> AsofResult<Option<Entry<K, V>>>
    where
        P: Fn(&V) -> bool,
    {
        let op = self.core.begin()?;
        let to = op.adjust(to)?;
        if from > to {
            return Ok(None);
        }
        let scope = self.between(&from, &to);
        self.core
            .search_back(&op, &scope, to, Some(&from), None, matches)
    }

    fn search_back_within<P>(
        &self,
        key: K,
        max_shift_back_units: usize,
        matches: P,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        P: Fn(&V) -> bool,
    {
        let op = self.core.begin()?;
        let anchor = op.adjust(key)?;
        let scope = self.up_to(&anchor);
        self.core.search_back(
            &op,
            &scope,
            anchor,
            None,
            Some(max_shift_back_units.saturating_add(1)),
            matches,
        )
    }
}

// ============================================================================
// FUTURE-ENABLED QUERIES
// ============================================================================

/// A [`Query`] that may also look forward in time.
///
/// Dereferences to the plain query, so every backward lookup and setting is
/// available too. Calling `with_future_null` on it turns the forward
/// operations into [`QueryError::FutureNotEnabled`] errors.
pub struct FutureQuery<K: CacheKey, V> {
    query: Query<K, V>,
}

impl<K: CacheKey, V> Clone for FutureQuery<K, V> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
        }
    }
}

impl<K: CacheKey, V> fmt::Debug for FutureQuery<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FutureQuery").field(&self.query).finish()
    }
}

impl<K: CacheKey, V> Deref for FutureQuery<K, V> {
    type Target = Query<K, V>;

    fn deref(&self) -> &Query<K, V> {
        &self.query
    }
}

impl<K: CacheKey, V> DerefMut for FutureQuery<K, V> {
    fn deref_mut(&mut self) -> &mut Query<K, V> {
        &mut self.query
    }
}

impl<K: CacheKey, V> ScopedFilterSlot for FutureQuery<K, V> {
    type Key = K;
    type Value = V;

    fn scoped_filter_slot(&mut self) -> &mut Option<EntryFilter<K, V>> {
        &mut self.query.settings.scoped_filter
    }
}

impl<K: CacheKey, V: Clone + Send + Sync + 'static> FutureQuery<K, V> {
    /// Back to a plain query.
    pub fn into_query(self) -> Query<K, V> {
        self.query
    }

    /// Scoped filter guard that keeps the forward operations reachable.
    pub fn with_thread_local_element_filter<F>(
        &mut self,
        predicate: F,
    ) -> ScopedFilterGuard<'_, Self>
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        install_scoped(self, predicate, false)
    }

    pub fn compose_thread_local_element_filter<F>(
        &mut self,
        predicate: F,
    ) -> ScopedFilterGuard<'_, Self>
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        install_scoped(self, predicate, true)
    }

    // ========================================================================
    // FORWARD LOOKUPS
    // ========================================================================

    /// The entry `shift_forward_units` accepted entries after the forward
    /// anchor of `key`; shift 0 is the anchor itself.
    pub fn get_next_entry(
        &self,
        key: K,
        shift_forward_units: usize,
    ) -> AsofResult<Option<Entry<K, V>>> {
        self.query.require_future("get_next_entry")?;
        let op = self.query.core.begin()?;
        let key = op.adjust(key)?;
        let scope = self.query.up_to_horizon(&op)?;
        let walk = self
            .query
            .core
            .walk_next(&op, &scope, key, shift_forward_units.saturating_add(1))?;
        self.query
            .pick_shifted(walk.target, walk.exhausted, walk.latest, &scope)
    }

    pub fn get_next_value(&self, key: K, shift_forward_units: usize) -> AsofResult<Option<V>> {
        Ok(self
            .get_next_entry(key, shift_forward_units)?
            .map(Entry::into_value))
    }

    pub fn get_next_key(&self, key: K, shift_forward_units: usize) -> AsofResult<Option<K>> {
        Ok(self
            .get_next_entry(key, shift_forward_units)?
            .map(Entry::into_key))
    }

    /// Up to `shift_forward_units` accepted entries starting at the forward
    /// anchor of `key`, ascending, padded at the end with the last entry when
    /// duplicates are allowed and the data runs out.
    pub fn get_next_entries(
        &self,
        key: K,
        shift_forward_units: usize,
    ) -> AsofResult<EntrySequence<K, V>> {
        self.query.require_future("get_next_entries")?;
        let core = &self.query.core;
        if shift_forward_units == 0 {
            return Ok(Sequence::empty(core.shared_store()));
        }
        let op = core.begin()?;
        let key = op.adjust(key)?;
        let scope = self.query.up_to_horizon(&op)?;
        let walk = core.walk_next(&op, &scope, key, shift_forward_units)?;

        let (Some(earliest), Some(latest)) = (walk.earliest, walk.latest) else {
            return Ok(Sequence::empty(core.shared_store()));
        };
        let padding = self
            .query
            .padding(walk.exhausted, shift_forward_units, walk.found, &scope);
        let reload = self.query.reloader(earliest.clone(), latest.clone());
        Ok(Sequence::entries(
            core.shared_store(),
            Bound::Included(earliest),
            Bound::Included(latest),
            scope.filter().cloned(),
        )
        .reloading(reload)
        .padded_back(padding)
        .with_expected_len(walk.found + padding))
    }

    pub fn get_next_values(
        &self,
        key: K,
        shift_forward_units: usize,
    ) -> AsofResult<ValueSequence<K, V>> {
        Ok(self
            .get_next_entries(key, shift_forward_units)?
            .map(Entry::into_value))
    }

    pub fn get_next_keys(
        &self,
        key: K,
        shift_forward_units: usize,
    ) -> AsofResult<KeySequence<K, V>> {
        Ok(self
            .get_next_entries(key, shift_forward_units)?
            .map(Entry::into_key))
    }

    // ========================================================================
    // FORWARD VALUE SEARCHES
    // ========================================================================

    /// Earliest entry in `[from, to]` whose value equals `value`.
    pub fn get_next_entry_with_same_value_between(
        &self,
        from: K,
        to: K,
        value: &V,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        V: PartialEq,
    {
        self.query
            .require_future("get_next_entry_with_same_value_between")?;
        self.search_forward_between(from, to, |candidate| candidate == value)
    }

    /// Earliest entry in `[from, to]` whose value differs from `value`.
    pub fn get_next_entry_with_different_value_between(
        &self,
        from: K,
        to: K,
        value: &V,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        V: PartialEq,
    {
        self.query
            .require_future("get_next_entry_with_different_value_between")?;
        self.search_forward_between(from, to, |candidate| candidate != value)
    }

    pub fn get_next_key_with_same_value_between(
        &self,
        from: K,
        to: K,
        value: &V,
    ) -> AsofResult<Option<K>>
    where
        V: PartialEq,
    {
        Ok(self
            .get_next_entry_with_same_value_between(from, to, value)?
            .map(Entry::into_key))
    }

    pub fn get_next_key_with_different_value_between(
        &self,
        from: K,
        to: K,
        value: &V,
    ) -> AsofResult<Option<K>>
    where
        V: PartialEq,
    {
        Ok(self
            .get_next_entry_with_different_value_between(from, to, value)?
            .map(Entry::into_key))
    }

    /// First entry, walking forward from the anchor of `key` for at most
    /// `max_shift_forward_units` steps, whose value equals `value`.
    pub fn get_next_entry_with_same_value(
        &self,
        key: K,
        max_shift_forward_units: usize,
        value: &V,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        V: PartialEq,
    {
        self.query.require_future("get_next_entry_with_same_value")?;
        self.search_forward_within(key, max_shift_forward_units, |candidate| candidate == value)
    }

    /// First entry, walking forward from the anchor of `key` for at most
    /// `max_shift_forward_units` steps, whose value differs from `value`.
    pub fn get_next_entry_with_different_value(
        &self,
        key: K,
        max_shift_forward_units: usize,
        value: &V,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        V: PartialEq,
    {
        self.query
            .require_future("get_next_entry_with_different_value")?;
        self.search_forward_within(key, max_shift_forward_units, |candidate| candidate != value)
    }

    pub fn get_next_key_with_same_value(
        &self,
        key: K,
        max_shift_forward_units: usize,
        value: &V,
    ) -> AsofResult<Option<K>>
    where
        V: PartialEq,
    {
        Ok(self
            .get_next_entry_with_same_value(key, max_shift_forward_units, value)?
            .map(Entry::into_key))
    }

    pub fn get_next_key_with_different_value(
        &self,
        key: K,
        max_shift_forward_units: usize,
        value: &V,
    ) -> AsofResult<Option<K>>
    where
        V: PartialEq,
    {
        Ok(self
            .get_next_entry_with_different_value(key, max_shift_forward_units, value)?
            .map(Entry::into_key))
    }

    fn search_forward_between<P>(
        &self,
        from: K,
        to: K,
        matches: P,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        P: Fn(&V) -> bool,
    {
        let core = &self.query.core;
        let op = core.begin()?;
        let to = op.adjust(to)?;
        if from > to {
            return Ok(None);
        }
        let scope = self.query.between(&from, &to);
        core.search_forward(&op, &scope, Bound::Included(from), Some(to), None, matches)
    }

    fn search_forward_within<P>(
        &self,
        key: K,
        max_shift_forward_units: usize,
        matches: P,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        P: Fn(&V) -> bool,
    {
        let core = &self.query.core;
        let op = core.begin()?;
        let key = op.adjust(key)?;
        let scope = self.query.up_to_horizon(&op)?;
        let lower = core.forward_anchor(&op, &scope, key)?;
        core.search_forward(
            &op,
            &scope,
            lower,
            None,
            Some(max_shift_forward_units.saturating_add(1)),
            matches,
        )
    }
}
