//! Query engine.
//!
//! Every query call runs as one [`Operation`]: it samples the horizon, walks
//! the segment store in the requested direction, and asks the source for
//! whatever the walk runs into that is not loaded yet. Source calls happen
//! without the store lock held; their results are merged under the write lock
//! and the walk resumes where it stopped. Merging is idempotent, so two
//! threads loading the same gap at once only cost a redundant call.
//!
//! Walks copy covered entries out in chunks and visit them with no lock held.
//!
//! Backward walks that need more than one predecessor extend coverage in
//! bulk: a first floor lookup measures how many `calculate_previous_key` steps
//! separate neighbouring entities, and later extensions load a window sized
//! from that spacing with one ascending page run. Point lookups stay on the
//! single-entity path.

use std::cell::Cell;
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use asof_core::{
    clamp_to_horizon, describe_key, AdjustKeyProvider, AsofResult, CacheConfig, CacheKey, Entry,
    HistorySource, NoAdjustKeyProvider, QueryError, SourceError,
};

use crate::filter::CallScope;
use crate::segment::{BackLoad, ForwardLoad, SegmentStore, Then, Visit};
use crate::stats::{CacheStats, StatsCounters};

type SharedProvider<K> = Arc<dyn AdjustKeyProvider<K>>;

/// Entries copied out of the store per scan.
const SCAN_CHUNK: usize = 256;

/// Cap on `calculate_previous_key` steps taken to size one backward window.
const MAX_WINDOW_STEPS: usize = 1 << 20;

/// Shared state behind a cache and all of its queries.
pub(crate) struct QueryCore<K: CacheKey, V> {
    config: CacheConfig,
    source: Arc<dyn HistorySource<K, V>>,
    store: Arc<RwLock<SegmentStore<K, V>>>,
    provider: RwLock<SharedProvider<K>>,
    stats: StatsCounters,
}

/// One query call: a horizon snapshot plus bookkeeping for statistics.
pub(crate) struct Operation<'c, K: CacheKey, V> {
    core: &'c QueryCore<K, V>,
    provider: SharedProvider<K>,
    horizon: Option<K>,
    source_calls: Cell<usize>,
}

impl<K: CacheKey, V> Operation<'_, K, V> {
    /// Horizon for this call.
    ///
    /// Non-recursive providers were sampled once when the call began.
    /// Recursive ones are asked again.
    pub(crate) fn horizon(&self) -> AsofResult<Option<K>> {
        if self.provider.is_recursive() {
            self.provider.highest_allowed_key()
        } else {
            Ok(self.horizon.clone())
        }
    }

    /// `min(key, horizon)`.
    pub(crate) fn adjust(&self, key: K) -> AsofResult<K> {
        Ok(clamp_to_horizon(key, self.horizon()?.as_ref()))
    }

    fn note_source_call(&self) {
        self.source_calls.set(self.source_calls.get() + 1);
    }
}

impl<K: CacheKey, V> Drop for Operation<'_, K, V> {
    fn drop(&mut self) {
        if self.source_calls.get() == 0 {
            self.core.stats.record_hit();
        } else {
            self.core.stats.record_miss();
        }
    }
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkEnd {
    /// The visitor asked to stop.
    Stopped,
    /// The data ran out: beginning of data, an exhausted source, the horizon
    /// or the walk's own bound.
    Exhausted,
}

/// How far below its first uncovered key a backward walk expects to reach.
#[derive(Debug)]
pub(crate) enum Reach<'a, K> {
    /// One entry. Extends with single-entity floor lookups.
    Single,
    /// About this many entries in total. Extends with bulk windows.
    Entries(usize),
    /// Down to this key, inclusive, which also ends the walk.
    DownTo(&'a K),
}

/// What a counting walk saw.
#[derive(Debug)]
pub(crate) struct Walk<K, V> {
    /// Accepted entries visited, the anchor included.
    pub(crate) found: usize,
    /// Lowest accepted key visited.
    pub(crate) earliest: Option<K>,
    /// Highest accepted key visited.
    pub(crate) latest: Option<K>,
    /// The entry that completed the requested count.
    pub(crate) target: Option<Entry<K, V>>,
    /// The walk ran out of data before completing the count.
    pub(crate) exhausted: bool,
}

impl<K, V> Default for Walk<K, V> {
    fn default() -> Self {
        Self {
            found: 0,
            earliest: None,
            latest: None,
            target: None,
            exhausted: false,
        }
    }
}

impl<K: CacheKey, V: Clone + Send + Sync + 'static> QueryCore<K, V> {
    pub(crate) fn new(source: Arc<dyn HistorySource<K, V>>, config: CacheConfig) -> Self {
        Self {
            config,
            source,
            store: Arc::new(RwLock::new(SegmentStore::new())),
            provider: RwLock::new(Arc::new(NoAdjustKeyProvider) as SharedProvider<K>),
            stats: StatsCounters::default(),
        }
    }

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn shared_store(&self) -> Arc<RwLock<SegmentStore<K, V>>> {
        Arc::clone(&self.store)
    }

    pub(crate) fn read_store(&self) -> AsofResult<RwLockReadGuard<'_, SegmentStore<K, V>>> {
        self.store.read().map_err(|_| QueryError::LockPoisoned.into())
    }

    fn write_store(&self) -> AsofResult<RwLockWriteGuard<'_, SegmentStore<K, V>>> {
        self.store.write().map_err(|_| QueryError::LockPoisoned.into())
    }

    pub(crate) fn adjust_key_provider(&self) -> AsofResult<SharedProvider<K>> {
        self.provider
            .read()
            .map(|provider| Arc::clone(&provider))
            .map_err(|_| QueryError::LockPoisoned.into())
    }

    pub(crate) fn set_adjust_key_provider(&self, provider: SharedProvider<K>) -> AsofResult<()> {
        let mut slot = self.provider.write().map_err(|_| QueryError::LockPoisoned)?;
        *slot = provider;
        tracing::debug!(cache = %self.config.name, "Replaced adjust key provider");
        Ok(())
    }

    pub(crate) fn stats(&self) -> AsofResult<CacheStats> {
        let entries = self.read_store()?.len();
        Ok(self.stats.snapshot(entries))
    }

    /// Drop every entry and all coverage.
    pub(crate) fn clear(&self) -> AsofResult<()> {
        let mut store = self.write_store()?;
        let evicted = store.len();
        store.clear();
        self.stats.record_eviction();
        tracing::info!(cache = %self.config.name, evicted, "Cleared cache");
        Ok(())
    }

    /// Start a query call.
    ///
    /// Samples the horizon and closes an open tail that no longer vouches
    /// for it.
    pub(crate) fn begin(&self) -> AsofResult<Operation<'_, K, V>> {
        let provider = self.adjust_key_provider()?;
        let horizon = provider.highest_allowed_key()?;

        if self.read_store()?.tail_is_stale(horizon.as_ref()) {
            let mut store = self.write_store()?;
            if store.expire_tail(horizon.as_ref()) {
                tracing::debug!(
                    cache = %self.config.name,
                    horizon = ?horizon,
                    "Horizon moved past fully loaded tail, reopening"
                );
            }
        }

        Ok(Operation {
            core: self,
            provider,
            horizon,
            source_calls: Cell::new(0),
        })
    }

    // ========================================================================
    // Walks
    // ========================================================================

    /// Visit entries at or below `upper`, descending, loading as needed.
    ///
    /// A floor lookup whose merge changes nothing is only treated as a dead
    /// end when the rescan lands on the same segment start again; another
    /// thread may have merged the same data first.
    pub(crate) fn walk_back<F>(
        &self,
        op: &Operation<'_, K, V>,
        upper: K,
        reach: Reach<'_, K>,
        mut visit: F,
    ) -> AsofResult<WalkEnd>
    where
        F: FnMut(&K, &V) -> Visit,
    {
        let stop_below = match &reach {
            Reach::DownTo(stop) => Some(*stop),
            _ => None,
        };
        let mut bound = Bound::Included(upper);
        let mut visited = 0usize;
        let mut steps = 0usize;
        let mut spacing: Option<usize> = None;
        let mut stalled: Option<K> = None;

        loop {
            let chunk = self.read_store()?.scan_back(&bound, stop_below, SCAN_CHUNK);
            for (key, value) in &chunk.entries {
                visited += 1;
                if visit(key, value) == Visit::Stop {
                    return Ok(WalkEnd::Stopped);
                }
            }

            let start = match chunk.then {
                Then::More(next) => {
                    bound = next;
                    continue;
                }
                Then::Exhausted => return Ok(WalkEnd::Exhausted),
                Then::Load(BackLoad::At(point)) => {
                    tracing::trace!(cache = %self.config.name, key = ?point, "Point lookup missed");
                    self.stats.record_point_load();
                    self.load_floor(op, point.clone(), point)?;
                    continue;
                }
                Then::Load(BackLoad::Below(start)) => start,
            };

            if stalled.as_ref() == Some(&start) {
                tracing::warn!(
                    cache = %self.config.name,
                    start = ?start,
                    "Backward extension made no progress"
                );
                return Err(SourceError::NoProgress {
                    operation: "read_latest_value_for".to_string(),
                    at: describe_key(&start),
                }
                .into());
            }
            if steps >= self.config.max_backward_steps {
                tracing::warn!(
                    cache = %self.config.name,
                    steps,
                    start = ?start,
                    "Backward extension hit the step limit"
                );
                return Err(QueryError::LoadLimitReached {
                    limit: "max_backward_steps".to_string(),
                    value: self.config.max_backward_steps,
                    at: describe_key(&start),
                }
                .into());
            }
            steps += 1;

            let window = match (&reach, spacing) {
                (Reach::DownTo(stop), _) => Some((*stop).clone()),
                (Reach::Entries(count), Some(spacing)) if count.saturating_sub(visited) > 1 => {
                    let remaining = count - visited;
                    let from = self.step_back(&start, remaining.saturating_mul(spacing));
                    (from < start).then_some(from)
                }
                _ => None,
            };

            let grew = match window {
                Some(from) => {
                    self.load_window(op, from.clone(), start.clone())?;
                    let store = self.read_store()?;
                    // An empty window means the spacing no longer fits; the
                    // next extension jumps the gap with a floor lookup.
                    if store
                        .first_in(&Bound::Included(from.clone()), &Bound::Excluded(start.clone()))
                        .is_none()
                    {
                        spacing = None;
                    }
                    store.covers_between(&from, &start)
                }
                None => {
                    let (grew, floor) = self.extend_floor(op, &start)?;
                    if let (Reach::Entries(_), Some(floor)) = (&reach, floor) {
                        spacing = Some(self.steps_between(&start, &floor));
                    }
                    grew
                }
            };
            stalled = (!grew).then(|| start.clone());
            bound = Bound::Excluded(start);
        }
    }

    /// One single-entity step below the segment starting at `start`.
    ///
    /// Returns whether coverage grew and the floor key that was found.
    fn extend_floor(&self, op: &Operation<'_, K, V>, start: &K) -> AsofResult<(bool, Option<K>)> {
        self.stats.record_backward_load();
        let key = if self.read_store()?.contains_key(start) {
            self.source.calculate_previous_key(start)
        } else {
            start.clone()
        };
        self.load_floor(op, key, start.clone())
    }

    /// Bulk-load `[from, start]` so a backward walk can continue below
    /// `start`.
    fn load_window(&self, op: &Operation<'_, K, V>, from: K, start: K) -> AsofResult<()> {
        tracing::debug!(
            cache = %self.config.name,
            from = ?from,
            to = ?start,
            "Extending coverage backward in bulk"
        );
        self.walk_forward(op, Bound::Included(from), Some(start), 0, |_, _| Visit::Continue)?;
        Ok(())
    }

    /// `key` moved back `steps` times with `calculate_previous_key`.
    fn step_back(&self, key: &K, steps: usize) -> K {
        let mut current = key.clone();
        for _ in 0..steps.min(MAX_WINDOW_STEPS) {
            let previous = self.source.calculate_previous_key(&current);
            if previous >= current {
                break;
            }
            current = previous;
        }
        current
    }

    /// `calculate_previous_key` steps from `from` down to `to`, at least one.
    fn steps_between(&self, from: &K, to: &K) -> usize {
        let mut current = from.clone();
        let mut steps = 0usize;
        while &current > to && steps < MAX_WINDOW_STEPS {
            let previous = self.source.calculate_previous_key(&current);
            if previous >= current {
                break;
            }
            current = previous;
            steps += 1;
        }
        steps.max(1)
    }

    /// Visit entries above `lower`, ascending, up to `stop_above` and the
    /// horizon, loading pages as needed.
    ///
    /// Up to `chunk` entries are copied out per scan; with `0` the walk only
    /// loads.
    pub(crate) fn walk_forward<F>(
        &self,
        op: &Operation<'_, K, V>,
        lower: Bound<K>,
        stop_above: Option<K>,
        chunk: usize,
        mut visit: F,
    ) -> AsofResult<WalkEnd>
    where
        F: FnMut(&K, &V) -> Visit,
    {
        let horizon = op.horizon()?;
        let limit = match (stop_above, horizon.clone()) {
            (Some(stop), Some(horizon)) => Some(stop.min(horizon)),
            (stop, horizon) => stop.or(horizon),
        };
        let mut bound = lower;
        let mut pages = 0usize;
        let mut stalled: Option<K> = None;
        let mut step_resume = false;

        loop {
            let scanned = self.read_store()?.scan_forward(&bound, limit.as_ref(), chunk);
            for (key, value) in &scanned.entries {
                if visit(key, value) == Visit::Stop {
                    return Ok(WalkEnd::Stopped);
                }
            }

            let (from, resumed) = match scanned.then {
                Then::More(next) => {
                    bound = next;
                    continue;
                }
                Then::Exhausted => return Ok(WalkEnd::Exhausted),
                Then::Load(ForwardLoad::Uncovered(point)) => (point, false),
                Then::Load(ForwardLoad::After(end)) => {
                    bound = Bound::Excluded(end.clone());
                    (end, true)
                }
            };
            if stalled.as_ref() == Some(&from) {
                tracing::warn!(
                    cache = %self.config.name,
                    from = ?from,
                    "Bulk load made no progress"
                );
                return Err(SourceError::NoProgress {
                    operation: "read_all_values_ascending_from".to_string(),
                    at: describe_key(&from),
                }
                .into());
            }

            // Pages resume at the end of the covered run, inclusive. Once a
            // page has come back with nothing past that key, the walk steps
            // with calculate_next_key instead.
            let stepped = if resumed && step_resume {
                self.next_key_after(&from)
            } else {
                None
            };
            let load_from = stepped.clone().unwrap_or_else(|| from.clone());
            let mut grew = self.next_page(op, &mut pages, load_from, from.clone(), &horizon)?;
            if !grew && resumed && stepped.is_none() {
                if let Some(next) = self.next_key_after(&from) {
                    grew = self.next_page(op, &mut pages, next, from.clone(), &horizon)?;
                    step_resume = grew;
                }
            }
            stalled = (!grew).then(|| from.clone());
        }
    }

    fn next_key_after(&self, key: &K) -> Option<K> {
        let next = self.source.calculate_next_key(key);
        (next > *key).then_some(next)
    }

    /// One page under the per-walk page limit; whether it grew coverage.
    fn next_page(
        &self,
        op: &Operation<'_, K, V>,
        pages: &mut usize,
        load_from: K,
        covered_from: K,
        horizon: &Option<K>,
    ) -> AsofResult<bool> {
        if *pages >= self.config.max_page_requests {
            tracing::warn!(
                cache = %self.config.name,
                pages = *pages,
                from = ?load_from,
                "Pagination hit the page limit"
            );
            return Err(QueryError::LoadLimitReached {
                limit: "max_page_requests".to_string(),
                value: self.config.max_page_requests,
                at: describe_key(&load_from),
            }
            .into());
        }
        *pages += 1;
        self.load_page(op, load_from, covered_from, horizon.clone())
    }

    // ========================================================================
    // Loads
    // ========================================================================

    /// Floor lookup at `key`, vouching for everything up to `through`.
    ///
    /// Returns whether coverage around `through` grew and the floor key.
    fn load_floor(
        &self,
        op: &Operation<'_, K, V>,
        key: K,
        through: K,
    ) -> AsofResult<(bool, Option<K>)> {
        op.note_source_call();
        let found = self.source.read_latest_value_for(&key).inspect_err(|error| {
            tracing::warn!(cache = %self.config.name, key = ?key, %error, "Floor lookup failed");
        })?;

        let floor = match found {
            Some(value) => {
                let found_key = self.source.extract_key(&value);
                if found_key > key {
                    return Err(SourceError::FloorAfterKey {
                        key: describe_key(&key),
                        returned: describe_key(&found_key),
                    }
                    .into());
                }
                Some((found_key, value))
            }
            None => None,
        };

        let floor_key = floor.as_ref().map(|(k, _)| k.clone());
        tracing::debug!(
            cache = %self.config.name,
            key = ?key,
            floor = ?floor_key,
            "Loaded floor entry"
        );
        let grew = self.write_store()?.merge_floor(floor, through);
        Ok((grew, floor_key))
    }

    fn load_page(
        &self,
        op: &Operation<'_, K, V>,
        load_from: K,
        covered_from: K,
        horizon: Option<K>,
    ) -> AsofResult<bool> {
        op.note_source_call();
        self.stats.record_bulk_load();
        let page = self
            .source
            .read_all_values_ascending_from(&load_from)
            .inspect_err(|error| {
                tracing::warn!(
                    cache = %self.config.name,
                    from = ?load_from,
                    %error,
                    "Bulk load failed"
                );
            })?;

        let exhausted = page.is_exhausted();
        let mut entries: Vec<(K, V)> = Vec::with_capacity(page.len());
        for value in page.values {
            let key = self.source.extract_key(&value);
            if key < load_from {
                return Err(SourceError::BelowRequestedBound {
                    from: describe_key(&load_from),
                    key: describe_key(&key),
                }
                .into());
            }
            if let Some((previous, _)) = entries.last() {
                if key <= *previous {
                    return Err(SourceError::UnorderedPage {
                        from: describe_key(&load_from),
                        key: describe_key(&key),
                    }
                    .into());
                }
            }
            entries.push((key, value));
        }

        tracing::debug!(
            cache = %self.config.name,
            from = ?load_from,
            count = entries.len(),
            exhausted,
            "Loaded page"
        );
        Ok(self
            .write_store()?
            .merge_page(covered_from, entries, exhausted, horizon))
    }

    // ========================================================================
    // Lookups built on the walks
    // ========================================================================

    /// Greatest accepted entry at or below `key`.
    pub(crate) fn floor(
        &self,
        op: &Operation<'_, K, V>,
        scope: &CallScope<K, V>,
        key: K,
    ) -> AsofResult<Option<Entry<K, V>>> {
        let mut found = None;
        self.walk_back(op, key, Reach::Single, |k, v| {
            if scope.accepts(k, v) {
                found = Some(Entry::new(k.clone(), v.clone()));
                Visit::Stop
            } else {
                Visit::Continue
            }
        })?;
        Ok(found)
    }

    /// Up to `count` accepted entries ending at the floor of `anchor`.
    pub(crate) fn walk_previous(
        &self,
        op: &Operation<'_, K, V>,
        scope: &CallScope<K, V>,
        anchor: K,
        count: usize,
    ) -> AsofResult<Walk<K, V>> {
        let mut walk = Walk::default();
        let end = self.walk_back(op, anchor, Reach::Entries(count), |k, v| {
            if !scope.accepts(k, v) {
                return Visit::Continue;
            }
            walk.found += 1;
            if walk.latest.is_none() {
                walk.latest = Some(k.clone());
            }
            walk.earliest = Some(k.clone());
            if walk.found >= count {
                walk.target = Some(Entry::new(k.clone(), v.clone()));
                Visit::Stop
            } else {
                Visit::Continue
            }
        })?;
        walk.exhausted = end == WalkEnd::Exhausted;
        Ok(walk)
    }

    /// Where forward walks from `key` start: its accepted floor, or just
    /// past `key` when nothing accepted exists at or below it.
    pub(crate) fn forward_anchor(
        &self,
        op: &Operation<'_, K, V>,
        scope: &CallScope<K, V>,
        key: K,
    ) -> AsofResult<Bound<K>> {
        Ok(match self.floor(op, scope, key.clone())? {
            Some(anchor) => Bound::Included(anchor.into_key()),
            None => Bound::Excluded(key),
        })
    }

    /// Up to `count` accepted entries starting at the forward anchor of `key`.
    pub(crate) fn walk_next(
        &self,
        op: &Operation<'_, K, V>,
        scope: &CallScope<K, V>,
        key: K,
        count: usize,
    ) -> AsofResult<Walk<K, V>> {
        let lower = self.forward_anchor(op, scope, key)?;

        let mut walk = Walk::default();
        let end = self.walk_forward(op, lower, None, SCAN_CHUNK, |k, v| {
            if !scope.accepts(k, v) {
                return Visit::Continue;
            }
            walk.found += 1;
            if walk.earliest.is_none() {
                walk.earliest = Some(k.clone());
            }
            walk.latest = Some(k.clone());
            if walk.found >= count {
                walk.target = Some(Entry::new(k.clone(), v.clone()));
                Visit::Stop
            } else {
                Visit::Continue
            }
        })?;
        walk.exhausted = end == WalkEnd::Exhausted;
        Ok(walk)
    }

    /// Make sure every entity in `[from, to]` is loaded.
    pub(crate) fn ensure_loaded(&self, op: &Operation<'_, K, V>, from: K, to: K) -> AsofResult<()> {
        self.walk_forward(op, Bound::Included(from), Some(to), 0, |_, _| Visit::Continue)?;
        Ok(())
    }

    /// First accepted entry walking down from `upper` whose value satisfies
    /// `matches`, giving up after `max_visits` accepted entries.
    pub(crate) fn search_back<P>(
        &self,
        op: &Operation<'_, K, V>,
        scope: &CallScope<K, V>,
        upper: K,
        stop_below: Option<&K>,
        max_visits: Option<usize>,
        matches: P,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        P: Fn(&V) -> bool,
    {
        let reach = match stop_below {
            Some(stop) => Reach::DownTo(stop),
            None => Reach::Entries(max_visits.unwrap_or(SCAN_CHUNK)),
        };
        let mut found = None;
        let mut visited = 0usize;
        self.walk_back(op, upper, reach, |k, v| {
            search_step(scope, &matches, max_visits, &mut visited, &mut found, k, v)
        })?;
        Ok(found)
    }

    /// Mirror of [`QueryCore::search_back`] walking up from `lower`.
    pub(crate) fn search_forward<P>(
        &self,
        op: &Operation<'_, K, V>,
        scope: &CallScope<K, V>,
        lower: Bound<K>,
        stop_above: Option<K>,
        max_visits: Option<usize>,
        matches: P,
    ) -> AsofResult<Option<Entry<K, V>>>
    where
        P: Fn(&V) -> bool,
    {
        let mut found = None;
        let mut visited = 0usize;
        self.walk_forward(op, lower, stop_above, SCAN_CHUNK, |k, v| {
            search_step(scope, &matches, max_visits, &mut visited, &mut found, k, v)
        })?;
        Ok(found)
    }

    /// Entry currently stored under `key`.
    pub(crate) fn stored(&self, key: &K) -> AsofResult<Option<Entry<K, V>>> {
        Ok(self.read_store()?.get(key))
    }
}

fn search_step<K, V, P>(
    scope: &CallScope<K, V>,
    matches: &P,
    max_visits: Option<usize>,
    visited: &mut usize,
    found: &mut Option<Entry<K, V>>,
    key: &K,
    value: &V,
) -> Visit
where
    K: CacheKey,
    V: Clone + 'static,
    P: Fn(&V) -> bool,
{
    if !scope.accepts(key, value) {
        return Visit::Continue;
    }
    if matches(value) {
        *found = Some(Entry::new(key.clone(), value.clone()));
        return Visit::Stop;
    }
    *visited += 1;
    if max_visits.is_some_and(|max| *visited >= max) {
        Visit::Stop
    } else {
        Visit::Continue
    }
}
