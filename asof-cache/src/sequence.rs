//! Lazy, restartable results of batch queries.
//!
//! A [`Sequence`] is a descriptor, not a buffer: bounds over the shared store,
//! the filter that was in force for the call, and how many times to repeat
//! the boundary entry. Every call to [`Sequence::iter`] starts a fresh pass
//! and fetches entries one step at a time, so nothing is materialized unless
//! the consumer collects.

use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use asof_core::{AsofResult, CacheKey, Entry, QueryError};

use crate::filter::{accepts, EntryFilter};
use crate::segment::SegmentStore;

/// Re-runs the load behind a sequence after the store was cleared.
pub(crate) type Reload = Arc<dyn Fn() -> AsofResult<()> + Send + Sync>;

/// Sequence of keys.
pub type KeySequence<K, V> = Sequence<K, V, K>;
/// Sequence of values.
pub type ValueSequence<K, V> = Sequence<K, V, V>;
/// Sequence of entries.
pub type EntrySequence<K, V> = Sequence<K, V, Entry<K, V>>;

/// Lazy view over a run of cached entries.
pub struct Sequence<K, V, T> {
    store: Arc<RwLock<SegmentStore<K, V>>>,
    lower: Bound<K>,
    upper: Bound<K>,
    filter: Option<EntryFilter<K, V>>,
    pad_front: usize,
    pad_back: usize,
    expected_len: Option<usize>,
    reload: Option<Reload>,
    generation: Arc<AtomicU64>,
    project: fn(Entry<K, V>) -> T,
}

impl<K: CacheKey, V, T> Clone for Sequence<K, V, T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lower: self.lower.clone(),
            upper: self.upper.clone(),
            filter: self.filter.clone(),
            pad_front: self.pad_front,
            pad_back: self.pad_back,
            expected_len: self.expected_len,
            reload: self.reload.clone(),
            generation: Arc::clone(&self.generation),
            project: self.project,
        }
    }
}

impl<K: CacheKey, V, T> fmt::Debug for Sequence<K, V, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .field("filtered", &self.filter.is_some())
            .field("pad_front", &self.pad_front)
            .field("pad_back", &self.pad_back)
            .field("reloads", &self.reload.is_some())
            .finish_non_exhaustive()
    }
}

impl<K: CacheKey, V: Clone + 'static> Sequence<K, V, Entry<K, V>> {
    pub(crate) fn entries(
        store: Arc<RwLock<SegmentStore<K, V>>>,
        lower: Bound<K>,
        upper: Bound<K>,
        filter: Option<EntryFilter<K, V>>,
    ) -> Self {
        let generation = store.read().map(|store| store.generation()).unwrap_or_default();
        Self {
            store,
            lower,
            upper,
            filter,
            pad_front: 0,
            pad_back: 0,
            expected_len: None,
            reload: None,
            generation: Arc::new(AtomicU64::new(generation)),
            project: std::convert::identity,
        }
    }

    /// A sequence that yields nothing.
    pub(crate) fn empty(store: Arc<RwLock<SegmentStore<K, V>>>) -> Self {
        let mut sequence = Self::entries(store, Bound::Unbounded, Bound::Unbounded, None);
        sequence.expected_len = Some(0);
        sequence
    }

    /// Change what each step yields.
    pub fn map<U>(self, project: fn(Entry<K, V>) -> U) -> Sequence<K, V, U> {
        Sequence {
            store: self.store,
            lower: self.lower,
            upper: self.upper,
            filter: self.filter,
            pad_front: self.pad_front,
            pad_back: self.pad_back,
            expected_len: self.expected_len,
            reload: self.reload,
            generation: self.generation,
            project,
        }
    }
}

impl<K: CacheKey, V: Clone + 'static, T> Sequence<K, V, T> {
    /// Repeat the first entry `count` extra times.
    pub(crate) fn padded_front(mut self, count: usize) -> Self {
        self.pad_front = count;
        self
    }

    /// Repeat the last entry `count` extra times.
    pub(crate) fn padded_back(mut self, count: usize) -> Self {
        self.pad_back = count;
        self
    }

    /// Load the run again with `reload` when the store was cleared.
    pub(crate) fn reloading(mut self, reload: Reload) -> Self {
        self.reload = Some(reload);
        self
    }

    /// Record the length the producing walk observed.
    pub(crate) fn with_expected_len(mut self, len: usize) -> Self {
        self.expected_len = Some(len);
        self
    }

    /// Length observed when the sequence was produced.
    ///
    /// `None` for plain ranges, whose length is only known by iterating.
    pub fn expected_len(&self) -> Option<usize> {
        self.expected_len
    }

    /// Start a fresh pass.
    ///
    /// A reload that fails mid-pass is logged and ends the pass; use
    /// [`Sequence::try_iter`] to see the error.
    pub fn iter(&self) -> SequenceIter<K, V, T> {
        SequenceIter {
            store: Arc::clone(&self.store),
            reload: self.reload.clone(),
            generation: Arc::clone(&self.generation),
            cursor: self.lower.clone(),
            upper: self.upper.clone(),
            filter: self.filter.clone(),
            pad_front: self.pad_front,
            pad_back: self.pad_back,
            started: false,
            range_done: self.expected_len == Some(0),
            repeat: None,
            repeat_count: 0,
            last: None,
            project: self.project,
        }
    }

    /// Start a fresh pass, reloading first if the store was cleared.
    pub fn try_iter(&self) -> AsofResult<SequenceIter<K, V, T>> {
        sync(&self.store, self.reload.as_ref(), &self.generation)?;
        Ok(self.iter())
    }
}

/// Re-run `reload` when the store generation moved past `seen`.
fn sync<K: CacheKey, V: Clone + 'static>(
    store: &RwLock<SegmentStore<K, V>>,
    reload: Option<&Reload>,
    seen: &AtomicU64,
) -> AsofResult<()> {
    let current = store.read().map_err(|_| QueryError::LockPoisoned)?.generation();
    if current == seen.load(Ordering::Acquire) {
        return Ok(());
    }
    if let Some(reload) = reload {
        reload()?;
        tracing::debug!(generation = current, "Reloaded sequence after clear");
    }
    seen.store(current, Ordering::Release);
    Ok(())
}

impl<K: CacheKey, V: Clone + 'static, T> IntoIterator for Sequence<K, V, T> {
    type Item = T;
    type IntoIter = SequenceIter<K, V, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: CacheKey, V: Clone + 'static, T> IntoIterator for &Sequence<K, V, T> {
    type Item = T;
    type IntoIter = SequenceIter<K, V, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over a [`Sequence`].
///
/// Takes the store's read lock once per step, never across steps, and runs
/// the filter with the lock released. A poisoned lock ends the pass.
pub struct SequenceIter<K, V, T> {
    store: Arc<RwLock<SegmentStore<K, V>>>,
    reload: Option<Reload>,
    generation: Arc<AtomicU64>,
    cursor: Bound<K>,
    upper: Bound<K>,
    filter: Option<EntryFilter<K, V>>,
    pad_front: usize,
    pad_back: usize,
    started: bool,
    range_done: bool,
    repeat: Option<Entry<K, V>>,
    repeat_count: usize,
    last: Option<Entry<K, V>>,
    project: fn(Entry<K, V>) -> T,
}

impl<K: CacheKey, V: Clone + 'static, T> SequenceIter<K, V, T> {
    fn fetch_next(&mut self) -> Option<Entry<K, V>> {
        if let Err(error) = sync(&self.store, self.reload.as_ref(), &self.generation) {
            tracing::warn!(%error, "Sequence reload failed, ending pass");
            return None;
        }
        loop {
            let entry = self.store.read().ok()?.first_in(&self.cursor, &self.upper)?;
            self.cursor = Bound::Excluded(entry.key.clone());
            if accepts(self.filter.as_ref(), &entry.key, &entry.value) {
                return Some(entry);
            }
        }
    }

    fn advance(&mut self) -> Option<Entry<K, V>> {
        if self.repeat_count > 0 {
            if let Some(entry) = &self.repeat {
                self.repeat_count -= 1;
                return Some(entry.clone());
            }
        }
        if self.range_done {
            return None;
        }

        match self.fetch_next() {
            Some(entry) => {
                if !self.started {
                    self.started = true;
                    // Front padding repeats the first entry, so emitting the
                    // copies right after it yields the same order.
                    if self.pad_front > 0 {
                        self.repeat = Some(entry.clone());
                        self.repeat_count = self.pad_front;
                    }
                }
                if self.pad_back > 0 {
                    self.last = Some(entry.clone());
                }
                Some(entry)
            }
            None => {
                self.range_done = true;
                if self.pad_back > 0 && self.last.is_some() {
                    self.repeat = self.last.take();
                    self.repeat_count = self.pad_back;
                    return self.advance();
                }
                None
            }
        }
    }
}

impl<K: CacheKey, V: Clone + 'static, T> Iterator for SequenceIter<K, V, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.advance().map(self.project)
    }
}
