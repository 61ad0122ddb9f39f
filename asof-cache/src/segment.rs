//! Segment store: loaded entries plus the key intervals they are complete for.
//!
//! Entries live in one ordered map. Next to it the store keeps a sorted list
//! of disjoint [`Segment`]s. Inside a segment every entity the source holds
//! is present in the map, so a lookup there never needs the source. Keys
//! outside every segment are unknown territory, even when entries happen to
//! sit on both sides of them.
//!
//! A segment may start at the beginning of data (`start == None`) and the
//! last one may be an open tail (`end == None`). An open tail is only valid
//! for the horizon it was observed under, recorded in `exhausted_through`;
//! [`SegmentStore::expire_tail`] closes it once the horizon moves past that.

use std::collections::BTreeMap;
use std::ops::Bound;

use asof_core::{clamp_to_horizon, CacheKey, Entry};

/// Interval of keys known to be fully loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<K> {
    /// Inclusive lower bound; `None` is the beginning of data.
    pub start: Option<K>,
    /// Inclusive upper bound; `None` is an open tail.
    pub end: Option<K>,
}

impl<K: CacheKey> Segment<K> {
    pub fn contains(&self, key: &K) -> bool {
        self.start.as_ref().map_or(true, |start| start <= key)
            && self.end.as_ref().map_or(true, |end| key <= end)
    }

    /// Touching segments overlap: `[a, b]` and `[b, c]` share `b`.
    fn overlaps(&self, other: &Self) -> bool {
        starts_by(self.start.as_ref(), other.end.as_ref())
            && starts_by(other.start.as_ref(), self.end.as_ref())
    }

    fn union(self, other: Self) -> Self {
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Self { start, end }
    }
}

fn starts_by<K: Ord>(start: Option<&K>, end: Option<&K>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => start <= end,
        _ => true,
    }
}

fn starts_before<K: Ord>(a: Option<&K>, b: Option<&K>) -> bool {
    match (a, b) {
        (None, Some(_)) => true,
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

fn is_valid_range<K: Ord>(lower: &Bound<K>, upper: &Bound<K>) -> bool {
    match (lower, upper) {
        (Bound::Excluded(a), Bound::Excluded(b)) => a < b,
        (
            Bound::Included(a) | Bound::Excluded(a),
            Bound::Included(b) | Bound::Excluded(b),
        ) => a <= b,
        _ => true,
    }
}

/// Result of a floor lookup against loaded data only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The key is covered; the floor is known (possibly absent).
    Hit(Option<T>),
    /// The key is not covered; only the source can answer.
    Miss,
}

/// Whether a walk wants more entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visit {
    Continue,
    Stop,
}

/// Covered entries copied out of the store, and what lies past them.
///
/// Visitors run on the copies after the read lock is released, so a filter
/// may query the same cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chunk<K, V, L> {
    pub(crate) entries: Vec<(K, V)>,
    pub(crate) then: Then<K, L>,
}

/// What follows a [`Chunk`] in the scan direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Then<K, L> {
    /// More covered entries follow; scan again from this bound.
    More(Bound<K>),
    /// Nothing further exists in this direction (within the stop bound).
    Exhausted,
    /// The scan ran into unloaded territory.
    Load(L),
}

/// What a backward scan needs before it can continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BackLoad<K> {
    /// The starting key is not covered: floor lookup at it.
    At(K),
    /// The scan reached the start of its segment: extend below it.
    Below(K),
}

/// What a forward scan needs before it can continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ForwardLoad<K> {
    /// The starting key is not covered: bulk load from it.
    Uncovered(K),
    /// The scan reached the end of its segment: bulk load past it.
    After(K),
}

/// In-memory ordered entries and their coverage.
#[derive(Debug)]
pub struct SegmentStore<K, V> {
    entries: BTreeMap<K, V>,
    segments: Vec<Segment<K>>,
    exhausted_through: Option<K>,
    generation: u64,
}

impl<K, V> Default for SegmentStore<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            segments: Vec::new(),
            exhausted_through: None,
            generation: 0,
        }
    }
}

impl<K: CacheKey, V: Clone + 'static> SegmentStore<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn segments(&self) -> &[Segment<K>] {
        &self.segments
    }

    /// Lowest covered key, or the earliest entry when coverage starts at the
    /// beginning of data.
    pub fn lowest_loaded(&self) -> Option<K> {
        let first = self.segments.first()?;
        first
            .start
            .clone()
            .or_else(|| self.entries.keys().next().cloned())
    }

    /// Highest covered key, or the latest known key under an open tail.
    pub fn highest_loaded(&self) -> Option<K> {
        let last = self.segments.last()?;
        if let Some(end) = &last.end {
            return Some(end.clone());
        }
        [last.start.clone(), self.entries.keys().next_back().cloned()]
            .into_iter()
            .flatten()
            .max()
    }

    /// True while the source is known to hold nothing after the tail.
    pub fn is_fully_loaded(&self) -> bool {
        self.segments.last().is_some_and(|last| last.end.is_none())
    }

    /// Horizon under which the open tail was observed.
    pub fn exhausted_through(&self) -> Option<&K> {
        self.exhausted_through.as_ref()
    }

    /// Bumped by every [`SegmentStore::clear`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn covers(&self, key: &K) -> bool {
        self.segment_index(key).is_some()
    }

    /// Whether one segment covers both `lower` and `upper`.
    pub fn covers_between(&self, lower: &K, upper: &K) -> bool {
        match self.segment_index(lower) {
            Some(index) => self.segments[index].contains(upper),
            None => false,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<Entry<K, V>> {
        self.entries
            .get_key_value(key)
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
    }

    /// Floor of `key` when the answer is known without the source.
    pub fn lookup_floor(&self, key: &K) -> Lookup<Entry<K, V>> {
        let Some(index) = self.segment_index(key) else {
            return Lookup::Miss;
        };
        let segment = &self.segments[index];
        match self.range_descending_from(key, 1).next() {
            Some((k, v)) if segment.start.as_ref().map_or(true, |start| k >= start) => {
                Lookup::Hit(Some(Entry::new(k.clone(), v.clone())))
            }
            _ if segment.start.is_none() => Lookup::Hit(None),
            _ => Lookup::Miss,
        }
    }

    /// Loaded entries in `[from, to]`, ascending. Empty when `from > to`.
    pub fn range_ascending<'a>(
        &'a self,
        from: &'a K,
        to: &'a K,
    ) -> impl DoubleEndedIterator<Item = (&'a K, &'a V)> + 'a {
        (from <= to)
            .then(|| {
                self.entries
                    .range::<K, _>((Bound::Included(from), Bound::Included(to)))
            })
            .into_iter()
            .flatten()
    }

    /// Up to `count` loaded entries with keys `<= key`, descending.
    pub fn range_descending_from<'a>(
        &'a self,
        key: &'a K,
        count: usize,
    ) -> impl Iterator<Item = (&'a K, &'a V)> + 'a {
        self.entries
            .range::<K, _>((Bound::Unbounded, Bound::Included(key)))
            .rev()
            .take(count)
    }

    /// First loaded entry in `(lower, upper)`.
    pub fn first_in(&self, lower: &Bound<K>, upper: &Bound<K>) -> Option<Entry<K, V>> {
        if !is_valid_range(lower, upper) {
            return None;
        }
        self.entries
            .range::<K, _>((lower.as_ref(), upper.as_ref()))
            .next()
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
    }

    // ------------------------------------------------------------------------
    // Merging
    // ------------------------------------------------------------------------

    /// Merge one bulk page.
    ///
    /// `covered_from` is the lowest key the page vouches for. It is the load
    /// key itself, or the end of the segment the page continues. Coverage
    /// never extends past `horizon`. Returns true when coverage around
    /// `covered_from` grew.
    pub fn merge_page(
        &mut self,
        covered_from: K,
        entries: Vec<(K, V)>,
        exhausted: bool,
        horizon: Option<K>,
    ) -> bool {
        let before = self.segment_around(&covered_from);
        let last_key = entries.last().map(|(k, _)| k.clone());
        self.entries.extend(entries);

        if exhausted {
            self.mark_fully_loaded(covered_from.clone(), horizon);
        } else if let Some(last) = last_key {
            // Values past the horizon are kept but not vouched for.
            let end = clamp_to_horizon(last, horizon.as_ref()).max(covered_from.clone());
            self.insert_segment(Segment {
                start: Some(covered_from.clone()),
                end: Some(end),
            });
        }

        self.segment_around(&covered_from) != before
    }

    /// Merge the answer of a floor lookup.
    ///
    /// Nothing exists strictly between the floor and `through`; a `None`
    /// floor means nothing exists at or before `through`. Returns true when
    /// coverage around `through` grew.
    pub fn merge_floor(&mut self, floor: Option<(K, V)>, through: K) -> bool {
        let before = self.segment_around(&through);
        let start = floor.map(|(key, value)| {
            let start = key.clone();
            self.entries.insert(key, value);
            start
        });
        self.insert_segment(Segment {
            start,
            end: Some(through.clone()),
        });
        self.segment_around(&through) != before
    }

    /// Everything from `from` on is loaded, as observed under `horizon`.
    pub fn mark_fully_loaded(&mut self, from: K, horizon: Option<K>) {
        self.insert_segment(Segment {
            start: Some(from),
            end: None,
        });
        self.exhausted_through = horizon;
    }

    /// Whether the open tail no longer vouches for `horizon`.
    pub fn tail_is_stale(&self, horizon: Option<&K>) -> bool {
        if !self.is_fully_loaded() {
            return false;
        }
        match (&self.exhausted_through, horizon) {
            (None, _) => false,
            (Some(through), Some(horizon)) => horizon > through,
            (Some(_), None) => true,
        }
    }

    /// Close a stale open tail so the range beyond it can be loaded again.
    ///
    /// Loaded entries stay; only the coverage claim shrinks.
    pub fn expire_tail(&mut self, horizon: Option<&K>) -> bool {
        if !self.tail_is_stale(horizon) {
            return false;
        }
        let through = self.exhausted_through.take();
        if let Some(last) = self.segments.last_mut() {
            last.end = [last.start.clone(), through].into_iter().flatten().max();
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.segments.clear();
        self.exhausted_through = None;
        self.generation = self.generation.wrapping_add(1);
    }

    fn segment_index(&self, key: &K) -> Option<usize> {
        let after = self
            .segments
            .partition_point(|s| s.start.as_ref().map_or(true, |start| start <= key));
        let index = after.checked_sub(1)?;
        self.segments[index].contains(key).then_some(index)
    }

    fn segment_around(&self, key: &K) -> Option<Segment<K>> {
        self.segment_index(key).map(|i| self.segments[i].clone())
    }

    fn insert_segment(&mut self, segment: Segment<K>) {
        let mut merged = segment;
        self.segments.retain(|existing| {
            if existing.overlaps(&merged) {
                merged = merged.clone().union(existing.clone());
                false
            } else {
                true
            }
        });
        let position = self
            .segments
            .partition_point(|s| starts_before(s.start.as_ref(), merged.start.as_ref()));
        self.segments.insert(position, merged);
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    /// Copy up to `max` covered entries below `upper`, descending.
    ///
    /// Keys below `stop_below` count as the end of data. With `max == 0`
    /// nothing is copied and the scan skips straight to the segment start.
    pub(crate) fn scan_back(
        &self,
        upper: &Bound<K>,
        stop_below: Option<&K>,
        max: usize,
    ) -> Chunk<K, V, BackLoad<K>> {
        let (point, inclusive) = match upper {
            Bound::Included(key) => (key, true),
            Bound::Excluded(key) => (key, false),
            Bound::Unbounded => return Chunk::done(Vec::new()),
        };
        let Some(index) = self.segment_index(point) else {
            return Chunk::load(Vec::new(), BackLoad::At(point.clone()));
        };
        let segment = &self.segments[index];

        let mut entries = Vec::new();
        let empty = !inclusive && segment.start.as_ref().is_some_and(|start| start >= point);
        if !empty && max > 0 {
            let lower = segment.start.as_ref().map_or(Bound::Unbounded, Bound::Included);
            let upper = if inclusive {
                Bound::Included(point)
            } else {
                Bound::Excluded(point)
            };
            for (key, value) in self.entries.range::<K, _>((lower, upper)).rev() {
                if stop_below.is_some_and(|stop| key < stop) {
                    return Chunk::done(entries);
                }
                if entries.len() == max {
                    return Chunk::more_after(entries);
                }
                entries.push((key.clone(), value.clone()));
            }
        }

        match &segment.start {
            None => Chunk::done(entries),
            Some(start) if stop_below.is_some_and(|stop| start <= stop) => Chunk::done(entries),
            Some(start) => Chunk::load(entries, BackLoad::Below(start.clone())),
        }
    }

    /// Copy up to `max` covered entries above `lower`, ascending, up to
    /// `stop_above` (inclusive).
    ///
    /// With `max == 0` nothing is copied and the scan skips straight to the
    /// segment end.
    pub(crate) fn scan_forward(
        &self,
        lower: &Bound<K>,
        stop_above: Option<&K>,
        max: usize,
    ) -> Chunk<K, V, ForwardLoad<K>> {
        let (point, inclusive) = match lower {
            Bound::Included(key) => (key, true),
            Bound::Excluded(key) => (key, false),
            Bound::Unbounded => return Chunk::done(Vec::new()),
        };
        let past_stop = stop_above.is_some_and(|stop| {
            if inclusive {
                point > stop
            } else {
                point >= stop
            }
        });
        if past_stop {
            return Chunk::done(Vec::new());
        }
        let Some(index) = self.segment_index(point) else {
            return Chunk::load(Vec::new(), ForwardLoad::Uncovered(point.clone()));
        };
        let segment = &self.segments[index];

        let (upper, continue_after) = match (&segment.end, stop_above) {
            (Some(end), Some(stop)) if stop <= end => (Bound::Included(stop), None),
            (Some(end), _) => (Bound::Included(end), Some(end)),
            (None, Some(stop)) => (Bound::Included(stop), None),
            (None, None) => (Bound::Unbounded, None),
        };
        let lower = if inclusive {
            Bound::Included(point)
        } else {
            Bound::Excluded(point)
        };
        let mut entries = Vec::new();
        if max > 0 {
            for (key, value) in self.entries.range::<K, _>((lower, upper)) {
                if entries.len() == max {
                    return Chunk::more_after(entries);
                }
                entries.push((key.clone(), value.clone()));
            }
        }

        match continue_after {
            Some(end) => Chunk::load(entries, ForwardLoad::After(end.clone())),
            None => Chunk::done(entries),
        }
    }
}

impl<K: Clone, V, L> Chunk<K, V, L> {
    fn done(entries: Vec<(K, V)>) -> Self {
        Self {
            entries,
            then: Then::Exhausted,
        }
    }

    fn load(entries: Vec<(K, V)>, load: L) -> Self {
        Self {
            entries,
            then: Then::Load(load),
        }
    }

    /// A full chunk; the next scan resumes past its last entry.
    fn more_after(entries: Vec<(K, V)>) -> Self {
        let then = match entries.last() {
            Some((key, _)) => Then::More(Bound::Excluded(key.clone())),
            None => Then::Exhausted,
        };
        Self { entries, then }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(entries: &[i64], from: i64, exhausted: bool) -> SegmentStore<i64, String> {
        let mut store = SegmentStore::new();
        store.merge_page(
            from,
            entries.iter().map(|k| (*k, format!("v{k}"))).collect(),
            exhausted,
            None,
        );
        store
    }

    fn keys<L>(chunk: &Chunk<i64, String, L>) -> Vec<i64> {
        chunk.entries.iter().map(|(k, _)| *k).collect()
    }

    // ========================================================================
    // Coverage
    // ========================================================================

    #[test]
    fn test_empty_store_misses_everything() {
        let store: SegmentStore<i64, String> = SegmentStore::new();
        assert_eq!(store.lookup_floor(&5), Lookup::Miss);
        assert!(!store.is_fully_loaded());
        assert_eq!(store.lowest_loaded(), None);
        assert_eq!(store.highest_loaded(), None);
    }

    #[test]
    fn test_page_covers_from_load_key_to_last_entry() {
        let store = store_with(&[10, 20, 30], 5, false);

        assert!(store.covers(&5));
        assert!(store.covers(&30));
        assert!(!store.covers(&4));
        assert!(!store.covers(&31));
        assert_eq!(store.lowest_loaded(), Some(5));
        assert_eq!(store.highest_loaded(), Some(30));
    }

    #[test]
    fn test_floor_below_first_entry_is_a_miss_without_beginning() {
        let store = store_with(&[10, 20], 5, false);
        assert_eq!(store.lookup_floor(&7), Lookup::Miss);
        assert_eq!(
            store.lookup_floor(&25),
            Lookup::Hit(Some(Entry::new(20, "v20".to_string())))
        );
    }

    #[test]
    fn test_floor_merge_marks_beginning_of_data() {
        let mut store = store_with(&[10, 20], 10, false);
        assert!(store.merge_floor(None, 10));

        assert_eq!(store.lookup_floor(&3), Lookup::Hit(None));
        assert_eq!(store.segments().len(), 1);
        assert_eq!(store.segments()[0].start, None);
        assert_eq!(store.lowest_loaded(), Some(10));
    }

    #[test]
    fn test_touching_segments_merge() {
        let mut store = store_with(&[10, 20], 10, false);
        store.merge_page(20, vec![(30, "v30".to_string())], false, None);
        assert_eq!(store.segments().len(), 1);
        assert_eq!(
            store.segments()[0],
            Segment {
                start: Some(10),
                end: Some(30)
            }
        );
    }

    #[test]
    fn test_disjoint_segments_stay_apart() {
        let mut store = store_with(&[10, 20], 10, false);
        store.merge_floor(Some((50, "v50".to_string())), 60);

        assert_eq!(store.segments().len(), 2);
        assert!(!store.covers(&40));
        assert!(store.covers(&55));
        assert_eq!(store.segments()[0].start, Some(10));
        assert_eq!(store.segments()[1].start, Some(50));
    }

    #[test]
    fn test_bridging_segment_absorbs_neighbours() {
        let mut store = store_with(&[10, 20], 10, false);
        store.merge_floor(Some((50, "v50".to_string())), 60);
        store.merge_page(20, vec![(30, "v30".to_string()), (50, "v50".to_string())], false, None);

        assert_eq!(
            store.segments(),
            &[Segment {
                start: Some(10),
                end: Some(60)
            }]
        );
    }

    #[test]
    fn test_repeat_merge_reports_no_progress() {
        let mut store = store_with(&[10, 20], 10, false);
        let again = vec![(10, "v10".to_string()), (20, "v20".to_string())];
        assert!(!store.merge_page(10, again, false, None));
        assert_eq!(store.len(), 2);
    }

    // ========================================================================
    // Open tail
    // ========================================================================

    #[test]
    fn test_exhausted_page_opens_tail() {
        let store = store_with(&[10, 20], 10, true);
        assert!(store.is_fully_loaded());
        assert!(store.covers(&1_000));
        assert_eq!(store.highest_loaded(), Some(20));
    }

    #[test]
    fn test_tail_expires_when_horizon_moves_past_it() {
        let mut store = SegmentStore::new();
        store.merge_page(10, vec![(10, "v10".to_string())], true, Some(15));

        assert!(!store.tail_is_stale(Some(&15)));
        assert!(!store.expire_tail(Some(&12)));
        assert!(store.expire_tail(Some(&40)));

        assert!(!store.is_fully_loaded());
        assert!(store.covers(&15));
        assert!(!store.covers(&16));
        assert_eq!(store.get(&10).map(Entry::into_value), Some("v10".to_string()));
    }

    #[test]
    fn test_partial_page_coverage_stops_at_horizon() {
        let mut store = SegmentStore::new();
        let page = vec![(10, "v10".to_string()), (20, "v20".to_string())];
        assert!(store.merge_page(10, page, false, Some(15)));

        assert!(store.covers(&15));
        assert!(!store.covers(&16));
        assert!(store.contains_key(&20));
        assert_eq!(store.highest_loaded(), Some(15));
    }

    #[test]
    fn test_expired_tail_ends_at_observed_horizon() {
        let mut store = SegmentStore::new();
        let page = vec![(10, "v10".to_string()), (30, "v30".to_string())];
        store.merge_page(10, page, true, Some(15));

        assert!(store.expire_tail(Some(&40)));
        assert_eq!(store.segments().last().and_then(|s| s.end), Some(15));
        assert!(!store.covers(&30));
    }

    #[test]
    fn test_tail_without_horizon_never_expires() {
        let mut store = store_with(&[10], 10, true);
        assert!(!store.expire_tail(Some(&1_000)));
        assert!(store.is_fully_loaded());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut store = store_with(&[10, 20], 10, true);
        store.clear();
        assert!(store.is_empty());
        assert!(store.segments().is_empty());
        assert!(!store.is_fully_loaded());
        assert_eq!(store.lookup_floor(&20), Lookup::Miss);
    }

    // ========================================================================
    // Scans
    // ========================================================================

    #[test]
    fn test_scan_back_reports_uncovered_start() {
        let store = store_with(&[10, 20], 10, false);
        let chunk = store.scan_back(&Bound::Included(40), None, 8);
        assert!(chunk.entries.is_empty());
        assert_eq!(chunk.then, Then::Load(BackLoad::At(40)));
    }

    #[test]
    fn test_scan_back_reaches_segment_start() {
        let store = store_with(&[10, 20, 30], 5, false);
        let chunk = store.scan_back(&Bound::Included(25), None, 8);
        assert_eq!(keys(&chunk), vec![20, 10]);
        assert_eq!(chunk.then, Then::Load(BackLoad::Below(5)));
    }

    #[test]
    fn test_scan_back_excluded_segment_start_is_empty() {
        let store = store_with(&[10, 20], 10, false);
        let chunk = store.scan_back(&Bound::Excluded(10), None, 8);
        assert!(chunk.entries.is_empty());
        assert_eq!(chunk.then, Then::Load(BackLoad::Below(10)));
    }

    #[test]
    fn test_scan_back_honours_stop_bound() {
        let mut store = store_with(&[10, 20, 30], 10, false);
        store.merge_floor(None, 10);
        let chunk = store.scan_back(&Bound::Included(30), Some(&15), 8);
        assert_eq!(keys(&chunk), vec![30, 20]);
        assert_eq!(chunk.then, Then::Exhausted);
    }

    #[test]
    fn test_scan_back_full_chunk_resumes_below_last_entry() {
        let store = store_with(&[10, 20, 30], 10, false);
        let chunk = store.scan_back(&Bound::Included(30), None, 2);
        assert_eq!(keys(&chunk), vec![30, 20]);
        assert_eq!(chunk.then, Then::More(Bound::Excluded(20)));

        let rest = store.scan_back(&Bound::Excluded(20), None, 2);
        assert_eq!(keys(&rest), vec![10]);
        assert_eq!(rest.then, Then::Load(BackLoad::Below(10)));
    }

    #[test]
    fn test_scan_forward_requests_next_page_at_segment_end() {
        let store = store_with(&[10, 20], 10, false);
        let chunk = store.scan_forward(&Bound::Included(10), None, 8);
        assert_eq!(keys(&chunk), vec![10, 20]);
        assert_eq!(chunk.then, Then::Load(ForwardLoad::After(20)));
    }

    #[test]
    fn test_scan_forward_stops_at_bound_inside_segment() {
        let store = store_with(&[10, 20, 30], 10, false);
        let chunk = store.scan_forward(&Bound::Excluded(10), Some(&20), 8);
        assert_eq!(keys(&chunk), vec![20]);
        assert_eq!(chunk.then, Then::Exhausted);
    }

    #[test]
    fn test_scan_forward_open_tail_is_exhausted() {
        let store = store_with(&[10, 20], 10, true);
        let chunk = store.scan_forward(&Bound::Included(15), None, 8);
        assert_eq!(keys(&chunk), vec![20]);
        assert_eq!(chunk.then, Then::Exhausted);
    }

    #[test]
    fn test_scan_forward_uncovered() {
        let store = store_with(&[10, 20], 10, false);
        let chunk = store.scan_forward(&Bound::Included(50), None, 8);
        assert_eq!(chunk.then, Then::Load(ForwardLoad::Uncovered(50)));
    }

    #[test]
    fn test_scan_forward_without_copies_skips_to_segment_end() {
        let store = store_with(&[10, 20, 30], 10, false);
        let chunk = store.scan_forward(&Bound::Included(10), None, 0);
        assert!(chunk.entries.is_empty());
        assert_eq!(chunk.then, Then::Load(ForwardLoad::After(30)));
    }

    #[test]
    fn test_ranges_over_loaded_entries() {
        let store = store_with(&[10, 20, 30, 40], 10, false);
        let ascending: Vec<i64> = store.range_ascending(&15, &35).map(|(k, _)| *k).collect();
        assert_eq!(ascending, vec![20, 30]);
        assert_eq!(store.range_ascending(&35, &15).count(), 0);

        let descending: Vec<i64> = store.range_descending_from(&30, 2).map(|(k, _)| *k).collect();
        assert_eq!(descending, vec![30, 20]);
    }

    #[test]
    fn test_first_in_respects_bounds() {
        let store = store_with(&[10, 20, 30], 10, false);
        let found = store.first_in(&Bound::Excluded(10), &Bound::Included(30));
        assert_eq!(found.map(Entry::into_key), Some(20));
        assert!(store.first_in(&Bound::Excluded(30), &Bound::Excluded(30)).is_none());
    }

    #[test]
    fn test_covers_between_needs_one_segment() {
        let mut store = store_with(&[1, 2, 3], 1, false);
        store.merge_page(10, vec![(10, "v10".to_string())], false, None);
        assert!(store.covers_between(&1, &3));
        assert!(!store.covers_between(&3, &10));
        assert!(!store.covers_between(&0, &3));
    }

    #[test]
    fn test_clear_bumps_generation() {
        let mut store = store_with(&[10], 10, false);
        let before = store.generation();
        store.clear();
        assert_eq!(store.generation(), before + 1);
    }
}
