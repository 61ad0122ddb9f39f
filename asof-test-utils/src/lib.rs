//! asof Test Utilities
//!
//! Centralized test infrastructure for the asof workspace:
//! - Fixture sources with call counters, page truncation and failure injection
//! - The canonical yearly fixture (`E0..E5`, 1990 through 1995)
//! - Proptest generators for histories and query keys
//! - Custom assertions for asof results
//! - Tracing bootstrap for tests

pub use asof_core::{
    AdjustKeyProvider, AsofError, AsofResult, CacheConfig, CacheKey, ConfigError, Entry,
    HistorySource, NoAdjustKeyProvider, PullingAdjustKeyProvider, PushingAdjustKeyProvider,
    QueryError, SourceError, SourcePage,
};

use std::sync::Once;

// ============================================================================
// FIXTURE SOURCES
// ============================================================================

pub mod sources {
    //! In-memory [`HistorySource`] implementations that record how they are
    //! used.

    use super::*;
    use std::collections::BTreeMap;
    use std::fmt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{PoisonError, RwLock};

    /// A fixture entity.
    ///
    /// Records compare by label only, the way a price series compares
    /// observations by price: two records at different keys are "the same
    /// value" when their labels match.
    #[derive(Debug, Clone)]
    pub struct Record<K> {
        pub key: K,
        pub label: String,
    }

    impl<K> Record<K> {
        pub fn new(key: K, label: impl Into<String>) -> Self {
            Self {
                key,
                label: label.into(),
            }
        }
    }

    impl<K> PartialEq for Record<K> {
        fn eq(&self, other: &Self) -> bool {
            self.label == other.label
        }
    }

    type Step<K> = Box<dyn Fn(&K) -> K + Send + Sync>;

    /// Sorted in-memory history.
    pub struct FixtureSource<K> {
        records: RwLock<BTreeMap<K, Record<K>>>,
        previous: Step<K>,
        next: Step<K>,
        max_results: Option<usize>,
        failing: AtomicBool,
        bulk_calls: AtomicUsize,
        latest_calls: AtomicUsize,
    }

    impl<K: fmt::Debug> fmt::Debug for FixtureSource<K> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("FixtureSource")
                .field("max_results", &self.max_results)
                .field("bulk_calls", &self.bulk_calls)
                .field("latest_calls", &self.latest_calls)
                .finish_non_exhaustive()
        }
    }

    impl<K: CacheKey> FixtureSource<K> {
        pub fn new<P, N>(
            records: impl IntoIterator<Item = Record<K>>,
            previous: P,
            next: N,
        ) -> Self
        where
            P: Fn(&K) -> K + Send + Sync + 'static,
            N: Fn(&K) -> K + Send + Sync + 'static,
        {
            Self {
                records: RwLock::new(
                    records
                        .into_iter()
                        .map(|record| (record.key.clone(), record))
                        .collect(),
                ),
                previous: Box::new(previous),
                next: Box::new(next),
                max_results: None,
                failing: AtomicBool::new(false),
                bulk_calls: AtomicUsize::new(0),
                latest_calls: AtomicUsize::new(0),
            }
        }

        /// Truncate every bulk page to `max` values.
        pub fn with_max_results(mut self, max: usize) -> Self {
            self.max_results = Some(max);
            self
        }

        /// Add a record, as a live feed would.
        pub fn append(&self, record: Record<K>) {
            self.records
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(record.key.clone(), record);
        }

        /// Make every following call fail until switched off again.
        pub fn fail_loads(&self, failing: bool) {
            tracing::debug!(failing, "Fixture failure injection toggled");
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn bulk_calls(&self) -> usize {
            self.bulk_calls.load(Ordering::SeqCst)
        }

        pub fn latest_calls(&self) -> usize {
            self.latest_calls.load(Ordering::SeqCst)
        }

        pub fn total_calls(&self) -> usize {
            self.bulk_calls() + self.latest_calls()
        }

        pub fn reset_counters(&self) {
            self.bulk_calls.store(0, Ordering::SeqCst);
            self.latest_calls.store(0, Ordering::SeqCst);
        }

        pub fn keys(&self) -> Vec<K> {
            self.records
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect()
        }

        fn check_failure(&self, operation: &str) -> AsofResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                tracing::debug!(operation, "Fixture load failing on request");
                Err(SourceError::load_failed(operation, "injected failure").into())
            } else {
                Ok(())
            }
        }
    }

    impl<K: CacheKey> HistorySource<K, Record<K>> for FixtureSource<K> {
        fn read_all_values_ascending_from(&self, key: &K) -> AsofResult<SourcePage<Record<K>>> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure("read_all_values_ascending_from")?;

            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            let mut values: Vec<Record<K>> = records
                .range(key.clone()..)
                .map(|(_, record)| record.clone())
                .collect();

            let page = match self.max_results {
                Some(max) if values.len() > max => {
                    values.truncate(max);
                    SourcePage::partial(values)
                }
                _ => SourcePage::complete(values),
            };
            tracing::trace!(
                from = ?key,
                returned = page.len(),
                exhausted = page.is_exhausted(),
                "Fixture bulk load"
            );
            Ok(page)
        }

        fn read_latest_value_for(&self, key: &K) -> AsofResult<Option<Record<K>>> {
            self.latest_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure("read_latest_value_for")?;

            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            let found = records
                .range(..=key.clone())
                .next_back()
                .map(|(_, record)| record.clone());
            tracing::trace!(
                at = ?key,
                found = ?found.as_ref().map(|record| &record.key),
                "Fixture floor lookup"
            );
            Ok(found)
        }

        fn extract_key(&self, value: &Record<K>) -> K {
            value.key.clone()
        }

        fn calculate_previous_key(&self, key: &K) -> K {
            (self.previous)(key)
        }

        fn calculate_next_key(&self, key: &K) -> K {
            (self.next)(key)
        }
    }

    /// Integer-keyed source with unit steps; record `k` is labelled `v{k}`.
    pub fn integer_source(keys: impl IntoIterator<Item = i64>) -> FixtureSource<i64> {
        labelled_integer_source(keys.into_iter().map(|k| (k, format!("v{k}"))))
    }

    /// Integer-keyed source with explicit labels.
    pub fn labelled_integer_source<L: Into<String>>(
        records: impl IntoIterator<Item = (i64, L)>,
    ) -> FixtureSource<i64> {
        FixtureSource::new(
            records.into_iter().map(|(k, label)| Record::new(k, label)),
            |k| k - 1,
            |k| k + 1,
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! The canonical yearly history.

    use super::sources::{FixtureSource, Record};
    use chrono::{DateTime, Months, NaiveDate, TimeDelta, Utc};

    /// Midnight UTC on the given date.
    pub fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .expect("fixture dates are valid calendar dates")
    }

    /// Key of entity `E{index}`: January 1st of 1990 + index.
    pub fn entity_key(index: i32) -> DateTime<Utc> {
        date(1990 + index, 1, 1)
    }

    /// Record `E{index}` at its yearly key.
    pub fn entity(index: i32) -> Record<DateTime<Utc>> {
        Record::new(entity_key(index), format!("E{index}"))
    }

    /// `E0..E5`.
    pub fn yearly_records() -> Vec<Record<DateTime<Utc>>> {
        (0..6).map(entity).collect()
    }

    /// Previous key = key - 1 day, next key = key + 1 year.
    pub fn yearly_source() -> FixtureSource<DateTime<Utc>> {
        FixtureSource::new(
            yearly_records(),
            |k: &DateTime<Utc>| *k - TimeDelta::days(1),
            |k: &DateTime<Utc>| k.checked_add_months(Months::new(12)).unwrap_or(*k),
        )
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for histories and lookups.

    use proptest::prelude::*;

    /// Sorted, duplicate-free integer keys.
    pub fn arb_history(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
        proptest::collection::btree_set(-500i64..500, 0..max_len)
            .prop_map(|keys| keys.into_iter().collect())
    }

    /// Query keys reaching a little past either end of [`arb_history`].
    pub fn arb_key() -> impl Strategy<Value = i64> {
        -550i64..550
    }

    /// Page size for truncating sources; `None` means untruncated.
    pub fn arb_page_size() -> impl Strategy<Value = Option<usize>> {
        prop_oneof![Just(None), (1usize..6).prop_map(Some)]
    }

    /// Batch sizes for shifted and batch lookups.
    pub fn arb_count() -> impl Strategy<Value = usize> {
        0usize..8
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for asof results.

    use super::*;

    /// Assert that an AsofResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &AsofResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that an AsofResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &AsofResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that an AsofResult is a Source error.
    #[track_caller]
    pub fn assert_source_error<T: std::fmt::Debug>(result: &AsofResult<T>) {
        match result {
            Err(AsofError::Source(_)) => {}
            other => panic!("Expected Source error, got: {:?}", other),
        }
    }

    /// Assert that an AsofResult is FutureNotEnabled.
    #[track_caller]
    pub fn assert_future_not_enabled<T: std::fmt::Debug>(result: &AsofResult<T>) {
        match result {
            Err(AsofError::Query(QueryError::FutureNotEnabled { .. })) => {}
            other => panic!("Expected FutureNotEnabled error, got: {:?}", other),
        }
    }

    /// Assert that an AsofResult is KeyMismatch.
    #[track_caller]
    pub fn assert_key_mismatch<T: std::fmt::Debug>(result: &AsofResult<T>) {
        match result {
            Err(AsofError::Query(QueryError::KeyMismatch { .. })) => {}
            other => panic!("Expected KeyMismatch error, got: {:?}", other),
        }
    }

    /// Assert that an AsofResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &AsofResult<T>) {
        match result {
            Err(AsofError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to `asof_cache=debug`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("asof_cache=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::sources::*;
    use super::*;

    #[test]
    fn test_yearly_fixture_layout() {
        let source = yearly_source();
        assert_eq!(source.keys().len(), 6);
        assert_eq!(source.keys()[0], date(1990, 1, 1));
        assert_eq!(source.calculate_previous_key(&entity_key(2)), date(1991, 12, 31));
        assert_eq!(source.calculate_next_key(&entity_key(2)), entity_key(3));
    }

    #[test]
    fn test_truncated_pages_are_partial() {
        let source = yearly_source().with_max_results(2);
        let page = source.read_all_values_ascending_from(&entity_key(1)).unwrap();
        assert_eq!(page.len(), 2);
        assert!(!page.is_exhausted());

        let tail = source.read_all_values_ascending_from(&entity_key(4)).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail.is_exhausted());
        assert_eq!(source.bulk_calls(), 2);
    }

    #[test]
    fn test_latest_value_is_floor() {
        let source = yearly_source();
        let found = source.read_latest_value_for(&date(1992, 6, 1)).unwrap();
        assert_eq!(found.map(|r| r.label), Some("E2".to_string()));
        assert!(source.read_latest_value_for(&date(1980, 1, 1)).unwrap().is_none());
        assert_eq!(source.latest_calls(), 2);
    }

    #[test]
    fn test_failure_injection() {
        let source = integer_source([1, 2, 3]);
        source.fail_loads(true);
        assertions::assert_source_error(&source.read_latest_value_for(&2));
        source.fail_loads(false);
        assertions::assert_ok(&source.read_latest_value_for(&2));
    }

    #[test]
    fn test_fixture_loads_run_under_a_subscriber() {
        init_tracing();
        let source = integer_source([1, 2, 3]).with_max_results(2);
        let page = source.read_all_values_ascending_from(&1).unwrap();
        assert_eq!(page.len(), 2);
        source.fail_loads(true);
        assertions::assert_source_error(&source.read_all_values_ascending_from(&1));
        assert_eq!(source.bulk_calls(), 2);
    }

    #[test]
    fn test_records_compare_by_label() {
        assert_eq!(Record::new(1, "a"), Record::new(2, "a"));
        assert_ne!(Record::new(1, "a"), Record::new(1, "b"));
    }
}
