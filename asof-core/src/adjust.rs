//! Horizon tracking.
//!
//! An [`AdjustKeyProvider`] knows the highest key the source vouches for.
//! Every lookup key is clamped to it before the cache looks at its store, so
//! a query "as of" a time the source has not reached yet still returns the
//! best known entry instead of failing or guessing.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::AsofResult;
use crate::key::CacheKey;

/// Clamps lookup keys to the known horizon.
pub trait AdjustKeyProvider<K: CacheKey>: Send + Sync {
    /// Current upper bound of queryable time, `None` when unbounded.
    fn highest_allowed_key(&self) -> AsofResult<Option<K>>;

    /// Whether repeated pulls inside one logical operation are wanted.
    ///
    /// Non-recursive providers are sampled once per query call.
    fn is_recursive(&self) -> bool {
        false
    }

    /// `min(key, highest_allowed_key())`, or `key` when no horizon is set.
    fn adjust_key(&self, key: K) -> AsofResult<K> {
        Ok(clamp_to_horizon(key, self.highest_allowed_key()?.as_ref()))
    }
}

/// `min(key, horizon)` with `None` meaning no horizon.
pub fn clamp_to_horizon<K: CacheKey>(key: K, horizon: Option<&K>) -> K {
    match horizon {
        Some(highest) if *highest < key => highest.clone(),
        _ => key,
    }
}

/// Provider without a horizon; keys pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdjustKeyProvider;

impl<K: CacheKey> AdjustKeyProvider<K> for NoAdjustKeyProvider {
    fn highest_allowed_key(&self) -> AsofResult<Option<K>> {
        Ok(None)
    }

    fn adjust_key(&self, key: K) -> AsofResult<K> {
        Ok(key)
    }
}

type HorizonGetter<K> = dyn Fn() -> AsofResult<Option<K>> + Send + Sync;

/// Recomputes the horizon on every access through a collaborator getter.
pub struct PullingAdjustKeyProvider<K> {
    getter: Arc<HorizonGetter<K>>,
    recursive: bool,
}

impl<K: CacheKey> PullingAdjustKeyProvider<K> {
    /// Pull from `getter`, the source's horizon hook.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> AsofResult<Option<K>> + Send + Sync + 'static,
    {
        Self {
            getter: Arc::new(getter),
            recursive: false,
        }
    }

    /// Allow repeated pulls within one logical operation.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

impl<K: CacheKey> AdjustKeyProvider<K> for PullingAdjustKeyProvider<K> {
    fn highest_allowed_key(&self) -> AsofResult<Option<K>> {
        (self.getter)()
    }

    fn is_recursive(&self) -> bool {
        self.recursive
    }
}

impl<K> std::fmt::Debug for PullingAdjustKeyProvider<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullingAdjustKeyProvider")
            .field("recursive", &self.recursive)
            .finish_non_exhaustive()
    }
}

/// Horizon set once at construction, then only advanced explicitly.
///
/// The horizon never decreases: pushing a key that is not after the current
/// one is a no-op.
#[derive(Debug)]
pub struct PushingAdjustKeyProvider<K> {
    highest: RwLock<Option<K>>,
}

impl<K: CacheKey> PushingAdjustKeyProvider<K> {
    /// Start from an explicit initial horizon.
    pub fn new(initial: Option<K>) -> Self {
        Self {
            highest: RwLock::new(initial),
        }
    }

    /// Start from the source's initial horizon hook.
    pub fn from_initial<F>(initial: F) -> AsofResult<Self>
    where
        F: FnOnce() -> AsofResult<Option<K>>,
    {
        Ok(Self::new(initial()?))
    }

    /// Advance the horizon. Returns true when it moved.
    pub fn push_highest_allowed_key(&self, key: K) -> bool {
        let mut highest = self.highest.write().unwrap_or_else(PoisonError::into_inner);
        match highest.as_ref() {
            Some(current) if key <= *current => false,
            _ => {
                tracing::info!(horizon = ?key, "Pushed highest allowed key");
                *highest = Some(key);
                true
            }
        }
    }

    /// Current horizon without going through the trait.
    pub fn current(&self) -> Option<K> {
        self.highest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<K: CacheKey> AdjustKeyProvider<K> for PushingAdjustKeyProvider<K> {
    fn highest_allowed_key(&self) -> AsofResult<Option<K>> {
        Ok(self.current())
    }
}

impl<K: CacheKey, P: AdjustKeyProvider<K> + ?Sized> AdjustKeyProvider<K> for Arc<P> {
    fn highest_allowed_key(&self) -> AsofResult<Option<K>> {
        (**self).highest_allowed_key()
    }

    fn is_recursive(&self) -> bool {
        (**self).is_recursive()
    }

    fn adjust_key(&self, key: K) -> AsofResult<K> {
        (**self).adjust_key(key)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AsofError, SourceError};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[test]
    fn test_no_adjust_passes_keys_through() {
        let provider = NoAdjustKeyProvider;
        assert_eq!(provider.adjust_key(42i64).unwrap(), 42);
        assert_eq!(
            AdjustKeyProvider::<i64>::highest_allowed_key(&provider).unwrap(),
            None
        );
    }

    #[test]
    fn test_pushing_clamps_to_horizon() {
        let provider = PushingAdjustKeyProvider::new(Some(10i64));
        assert_eq!(provider.adjust_key(5).unwrap(), 5);
        assert_eq!(provider.adjust_key(10).unwrap(), 10);
        assert_eq!(provider.adjust_key(11).unwrap(), 10);
    }

    #[test]
    fn test_pushing_never_decreases() {
        let provider = PushingAdjustKeyProvider::new(Some(10i64));
        assert!(!provider.push_highest_allowed_key(9));
        assert!(!provider.push_highest_allowed_key(10));
        assert_eq!(provider.current(), Some(10));
        assert!(provider.push_highest_allowed_key(12));
        assert_eq!(provider.current(), Some(12));
    }

    #[test]
    fn test_pushing_unset_accepts_any_first_push() {
        let provider = PushingAdjustKeyProvider::<i64>::new(None);
        assert_eq!(provider.adjust_key(100).unwrap(), 100);
        assert!(provider.push_highest_allowed_key(-5));
        assert_eq!(provider.adjust_key(100).unwrap(), -5);
    }

    #[test]
    fn test_pushing_from_initial_hook_propagates_errors() {
        let result = PushingAdjustKeyProvider::<i64>::from_initial(|| {
            Err(SourceError::load_failed("initial_highest_allowed_key", "offline").into())
        });
        assert!(matches!(result, Err(AsofError::Source(_))));

        let provider = PushingAdjustKeyProvider::from_initial(|| Ok(Some(3i64))).unwrap();
        assert_eq!(provider.current(), Some(3));
    }

    #[test]
    fn test_pulling_invokes_getter_every_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let horizon = Arc::new(AtomicI64::new(5));
        let provider = {
            let calls = Arc::clone(&calls);
            let horizon = Arc::clone(&horizon);
            PullingAdjustKeyProvider::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(horizon.load(Ordering::SeqCst)))
            })
        };

        assert_eq!(provider.adjust_key(8).unwrap(), 5);
        horizon.store(7, Ordering::SeqCst);
        assert_eq!(provider.adjust_key(8).unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!provider.is_recursive());
        assert!(provider.recursive(true).is_recursive());
    }

    #[test]
    fn test_clamp_to_horizon() {
        assert_eq!(clamp_to_horizon(3, Some(&5)), 3);
        assert_eq!(clamp_to_horizon(7, Some(&5)), 5);
        assert_eq!(clamp_to_horizon(7, None), 7);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: a pushing horizon never decreases, whatever order keys arrive in.
        #[test]
        fn prop_pushing_horizon_is_monotonic(
            initial in proptest::option::of(-1_000i64..1_000),
            pushes in proptest::collection::vec(-1_000i64..1_000, 0..50)
        ) {
            let provider = PushingAdjustKeyProvider::new(initial);
            let mut previous = initial;
            for key in pushes {
                let moved = provider.push_highest_allowed_key(key);
                let current = provider.current();
                prop_assert!(current >= previous);
                prop_assert_eq!(moved, current != previous);
                previous = current;
            }
        }

        /// Property: adjust_key(k) = min(k, horizon).
        #[test]
        fn prop_adjust_key_is_min(horizon in -100i64..100, key in -200i64..200) {
            let provider = PushingAdjustKeyProvider::new(Some(horizon));
            prop_assert_eq!(provider.adjust_key(key).unwrap(), key.min(horizon));
        }
    }
}
