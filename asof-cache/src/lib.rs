//! asof Cache - Point-in-Time Historical Cache
//!
//! Serves "value as of key K" lookups over an ordered history held by a
//! [`HistorySource`](asof_core::HistorySource), loading from it lazily:
//!
//! - point lookups on an unloaded key cost one single-entity floor lookup
//! - range and forward walks load in ascending pages
//! - backward walks extend coverage one predecessor at a time
//!
//! Every key is clamped to the horizon supplied by an
//! [`AdjustKeyProvider`](asof_core::AdjustKeyProvider) before anything else
//! happens, so the cache never answers past what the source vouches for.
//!
//! # Modules
//!
//! - [`cache`]: the [`HistoricalCache`] facade
//! - [`query`]: [`Query`] and [`FutureQuery`], where all lookups live
//! - [`segment`]: loaded entries and their coverage
//! - [`sequence`]: lazy batch results
//! - [`filter`]: entry filters and scoped filter guards

pub mod cache;
mod engine;
pub mod filter;
pub mod query;
pub mod segment;
pub mod sequence;
pub mod stats;

pub use cache::HistoricalCache;
pub use filter::{EntryFilter, ScopedFilterGuard, ScopedFilterSlot};
pub use query::{AssertValue, FutureQuery, Query, QuerySettings};
pub use segment::{Lookup, Segment, SegmentStore};
pub use sequence::{EntrySequence, KeySequence, Sequence, SequenceIter, ValueSequence};
pub use stats::CacheStats;

pub use asof_core::{
    AdjustKeyProvider, AsofError, AsofResult, CacheConfig, CacheKey, Entry, HistorySource,
    NoAdjustKeyProvider, PullingAdjustKeyProvider, PushingAdjustKeyProvider, QueryError,
    SourceError, SourcePage,
};
