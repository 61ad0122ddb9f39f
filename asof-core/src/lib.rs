//! asof Core - Keys, Collaborator Traits and Horizon Providers
//!
//! Shared vocabulary for the point-in-time historical cache:
//! - [`CacheKey`] / [`Entry`]: ordered keys and the pairs the cache serves
//! - [`HistorySource`]: the collaborator that actually owns the data
//! - [`AdjustKeyProvider`]: the horizon every lookup key is clamped to
//! - [`CacheConfig`] and the error hierarchy

pub mod adjust;
pub mod config;
pub mod error;
pub mod key;
pub mod source;

pub use adjust::{
    clamp_to_horizon, AdjustKeyProvider, NoAdjustKeyProvider, PullingAdjustKeyProvider,
    PushingAdjustKeyProvider,
};
pub use config::CacheConfig;
pub use error::{AsofError, AsofResult, ConfigError, QueryError, SourceError};
pub use key::{describe_key, CacheKey, Entry};
pub use source::{HistorySource, SourcePage};
