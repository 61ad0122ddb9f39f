//! Keys and entries.

use std::fmt::Debug;

/// A totally ordered, immutable, timestamp-like key.
///
/// Blanket-implemented for every type that satisfies the bounds, so
/// `chrono::DateTime<Utc>`, integers and tuples all work out of the box.
pub trait CacheKey: Ord + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Ord + Clone + Debug + Send + Sync + 'static {}

/// A `(key, value)` pair surfaced by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_key(self) -> K {
        self.key
    }

    pub fn into_value(self) -> V {
        self.value
    }

    /// Split into the underlying pair.
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K, V> From<(K, V)> for Entry<K, V> {
    fn from((key, value): (K, V)) -> Self {
        Self { key, value }
    }
}

/// Render a key for error messages and log fields.
pub fn describe_key<K: Debug>(key: &K) -> String {
    format!("{:?}", key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_accessors() {
        let entry = Entry::new(3u32, "three");
        assert_eq!(entry.key(), &3);
        assert_eq!(entry.value(), &"three");
        assert_eq!(entry.clone().into_parts(), (3, "three"));
        assert_eq!(Entry::from((3u32, "three")), entry);
    }

    #[test]
    fn test_describe_key_uses_debug() {
        assert_eq!(describe_key(&42i64), "42");
        assert_eq!(describe_key(&"a"), "\"a\"");
    }
}
