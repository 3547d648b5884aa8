use dashmap::DashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Concurrent TTL map. Expired entries are dropped when read.
pub struct DeclarativeCache<V> {
    entries: DashMap<String, (V, Instant)>,
    default_ttl: Duration,
}

impl<V: Clone> Default for DeclarativeCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V: Clone> DeclarativeCache<V> {
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let expiry = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.entries.insert(key.to_string(), (value, expiry));
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, (_, expiry)| *expiry <= now);
        }
        None
    }

    /// Removes every key starting with `prefix`, ignoring ASCII case.
    pub fn evict_by_prefix(&self, prefix: &str) -> usize {
        let prefix = prefix.to_ascii_lowercase();
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !key.to_ascii_lowercase().starts_with(&prefix));
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
