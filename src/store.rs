use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::time::Instant;
use tracing::debug;

/// Victim selection used once the store is over capacity.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least recently accessed entry.
    Lru,
    /// Evict the oldest inserted entry.
    Fifo,
}

/// Bounds for a [`CacheStore`].
///
/// `max_entries = 0` disables size-based eviction; `ttl = None` disables
/// expiry.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub max_entries: usize,
    pub ttl: Option<Duration>,
    pub eviction: EvictionPolicy,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_entries: 0,
            ttl: None,
            eviction: EvictionPolicy::Lru,
        }
    }
}

struct Entry<T> {
    value: T,
    stored_at: Instant,
    /// Monotonic stamp ordering entries for eviction: refreshed on access
    /// under LRU, fixed at insertion under FIFO.
    stamp: u64,
}

/// Keyed in-memory store for fetched values.
///
/// Owned by whoever composes it (not module-global state) and shared by
/// being embedded in shared application state. The interior mutex makes the
/// store itself thread-safe; callers never see it.
pub struct CacheStore<T> {
    policy: CachePolicy,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    entries: HashMap<String, Entry<T>>,
    tick: u64,
}

impl<T: Clone> CacheStore<T> {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Look up the value for `key`.
    ///
    /// A TTL-expired entry is removed here and reported as a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(ttl) = self.policy.ttl
            && inner
                .entries
                .get(key)
                .is_some_and(|entry| entry.stored_at.elapsed() >= ttl)
        {
            inner.entries.remove(key);
            debug!(key, "Expired cache entry");
            return None;
        }

        let tick = inner.tick;
        let lru = self.policy.eviction == EvictionPolicy::Lru;
        let entry = inner.entries.get_mut(key)?;
        if lru {
            entry.stamp = tick;
        }
        let value = entry.value.clone();
        inner.tick += 1;
        Some(value)
    }

    /// Store `value` under `key`, evicting stamp-minimal entries while over
    /// capacity.
    pub fn insert(&self, key: &str, value: T) {
        let mut inner = self.inner.lock().unwrap();
        let stamp = inner.tick;
        inner.tick += 1;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
                stamp,
            },
        );

        if self.policy.max_entries == 0 {
            return;
        }
        while inner.entries.len() > self.policy.max_entries {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.stamp)
                .map(|(key, _)| key.clone());
            match victim {
                Some(victim) => {
                    inner.entries.remove(&victim);
                    debug!(key = %victim, "Evicted cache entry");
                }
                None => break,
            }
        }
    }

    /// Whether an unexpired entry exists for `key`, without refreshing its
    /// access stamp.
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(key).is_some_and(|entry| {
            self.policy
                .ttl
                .is_none_or(|ttl| entry.stored_at.elapsed() < ttl)
        })
    }

    /// Remove the entry for `key`, reporting whether one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            debug!(key, "Invalidated cache entry");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
