use std::time::Duration;

use serde::Deserialize;

use crate::store::{CachePolicy, EvictionPolicy};

/// Upstream catalog endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub products_url: String,
}

/// Cache sizing and expiry settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached entries; 0 disables size-based eviction
    #[serde(default)]
    pub max_entries: usize,
    /// Seconds an entry stays servable; omit for no expiry
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default = "default_eviction")]
    pub eviction: EvictionPolicy,
}

fn default_eviction() -> EvictionPolicy {
    EvictionPolicy::Lru
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 0,
            ttl_secs: None,
            eviction: default_eviction(),
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            max_entries: self.max_entries,
            ttl: self.ttl_secs.map(Duration::from_secs),
            eviction: self.eviction,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct ShopWindowConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_listen_addr() -> String {
    "localhost:3000".to_string()
}
