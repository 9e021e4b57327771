//! In-memory TTL cache of serialized read results.

use std::collections::HashMap;
use std::time::Duration;

use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Results keyed by [`cache_key`]. A zero TTL turns every operation into a
/// no-op, so a miss and a disabled cache look the same to callers.
#[derive(Debug)]
pub struct Cache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

/// Deterministic key over the operation kind, device and location.
pub fn cache_key(kind: &str, device: &str, location: &[u32]) -> String {
    if location.is_empty() {
        format!("{kind}:{device}")
    } else {
        format!("{kind}:{device}:{}", location.iter().join(":"))
    }
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|e| e.expires_at > Instant::now())?;
        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "cached value has the wrong shape");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: String, value: &T) {
        if !self.is_enabled() {
            return;
        }
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "result not cacheable");
                return;
            }
        };
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .write()
            .await
            .insert(key, Entry { value, expires_at });
    }

    /// Drops expired entries, returning how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmptySlot;

    #[test]
    fn test_key_layout() {
        assert_eq!(cache_key("system", "10.0.0.1", &[]), "system:10.0.0.1");
        assert_eq!(
            cache_key("onu_detail", "10.0.0.1", &[1, 3, 17]),
            "onu_detail:10.0.0.1:1:3:17"
        );
        assert_ne!(
            cache_key("onu_list", "10.0.0.1", &[1, 3]),
            cache_key("onu_empty", "10.0.0.1", &[1, 3])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = Cache::new(Duration::from_secs(60));
        let slots = vec![EmptySlot {
            board: 1,
            pon: 1,
            onu_id: 2,
        }];
        cache.put("k".to_string(), &slots).await;
        assert_eq!(cache.get::<Vec<EmptySlot>>("k").await, Some(slots));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get::<Vec<EmptySlot>>("k").await, None);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables() {
        let cache = Cache::new(Duration::ZERO);
        cache.put("k".to_string(), &42u32).await;
        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_a_miss() {
        let cache = Cache::new(Duration::from_secs(5));
        cache.put("k".to_string(), &"text").await;
        assert_eq!(cache.get::<u32>("k").await, None);
    }
}
