//! Short-lived cache of per-response sources.
//!
//! Each chat response stores its display sources under a random token that
//! the client later exchanges for the source texts. Entries expire after a
//! fixed TTL. Expiry is checked on every read, and a single background
//! sweeper removes entries nobody asked for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::SourceEntry;

struct CacheEntry {
    sources: Vec<SourceEntry>,
    expires_at: Instant,
}

pub struct SourcesCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SourcesCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store sources and return the token that retrieves them.
    pub fn insert(&self, sources: Vec<SourceEntry>) -> String {
        self.insert_at(sources, Instant::now())
    }

    pub fn insert_at(&self, sources: Vec<SourceEntry>, now: Instant) -> String {
        let token = Uuid::new_v4().to_string();
        self.lock().insert(
            token.clone(),
            CacheEntry {
                sources,
                expires_at: now + self.ttl,
            },
        );
        token
    }

    /// Sources for `token`, or `None` when unknown or expired.
    pub fn get(&self, token: &str) -> Option<Vec<SourceEntry>> {
        self.get_at(token, Instant::now())
    }

    pub fn get_at(&self, token: &str, now: Instant) -> Option<Vec<SourceEntry>> {
        let mut entries = self.lock();
        let expired = match entries.get(token) {
            Some(entry) if entry.expires_at > now => return Some(entry.sources.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(token);
        }
        None
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawn the periodic sweeper. The task runs until aborted.
pub fn spawn_sweeper(cache: Arc<SourcesCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = cache.sweep_at(Instant::now());
            if removed > 0 {
                tracing::debug!(removed, remaining = cache.len(), "swept expired sources");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<SourceEntry> {
        vec![SourceEntry {
            id: 1,
            text: "Skin and Soft Tissue\nCellulitis".to_string(),
        }]
    }

    #[test]
    fn test_get_before_expiry() {
        let cache = SourcesCache::new(Duration::from_secs(600));
        let now = Instant::now();
        let token = cache.insert_at(sources(), now);
        assert_eq!(
            cache.get_at(&token, now + Duration::from_secs(599)),
            Some(sources())
        );
    }

    #[test]
    fn test_unreadable_after_ttl() {
        let cache = SourcesCache::new(Duration::from_secs(600));
        let now = Instant::now();
        let token = cache.insert_at(sources(), now);
        assert!(cache
            .get_at(&token, now + Duration::from_secs(601))
            .is_none());
        // Lazily removed on that read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unknown_token() {
        let cache = SourcesCache::new(Duration::from_secs(1));
        assert!(cache.get("does-not-exist").is_none());
    }

    #[test]
    fn test_tokens_are_unique_per_insert() {
        let cache = SourcesCache::new(Duration::from_secs(60));
        let a = cache.insert(sources());
        let b = cache.insert(sources());
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = SourcesCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at(sources(), t0);
        let fresh = cache.insert_at(sources(), t0 + Duration::from_secs(8));
        assert_eq!(cache.sweep_at(t0 + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache
            .get_at(&fresh, t0 + Duration::from_secs(12))
            .is_some());
    }

    #[tokio::test]
    async fn test_sweeper_task_evicts_unread_entries() {
        let cache = Arc::new(SourcesCache::new(Duration::from_millis(10)));
        cache.insert(sources());
        let handle = spawn_sweeper(cache.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();
        assert!(cache.is_empty());
    }
}
