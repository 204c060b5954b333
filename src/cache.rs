use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// TTL cache for public tracking snapshots.
///
/// The public AWB endpoint is rate-limited but still the hottest read in
/// the system; a short TTL keeps it off the store without letting staleness
/// exceed the poll cadence.
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, (DateTime<Utc>, Value)>>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let (stored_at, value) = entries.get(key)?;
        (Utc::now().signed_duration_since(*stored_at) < self.ttl).then(|| value.clone())
    }

    pub async fn put(&self, key: String, value: Value) {
        let mut entries = self.entries.write().await;
        // Opportunistic pruning keeps the map bounded by the live AWB set.
        let now = Utc::now();
        entries.retain(|_, (stored_at, _)| now.signed_duration_since(*stored_at) < self.ttl);
        entries.insert(key, (now, value));
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn caches_within_ttl() {
        let cache = SnapshotCache::new(60);
        cache.put("125-12345678".into(), json!({"status": "BOOKED"})).await;
        assert_eq!(
            cache.get("125-12345678").await,
            Some(json!({"status": "BOOKED"}))
        );
        assert_eq!(cache.get("999-00000000").await, None);
    }

    #[tokio::test]
    async fn zero_ttl_never_serves() {
        let cache = SnapshotCache::new(0);
        cache.put("125-12345678".into(), json!({})).await;
        assert_eq!(cache.get("125-12345678").await, None);
    }
}
