use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// A process-scoped expiring map.
///
/// Reads take a shared lock; batched fetches take the exclusive lock and
/// populate under it, so concurrent reconciles issue one cloud round-trip
/// per cold key set instead of one per reconcile. Never a package-level
/// singleton: owners construct one and thread it through.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(inserted, _)| inserted.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    /// Returns cached values and the keys that need fetching.
    pub async fn collect(&self, keys: impl IntoIterator<Item = K>) -> (Vec<(K, V)>, Vec<K>) {
        let entries = self.entries.read().await;
        let mut hits = Vec::new();
        let mut misses = Vec::new();
        for key in keys {
            match entries.get(&key) {
                Some((inserted, value)) if inserted.elapsed() < self.ttl => {
                    hits.push((key, value.clone()));
                }
                _ => misses.push(key),
            }
        }
        (hits, misses)
    }

    /// Fetches the missing keys under the exclusive lock and populates the
    /// cache with the results.
    pub async fn populate<E, Fut>(
        &self,
        misses: Vec<K>,
        fetch: impl FnOnce(Vec<K>) -> Fut,
    ) -> Result<Vec<(K, V)>, E>
    where
        Fut: std::future::Future<Output = Result<Vec<(K, V)>, E>>,
    {
        if misses.is_empty() {
            return Ok(Vec::new());
        }
        let mut entries = self.entries.write().await;
        let fetched = fetch(misses).await?;
        let now = Instant::now();
        for (key, value) in &fetched {
            entries.insert(key.clone(), (now, value.clone()));
        }
        Ok(fetched)
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .await
            .insert(key, (Instant::now(), value));
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::TtlCache;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("arn:1".to_string(), "tags".to_string()).await;
        assert_eq!(cache.get(&"arn:1".to_string()).await.as_deref(), Some("tags"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&"arn:1".to_string()).await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_the_entry() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("arn:1".to_string(), 1u32).await;
        cache.invalidate(&"arn:1".to_string()).await;
        assert_eq!(cache.get(&"arn:1".to_string()).await, None);
    }

    #[tokio::test]
    async fn collect_splits_hits_and_misses() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("hot".to_string(), 1u32).await;
        let (hits, misses) = cache
            .collect(["hot".to_string(), "cold".to_string()])
            .await;
        assert_eq!(hits, vec![("hot".to_string(), 1)]);
        assert_eq!(misses, vec!["cold".to_string()]);
    }
}
