//! Query-scoped cache of task collections.
//!
//! Maps a [`QueryKey`] to the last snapshot installed for it. Snapshots are
//! swapped whole, so readers always see a complete collection. Merge logic
//! lives in [`crate::Reconciler`]; this layer only stores and replaces.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{Collection, QueryKey};

/// Broadcast channel capacity for cache updates.
const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// Update event for cache subscribers.
#[derive(Debug, Clone)]
pub enum CacheUpdate {
    /// A new snapshot was installed for a query.
    Replaced {
        key: QueryKey,
        snapshot: Arc<Collection>,
    },
    /// A query's entry was dropped.
    Evicted { key: QueryKey },
}

/// Cache of query results.
///
/// Shared by handle (`Arc<QueryCacheStore>`); every component that needs it
/// receives it at construction.
pub struct QueryCacheStore {
    entries: DashMap<QueryKey, Arc<Collection>>,
    updates_tx: broadcast::Sender<CacheUpdate>,
}

impl QueryCacheStore {
    /// Create a new empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.updates_tx.subscribe()
    }

    fn broadcast(&self, update: CacheUpdate) {
        if self.updates_tx.send(update).is_err() {
            trace!("no subscribers for cache update");
        }
    }

    /// Current snapshot for a query, or `None` if it was never populated.
    pub fn read(&self, key: &QueryKey) -> Option<Arc<Collection>> {
        self.entries.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Whether the query has an entry.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Install a snapshot, replacing whatever was there.
    pub fn write(&self, key: QueryKey, collection: Collection) -> Arc<Collection> {
        let snapshot = Arc::new(collection);
        self.entries.insert(key.clone(), Arc::clone(&snapshot));
        trace!(query = %key, tasks = snapshot.len(), "cache: snapshot written");
        self.broadcast(CacheUpdate::Replaced {
            key,
            snapshot: Arc::clone(&snapshot),
        });
        snapshot
    }

    /// Atomically derive a new snapshot from the current one.
    ///
    /// `f` is not called when the query has no entry. Returning `None` from
    /// `f` leaves the entry as it is. The entry stays locked while `f` runs,
    /// so `f` must not touch the store.
    pub fn replace_with<F>(&self, key: &QueryKey, f: F) -> Option<Arc<Collection>>
    where
        F: FnOnce(&Collection) -> Option<Collection>,
    {
        let snapshot = {
            let mut entry = self.entries.get_mut(key)?;
            let next = Arc::new(f(entry.value())?);
            *entry.value_mut() = Arc::clone(&next);
            next
        };

        trace!(query = %key, tasks = snapshot.len(), "cache: snapshot replaced");
        self.broadcast(CacheUpdate::Replaced {
            key: key.clone(),
            snapshot: Arc::clone(&snapshot),
        });
        Some(snapshot)
    }

    /// Drop a query's entry.
    pub fn evict(&self, key: &QueryKey) -> bool {
        if self.entries.remove(key).is_some() {
            trace!(query = %key, "cache: entry evicted");
            self.broadcast(CacheUpdate::Evicted { key: key.clone() });
            return true;
        }
        false
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let keys: Vec<QueryKey> = self.entries.iter().map(|r| r.key().clone()).collect();
        for key in keys {
            self.evict(&key);
        }
    }

    /// Number of cached queries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryCacheStore {
    fn default() -> Self {
        let (updates_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            updates_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Task;
    use serde_json::json;

    fn tasks(ids: &[&str]) -> Collection {
        Collection::from_tasks(ids.iter().map(|id| Task::new(*id, format!("task {}", id), "")))
    }

    #[test]
    fn test_read_absent() {
        let store = QueryCacheStore::new();
        assert!(store.read(&QueryKey::all_tasks()).is_none());
        assert!(!store.contains(&QueryKey::all_tasks()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_write_then_read() {
        let store = QueryCacheStore::new();
        let key = QueryKey::all_tasks();
        store.write(key.clone(), tasks(&["1", "2"]));

        let snapshot = store.read(&key).unwrap();
        assert_eq!(snapshot.ids(), vec!["1".into(), "2".into()]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_write_replaces_wholesale() {
        let store = QueryCacheStore::new();
        let key = QueryKey::all_tasks();
        store.write(key.clone(), tasks(&["1", "2", "tmp-9"]));
        store.write(key.clone(), tasks(&["1", "2"]));

        assert_eq!(store.read(&key).unwrap().len(), 2);
    }

    #[test]
    fn test_old_snapshot_survives_replacement() {
        let store = QueryCacheStore::new();
        let key = QueryKey::all_tasks();
        store.write(key.clone(), tasks(&["1"]));
        let held = store.read(&key).unwrap();

        store.write(key.clone(), tasks(&["1", "2"]));

        assert_eq!(held.len(), 1);
        assert_eq!(store.read(&key).unwrap().len(), 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let store = QueryCacheStore::new();
        let other = QueryKey::new("GetTasks", &json!({"owner": "me"}));
        store.write(QueryKey::all_tasks(), tasks(&["1"]));

        assert!(store.read(&other).is_none());
    }

    #[test]
    fn test_replace_with_skips_absent_entry() {
        let store = QueryCacheStore::new();
        let mut called = false;
        let result = store.replace_with(&QueryKey::all_tasks(), |_| {
            called = true;
            Some(Collection::new())
        });
        assert!(result.is_none());
        assert!(!called);
        assert!(store.read(&QueryKey::all_tasks()).is_none());
    }

    #[test]
    fn test_replace_with_none_keeps_entry() {
        let store = QueryCacheStore::new();
        let key = QueryKey::all_tasks();
        let before = store.write(key.clone(), tasks(&["1"]));

        assert!(store.replace_with(&key, |_| None).is_none());
        assert!(Arc::ptr_eq(&before, &store.read(&key).unwrap()));
    }

    #[test]
    fn test_evict_and_clear() {
        let store = QueryCacheStore::new();
        let key = QueryKey::all_tasks();
        store.write(key.clone(), tasks(&["1"]));
        store.write(QueryKey::new("GetTasks", &json!({"page": 2})), tasks(&["3"]));

        assert!(store.evict(&key));
        assert!(!store.evict(&key));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_subscribe_updates() {
        let store = QueryCacheStore::new();
        let mut rx = store.subscribe();
        let key = QueryKey::all_tasks();

        store.write(key.clone(), tasks(&["1"]));
        store.evict(&key);

        match rx.try_recv().unwrap() {
            CacheUpdate::Replaced { key: k, snapshot } => {
                assert_eq!(k, key);
                assert_eq!(snapshot.len(), 1);
            }
            other => panic!("Expected Replaced, got {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), CacheUpdate::Evicted { .. }));
    }

    #[test]
    fn test_concurrent_replace_with_is_atomic() {
        use std::thread;

        let store = QueryCacheStore::new();
        let key = QueryKey::all_tasks();
        store.write(key.clone(), Collection::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let key = key.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        let task = Task::new(format!("{}_{}", i, j), "t", "");
                        store.replace_with(&key, |current| {
                            let mut next = current.to_vec();
                            next.push(task);
                            Some(Collection::from_tasks(next))
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // No lost updates: every append landed.
        assert_eq!(store.read(&key).unwrap().len(), 400);
    }
}
