//! Tool Cache: bounded LRU of active server bindings.
//!
//! A single `std::sync::Mutex` protects the ordered map. Connection release
//! happens *outside* the lock: the doomed binding is staged, the lock is
//! dropped, then `Connection::close` is awaited, so a slow close never blocks
//! other cache operations.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::ports::ActiveBinding;

/// Bounded, ordered mapping from handle to active binding with LRU eviction
///.
pub struct ToolCache {
    capacity: usize,
    inner: Mutex<LruCache<String, ActiveBinding>>,
}

impl ToolCache {
    /// `capacity` is `max_cache_size`. `lru::LruCache` requires a
    /// non-zero capacity, so `capacity == 0` is modeled separately: `insert`
    /// hands the binding straight back as "evicted" without ever storing it, so
    /// `size(cache) <= max_cache_size` (P1) holds even at `max_cache_size = 0`.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { capacity, inner: Mutex::new(LruCache::new(cap)) }
    }

    /// Returns whether `h` is present. Does not affect MRU order: membership
    /// checks are not uses. Does not clone the binding (bindings are not
    /// `Clone`); callers needing the tools should use [`ToolCache::with_tools`].
    pub fn contains(&self, handle: &str) -> bool {
        let guard = self.inner.lock().unwrap();
        guard.peek(handle).is_some()
    }

    /// Runs `f` with the binding's tools if present. Does not affect MRU
    /// order: reading a binding's tool list for toolset assembly is not a
    /// use of that binding. Only [`ToolCache::touch`] promotes to MRU.
    pub fn with_tools<R>(&self, handle: &str, f: impl FnOnce(&ActiveBinding) -> R) -> Option<R> {
        let guard = self.inner.lock().unwrap();
        guard.peek(handle).map(f)
    }

    /// Inserts (or replaces) a binding, evicting the LRU entry first if at capacity
    ///. Returns the binding that was evicted, if any, so the
    /// caller can close its connection *after* releasing the lock.
    pub fn insert(&self, handle: String, binding: ActiveBinding) -> Option<ActiveBinding> {
        if self.capacity == 0 {
            return Some(binding);
        }
        let mut guard = self.inner.lock().unwrap();
        let evicted = if guard.contains(&handle) {
            guard.pop(&handle)
        } else if guard.len() >= guard.cap().get() {
            guard.pop_lru().map(|(_, b)| b)
        } else {
            None
        };
        guard.put(handle, binding);
        evicted
    }

    /// Moves `h` to MRU if present; no-op otherwise.
    pub fn touch(&self, handle: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.promote(handle);
    }

    /// Removes `h` if present, returning its binding for the caller to close
    ///.
    pub fn evict(&self, handle: &str) -> Option<ActiveBinding> {
        let mut guard = self.inner.lock().unwrap();
        guard.pop(handle)
    }

    /// MRU-first list of handles, for observability.
    pub fn contents(&self) -> Vec<String> {
        let guard = self.inner.lock().unwrap();
        guard.iter().map(|(h, _)| h.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every binding, clearing the map.
    /// Callers close each connection after calling this.
    pub fn drain_all(&self) -> Vec<ActiveBinding> {
        let mut guard = self.inner.lock().unwrap();
        let drained: Vec<ActiveBinding> = std::mem::take(&mut *guard)
            .into_iter()
            .map(|(_, b)| b)
            .collect();
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::ports::Connection;

    struct CountingConnection {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for CountingConnection {
        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn binding(handle: &str, closes: Arc<AtomicUsize>) -> ActiveBinding {
        ActiveBinding {
            handle: handle.to_string(),
            connection: Arc::new(CountingConnection { closes }),
            tools: vec![],
        }
    }

    #[test]
    fn insert_then_get_and_touch_preserve_mru_order() {
        let cache = ToolCache::new(3);
        let closes = Arc::new(AtomicUsize::new(0));
        cache.insert("a".into(), binding("a", closes.clone()));
        cache.insert("b".into(), binding("b", closes.clone()));
        cache.insert("c".into(), binding("c", closes.clone()));
        assert_eq!(cache.contents(), vec!["c", "b", "a"]);

        cache.touch("a");
        assert_eq!(cache.contents(), vec!["a", "c", "b"]);
    }

    #[test]
    fn touch_on_missing_handle_is_noop() {
        let cache = ToolCache::new(2);
        cache.touch("nope");
        assert!(cache.contents().is_empty());
    }

    #[test]
    fn insert_past_capacity_evicts_lru_and_returns_it_for_closing() {
        let cache = ToolCache::new(2);
        let closes = Arc::new(AtomicUsize::new(0));
        cache.insert("a".into(), binding("a", closes.clone()));
        cache.insert("b".into(), binding("b", closes.clone()));
        // Touch a so b is LRU.
        cache.touch("a");
        let evicted = cache.insert("c".into(), binding("c", closes.clone()));
        assert_eq!(evicted.unwrap().handle, "b");
        assert_eq!(cache.contents(), vec!["c", "a"]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evict_removes_entry_and_returns_binding_once() {
        let cache = ToolCache::new(2);
        let closes = Arc::new(AtomicUsize::new(0));
        cache.insert("a".into(), binding("a", closes.clone()));
        let evicted = cache.evict("a");
        assert!(evicted.is_some());
        assert!(cache.evict("a").is_none());
        assert!(cache.contents().is_empty());
    }

    #[tokio::test]
    async fn eviction_releases_connection_exactly_once() {
        let cache = ToolCache::new(1);
        let closes = Arc::new(AtomicUsize::new(0));
        cache.insert("a".into(), binding("a", closes.clone()));
        let evicted = cache.insert("b".into(), binding("b", closes.clone()));
        if let Some(stale) = evicted {
            stale.connection.close().await;
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_all_empties_cache() {
        let cache = ToolCache::new(2);
        let closes = Arc::new(AtomicUsize::new(0));
        cache.insert("a".into(), binding("a", closes.clone()));
        cache.insert("b".into(), binding("b", closes.clone()));
        let drained = cache.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_never_retains_inserted_binding() {
        let cache = ToolCache::new(0);
        let closes = Arc::new(AtomicUsize::new(0));
        let evicted = cache.insert("a".into(), binding("a", closes));
        assert!(evicted.is_some());
        assert!(cache.is_empty());
        assert!(cache.contents().is_empty());
    }

    #[test]
    fn contains_and_with_tools_do_not_disturb_mru_order() {
        let cache = ToolCache::new(3);
        let closes = Arc::new(AtomicUsize::new(0));
        cache.insert("a".into(), binding("a", closes.clone()));
        cache.insert("b".into(), binding("b", closes.clone()));
        assert_eq!(cache.contents(), vec!["b", "a"]);

        // Reading membership/tools for the LRU entry must not promote it:
        // toolset assembly iterates every cached handle every turn and must
        // not itself count as a use.
        assert!(cache.contains("a"));
        let tool_count = cache.with_tools("a", |b| b.tools.len());
        assert_eq!(tool_count, Some(0));
        assert_eq!(cache.contents(), vec!["b", "a"]);

        cache.touch("a");
        assert_eq!(cache.contents(), vec!["a", "b"]);
    }

    #[test]
    fn replacing_existing_handle_keeps_size_and_moves_to_mru() {
        let cache = ToolCache::new(2);
        let closes = Arc::new(AtomicUsize::new(0));
        cache.insert("a".into(), binding("a", closes.clone()));
        cache.insert("b".into(), binding("b", closes.clone()));
        let evicted = cache.insert("a".into(), binding("a", closes.clone()));
        assert!(evicted.is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.contents(), vec!["a", "b"]);
    }
}
