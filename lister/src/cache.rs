//! Directory record storage.
//!
//! Records live in a generational arena. A record is either *in use* (some
//! lister lists or holds it) or *cached* (unreferenced, kept in a bounded
//! LRU for quick re-visits). Never both.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;
use url::Url;

use crate::dir_record::DirRecord;

/// Stable reference to a record in the arena. A stale handle (its record
/// was removed, the slot reused) resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    record: Option<DirRecord>,
}

/// Slot map of directory records.
#[derive(Debug, Default)]
pub struct DirArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    len: usize,
}

impl DirArena {
    pub fn insert(&mut self, record: DirRecord) -> DirHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.generation += 1;
            slot.record = Some(record);
            return DirHandle {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            record: Some(record),
        });
        DirHandle {
            index: self.slots.len() - 1,
            generation: 0,
        }
    }

    pub fn get(&self, handle: DirHandle) -> Option<&DirRecord> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_ref())
    }

    pub fn get_mut(&mut self, handle: DirHandle) -> Option<&mut DirRecord> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_mut())
    }

    pub fn remove(&mut self, handle: DirHandle) -> Option<DirRecord> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)?;
        let record = slot.record.take()?;
        self.free.push(handle.index);
        self.len -= 1;
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// In-use table plus bounded cache over one arena.
#[derive(Debug)]
pub struct DirStore {
    arena: DirArena,
    in_use: HashMap<Url, DirHandle>,
    cached: LruCache<Url, DirHandle>,
    capacity: usize,
}

impl DirStore {
    /// A store caching at most `capacity` unreferenced records. Zero
    /// disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: DirArena::default(),
            in_use: HashMap::new(),
            cached: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            capacity,
        }
    }

    pub fn is_in_use(&self, url: &Url) -> bool {
        self.in_use.contains_key(url)
    }

    pub fn is_cached(&self, url: &Url) -> bool {
        self.cached.contains(url)
    }

    pub fn in_use_handle(&self, url: &Url) -> Option<DirHandle> {
        self.in_use.get(url).copied()
    }

    /// Register a new in-use record. Any cached record for the same URL is
    /// dropped.
    pub fn insert_in_use(&mut self, record: DirRecord) -> DirHandle {
        let url = record.url().clone();
        assert!(
            !self.in_use.contains_key(&url),
            "directory {url} is already in use"
        );
        self.remove_cached(&url);
        let handle = self.arena.insert(record);
        self.in_use.insert(url, handle);
        handle
    }

    /// Move a cached record back into use.
    pub fn promote(&mut self, url: &Url) -> Option<DirHandle> {
        let handle = self.cached.pop(url)?;
        debug!("Promoting {url} from the cache");
        self.in_use.insert(url.clone(), handle);
        Some(handle)
    }

    /// Remove an in-use record entirely.
    pub fn remove_in_use(&mut self, url: &Url) -> Option<DirRecord> {
        let handle = self.in_use.remove(url)?;
        self.arena.remove(handle)
    }

    /// Remove a cached record entirely.
    pub fn remove_cached(&mut self, url: &Url) -> Option<DirRecord> {
        let handle = self.cached.pop(url)?;
        self.arena.remove(handle)
    }

    /// Move an in-use record into the cache. Returns the records the move
    /// pushed out, already detached from the store; dropping them releases
    /// their watches.
    pub fn move_to_cache(&mut self, url: &Url) -> Vec<DirRecord> {
        let Some(handle) = self.in_use.remove(url) else {
            return Vec::new();
        };
        if self.capacity == 0 {
            return self.arena.remove(handle).into_iter().collect();
        }
        match self.cached.push(url.clone(), handle) {
            Some((evicted_url, evicted)) => {
                debug!("Evicting {evicted_url} from the cache");
                self.arena.remove(evicted).into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// The in-use or cached record for `url`. Does not touch LRU order.
    pub fn record(&self, url: &Url) -> Option<&DirRecord> {
        let handle = self
            .in_use
            .get(url)
            .copied()
            .or_else(|| self.cached.peek(url).copied())?;
        self.arena.get(handle)
    }

    pub fn record_mut(&mut self, url: &Url) -> Option<&mut DirRecord> {
        let handle = self
            .in_use
            .get(url)
            .copied()
            .or_else(|| self.cached.peek(url).copied())?;
        self.arena.get_mut(handle)
    }

    /// The record for `url` only if it is in use.
    pub fn in_use_record(&self, url: &Url) -> Option<&DirRecord> {
        self.arena.get(self.in_use_handle(url)?)
    }

    pub fn in_use_record_mut(&mut self, url: &Url) -> Option<&mut DirRecord> {
        let handle = self.in_use_handle(url)?;
        self.arena.get_mut(handle)
    }

    pub fn get(&self, handle: DirHandle) -> Option<&DirRecord> {
        self.arena.get(handle)
    }

    pub fn get_mut(&mut self, handle: DirHandle) -> Option<&mut DirRecord> {
        self.arena.get_mut(handle)
    }

    /// Re-key an in-use record. The caller updates the record itself.
    pub fn rekey_in_use(&mut self, old: &Url, new: &Url) -> bool {
        let Some(handle) = self.in_use.remove(old) else {
            return false;
        };
        self.in_use.insert(new.clone(), handle);
        true
    }

    pub fn in_use_urls(&self) -> Vec<Url> {
        let mut urls: Vec<Url> = self.in_use.keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Cached URLs, most recently used first.
    pub fn cached_urls(&self) -> Vec<Url> {
        self.cached.iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn in_use_len(&self) -> usize {
        self.in_use.len()
    }

    pub fn cached_len(&self) -> usize {
        self.cached.len()
    }

    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::WatchHub;
    use pretty_assertions::assert_eq;

    fn url(path: &str) -> Url {
        Url::parse(&format!("file://{path}")).unwrap()
    }

    fn record(path: &str) -> DirRecord {
        DirRecord::new(&url(path), WatchHub::disabled())
    }

    #[test]
    fn test_stale_handles_resolve_to_nothing() {
        let mut arena = DirArena::default();
        let a = arena.insert(record("/a"));
        assert!(arena.remove(a).is_some());
        let b = arena.insert(record("/b"));

        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b).unwrap().url(), &url("/b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_in_use_or_cached_never_both() {
        let mut store = DirStore::new(2);
        store.insert_in_use(record("/a"));
        assert!(store.is_in_use(&url("/a")));

        assert!(store.move_to_cache(&url("/a")).is_empty());
        assert!(!store.is_in_use(&url("/a")));
        assert!(store.is_cached(&url("/a")));

        store.promote(&url("/a")).unwrap();
        assert!(store.is_in_use(&url("/a")));
        assert!(!store.is_cached(&url("/a")));
    }

    #[test]
    fn test_eviction_detaches_least_recent() {
        let mut store = DirStore::new(2);
        for path in ["/a", "/b", "/c"] {
            store.insert_in_use(record(path));
        }
        assert!(store.move_to_cache(&url("/a")).is_empty());
        assert!(store.move_to_cache(&url("/b")).is_empty());

        let evicted = store.move_to_cache(&url("/c"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].url(), &url("/a"));
        assert_eq!(store.cached_urls(), vec![url("/c"), url("/b")]);
        assert_eq!(store.arena_len(), 2);
    }

    #[test]
    fn test_zero_capacity_drops_immediately() {
        let mut store = DirStore::new(0);
        store.insert_in_use(record("/a"));
        assert_eq!(store.move_to_cache(&url("/a")).len(), 1);
        assert_eq!(store.cached_len(), 0);
        assert_eq!(store.arena_len(), 0);
    }

    #[test]
    fn test_rekey() {
        let mut store = DirStore::new(2);
        let handle = store.insert_in_use(record("/a"));
        assert!(store.rekey_in_use(&url("/a"), &url("/b")));
        assert_eq!(store.in_use_handle(&url("/b")), Some(handle));
        assert!(store.record(&url("/a")).is_none());
    }
}
