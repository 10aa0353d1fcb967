//! Bounded LRU cache of verified B-tree nodes.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::trace;

use crate::error::{Error, Result};

/// Cache key for node `node` of the tree identified by `tree_id`.
pub fn cache_key(tree_id: u32, node: u32) -> u64 {
    (tree_id as u64) << 32 | node as u64
}

/// Node bytes keyed by [`cache_key`]. A capacity of 0 disables caching.
#[derive(Debug)]
pub struct NodeCache {
    cache: Option<LruCache<u64, Arc<[u8]>>>,
    hits: u64,
    misses: u64,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        NodeCache {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a node, marking it most recently used.
    pub fn get(&mut self, key: u64) -> Option<Arc<[u8]>> {
        let found = self.cache.as_mut().and_then(|c| c.get(&key)).cloned();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        trace!(key, hit = found.is_some(), "node cache lookup");
        found
    }

    /// Store a copy of `bytes`, replacing any previous entry for `key` and
    /// evicting the least recently used entry when full.
    pub fn set(&mut self, key: u64, bytes: &[u8]) -> Result<()> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(());
        };

        let mut owned = Vec::new();
        owned
            .try_reserve_exact(bytes.len())
            .map_err(|_| Error::OutOfMemory(bytes.len()))?;
        owned.extend_from_slice(bytes);

        if let Some((evicted, _)) = cache.push(key, Arc::from(owned)) {
            if evicted != key {
                trace!(evicted, "node cache eviction");
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: u64) -> Option<Arc<[u8]>> {
        self.cache.as_mut().and_then(|c| c.pop(&key))
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.cap().get())
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_tree_scoped() {
        assert_ne!(cache_key(3, 1), cache_key(4, 1));
        assert_eq!(cache_key(1, 2), 0x1_0000_0002);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let mut cache = NodeCache::new(2);
        cache.set(1, b"one").unwrap();
        cache.set(2, b"two").unwrap();

        // Touch 1 so that 2 becomes the eviction candidate.
        assert_eq!(cache.get(1).as_deref(), Some(&b"one"[..]));
        cache.set(3, b"three").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
        assert_eq!(cache.hits(), 3);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn set_replaces_existing_entries() {
        let mut cache = NodeCache::new(4);
        cache.set(7, b"old").unwrap();
        cache.set(7, b"new").unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(7).as_deref(), Some(&b"new"[..]));

        assert!(cache.remove(7).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut cache = NodeCache::new(0);
        cache.set(1, b"data").unwrap();
        assert!(cache.get(1).is_none());
        assert_eq!(cache.capacity(), 0);
        assert_eq!(cache.len(), 0);
    }
}
