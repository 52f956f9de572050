//! Key reversal: the tree only ever sees key digests, so the ledger keeps a
//! bounded map from digest back to the original key bytes.

use crate::digest::Hash;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Default number of remembered keys (about 512 KiB of 128-bit entries).
pub const DEFAULT_KEY_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(u16::MAX as usize) {
    Some(n) => n,
    None => unreachable!(),
};

/// Bounded digest-to-key map. Any eviction policy will do; a miss only costs
/// a snapshot read that one key.
pub trait KeyCache: Send + Sync {
    /// Remember `key` for `digest`. Setting the same pair again is harmless.
    fn set(&self, digest: Hash, key: Vec<u8>);

    fn get(&self, digest: &Hash) -> Option<Vec<u8>>;
}

/// Least-recently-used key cache.
pub struct LruKeyCache {
    inner: Mutex<LruCache<Hash, Vec<u8>>>,
}

impl LruKeyCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for LruKeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_CACHE_CAPACITY)
    }
}

impl KeyCache for LruKeyCache {
    fn set(&self, digest: Hash, key: Vec<u8>) {
        self.inner.lock().put(digest, key);
    }

    fn get(&self, digest: &Hash) -> Option<Vec<u8>> {
        self.inner.lock().get(digest).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(b: u8) -> Hash {
        [b; 32]
    }

    #[test]
    fn set_then_get() {
        let c = LruKeyCache::default();
        c.set(d(1), b"alpha".to_vec());
        assert_eq!(c.get(&d(1)), Some(b"alpha".to_vec()));
        assert_eq!(c.get(&d(2)), None);
    }

    /// Invariant: repeated sets of the same pair keep a single entry.
    #[test]
    fn set_is_idempotent() {
        let c = LruKeyCache::default();
        c.set(d(1), b"k".to_vec());
        c.set(d(1), b"k".to_vec());
        assert_eq!(c.len(), 1);
    }

    /// Invariant: once full, the least recently touched digest is evicted;
    /// reads count as touches.
    #[test]
    fn evicts_least_recently_used() {
        let c = LruKeyCache::new(NonZeroUsize::new(2).unwrap());
        c.set(d(1), b"one".to_vec());
        c.set(d(2), b"two".to_vec());
        assert!(c.get(&d(1)).is_some());
        c.set(d(3), b"three".to_vec());
        assert_eq!(c.get(&d(2)), None);
        assert!(c.get(&d(1)).is_some());
        assert!(c.get(&d(3)).is_some());
        assert_eq!(c.len(), 2);
    }
}
