//! CountedStore: content-addressed storage with per-entry reference counts.
//!
//! Every entry is keyed by the digest of its content, so identical values
//! written by different versions share one slot. A count is acquired for
//! each holder (`acquire`/`retain`) and returned with `put`; the entry is
//! removed and handed back to the caller exactly when the count reaches zero.

use crate::digest::Hash;
use core::hash::BuildHasher;
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use std::collections::hash_map::RandomState;

#[derive(Debug)]
pub struct Counted<V> {
    pub refcount: usize,
    pub value: V,
}

impl<V> Counted<V> {
    pub fn new(value: V, initial: usize) -> Self {
        Self {
            refcount: initial,
            value,
        }
    }
}

/// Result of returning a count; indicates whether the entry was removed.
#[derive(Debug, PartialEq, Eq)]
pub enum PutResult<V> {
    Live,
    Removed { key: Hash, value: V },
    /// The key was not present; nothing changed.
    Absent,
}

/// Whether `acquire` stored new content or found it already present.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Acquired {
    Inserted,
    Existing,
}

pub struct CountedStore<V, S = RandomState> {
    inner: HashMap<Hash, Counted<V>, S>,
    writes: u64,
    removals: u64,
}

impl<V> CountedStore<V> {
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<V> Default for CountedStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, S> CountedStore<V, S>
where
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            inner: HashMap::with_hasher(hasher),
            writes: 0,
            removals: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Entries stored over the lifetime of the store.
    pub fn writes(&self) -> u64 {
        self.writes
    }
    /// Entries removed over the lifetime of the store.
    pub fn removals(&self) -> u64 {
        self.removals
    }

    pub fn get(&self, key: &Hash) -> Option<&V> {
        self.inner.get(key).map(|c| &c.value)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &Hash) -> bool {
        self.inner.contains_key(key)
    }

    #[cfg(test)]
    pub fn refcount(&self, key: &Hash) -> usize {
        self.inner.get(key).map(|c| c.refcount).unwrap_or(0)
    }

    /// Take one count on `key`, storing `make()` if the key is new. `make` only
    /// runs on insert.
    pub fn acquire<F>(&mut self, key: Hash, make: F) -> Acquired
    where
        F: FnOnce() -> V,
    {
        match self.inner.entry(key) {
            Entry::Occupied(mut o) => {
                o.get_mut().refcount += 1;
                Acquired::Existing
            }
            Entry::Vacant(v) => {
                v.insert(Counted::new(make(), 1));
                self.writes += 1;
                Acquired::Inserted
            }
        }
    }

    /// Take one more count on an existing entry. Returns false if absent.
    pub fn retain(&mut self, key: &Hash) -> bool {
        match self.inner.get_mut(key) {
            Some(c) => {
                c.refcount += 1;
                true
            }
            None => false,
        }
    }

    /// Return one count; removes and returns the entry when it hits zero.
    pub fn put(&mut self, key: &Hash) -> PutResult<V> {
        let Some(c) = self.inner.get_mut(key) else {
            return PutResult::Absent;
        };
        debug_assert!(c.refcount > 0, "CountedStore underflow");
        c.refcount -= 1;
        if c.refcount > 0 {
            return PutResult::Live;
        }
        match self.inner.remove(key) {
            Some(c) => {
                self.removals += 1;
                PutResult::Removed {
                    key: *key,
                    value: c.value,
                }
            }
            None => PutResult::Absent,
        }
    }
}
