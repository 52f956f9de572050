//! History: chronological record of every root hash the ledger produced,
//! with an index from encoded hash to each of its occurrences.
//!
//! Entries live in a generational slot arena and link to their neighbors by
//! handle, so removal from the middle of the sequence is O(1) and a stale
//! handle never aliases a newer entry. The structure itself is not locked;
//! the ledger keeps it behind a single `RwLock` so the sequence and the index
//! always change together.

use crate::digest::{encode_root, Hash};
use core::hash::BuildHasher;
use hashbrown::HashMap;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

/// Stable reference to one occurrence in history.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.0
    }

    pub fn root<'a, S>(&self, history: &'a History<S>) -> Option<&'a Hash>
    where
        S: BuildHasher,
    {
        history.entries.get(self.0).map(|e| &e.root)
    }

    /// The occurrence recorded just before this one, if any.
    pub fn prev<S>(&self, history: &History<S>) -> Option<Handle>
    where
        S: BuildHasher,
    {
        history.entries.get(self.0)?.prev.map(Handle::new)
    }

    /// The occurrence recorded just after this one; `None` for the tail.
    pub fn next<S>(&self, history: &History<S>) -> Option<Handle>
    where
        S: BuildHasher,
    {
        history.entries.get(self.0)?.next.map(Handle::new)
    }
}

#[derive(Debug)]
struct Entry {
    root: Hash,
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

/// Roots recorded at one occurrence and at its immediate neighbors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Neighbors {
    pub root: Hash,
    pub prev: Option<Hash>,
    pub next: Option<Hash>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RemoveError {
    #[error("occurrence is the current tail of history")]
    Tail,
    #[error("occurrence handle is no longer in history")]
    Stale,
}

pub struct History<S = RandomState> {
    entries: SlotMap<DefaultKey, Entry>,
    index: HashMap<String, Vec<Handle>, S>,
    head: Option<DefaultKey>,
    tail: Option<DefaultKey>,
}

impl History {
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

/// Chronological iterator over retained occurrences.
pub struct Iter<'a, S> {
    history: &'a History<S>,
    cursor: Option<DefaultKey>,
}

impl<'a, S> Iterator for Iter<'a, S> {
    type Item = (Handle, &'a Hash);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let k = self.cursor?;
        let e = self.history.entries.get(k)?;
        self.cursor = e.next;
        Some((Handle::new(k), &e.root))
    }
}

impl<S> History<S>
where
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            entries: SlotMap::with_key(),
            index: HashMap::with_hasher(hasher),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every retained occurrence of `hash`, oldest first. Empty if unknown.
    pub fn get(&self, hash: &str) -> &[Handle] {
        self.index.get(hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct hashes with at least one retained occurrence.
    pub fn distinct(&self) -> usize {
        self.index.len()
    }

    pub fn neighbors(&self, handle: Handle) -> Option<Neighbors> {
        let e = self.entries.get(handle.raw_handle())?;
        let root_of = |k: Option<DefaultKey>| k.and_then(|k| self.entries.get(k)).map(|n| n.root);
        Some(Neighbors {
            root: e.root,
            prev: root_of(e.prev),
            next: root_of(e.next),
        })
    }

    pub fn tail(&self) -> Option<Handle> {
        self.tail.map(Handle::new)
    }

    /// Append `root` as the new tail and index it. Returns the new handle and
    /// the encoded hash it was indexed under.
    pub fn put(&mut self, root: Hash) -> (Handle, String) {
        let k = self.entries.insert(Entry {
            root,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(t) => {
                if let Some(e) = self.entries.get_mut(t) {
                    e.next = Some(k);
                }
            }
            None => self.head = Some(k),
        }
        self.tail = Some(k);

        let handle = Handle::new(k);
        let encoded = encode_root(&root);
        self.index.entry(encoded.clone()).or_default().push(handle);
        (handle, encoded)
    }

    /// Unlink `occurrences` from the sequence and from `hash`'s index slot,
    /// dropping the slot once it is empty.
    ///
    /// All handles are validated before anything changes: a stale handle or
    /// one that is currently the tail rejects the whole call.
    pub fn remove_occurrences(
        &mut self,
        hash: &str,
        occurrences: &[Handle],
    ) -> Result<usize, RemoveError> {
        for h in occurrences {
            let e = self
                .entries
                .get(h.raw_handle())
                .ok_or(RemoveError::Stale)?;
            if e.next.is_none() {
                return Err(RemoveError::Tail);
            }
        }

        let mut removed = 0;
        for h in occurrences {
            if self.unlink(h.raw_handle()) {
                removed += 1;
            }
        }

        if let Some(slot) = self.index.get_mut(hash) {
            slot.retain(|h| !occurrences.contains(h));
            if slot.is_empty() {
                self.index.remove(hash);
            }
        }
        Ok(removed)
    }

    fn unlink(&mut self, k: DefaultKey) -> bool {
        let Some(entry) = self.entries.remove(k) else {
            return false;
        };
        match entry.prev {
            Some(p) => {
                if let Some(e) = self.entries.get_mut(p) {
                    e.next = entry.next;
                }
            }
            None => self.head = entry.next,
        }
        match entry.next {
            Some(n) => {
                if let Some(e) = self.entries.get_mut(n) {
                    e.prev = entry.prev;
                }
            }
            None => self.tail = entry.prev,
        }
        true
    }

    pub fn iter(&self) -> Iter<'_, S> {
        Iter {
            history: self,
            cursor: self.head,
        }
    }
}
