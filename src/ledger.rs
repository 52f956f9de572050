//! Ledger: the versioned map facade tying the key digest, tree, key cache and
//! history together.

use crate::digest::{coerce_to_hash, decode_root, encode_root, trim_leading_zeroes, Hash, KeyDigest, Xxh3Digest};
use crate::error::{KeyReversalMiss, LedgerError};
use crate::history::{History, RemoveError};
use crate::key_cache::{KeyCache, LruKeyCache, DEFAULT_KEY_CACHE_CAPACITY};
use crate::tree::{Bracket, SparseMerkleTree, Stats, Tree};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tracing::{debug, warn};

/// Tunables for [`Ledger::with_config`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Keys remembered for reversing digests in snapshot reads.
    pub key_cache_capacity: NonZeroUsize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            key_cache_capacity: DEFAULT_KEY_CACHE_CAPACITY,
        }
    }
}

/// Full key/value state at one root, plus the keys that could not be
/// reversed. `entries` is valid but incomplete when `missing` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub entries: HashMap<String, String>,
    pub missing: Vec<KeyReversalMiss>,
}

impl Snapshot {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// The entries if every key was reversed, otherwise `Incomplete`.
    pub fn into_result(self) -> Result<HashMap<String, String>, LedgerError> {
        if self.missing.is_empty() {
            Ok(self.entries)
        } else {
            Err(LedgerError::Incomplete {
                missing: self.missing,
            })
        }
    }
}

/// A key-value map where every state has a root hash and earlier states stay
/// readable by that hash until erased.
///
/// All methods take `&self`; a ledger can be shared across threads. Writes
/// are linearized through the history lock, so [`root_hash`](Self::root_hash)
/// always names some prefix of the write sequence.
pub struct Ledger<T = SparseMerkleTree, C = LruKeyCache, D = Xxh3Digest> {
    tree: T,
    history: RwLock<History>,
    key_cache: C,
    digest: D,
    erase_lock: Mutex<()>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self::with_parts(
            SparseMerkleTree::new(),
            LruKeyCache::new(config.key_cache_capacity),
            Xxh3Digest,
        )
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

fn to_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(trim_leading_zeroes(bytes)).into_owned()
}

impl<T, C, D> Ledger<T, C, D>
where
    T: Tree,
    C: KeyCache,
    D: KeyDigest,
{
    pub fn with_parts(tree: T, key_cache: C, digest: D) -> Self {
        Self {
            tree,
            history: RwLock::new(History::new()),
            key_cache,
            digest,
            erase_lock: Mutex::new(()),
        }
    }

    /// Digest `key` to tree width and remember how to reverse it.
    fn coerce_key(&self, key: &str) -> Hash {
        let h = coerce_to_hash(&self.digest.digest(key.as_bytes()));
        self.key_cache.set(h, key.as_bytes().to_vec());
        h
    }

    /// Add or overwrite `key`, returning the new root hash.
    pub fn put(&self, key: &str, value: &str) -> Result<String, LedgerError> {
        let k = self.coerce_key(key);
        let mut history = self.history.write();
        let root = self.tree.update(&[k], &[value.as_bytes()])?;
        let (_, encoded) = history.put(root);
        debug!(root = %encoded, "put key");
        Ok(encoded)
    }

    /// Remove `key`, returning the new root hash. Earlier states still hold
    /// the key. Deleting an absent key records the unchanged root again.
    pub fn delete(&self, key: &str) -> Result<String, LedgerError> {
        let k = self.coerce_key(key);
        let mut history = self.history.write();
        let root = self.tree.delete(&k)?;
        let (_, encoded) = history.put(root);
        debug!(root = %encoded, "deleted key");
        Ok(encoded)
    }

    /// Current value of `key`.
    ///
    /// Samples the root first and then reads at that root; a write landing in
    /// between is not observed, but the value returned was current when the
    /// root was sampled.
    pub fn get(&self, key: &str) -> Result<String, LedgerError> {
        self.get_previous_value(&self.root_hash(), key)
    }

    /// Encoded hash of the current state.
    pub fn root_hash(&self) -> String {
        encode_root(&self.tree.root())
    }

    /// Value of `key` in the state whose root hash was `previous_root_hash`.
    pub fn get_previous_value(
        &self,
        previous_root_hash: &str,
        key: &str,
    ) -> Result<String, LedgerError> {
        let root = decode_root(previous_root_hash)?;
        let value = self.tree.get_previous_value(&root, &self.coerce_key(key))?;
        Ok(to_text(&value))
    }

    /// The whole current state.
    pub fn get_all(&self) -> Result<Snapshot, LedgerError> {
        self.get_all_previous(&self.root_hash())
    }

    /// The whole state at `previous_root_hash`. Keys whose digests can no
    /// longer be reversed are left out and listed in `Snapshot::missing`.
    pub fn get_all_previous(&self, previous_root_hash: &str) -> Result<Snapshot, LedgerError> {
        let root = decode_root(previous_root_hash)?;
        let (keys, values) = self.tree.get_all_previous(&root)?;
        let mut snapshot = Snapshot::default();
        for (digest, value) in keys.into_iter().zip(values) {
            match self.key_cache.get(&digest) {
                Some(original) => {
                    snapshot
                        .entries
                        .insert(to_text(&original), to_text(&value));
                }
                None => snapshot.missing.push(KeyReversalMiss { digest }),
            }
        }
        if !snapshot.is_complete() {
            warn!(
                root = %previous_root_hash,
                missing = snapshot.missing.len(),
                "snapshot omits keys evicted from the key cache"
            );
        }
        Ok(snapshot)
    }

    /// Reclaim the memory held only by the state `root_hash`, keeping every
    /// node shared with a surviving state. Afterwards the hash can no longer
    /// be read.
    ///
    /// Erasures run one at a time. Writers wait while an erase holds history,
    /// so the target cannot become current again before it is pruned. On any
    /// error nothing has changed.
    pub fn erase_root_hash(&self, root_hash: &str) -> Result<(), LedgerError> {
        let _erasing = self.erase_lock.lock();
        let history = self.history.upgradable_read();

        let occurrences = history.get(root_hash).to_vec();
        if occurrences.is_empty() {
            return Err(LedgerError::NotFound(root_hash.to_string()));
        }

        let mut target = None;
        let mut brackets = Vec::with_capacity(occurrences.len());
        for o in &occurrences {
            let n = history
                .neighbors(*o)
                .ok_or_else(|| LedgerError::NotFound(root_hash.to_string()))?;
            let Some(next) = n.next else {
                warn!(root = %root_hash, "refusing to erase current root hash");
                return Err(LedgerError::InvalidOperation("cannot erase current root hash"));
            };
            target = Some(n.root);
            brackets.push(Bracket { prev: n.prev, next });
        }
        let Some(target) = target else {
            return Err(LedgerError::NotFound(root_hash.to_string()));
        };

        self.tree.erase(&target, &brackets)?;

        let mut history = RwLockUpgradableReadGuard::upgrade(history);
        history
            .remove_occurrences(root_hash, &occurrences)
            .map_err(|e| match e {
                RemoveError::Tail => {
                    LedgerError::InvalidOperation("cannot erase current root hash")
                }
                RemoveError::Stale => LedgerError::NotFound(root_hash.to_string()),
            })?;
        debug!(
            root = %root_hash,
            occurrences = occurrences.len(),
            "erased root hash"
        );
        Ok(())
    }

    /// Storage statistics of the backing tree.
    pub fn stats(&self) -> Stats {
        self.tree.stats()
    }

    /// Number of recorded occurrences still in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// How many times `root_hash` occurs in retained history.
    pub fn occurrences(&self, root_hash: &str) -> usize {
        self.history.read().get(root_hash).len()
    }

    /// Retained root hashes, oldest first. The last one is current.
    pub fn history(&self) -> Vec<String> {
        self.history
            .read()
            .iter()
            .map(|(_, root)| encode_root(root))
            .collect()
    }
}
