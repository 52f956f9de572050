//! Backing structure: the `Tree` contract the ledger consumes, and an
//! in-memory sparse Merkle tree implementing it.
//!
//! The tree is a binary trie over the bits of fixed-width keys with shortcut
//! leaves: a subtree holding a single leaf is that leaf, a subtree holding two
//! or more leaves is a branch. The shape depends only on the set of leaves, so
//! a delete that restores an earlier key set restores the earlier root hash.
//!
//! Nodes are stored once per digest in a [`CountedStore`]. Each branch holds a
//! count on each child and each retained root holds one pin count on its top
//! node, so versions share every identical subtree and erasing a version frees
//! exactly the nodes no surviving version reaches.

use crate::digest::{Hash, HASH_LEN};
use crate::store::{Acquired, CountedStore, PutResult};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Root hash of the tree with no keys.
pub const EMPTY_ROOT: Hash = [0u8; HASH_LEN];

const LEAF_TAG: u8 = 0x00;
const BRANCH_TAG: u8 = 0x01;

/// The states adjacent to one occurrence of a root being erased.
///
/// `prev` is `None` when the occurrence was the first ever recorded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bracket {
    pub prev: Option<Hash>,
    pub next: Hash,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("root {} is not retained", hex::encode(.0))]
    UnknownRoot(Hash),
    #[error("key not found")]
    KeyNotFound,
    #[error("got {keys} keys but {values} values")]
    LengthMismatch { keys: usize, values: usize },
    #[error("cannot erase the current root")]
    CurrentRoot,
    #[error("node {} is missing from the store", hex::encode(.0))]
    MissingNode(Hash),
}

/// Storage counters for a tree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Nodes currently stored.
    pub nodes: usize,
    /// Root hashes that can still be read.
    pub retained_roots: usize,
    /// Nodes ever written.
    pub writes: u64,
    /// Nodes ever freed.
    pub removals: u64,
    /// Point lookups that found their key.
    pub hits: u64,
    /// Point lookups that did not.
    pub misses: u64,
}

/// Authenticated key-value engine with per-state digests.
///
/// Mutations must be internally synchronized; the ledger calls them from
/// many threads.
pub trait Tree: Send + Sync {
    /// Write each `keys[i] = values[i]` and return the new current root.
    fn update(&self, keys: &[Hash], values: &[&[u8]]) -> Result<Hash, TreeError>;

    /// Remove `key` and return the new current root. Removing an absent key
    /// leaves the root unchanged.
    fn delete(&self, key: &Hash) -> Result<Hash, TreeError>;

    /// The (padded) value of `key` in the state identified by `root`.
    fn get_previous_value(&self, root: &Hash, key: &Hash) -> Result<Vec<u8>, TreeError>;

    /// Every key and (padded) value in the state identified by `root`.
    fn get_all_previous(&self, root: &Hash) -> Result<(Vec<Hash>, Vec<Vec<u8>>), TreeError>;

    /// Reclaim the structure of `target` that no bracketing state shares.
    fn erase(&self, target: &Hash, brackets: &[Bracket]) -> Result<(), TreeError>;

    fn root(&self) -> Hash;

    fn stats(&self) -> Stats;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Leaf { key: Hash, value: Vec<u8> },
    Branch { left: Option<Hash>, right: Option<Hash> },
}

#[derive(Copy, Clone)]
enum Shape {
    Leaf(Hash),
    Branch(Option<Hash>, Option<Hash>),
}

fn leaf_hash(key: &Hash, value: &[u8]) -> Hash {
    let mut h = Sha256::new();
    h.update([LEAF_TAG]);
    h.update(key);
    h.update(value);
    h.finalize().into()
}

fn branch_hash(left: Option<&Hash>, right: Option<&Hash>) -> Hash {
    let mut h = Sha256::new();
    h.update([BRANCH_TAG]);
    h.update(left.unwrap_or(&EMPTY_ROOT));
    h.update(right.unwrap_or(&EMPTY_ROOT));
    h.finalize().into()
}

#[inline]
fn bit(key: &Hash, depth: usize) -> bool {
    (key[depth / 8] >> (7 - depth % 8)) & 1 == 1
}

fn subtree(root: Hash) -> Option<Hash> {
    (root != EMPTY_ROOT).then_some(root)
}

/// Left-pad `value` with zeros to at least `HASH_LEN` bytes.
fn pad_value(value: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HASH_LEN.saturating_sub(value.len())];
    out.extend_from_slice(value);
    out
}

struct State {
    nodes: CountedStore<Node>,
    pinned: HashSet<Hash>,
    current: Hash,
}

impl State {
    fn new() -> Self {
        Self {
            nodes: CountedStore::new(),
            pinned: HashSet::from([EMPTY_ROOT]),
            current: EMPTY_ROOT,
        }
    }

    fn node(&self, h: &Hash) -> Result<&Node, TreeError> {
        self.nodes.get(h).ok_or(TreeError::MissingNode(*h))
    }

    fn shape(&self, h: &Hash) -> Result<Shape, TreeError> {
        Ok(match self.node(h)? {
            Node::Leaf { key, .. } => Shape::Leaf(*key),
            Node::Branch { left, right } => Shape::Branch(*left, *right),
        })
    }

    fn retain(&mut self, h: Hash) -> Result<Hash, TreeError> {
        if self.nodes.retain(&h) {
            Ok(h)
        } else {
            Err(TreeError::MissingNode(h))
        }
    }

    fn retain_opt(&mut self, h: Option<Hash>) -> Result<Option<Hash>, TreeError> {
        h.map(|h| self.retain(h)).transpose()
    }

    fn acquire_leaf(&mut self, key: Hash, value: Vec<u8>) -> Hash {
        let h = leaf_hash(&key, &value);
        self.nodes.acquire(h, || Node::Leaf { key, value });
        h
    }

    /// The caller's counts on `left`/`right` move into the branch; if an
    /// identical branch already exists they are returned instead.
    fn acquire_branch(&mut self, left: Option<Hash>, right: Option<Hash>) -> Hash {
        let h = branch_hash(left.as_ref(), right.as_ref());
        if self.nodes.acquire(h, || Node::Branch { left, right }) == Acquired::Existing {
            for child in [left, right].into_iter().flatten() {
                self.release(child);
            }
        }
        h
    }

    fn place(&mut self, go_right: bool, child: Hash, sibling: Option<Hash>) -> Hash {
        if go_right {
            self.acquire_branch(sibling, Some(child))
        } else {
            self.acquire_branch(Some(child), sibling)
        }
    }

    /// Return one count on `h`, freeing every node that drops to zero.
    fn release(&mut self, h: Hash) -> usize {
        let mut freed = 0;
        let mut stack = vec![h];
        while let Some(h) = stack.pop() {
            if let PutResult::Removed { key, value } = self.nodes.put(&h) {
                freed += 1;
                trace!(node = %hex::encode(key), "freed node");
                if let Node::Branch { left, right } = value {
                    stack.extend(left);
                    stack.extend(right);
                }
            }
        }
        freed
    }

    /// Insert into the subtree at `node`, returning an owned count on the new
    /// subtree. `node` itself is not consumed.
    fn insert(
        &mut self,
        node: Option<Hash>,
        depth: usize,
        key: Hash,
        value: Vec<u8>,
    ) -> Result<Hash, TreeError> {
        let Some(h) = node else {
            return Ok(self.acquire_leaf(key, value));
        };
        match self.shape(&h)? {
            Shape::Leaf(existing) if existing == key => Ok(self.acquire_leaf(key, value)),
            Shape::Leaf(existing) => {
                let old = self.retain(h)?;
                let new = self.acquire_leaf(key, value);
                Ok(self.join(depth, (old, existing), (new, key)))
            }
            Shape::Branch(left, right) => {
                let go_right = bit(&key, depth);
                let (child, sibling) = if go_right { (right, left) } else { (left, right) };
                let child = self.insert(child, depth + 1, key, value)?;
                let sibling = self.retain_opt(sibling)?;
                Ok(self.place(go_right, child, sibling))
            }
        }
    }

    /// Build the smallest subtree at `depth` holding two leaves with distinct
    /// keys. Both counts are owned by the caller and move into the result.
    fn join(&mut self, depth: usize, a: (Hash, Hash), b: (Hash, Hash)) -> Hash {
        let (a_right, b_right) = (bit(&a.1, depth), bit(&b.1, depth));
        if a_right == b_right {
            let child = self.join(depth + 1, a, b);
            self.place(a_right, child, None)
        } else if a_right {
            self.acquire_branch(Some(b.0), Some(a.0))
        } else {
            self.acquire_branch(Some(a.0), Some(b.0))
        }
    }

    /// Remove `key` from the subtree at `h`, returning an owned count on the
    /// resulting subtree. Nothing is acquired when the key is absent.
    fn remove(&mut self, h: Hash, depth: usize, key: &Hash) -> Result<Option<Hash>, TreeError> {
        match self.shape(&h)? {
            Shape::Leaf(existing) if existing == *key => Ok(None),
            Shape::Leaf(_) => Err(TreeError::KeyNotFound),
            Shape::Branch(left, right) => {
                let go_right = bit(key, depth);
                let (child, sibling) = if go_right { (right, left) } else { (left, right) };
                let child = child.ok_or(TreeError::KeyNotFound)?;
                let child = self.remove(child, depth + 1, key)?;
                match (child, sibling) {
                    (None, None) => Ok(None),
                    (None, Some(s)) => {
                        let s = self.retain(s)?;
                        match self.shape(&s)? {
                            Shape::Leaf(_) => Ok(Some(s)),
                            Shape::Branch(..) => Ok(Some(self.place(!go_right, s, None))),
                        }
                    }
                    (Some(c), None) => match self.shape(&c)? {
                        Shape::Leaf(_) => Ok(Some(c)),
                        Shape::Branch(..) => Ok(Some(self.place(go_right, c, None))),
                    },
                    (Some(c), Some(s)) => {
                        let s = self.retain(s)?;
                        Ok(Some(self.place(go_right, c, Some(s))))
                    }
                }
            }
        }
    }

    /// Make `root` current, turning the caller's owned count into its pin.
    fn commit(&mut self, root: Hash) -> Hash {
        if !self.pinned.insert(root) {
            if let Some(h) = subtree(root) {
                self.release(h);
            }
        }
        self.current = root;
        root
    }

    fn check_retained(&self, root: &Hash) -> Result<(), TreeError> {
        if self.pinned.contains(root) {
            Ok(())
        } else {
            Err(TreeError::UnknownRoot(*root))
        }
    }
}

/// In-memory sparse Merkle tree with reference-counted structural sharing.
pub struct SparseMerkleTree {
    state: RwLock<State>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SparseMerkleTree {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Whether `root` can still be read.
    pub fn is_retained(&self, root: &Hash) -> bool {
        self.state.read().pinned.contains(root)
    }
}

impl Default for SparseMerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree for SparseMerkleTree {
    fn update(&self, keys: &[Hash], values: &[&[u8]]) -> Result<Hash, TreeError> {
        if keys.len() != values.len() {
            return Err(TreeError::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        let mut st = self.state.write();
        let mut working = subtree(st.current);
        st.retain_opt(working)?;
        for (key, value) in keys.iter().zip(values) {
            let next = st.insert(working, 0, *key, pad_value(value))?;
            if let Some(prev) = working {
                st.release(prev);
            }
            working = Some(next);
        }
        Ok(st.commit(working.unwrap_or(EMPTY_ROOT)))
    }

    fn delete(&self, key: &Hash) -> Result<Hash, TreeError> {
        let mut st = self.state.write();
        let current = st.current;
        let Some(top) = subtree(current) else {
            return Ok(current);
        };
        match st.remove(top, 0, key) {
            Ok(next) => Ok(st.commit(next.unwrap_or(EMPTY_ROOT))),
            Err(TreeError::KeyNotFound) => Ok(current),
            Err(e) => Err(e),
        }
    }

    fn get_previous_value(&self, root: &Hash, key: &Hash) -> Result<Vec<u8>, TreeError> {
        let st = self.state.read();
        st.check_retained(root)?;
        let mut node = subtree(*root);
        let mut depth = 0;
        let found = loop {
            let Some(h) = node else {
                break None;
            };
            match st.node(&h)? {
                Node::Leaf { key: k, value } => break (k == key).then(|| value.clone()),
                Node::Branch { left, right } => {
                    node = if bit(key, depth) { *right } else { *left };
                    depth += 1;
                }
            }
        };
        match found {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(TreeError::KeyNotFound)
            }
        }
    }

    fn get_all_previous(&self, root: &Hash) -> Result<(Vec<Hash>, Vec<Vec<u8>>), TreeError> {
        let st = self.state.read();
        st.check_retained(root)?;
        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut stack: Vec<Hash> = subtree(*root).into_iter().collect();
        while let Some(h) = stack.pop() {
            match st.node(&h)? {
                Node::Leaf { key, value } => {
                    keys.push(*key);
                    values.push(value.clone());
                }
                Node::Branch { left, right } => {
                    stack.extend(*right);
                    stack.extend(*left);
                }
            }
        }
        Ok((keys, values))
    }

    fn erase(&self, target: &Hash, brackets: &[Bracket]) -> Result<(), TreeError> {
        let mut st = self.state.write();
        if *target == st.current {
            return Err(TreeError::CurrentRoot);
        }
        st.check_retained(target)?;
        for b in brackets {
            for r in b.prev.iter().chain(std::iter::once(&b.next)) {
                if r != target {
                    st.check_retained(r)?;
                }
            }
        }
        st.pinned.remove(target);
        let freed = subtree(*target).map(|h| st.release(h)).unwrap_or(0);
        debug!(
            root = %hex::encode(target),
            brackets = brackets.len(),
            freed,
            "erased tree root"
        );
        Ok(())
    }

    fn root(&self) -> Hash {
        self.state.read().current
    }

    fn stats(&self) -> Stats {
        let st = self.state.read();
        Stats {
            nodes: st.nodes.len(),
            retained_roots: st.pinned.len(),
            writes: st.nodes.writes(),
            removals: st.nodes.removals(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
