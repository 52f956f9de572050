//! hash-ledger: a versioned key-value map. Every write yields a root hash
//! naming the map's whole state, and earlier states stay readable by their
//! root hash until explicitly erased.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: answer "has anything changed since hash H" and "what was the
//!   value at H", and reclaim old states without disturbing live ones.
//! - Layers:
//!   - `digest`: fixed-width `Hash`, the pluggable key digest, and base64
//!     encoding of roots at the public boundary.
//!   - `store::CountedStore`: content-addressed entries with per-entry
//!     reference counts; an entry is freed when its last count is returned.
//!   - `tree::SparseMerkleTree`: the default backing structure. Versions
//!     share identical subtrees through the counted store.
//!   - `history::History`: every root ever produced, in order, in a
//!     generational slot arena with prev/next handles, plus an index from
//!     encoded root to each of its occurrences.
//!   - `key_cache`: bounded digest-to-key reversal for snapshot reads.
//!   - `Ledger`: the public facade; hashes keys, writes through the tree,
//!     records roots in history, and runs the erasure protocol.
//!
//! Constraints
//! - Thread-safe: every `Ledger` method takes `&self`.
//! - Every successful write appends exactly one history occurrence, even if
//!   the root did not change.
//! - The last occurrence is the current root and can never be erased.
//! - An index slot exists iff the hash has at least one retained occurrence.
//!
//! Locking
//! - History (sequence and index) sits behind one `RwLock`. Writes hold its
//!   write lock across the tree update and the append.
//! - Erasures are serialized by their own mutex and hold an upgradable read
//!   on history from lookup to removal, so the tail check and the prune see
//!   the same history.
//! - Reads by root hash go straight to the tree and never touch history.
//!
//! Erasure
//! - Look up all occurrences; none means `NotFound`. Any occurrence without
//!   a successor is the live root: `InvalidOperation`.
//! - Collect the (prev, next) roots around each occurrence and hand them to
//!   the tree, which frees only nodes no surviving state reaches.
//! - Only after the tree succeeds are the occurrences removed from history.
//!
//! Notes and non-goals
//! - Values shorter than the digest width are zero-padded in the tree and
//!   stripped on read; a value that really begins with NUL bytes loses them.
//! - No persistence, no proofs, no time-based retention; callers decide
//!   which roots to erase.

pub mod digest;
mod error;
pub mod history;
mod history_proptest;
pub mod key_cache;
mod ledger;
mod store;
pub mod tree;

// Public surface
pub use digest::{decode_root, encode_root, DecodeError, Hash, KeyDigest, Xxh3Digest, HASH_LEN};
pub use error::{KeyReversalMiss, LedgerError};
pub use key_cache::{KeyCache, LruKeyCache};
pub use ledger::{Ledger, LedgerConfig, Snapshot};
pub use tree::{Bracket, SparseMerkleTree, Stats, Tree, TreeError, EMPTY_ROOT};
