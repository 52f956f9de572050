//! Error types for ledger operations.

use crate::digest::{DecodeError, Hash};
use crate::tree::TreeError;

/// Errors returned by [`Ledger`](crate::Ledger) operations.
///
/// A failed erase never changes the ledger; a failed write leaves the
/// previous root current.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The root hash is not present in retained history.
    #[error("root hash {0} is not present in ledger history")]
    NotFound(String),

    /// The operation would touch the live state.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// Externally supplied root-hash text could not be decoded.
    #[error("malformed root hash: {0}")]
    Decode(#[from] DecodeError),

    /// The backing tree failed.
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    /// A snapshot was converted to a plain map while some keys were missing.
    #[error("snapshot is missing {} keys", .missing.len())]
    Incomplete { missing: Vec<KeyReversalMiss> },
}

impl LedgerError {
    /// True when the key does not exist in the requested state.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, LedgerError::Tree(TreeError::KeyNotFound))
    }
}

/// A key digest in a snapshot whose original key was no longer cached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not find original value for key {}", hex::encode(.digest))]
pub struct KeyReversalMiss {
    pub digest: Hash,
}
