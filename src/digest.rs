//! Fixed-width digests: the `Hash` type shared by roots and keys, the
//! pluggable key digest, and the base64 boundary encoding for roots.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use xxhash_rust::xxh3::xxh3_64;

/// Width in bytes of every root hash and (padded) key digest.
pub const HASH_LEN: usize = 32;

/// Raw digest bytes as stored in the tree and in history.
pub type Hash = [u8; HASH_LEN];

/// Deterministic, fixed-width, non-cryptographic digest of key bytes.
///
/// The output may be shorter than `HASH_LEN`; the ledger right-pads it with
/// zeros before handing it to the tree. Outputs longer than `HASH_LEN` are
/// truncated.
pub trait KeyDigest: Send + Sync {
    fn digest(&self, key: &[u8]) -> Vec<u8>;
}

/// Default 64-bit key digest (XXH3, seed 0, big-endian output).
#[derive(Copy, Clone, Debug, Default)]
pub struct Xxh3Digest;

impl KeyDigest for Xxh3Digest {
    #[inline]
    fn digest(&self, key: &[u8]) -> Vec<u8> {
        xxh3_64(key).to_be_bytes().to_vec()
    }
}

/// Copy a digest into a zeroed `Hash`, keeping its leading bytes.
pub(crate) fn coerce_to_hash(raw: &[u8]) -> Hash {
    let mut h = [0u8; HASH_LEN];
    let n = raw.len().min(HASH_LEN);
    h[..n].copy_from_slice(&raw[..n]);
    h
}

/// Failure to turn externally supplied text back into a root hash.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("root hash must be {} bytes, got {len}", HASH_LEN)]
    Length { len: usize },
}

/// Standard base64 text of a root hash.
pub fn encode_root(root: &Hash) -> String {
    STANDARD.encode(root)
}

/// Inverse of [`encode_root`].
pub fn decode_root(text: &str) -> Result<Hash, DecodeError> {
    let bytes = STANDARD.decode(text)?;
    let root: Hash = bytes
        .as_slice()
        .try_into()
        .map_err(|_| DecodeError::Length { len: bytes.len() })?;
    Ok(root)
}

/// Strip zero padding from the front of a stored key or value.
///
/// Content that legitimately starts with zero bytes loses them here.
pub(crate) fn trim_leading_zeroes(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
