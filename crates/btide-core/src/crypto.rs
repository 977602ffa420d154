//! Hash primitive for btide.
//!
//! Every hash in a bpkg manifest is a SHA-256 digest rendered as 64 lowercase
//! hex characters. Leaves hash raw chunk bytes. Internal nodes hash the
//! concatenated *hex text* of their children, not the binary digests:
//!
//!   node = SHA256(hex(left) || hex(right))
//!
//! There is no unsafe code in this module.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded digest.
pub const HASH_HEX_LEN: usize = 64;

/// Hash a byte slice, returning the lowercase hex SHA-256 digest.
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash for an internal node from its children's hex digests.
///
/// `right` is empty when the node has no right sibling.
pub fn combine(left: &str, right: &str) -> String {
    let mut h = Hasher::new();
    h.update(left.as_bytes());
    h.update(right.as_bytes());
    h.finalize_hex()
}

/// True if `s` is exactly [`HASH_HEX_LEN`] ASCII hex digits.
pub fn is_digest_hex(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Incremental SHA-256 hasher for payloads that arrive in pieces.
///
/// Implements [`std::io::Write`] so chunk bytes can be streamed straight
/// from a file with [`std::io::copy`].
///
/// # Example
/// ```
/// use btide_core::crypto::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// assert_eq!(h.finalize_hex(), btide_core::crypto::digest_hex(b"hello world"));
/// ```
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
