//! Keyed hashing used for refresh-code derivation

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// A deterministic keyed hash: the same key and input always produce the
/// same 32-byte output.
pub trait KeyedHasher: Send + Sync + std::fmt::Debug {
    /// Algorithm name, for logs
    fn name(&self) -> &'static str;

    /// Hash `data` under the hasher's key
    fn keyed_hash(&self, data: &[u8]) -> [u8; 32];
}

/// BLAKE3 in keyed mode
#[derive(Clone)]
pub struct Blake3Keyed {
    key: [u8; 32],
}

impl Blake3Keyed {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl std::fmt::Debug for Blake3Keyed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blake3Keyed").field("key", &"[redacted]").finish()
    }
}

impl KeyedHasher for Blake3Keyed {
    fn name(&self) -> &'static str {
        "blake3-keyed"
    }

    fn keyed_hash(&self, data: &[u8]) -> [u8; 32] {
        *blake3::keyed_hash(&self.key, data).as_bytes()
    }
}

/// HMAC-SHA-256
#[derive(Clone)]
pub struct HmacSha256 {
    key: [u8; 32],
}

impl HmacSha256 {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl std::fmt::Debug for HmacSha256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSha256").field("key", &"[redacted]").finish()
    }
}

impl KeyedHasher for HmacSha256 {
    fn name(&self) -> &'static str {
        "hmac-sha256"
    }

    fn keyed_hash(&self, data: &[u8]) -> [u8; 32] {
        // HMAC accepts keys of any length
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key)
            .expect("HMAC key of any size is valid");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

/// Compare two byte strings without short-circuiting on the first difference
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
