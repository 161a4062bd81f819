//! Fingerprints of declarations and SQL mappers, and result-cache keys.
//!
//! Both are blake3 over the JSON encoding, streamed straight into the hasher.

use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest of `v`'s JSON encoding. Fails for values that do not serialize,
/// such as declarations holding accessor closures.
pub fn fingerprint<T: Serialize + ?Sized>(v: &T) -> Result<Hash256> {
    let mut h = Hasher::new();
    serde_json::to_writer(&mut h, v)?;
    Ok(Hash256(*h.finalize().as_bytes()))
}

/// Cache key for one call: the method identity, then a digest of the
/// arguments salted with it.
pub fn cache_key<T: Serialize + ?Sized>(method: &str, args: &T) -> Result<String> {
    let mut h = Hasher::new();
    h.update(method.as_bytes());
    h.update(&[0]);
    serde_json::to_writer(&mut h, args)?;
    Ok(format!("{method}#{}", h.finalize().to_hex()))
}
