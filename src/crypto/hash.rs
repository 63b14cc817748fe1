//! Content hashing for the ledger
//!
//! Every block is addressed by the SHA-256 digest of its canonical JSON
//! encoding. The [`Hash`] type carries that digest and travels on the wire
//! and in the block log as a lowercase hex string.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a block hash in bytes
pub const HASH_LEN: usize = 32;

/// Errors raised while decoding a hash from text
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HashError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Invalid hash length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// A fixed-width 32-byte digest.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// The all-zero hash, used as the parent of the first block.
    pub const fn zero() -> Self {
        Self([0u8; HASH_LEN])
    }

    /// Hash arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        Self(sha256(data))
    }

    /// Whether this is the all-zero hash (no chain yet)
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| HashError::InvalidHex(e.to_string()))?;
        let bytes: [u8; HASH_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
