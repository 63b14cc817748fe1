//! Cryptographic utilities for the ledger
//!
//! Only content hashing lives here: transactions carry no signatures.

pub mod hash;

pub use hash::{sha256, sha256_hex, Hash, HashError, HASH_LEN};
