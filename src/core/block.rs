//! Block implementation for the ledger
//!
//! A block contains a header with metadata and a list of transactions.
//! Blocks are content addressed: the hash is SHA-256 over the compact JSON
//! encoding, so every node derives the same hash for the same content.
//!
//! The hashed encoding escapes strings the way Go's `encoding/json` does
//! (`<`, `>`, `&`, U+2028 and U+2029 become `\uXXXX`), so hashes agree
//! with nodes that marshal blocks with it.

use crate::core::transaction::Transaction;
use crate::crypto::Hash;
use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, Serializer};
use std::io;

/// Compact JSON with HTML-safe string escaping
struct HtmlSafeFormatter;

impl Formatter for HtmlSafeFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (index, c) in fragment.char_indices() {
            let escaped = match c {
                '<' => "\\u003c",
                '>' => "\\u003e",
                '&' => "\\u0026",
                '\u{2028}' => "\\u2028",
                '\u{2029}' => "\\u2029",
                _ => continue,
            };
            writer.write_all(fragment[start..index].as_bytes())?;
            writer.write_all(escaped.as_bytes())?;
            start = index + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the previous block (all zeros for the first block)
    pub parent: Hash,
    /// Block height
    pub number: u64,
    /// Creation time, unix seconds
    pub time: u64,
}

/// A block in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Transactions in application order
    #[serde(rename = "payload")]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block
    pub fn new(parent: Hash, number: u64, time: u64, transactions: Vec<Transaction>) -> Self {
        Self {
            header: BlockHeader {
                parent,
                number,
                time,
            },
            transactions,
        }
    }

    /// The exact bytes the block hash is computed over
    pub fn hash_preimage(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut serializer = Serializer::with_formatter(Vec::new(), HtmlSafeFormatter);
        self.serialize(&mut serializer)?;
        Ok(serializer.into_inner())
    }

    /// Calculate the content hash of the block
    pub fn hash(&self) -> Result<Hash, serde_json::Error> {
        Ok(Hash::digest(&self.hash_preimage()?))
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

/// One line of the block log: a block keyed by its hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: Hash,
    pub block: Block,
}

impl BlockRecord {
    /// Wrap a block, computing its hash
    pub fn new(block: Block) -> Result<Self, serde_json::Error> {
        let hash = block.hash()?;
        Ok(Self { hash, block })
    }
}
