//! Ledger Node: a minimal replicated ledger in Rust
//!
//! This crate provides:
//! - Account balances driven by value-transfer transactions
//! - Content-addressed blocks in an append-only JSON log
//! - Replay of the log on start-up, with torn-tail recovery
//! - A peer registry and a polling sync engine over HTTP
//!
//! # Example
//!
//! ```no_run
//! use ledger_node::core::{Ledger, Transaction};
//!
//! let mut ledger = Ledger::open(std::path::Path::new(".ledger_data")).unwrap();
//! let hash = ledger
//!     .commit_transaction(Transaction::new("andrej", "babayaga", 100, ""))
//!     .unwrap();
//! println!("Persisted block {}", hash);
//! ```

pub mod api;
pub mod cli;
pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{Account, Block, BlockHeader, Genesis, Ledger, LedgerError, Transaction};
pub use crypto::Hash;
pub use network::{Node, NodeConfig, PeerNode, PeerRegistry, SyncEngine};
pub use storage::{BlockStore, StorageError};
