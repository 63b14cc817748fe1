//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (account-based transfers and reward minting)
//! - Blocks (content-addressed, JSON encoded)
//! - Genesis (initial balances)
//! - Ledger (balances, mempool and the append-only block log)

pub mod block;
pub mod genesis;
pub mod ledger;
pub mod transaction;

pub use block::{Block, BlockHeader, BlockRecord};
pub use genesis::{Genesis, GenesisError, DEFAULT_CHAIN_ID};
pub use ledger::{apply_transaction, ChainState, Ledger, LedgerError};
pub use transaction::{Account, Transaction, REWARD_MARKER};
