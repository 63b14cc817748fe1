//! Storage module for ledger persistence

pub mod persistence;

pub use persistence::{
    BalancesSnapshot, BlockStore, DataDir, StorageError, BLOCKS_FILE, DATABASE_DIR,
    GENESIS_FILE, STATE_FILE,
};
