//! Ledger state machine
//!
//! The ledger owns account balances, the pending transaction pool and the
//! pointer to the latest block, and it is the only writer of the block log.
//!
//! Two balance views are kept:
//! - the *committed* view, which is always the replay of the block log
//! - the *pending* view, which is the committed view plus every mempool
//!   transaction
//!
//! Submissions are validated and applied against the pending view only.
//! Blocks (local or imported) are applied to a copy of the committed view
//! and swapped in after the log append succeeds, so a rejected block or a
//! failed write never leaves a partial update behind.

use crate::core::block::{Block, BlockHeader, BlockRecord};
use crate::core::genesis::Genesis;
use crate::core::transaction::{Account, Transaction};
use crate::crypto::Hash;
use crate::storage::{BalancesSnapshot, BlockStore, DataDir, StorageError};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient balance: '{account}' has {balance}, transaction costs {value}")]
    InsufficientBalance {
        account: Account,
        balance: u64,
        value: u64,
    },
    #[error("Balance overflow crediting '{0}'")]
    BalanceOverflow(Account),
    #[error("Next expected block must be {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },
    #[error("Next block parent hash must be {expected}, got {got}")]
    ParentMismatch { expected: Hash, got: Hash },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Validation failures reject only the offending transaction or block
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientBalance { .. }
                | LedgerError::BalanceOverflow(_)
                | LedgerError::SequenceError { .. }
                | LedgerError::ParentMismatch { .. }
        )
    }
}

/// Credit and debit a single transaction on a balances map.
///
/// All checks run before the map is touched, so an error leaves it unchanged.
pub fn apply_transaction(
    balances: &mut BTreeMap<Account, u64>,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    if tx.is_reward() {
        let credited = balance_in(balances, &tx.to)
            .checked_add(tx.value)
            .ok_or_else(|| LedgerError::BalanceOverflow(tx.to.clone()))?;
        balances.insert(tx.to.clone(), credited);
        return Ok(());
    }

    let from_balance = balance_in(balances, &tx.from);
    if from_balance < tx.value {
        return Err(LedgerError::InsufficientBalance {
            account: tx.from.clone(),
            balance: from_balance,
            value: tx.value,
        });
    }

    let debited = from_balance - tx.value;
    let to_before = if tx.to == tx.from {
        debited
    } else {
        balance_in(balances, &tx.to)
    };
    let credited = to_before
        .checked_add(tx.value)
        .ok_or_else(|| LedgerError::BalanceOverflow(tx.to.clone()))?;

    balances.insert(tx.from.clone(), debited);
    balances.insert(tx.to.clone(), credited);
    Ok(())
}

fn balance_in(balances: &BTreeMap<Account, u64>, account: &Account) -> u64 {
    balances.get(account).copied().unwrap_or(0)
}

/// Committed chain state: the replay of the block log on top of genesis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainState {
    balances: BTreeMap<Account, u64>,
    latest_hash: Hash,
    latest_number: u64,
    has_genesis: bool,
}

impl ChainState {
    /// State before any block has been stored
    pub fn from_genesis(genesis: &Genesis) -> Self {
        Self {
            balances: genesis.balances.clone(),
            ..Default::default()
        }
    }

    /// Height the next block must carry
    pub fn next_block_number(&self) -> u64 {
        self.latest_number + 1
    }

    /// Check that a header extends this chain.
    ///
    /// Once a block is stored, the header must carry the next number and
    /// point at the latest hash. The first stored block may be height 0 (a
    /// transmitted genesis block) or height 1; its parent is not checked.
    pub fn check_extension(&self, header: &BlockHeader) -> Result<(), LedgerError> {
        if !self.has_genesis {
            if header.number > self.next_block_number() {
                return Err(LedgerError::SequenceError {
                    expected: self.next_block_number(),
                    got: header.number,
                });
            }
            return Ok(());
        }

        if header.number != self.next_block_number() {
            return Err(LedgerError::SequenceError {
                expected: self.next_block_number(),
                got: header.number,
            });
        }

        if header.parent != self.latest_hash {
            return Err(LedgerError::ParentMismatch {
                expected: self.latest_hash,
                got: header.parent,
            });
        }

        Ok(())
    }

    /// Replay stored records on top of genesis
    pub fn replay(genesis: &Genesis, records: &[BlockRecord]) -> Result<Self, LedgerError> {
        let mut state = Self::from_genesis(genesis);
        for record in records {
            state.apply_block(&record.block, record.hash)?;
        }
        Ok(state)
    }

    /// Validate and apply a block whose hash is `hash`.
    ///
    /// Stops at the first bad transaction and leaves `self` half-applied;
    /// callers that need atomicity apply to a clone.
    pub fn apply_block(&mut self, block: &Block, hash: Hash) -> Result<(), LedgerError> {
        self.check_extension(&block.header)?;

        for tx in &block.transactions {
            apply_transaction(&mut self.balances, tx)?;
        }

        self.latest_hash = hash;
        self.latest_number = block.header.number;
        self.has_genesis = true;
        Ok(())
    }

    pub fn balances(&self) -> &BTreeMap<Account, u64> {
        &self.balances
    }

    pub fn latest_hash(&self) -> Hash {
        self.latest_hash
    }

    pub fn latest_number(&self) -> u64 {
        self.latest_number
    }

    pub fn has_genesis(&self) -> bool {
        self.has_genesis
    }
}

/// The node's ledger
pub struct Ledger {
    committed: ChainState,
    pending: BTreeMap<Account, u64>,
    mempool: Vec<Transaction>,
    store: BlockStore,
}

impl Ledger {
    /// Open the ledger in `data_dir`, replaying the whole block log
    pub fn open(data_dir: &Path) -> Result<Self, LedgerError> {
        let mut store = BlockStore::open(data_dir)?;
        let genesis = store.load_genesis()?;

        let records = store.recover()?;
        let committed = ChainState::replay(&genesis, &records)?;

        log::info!(
            "Ledger loaded from {:?}: {} blocks, latest {} (#{})",
            data_dir,
            records.len(),
            committed.latest_hash,
            committed.latest_number
        );

        let ledger = Self {
            pending: committed.balances.clone(),
            committed,
            mempool: Vec::new(),
            store,
        };
        ledger.write_cache();

        Ok(ledger)
    }

    /// Replay the block log of `data_dir` without modifying anything on
    /// disk. Missing files read as the default genesis and an empty log, and
    /// a trailing line still being written by a running node is skipped.
    pub fn load(data_dir: &Path) -> Result<ChainState, LedgerError> {
        let dir = DataDir::new(data_dir);

        let genesis = if dir.genesis_path().exists() {
            dir.load_genesis()?
        } else {
            Genesis::default()
        };
        let records = if dir.blocks_path().exists() {
            dir.read_records()?
        } else {
            Vec::new()
        };

        ChainState::replay(&genesis, &records)
    }

    /// Validate a transaction against the pending balances and queue it
    pub fn submit(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        apply_transaction(&mut self.pending, &tx)?;
        self.mempool.push(tx);
        Ok(())
    }

    /// Bundle the mempool into a new block and append it to the log.
    ///
    /// Nothing in memory changes unless the append succeeds.
    pub fn persist_mempool(&mut self) -> Result<Hash, LedgerError> {
        let block = Block::new(
            self.committed.latest_hash,
            self.committed.next_block_number(),
            now_unix(),
            self.mempool.clone(),
        );
        let record = BlockRecord::new(block).map_err(StorageError::from)?;

        self.store.append(&record)?;

        self.committed.balances = self.pending.clone();
        self.committed.latest_hash = record.hash;
        self.committed.latest_number = record.block.header.number;
        self.committed.has_genesis = true;
        self.mempool.clear();

        log::info!(
            "Persisted block {} (#{}, {} txs)",
            record.hash,
            record.block.header.number,
            record.block.tx_count()
        );
        self.write_cache();

        Ok(record.hash)
    }

    /// Submit a single transaction and persist it as its own block.
    ///
    /// If the block cannot be written the transaction is taken back out of
    /// the mempool, so the caller's error means it was not accepted.
    pub fn commit_transaction(&mut self, tx: Transaction) -> Result<Hash, LedgerError> {
        self.submit(tx)?;

        match self.persist_mempool() {
            Ok(hash) => Ok(hash),
            Err(e) => {
                self.mempool.pop();
                self.rebase_mempool();
                Err(e)
            }
        }
    }

    /// Import a block received from a peer.
    ///
    /// The block is validated on a copy of the committed state; the copy
    /// replaces the live state only once the record is on disk.
    pub fn add_block(&mut self, block: Block) -> Result<Hash, LedgerError> {
        let hash = block.hash().map_err(StorageError::from)?;

        let mut next = self.committed.clone();
        next.apply_block(&block, hash)?;

        let record = BlockRecord { hash, block };
        self.store.append(&record)?;
        self.committed = next;

        log::info!(
            "Imported block {} (#{}, {} txs)",
            hash,
            record.block.header.number,
            record.block.tx_count()
        );

        self.rebase_mempool();
        self.write_cache();

        Ok(hash)
    }

    /// Rebuild the pending view on top of the committed balances, dropping
    /// queued transactions that no longer apply.
    fn rebase_mempool(&mut self) {
        let mut pending = self.committed.balances.clone();
        let queued = std::mem::take(&mut self.mempool);

        for tx in queued {
            match apply_transaction(&mut pending, &tx) {
                Ok(()) => self.mempool.push(tx),
                Err(e) => log::warn!("Dropping mempool transaction {} -> {}: {}", tx.from, tx.to, e),
            }
        }

        self.pending = pending;
    }

    /// Every stored block strictly after `hash`
    pub fn blocks_after(&self, hash: &Hash) -> Result<Vec<Block>, LedgerError> {
        Ok(self.store.blocks_after(hash)?)
    }

    pub fn latest_hash(&self) -> Hash {
        self.committed.latest_hash
    }

    pub fn latest_number(&self) -> u64 {
        self.committed.latest_number
    }

    pub fn has_genesis(&self) -> bool {
        self.committed.has_genesis
    }

    /// Committed balance of an account
    pub fn balance_of(&self, account: &Account) -> u64 {
        self.committed.balances.get(account).copied().unwrap_or(0)
    }

    /// Balance including queued mempool transactions
    pub fn pending_balance_of(&self, account: &Account) -> u64 {
        self.pending.get(account).copied().unwrap_or(0)
    }

    /// Committed balances
    pub fn balances(&self) -> &BTreeMap<Account, u64> {
        &self.committed.balances
    }

    pub fn mempool(&self) -> &[Transaction] {
        &self.mempool
    }

    pub fn chain_state(&self) -> &ChainState {
        &self.committed
    }

    fn write_cache(&self) {
        let snapshot = BalancesSnapshot {
            block_hash: self.committed.latest_hash,
            block_number: self.committed.latest_number,
            balances: self.committed.balances.clone(),
        };
        if let Err(e) = self.store.write_snapshot(&snapshot) {
            log::warn!("Failed to write balances cache: {}", e);
        }
    }

    /// Flush the log and balances cache
    pub fn flush(&self) {
        self.write_cache();
        if let Err(e) = self.store.sync() {
            log::warn!("Failed to sync block log: {}", e);
        }
    }

    pub fn close(self) {
        self.flush();
        log::info!(
            "Ledger closed at {} (#{})",
            self.latest_hash(),
            self.latest_number()
        );
    }
}

fn now_unix() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
