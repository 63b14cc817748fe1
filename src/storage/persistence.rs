//! Block log persistence layer
//!
//! On-disk layout under the data directory:
//!
//! ```text
//! database/genesis.json   initial balances, written once
//! database/blocks.db      append-only log, one {"hash","block"} JSON object per line
//! database/state.json     balances cache, best effort
//! ```
//!
//! The block log is the source of truth. Records are only ever appended and
//! each record is written with a single buffered write followed by an fsync,
//! so a crash leaves at most one torn trailing line behind.

use crate::core::block::{Block, BlockRecord};
use crate::core::genesis::{Genesis, GenesisError};
use crate::core::transaction::Account;
use crate::crypto::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory under the data dir holding all ledger files
pub const DATABASE_DIR: &str = "database";
pub const GENESIS_FILE: &str = "genesis.json";
pub const BLOCKS_FILE: &str = "blocks.db";
pub const STATE_FILE: &str = "state.json";

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Genesis error: {0}")]
    GenesisError(#[from] GenesisError),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Snapshot written to `state.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancesSnapshot {
    pub block_hash: Hash,
    pub block_number: u64,
    pub balances: BTreeMap<Account, u64>,
}

/// State of the last line of the block log
enum Tail {
    Clean,
    MissingNewline,
    Torn { offset: u64 },
}

struct LogScan {
    records: Vec<BlockRecord>,
    tail: Tail,
}

/// Paths of the ledger files inside a data directory
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_dir(&self) -> PathBuf {
        self.root.join(DATABASE_DIR)
    }

    pub fn genesis_path(&self) -> PathBuf {
        self.database_dir().join(GENESIS_FILE)
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.database_dir().join(BLOCKS_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.database_dir().join(STATE_FILE)
    }

    /// Create the database directory and seed the genesis file and an empty
    /// block log if they are missing. An existing genesis file is never
    /// rewritten.
    pub fn init(&self, genesis: &Genesis) -> Result<(), StorageError> {
        fs::create_dir_all(self.database_dir())?;

        let genesis_path = self.genesis_path();
        if !genesis_path.exists() {
            log::info!("Writing genesis file to {:?}", genesis_path);
            genesis.write(&genesis_path)?;
        }

        let blocks_path = self.blocks_path();
        if !blocks_path.exists() {
            File::create(&blocks_path)?;
        }

        Ok(())
    }

    /// Load the genesis file of this data directory
    pub fn load_genesis(&self) -> Result<Genesis, StorageError> {
        Ok(Genesis::load(&self.genesis_path())?)
    }

    /// Read every committed record without touching any file.
    ///
    /// Safe to call while a node is appending to the same log: an in-flight
    /// trailing line is skipped rather than repaired.
    pub fn read_records(&self) -> Result<Vec<BlockRecord>, StorageError> {
        Ok(self.scan_log()?.records)
    }

    fn scan_log(&self) -> Result<LogScan, StorageError> {
        let content = fs::read(self.blocks_path())?;

        let mut records = Vec::new();
        let mut tail = Tail::Clean;
        let mut offset = 0usize;

        for (index, line) in content.split(|b| *b == b'\n').enumerate() {
            let line_start = offset;
            offset += line.len() + 1;

            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            let is_tail = offset > content.len();
            match serde_json::from_slice::<BlockRecord>(line) {
                Ok(record) => {
                    if is_tail {
                        tail = Tail::MissingNewline;
                    }
                    records.push(record);
                }
                Err(_) if is_tail => {
                    tail = Tail::Torn {
                        offset: line_start as u64,
                    };
                }
                Err(e) => {
                    return Err(StorageError::InvalidData(format!(
                        "corrupt block record on line {}: {}",
                        index + 1,
                        e
                    )));
                }
            }
        }

        Ok(LogScan { records, tail })
    }
}

/// Append-only block log
pub struct BlockStore {
    dir: DataDir,
    log: File,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
    #[cfg(test)]
    fail_next_append: Option<usize>,
}

impl BlockStore {
    /// Open the block log, creating the data directory with the default
    /// genesis if needed.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let dir = DataDir::new(data_dir);
        dir.init(&Genesis::default())?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.blocks_path())?;

        Ok(Self {
            dir,
            log,
            poisoned: false,
            #[cfg(test)]
            fail_next_append: None,
        })
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.dir
    }

    /// Load the genesis file of this data directory
    pub fn load_genesis(&self) -> Result<Genesis, StorageError> {
        self.dir.load_genesis()
    }

    /// Read every committed record in log order.
    ///
    /// A trailing line without a newline is an append that may have been
    /// interrupted; it is only returned if it parses.
    pub fn read_records(&self) -> Result<Vec<BlockRecord>, StorageError> {
        self.dir.read_records()
    }

    /// Read the log at startup and repair its tail.
    ///
    /// A torn trailing record was never committed, so it is cut off; a
    /// complete trailing record missing its newline gets one.
    pub fn recover(&mut self) -> Result<Vec<BlockRecord>, StorageError> {
        let scan = self.scan()?;
        let path = self.dir.blocks_path();

        match scan.tail {
            Tail::Clean => {}
            Tail::MissingNewline => {
                self.log.write_all(b"\n")?;
                self.log.sync_data()?;
            }
            Tail::Torn { offset } => {
                log::warn!("Discarding torn record at end of {:?}", path);
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(offset)?;
                file.sync_data()?;
            }
        }

        Ok(scan.records)
    }

    fn scan(&self) -> Result<LogScan, StorageError> {
        self.dir.scan_log()
    }

    /// Append a record to the log. The record is encoded fully in memory
    /// first and handed to the OS in one write.
    ///
    /// On failure the log is cut back to its previous length, so a record is
    /// either fully on disk or absent. If even that fails the store refuses
    /// further appends until it is reopened and recovered.
    pub fn append(&mut self, record: &BlockRecord) -> Result<(), StorageError> {
        if self.poisoned {
            return Err(StorageError::InvalidData(
                "block log has an unrecovered partial append".to_string(),
            ));
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let committed_len = self.log.metadata()?.len();
        if let Err(e) = self.write_line(&line) {
            match self.log.set_len(committed_len).and_then(|_| self.log.sync_data()) {
                Ok(()) => log::warn!("Rolled back failed append of block {}: {}", record.hash, e),
                Err(undo) => {
                    log::error!(
                        "Failed to roll back append of block {}: {} (after: {})",
                        record.hash,
                        undo,
                        e
                    );
                    self.poisoned = true;
                }
            }
            return Err(e.into());
        }

        log::debug!("Appended block record {}", record.hash);
        Ok(())
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.inject_failure(line)?;
        self.log.write_all(line)?;
        self.log.sync_data()
    }

    #[cfg(not(test))]
    fn inject_failure(&mut self, _line: &[u8]) -> io::Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn inject_failure(&mut self, line: &[u8]) -> io::Result<()> {
        match self.fail_next_append.take() {
            Some(written) => {
                self.log.write_all(&line[..written.min(line.len())])?;
                Err(io::Error::new(io::ErrorKind::Other, "injected write failure"))
            }
            None => Ok(()),
        }
    }

    /// Make the next append fail after writing `written` bytes of its line
    #[cfg(test)]
    pub(crate) fn fail_next_append(&mut self, written: usize) {
        self.fail_next_append = Some(written);
    }

    /// Every block strictly after `from` in log order.
    ///
    /// The zero hash selects the whole log; an unknown hash selects nothing.
    pub fn blocks_after(&self, from: &Hash) -> Result<Vec<Block>, StorageError> {
        let records = self.read_records()?;

        if from.is_empty() {
            return Ok(records.into_iter().map(|r| r.block).collect());
        }

        Ok(records
            .into_iter()
            .skip_while(|r| r.hash != *from)
            .skip(1)
            .map(|r| r.block)
            .collect())
    }

    /// Write the balances cache via a temporary file and atomic rename
    pub fn write_snapshot(&self, snapshot: &BalancesSnapshot) -> Result<(), StorageError> {
        let path = self.dir.state_path();
        let temp_path = self.dir.database_dir().join("state.json.tmp");

        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Read the balances cache, if one has been written
    pub fn read_snapshot(&self) -> Result<Option<BalancesSnapshot>, StorageError> {
        let path = self.dir.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Flush the log to disk
    pub fn sync(&self) -> Result<(), StorageError> {
        self.log.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::Transaction;

    fn record(parent: Hash, number: u64) -> BlockRecord {
        let block = Block::new(
            parent,
            number,
            number * 10,
            vec![Transaction::reward("miner", number)],
        );
        BlockRecord::new(block).unwrap()
    }

    #[test]
    fn test_open_initializes_data_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();

        assert!(store.data_dir().genesis_path().exists());
        assert!(store.data_dir().blocks_path().exists());
        assert_eq!(store.load_genesis().unwrap(), Genesis::default());
    }

    #[test]
    fn test_existing_genesis_is_kept() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = DataDir::new(temp_dir.path());

        let mut balances = BTreeMap::new();
        balances.insert(Account::from("A"), 1000);
        let custom = Genesis::with_balances(balances);
        dir.init(&custom).unwrap();

        let store = BlockStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.load_genesis().unwrap(), custom);
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open(temp_dir.path()).unwrap();

        let first = record(Hash::zero(), 1);
        let second = record(first.hash, 2);
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let records = store.read_records().unwrap();
        assert_eq!(records, vec![first.clone(), second.clone()]);

        let content = fs::read_to_string(store.data_dir().blocks_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn test_blocks_after() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open(temp_dir.path()).unwrap();

        let first = record(Hash::zero(), 1);
        let second = record(first.hash, 2);
        let third = record(second.hash, 3);
        for r in [&first, &second, &third] {
            store.append(r).unwrap();
        }

        let all = store.blocks_after(&Hash::zero()).unwrap();
        assert_eq!(all.len(), 3);

        let after_first = store.blocks_after(&first.hash).unwrap();
        assert_eq!(after_first, vec![second.block.clone(), third.block.clone()]);

        assert!(store.blocks_after(&third.hash).unwrap().is_empty());
        assert!(store.blocks_after(&Hash::digest(b"unknown")).unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open(temp_dir.path()).unwrap();

        let first = record(Hash::zero(), 1);
        store.append(&first).unwrap();

        let path = store.data_dir().blocks_path();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"hash":"00ab","blo"#).unwrap();
        drop(file);

        // Readers skip the torn line without touching the file
        assert_eq!(store.read_records().unwrap(), vec![first.clone()]);

        let records = store.recover().unwrap();
        assert_eq!(records, vec![first.clone()]);

        // The log is usable again after recovery
        let second = record(first.hash, 2);
        store.append(&second).unwrap();
        assert_eq!(store.read_records().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_missing_newline_is_repaired() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open(temp_dir.path()).unwrap();

        let first = record(Hash::zero(), 1);
        let path = store.data_dir().blocks_path();
        fs::write(&path, serde_json::to_string(&first).unwrap()).unwrap();

        assert_eq!(store.recover().unwrap(), vec![first.clone()]);

        let second = record(first.hash, 2);
        store.append(&second).unwrap();
        assert_eq!(store.read_records().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_corrupt_middle_record_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();

        let path = store.data_dir().blocks_path();
        fs::write(&path, "garbage\n").unwrap();

        assert!(matches!(
            store.read_records(),
            Err(StorageError::InvalidData(_))
        ));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();
        assert!(store.read_snapshot().unwrap().is_none());

        let mut balances = BTreeMap::new();
        balances.insert(Account::from("A"), 900);
        balances.insert(Account::from("B"), 100);
        let snapshot = BalancesSnapshot {
            block_hash: Hash::digest(b"tip"),
            block_number: 1,
            balances,
        };

        store.write_snapshot(&snapshot).unwrap();
        assert_eq!(store.read_snapshot().unwrap(), Some(snapshot));
    }
}
