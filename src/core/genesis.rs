//! Genesis configuration
//!
//! The genesis file seeds the initial balances. It is implicit height 0 of
//! the chain and is never transmitted between nodes.

use crate::core::transaction::Account;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Chain identifier written into a fresh genesis file
pub const DEFAULT_CHAIN_ID: &str = "the-blockchain-bar-ledger";

/// Genesis timestamp written into a fresh genesis file
pub const DEFAULT_GENESIS_TIME: &str = "2021-05-26T00:00:00.000000000Z";

/// Genesis loading errors
#[derive(Error, Debug)]
pub enum GenesisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid genesis file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Initial ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    #[serde(default)]
    pub genesis_time: String,
    #[serde(default)]
    pub chain_id: String,
    pub balances: BTreeMap<Account, u64>,
}

impl Genesis {
    /// Genesis with the given balances and default metadata
    pub fn with_balances(balances: BTreeMap<Account, u64>) -> Self {
        Self {
            genesis_time: DEFAULT_GENESIS_TIME.to_string(),
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            balances,
        }
    }

    /// Load genesis from a JSON file
    pub fn load(path: &Path) -> Result<Self, GenesisError> {
        let content = fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Write genesis to a JSON file
    pub fn write(&self, path: &Path) -> Result<(), GenesisError> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Sum of all initial balances
    pub fn total_supply(&self) -> u128 {
        self.balances.values().map(|v| *v as u128).sum()
    }
}

impl Default for Genesis {
    fn default() -> Self {
        let mut balances = BTreeMap::new();
        balances.insert(Account::from("andrej"), 1_000_000);
        Self::with_balances(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("genesis.json");

        let genesis = Genesis::default();
        genesis.write(&path).unwrap();

        let loaded = Genesis::load(&path).unwrap();
        assert_eq!(loaded, genesis);
        assert_eq!(loaded.balances[&Account::from("andrej")], 1_000_000);
    }

    #[test]
    fn test_load_minimal_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("genesis.json");
        std::fs::write(&path, r#"{"balances": {"A": 1000, "B": 5}}"#).unwrap();

        let genesis = Genesis::load(&path).unwrap();
        assert_eq!(genesis.balances.len(), 2);
        assert_eq!(genesis.total_supply(), 1005);
        assert!(genesis.chain_id.is_empty());
    }

    #[test]
    fn test_invalid_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("genesis.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(Genesis::load(&path), Err(GenesisError::Parse(_))));
    }
}
