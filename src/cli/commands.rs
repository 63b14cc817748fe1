//! CLI commands for the ledger node
//!
//! Implements the command handlers behind the `ledger` binary.

use crate::core::{Block, Ledger, Transaction};
use crate::network::{Node, NodeConfig};
use std::path::{Path, PathBuf};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Expand a leading `~/` to the user's home directory
pub fn expand_path(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

/// Launch a node and serve until Ctrl-C
pub fn cmd_run(config: NodeConfig) -> CliResult<()> {
    println!("🌐 Launching ledger node...");
    println!("   Data directory: {}", config.data_dir.display());
    println!("   Listening on:   http://{}:{}", config.ip, config.port);
    println!(
        "   Bootstrap peer: {}",
        config.bootstrap.tcp_address()
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let node = Node::new(config)?;
        node.run().await
    })?;

    println!("📴 Node stopped");
    Ok(())
}

/// Replay the block log and print balances at the latest block.
///
/// Only reads the data directory, so it is safe next to a running node.
pub fn cmd_balances_list(data_dir: &Path) -> CliResult<()> {
    let state = Ledger::load(data_dir)?;

    println!("💰 Accounts balances at {}:", state.latest_hash());
    println!("__________________");
    println!();
    for (account, balance) in state.balances() {
        println!("{}: {}", account, balance);
    }

    Ok(())
}

/// Transaction batches of the demo chain, one block each
pub fn migration_batches() -> Vec<Vec<Transaction>> {
    vec![
        vec![
            Transaction::new("andrej", "andrej", 3, ""),
            Transaction::reward("andrej", 700),
        ],
        vec![
            Transaction::new("andrej", "babayaga", 2000, ""),
            Transaction::reward("andrej", 100),
            Transaction::new("babayaga", "andrej", 1, ""),
            Transaction::new("babayaga", "caesar", 1000, ""),
            Transaction::new("babayaga", "andrej", 50, ""),
            Transaction::reward("andrej", 600),
        ],
    ]
}

/// Seed the data directory with the demo chain on top of its latest block
pub fn cmd_migrate(data_dir: &Path) -> CliResult<()> {
    let mut ledger = Ledger::open(data_dir)?;

    for batch in migration_batches() {
        let block = Block::new(
            ledger.latest_hash(),
            ledger.chain_state().next_block_number(),
            u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default(),
            batch,
        );
        let hash = ledger.add_block(block)?;
        println!("📦 Block #{} persisted: {}", ledger.latest_number(), hash);
    }

    ledger.close();
    Ok(())
}

pub fn cmd_version() {
    println!("ledger {}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path() {
        let plain = Path::new("/var/lib/ledger");
        assert_eq!(expand_path(plain), plain.to_path_buf());

        let relative = Path::new("data/~node");
        assert_eq!(expand_path(relative), relative.to_path_buf());

        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_path(Path::new("~/.ledger")),
                PathBuf::from(home).join(".ledger")
            );
        }
    }

    #[test]
    fn test_migrate_seeds_demo_chain() {
        let dir = tempfile::tempdir().unwrap();
        cmd_migrate(dir.path()).unwrap();

        let state = Ledger::load(dir.path()).unwrap();
        assert_eq!(state.latest_number(), 2);
        let balance = |account: &str| state.balances()[&crate::core::Account::from(account)];
        assert_eq!(balance("andrej"), 1_000_000 + 700 - 2000 + 100 + 1 + 50 + 600);
        assert_eq!(balance("babayaga"), 2000 - 1 - 1000 - 50);
        assert_eq!(balance("caesar"), 1000);

        // Running it again extends the chain instead of colliding with it
        cmd_migrate(dir.path()).unwrap();
        assert_eq!(Ledger::load(dir.path()).unwrap().latest_number(), 4);
    }

    #[test]
    fn test_balances_list_on_fresh_dir() {
        let dir = tempfile::tempdir().unwrap();
        cmd_balances_list(dir.path()).unwrap();
        assert!(!dir.path().join("database").exists());
    }
}
