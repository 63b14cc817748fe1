//! Ledger node CLI Application
//!
//! Runs a replicated ledger node or inspects a local data directory.

use clap::{Parser, Subcommand};
use ledger_node::cli;
use ledger_node::network::node::{DEFAULT_HTTP_PORT, DEFAULT_IP};
use ledger_node::network::{NodeConfig, PeerNode};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ledger")]
#[command(version)]
#[command(about = "A minimal replicated ledger node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the node and its HTTP API
    Run {
        /// Data directory holding `database/`
        #[arg(long, default_value = ".ledger_data")]
        datadir: PathBuf,

        /// Address advertised to peers
        #[arg(long, default_value = DEFAULT_IP)]
        ip: String,

        /// HTTP port
        #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
        port: u16,

        /// Bootstrap peer address
        #[arg(long, default_value = DEFAULT_IP)]
        bootstrap_ip: String,

        /// Bootstrap peer port
        #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
        bootstrap_port: u16,

        /// Seconds between sync rounds
        #[arg(long, default_value = "45")]
        sync_interval_secs: u64,
    },

    /// Balances operations
    Balances {
        #[command(subcommand)]
        action: BalancesCommands,
    },

    /// Seed the data directory with the demo chain
    Migrate {
        /// Data directory holding `database/`
        #[arg(long, default_value = ".ledger_data")]
        datadir: PathBuf,
    },

    /// Print the version
    Version,
}

#[derive(Subcommand)]
enum BalancesCommands {
    /// List balances at the latest block
    List {
        /// Data directory holding `database/`
        #[arg(long, default_value = ".ledger_data")]
        datadir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            datadir,
            ip,
            port,
            bootstrap_ip,
            bootstrap_port,
            sync_interval_secs,
        } => {
            let config = NodeConfig {
                data_dir: cli::expand_path(&datadir),
                ip,
                port,
                bootstrap: PeerNode::new(bootstrap_ip, bootstrap_port, true, false),
                sync_interval: Duration::from_secs(sync_interval_secs),
                ..Default::default()
            };
            cli::cmd_run(config)?;
        }

        Commands::Balances { action } => match action {
            BalancesCommands::List { datadir } => {
                cli::cmd_balances_list(&cli::expand_path(&datadir))?;
            }
        },

        Commands::Migrate { datadir } => {
            cli::cmd_migrate(&cli::expand_path(&datadir))?;
        }

        Commands::Version => cli::cmd_version(),
    }

    Ok(())
}
