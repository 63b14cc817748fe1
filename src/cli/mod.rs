//! Command-line front-end

pub mod commands;

pub use commands::{
    cmd_balances_list, cmd_migrate, cmd_run, cmd_version, expand_path, migration_batches, CliResult,
};
