//! Value-transfer transactions
//!
//! Accounts are plain string identifiers. A transaction moves `value` from
//! `from` to `to`, except for reward transactions which mint new balance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker in `data` that turns a transaction into a minting reward
pub const REWARD_MARKER: &str = "reward";

/// An account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(String);

impl Account {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Account {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Account {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transfer of value between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Account,
    pub to: Account,
    pub value: u64,
    pub data: String,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(
        from: impl Into<Account>,
        to: impl Into<Account>,
        value: u64,
        data: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            value,
            data: data.into(),
        }
    }

    /// Create a reward transaction minting `value` to `to`
    pub fn reward(to: impl Into<Account>, value: u64) -> Self {
        let to = to.into();
        Self::new(to.clone(), to, value, REWARD_MARKER)
    }

    /// Rewards credit `to` without debiting anyone
    pub fn is_reward(&self) -> bool {
        self.data == REWARD_MARKER
    }
}
