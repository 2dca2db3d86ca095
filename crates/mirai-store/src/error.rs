use std::path::PathBuf;

use mirai_core::{Address, TreasuryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Treasury(#[from] TreasuryError),

    #[error("ledger already initialized: {0}")]
    LedgerExists(Address),

    #[error("{0} is an escrow account and cannot be credited directly")]
    EscrowAccount(Address),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl StoreError {
    /// The engine-level rejection, if this error is one.
    pub fn treasury(&self) -> Option<&TreasuryError> {
        match self {
            StoreError::Treasury(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
