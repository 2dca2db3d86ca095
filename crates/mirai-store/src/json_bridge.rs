use std::fs;
use std::path::Path;

use mirai_core::{Address, SnapshotError, TreasurySnapshot, export_json, import_json};

use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    pub fn snapshot(&self, ledger: &Address, now: i64) -> Result<TreasurySnapshot> {
        let treasury = self.load_treasury(ledger)?;
        Ok(TreasurySnapshot::from_treasury(&treasury, now))
    }

    /// Export one ledger as a 1.0.0 JSON snapshot string.
    pub fn export_json_string(&self, ledger: &Address, now: i64) -> Result<String> {
        let treasury = self.load_treasury(ledger)?;
        export_json(&treasury, now)
            .map_err(|e| StoreError::InvalidData(format!("JSON export failed: {e}")))
    }

    pub fn export_json_file(&self, ledger: &Address, path: &Path, now: i64) -> Result<()> {
        let json = self.export_json_string(ledger, now)?;
        fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Import a snapshot into this store. Returns the imported ledger id.
    pub fn import_json_str(&self, json: &str) -> Result<Address> {
        let treasury = import_json(json).map_err(|e| match e {
            SnapshotError::Treasury(e) => StoreError::Treasury(e),
            other => StoreError::InvalidData(format!("invalid snapshot: {other}")),
        })?;
        self.import_treasury(&treasury)?;
        Ok(treasury.ledger().id)
    }

    pub fn import_json_file(&self, path: &Path) -> Result<Address> {
        let json = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.import_json_str(&json)
    }
}
