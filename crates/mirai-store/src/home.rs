use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::store::Store;

pub const DATA_DIR_ENV: &str = "MIRAI_DATA_DIR";
pub const DB_FILE: &str = "treasury.db";
pub const CONFIG_FILE: &str = "mirai.toml";

/// Default base directory for all mirai storage.
fn default_base_dir() -> PathBuf {
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs_home().join(".mirai"))
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// The data directory.
///
/// Layout:
/// ```text
/// ~/.mirai/
/// ├── mirai.toml
/// └── treasury.db
/// ```
#[derive(Debug, Clone)]
pub struct TreasuryHome {
    base: PathBuf,
}

impl TreasuryHome {
    /// `base_dir` overrides `MIRAI_DATA_DIR`, which overrides `~/.mirai`.
    /// The directory is created if needed.
    pub fn open(base_dir: Option<&Path>) -> Result<Self> {
        let base = base_dir.map(PathBuf::from).unwrap_or_else(default_base_dir);
        fs::create_dir_all(&base).map_err(|source| StoreError::Io {
            path: base.clone(),
            source,
        })?;
        Ok(Self { base })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn db_path(&self) -> PathBuf {
        self.base.join(DB_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.base.join(CONFIG_FILE)
    }

    pub fn load_config(&self) -> Result<Config> {
        Config::load(&self.config_path())
    }

    pub fn open_store(&self) -> Result<Store> {
        let path = self.db_path();
        tracing::debug!(path = %path.display(), "opening treasury database");
        Store::open(&path)
    }
}
