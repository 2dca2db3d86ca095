use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Contents of `mirai.toml`. Every section and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log: LogConfig,
    pub governance: GovernanceDefaults,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` wins over it.
    pub filter: Option<String>,
}

/// Limits applied to ledgers created by `init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GovernanceDefaults {
    pub max_entity_amount: Option<u64>,
    pub max_total_allocation: Option<u64>,
}

impl GovernanceDefaults {
    /// `(max_entity_amount, max_total_allocation)` if either is set.
    ///
    /// A missing per-entity cap falls back to the total cap so the pair is
    /// always ordered.
    pub fn limits(&self) -> Option<(u64, u64)> {
        if self.max_entity_amount.is_none() && self.max_total_allocation.is_none() {
            return None;
        }
        let total = self.max_total_allocation.unwrap_or(u64::MAX);
        let entity = self.max_entity_amount.unwrap_or(total);
        Some((entity, total))
    }
}

impl Config {
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::parse(&content).map_err(|source| StoreError::Config {
                    path: path.to_path_buf(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "config loaded");
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
            [log]
            filter = "info"

            [governance]
            max_entity_amount = 1000000000
            max_total_allocation = 10000000000
            "#,
        )
        .unwrap();
        assert_eq!(config.log.filter.as_deref(), Some("info"));
        assert_eq!(
            config.governance.limits(),
            Some((1_000_000_000, 10_000_000_000))
        );
    }

    #[test]
    fn test_empty_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.governance.limits(), None);
    }

    #[test]
    fn test_partial_limits() {
        let only_total = GovernanceDefaults {
            max_entity_amount: None,
            max_total_allocation: Some(500),
        };
        assert_eq!(only_total.limits(), Some((500, 500)));

        let only_entity = GovernanceDefaults {
            max_entity_amount: Some(10),
            max_total_allocation: None,
        };
        assert_eq!(only_entity.limits(), Some((10, u64::MAX)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::parse("[log]\nlevel = \"info\"\n").is_err());
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirai.toml");
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        fs::write(&path, "[governance]\nmax_entity_amount = -1\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(StoreError::Config { .. })
        ));
    }
}
