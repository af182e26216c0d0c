use std::path::Path;

use ccnr_store::{EventMask, QueryDialect};
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};

/// Configuration for a [`Repository`](crate::Repository).
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// bootstrap_root_capabilities = false
/// binary_read_attempts = 5
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Enable versioning and referencing on the store root when missing.
    pub bootstrap_root_capabilities: bool,
    /// Reads of a binary property before a short read is reported.
    pub binary_read_attempts: u32,
    /// Dialect of the statements sent to the store.
    pub query_dialect: QueryDialect,
    /// Change kinds interest observers register for.
    pub observe_mask: EventMask,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            bootstrap_root_capabilities: true,
            binary_read_attempts: 3,
            query_dialect: QueryDialect::XPath,
            observe_mask: EventMask::ALL,
        }
    }
}

impl RepositoryConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> RepoResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| RepoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> RepoResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RepoError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> RepoResult<()> {
        if self.binary_read_attempts == 0 {
            return Err(RepoError::Config(
                "binary_read_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
