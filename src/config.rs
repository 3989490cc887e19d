// ⚙️ Configuration - TOML file with defaults for every field
//
// Example billing-ledger.toml:
//
//   database_path = "billing.db"
//   busy_timeout_ms = 5000
//   wal = true
//   dunning_policy = "release_on_paid"
//   default_actor = "system"
//   log_filter = "billing_ledger=info"

use crate::db::StoreOptions;
use crate::reconciliation::DunningPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// How long a writer waits on a locked database before failing
    pub busy_timeout_ms: u64,

    /// Write-ahead logging
    pub wal: bool,

    /// How the reconciler treats invoices in collections
    pub dunning_policy: DunningPolicy,

    /// Actor recorded in the audit trail when the caller names none
    pub default_actor: String,

    /// tracing-subscriber filter directive (RUST_LOG wins when set)
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("billing.db"),
            busy_timeout_ms: 5_000,
            wal: true,
            dunning_policy: DunningPolicy::default(),
            default_actor: "system".to_string(),
            log_filter: "billing_ledger=info".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse ledger configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Load `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            wal: self.wal,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}
