//! Configuration types for the scheduler host.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cadence_dirs;
use crate::error::{Result, SchedulerError};
use crate::scheduler::pool::LedgerFailurePolicy;
use crate::scheduler::task::FailurePolicy;

/// Top-level configuration, usually loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Task pool loop settings.
    pub pool: PoolConfig,
    /// Execution ledger backend.
    pub ledger: LedgerConfig,
    /// Log filter settings.
    pub logging: LoggingConfig,
}

/// Task pool loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Persist `SKIPPED` records too. Off by default to bound ledger growth.
    pub persist_skipped: bool,
    /// How failed runs move `last_success` for tasks registered through the pool.
    pub failure_policy: FailurePolicy,
    /// What the loop does when a batch write to the ledger fails.
    pub ledger_failure: LedgerFailurePolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            persist_skipped: false,
            failure_policy: FailurePolicy::default(),
            ledger_failure: LedgerFailurePolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Tick interval, never shorter than one second.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

/// Which ledger adapter to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    /// In-process only; history is lost on restart.
    Memory,
    /// Append-only JSON Lines file.
    Jsonl,
    /// SQLite database.
    #[default]
    Sqlite,
}

/// Execution ledger settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Ledger file (None = backend default under the data directory).
    pub path: Option<PathBuf>,
}

impl LedgerConfig {
    /// Configured path, or the backend's default location.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match self.backend {
            LedgerBackend::Memory => PathBuf::from(":memory:"),
            LedgerBackend::Jsonl => cadence_dirs::ledger_jsonl_file(),
            LedgerBackend::Sqlite => cadence_dirs::ledger_db_file(),
        }
    }
}

/// Log filter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "cadence=info".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Parse a TOML config file.
    ///
    /// # Errors
    ///
    /// I/O failures surface as [`SchedulerError::Io`], malformed TOML as
    /// [`SchedulerError::Config`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| config_err(path, e))
    }

    /// Write this config as TOML, creating missing parent directories.
    ///
    /// # Errors
    ///
    /// Same as [`SchedulerConfig::from_file`].
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let rendered = toml::to_string_pretty(self).map_err(|e| config_err(path, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Where the host looks for its config when none is given.
    ///
    /// Same as [`cadence_dirs::config_file`], so `CADENCE_CONFIG_DIR` applies.
    pub fn default_config_path() -> PathBuf {
        cadence_dirs::config_file()
    }
}

fn config_err(path: &Path, e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Config(format!("{}: {e}", path.display()))
}
