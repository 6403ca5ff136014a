//! Where cadence keeps its files.
//!
//! `CADENCE_DATA_DIR` and `CADENCE_CONFIG_DIR` replace the platform
//! directories from [`dirs`] wholesale; nothing is appended to an override.

use std::path::PathBuf;

const APP_DIR: &str = "cadence";

/// Override from `var`, else `platform/cadence`, else `fallback`.
fn resolve(var: &str, platform: Option<PathBuf>, fallback: &str) -> PathBuf {
    std::env::var_os(var)
        .map(PathBuf::from)
        .or_else(|| platform.map(|base| base.join(APP_DIR)))
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Root for ledgers and job output.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve("CADENCE_DATA_DIR", dirs::data_dir(), "/tmp/cadence-data")
}

/// Directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve("CADENCE_CONFIG_DIR", dirs::config_dir(), "/tmp/cadence-config")
}

#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default SQLite ledger.
#[must_use]
pub fn ledger_db_file() -> PathBuf {
    data_dir().join("ledger.db")
}

/// Default JSON Lines ledger.
#[must_use]
pub fn ledger_jsonl_file() -> PathBuf {
    data_dir().join("ledger.jsonl")
}

/// Written once by the bootstrap job.
#[must_use]
pub fn bootstrap_marker_file() -> PathBuf {
    data_dir().join("bootstrap.marker")
}
