//! Config loading and persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::worker::Currency;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub limits: RefreshLimits,
    pub allowance: Allowance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. "info" or "piecework=debug".
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Timing knobs of the worker discovery engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshLimits {
    /// How long a worker-state generation stays current before a caller may
    /// trigger the next round of has-sector queries.
    pub worker_state_reset_ms: u64,
    /// How long one discovery pass waits on outstanding has-sector
    /// responses before giving up on the stragglers.
    pub has_sector_timeout_ms: u64,
}

impl RefreshLimits {
    pub fn worker_state_reset_time(&self) -> Duration {
        Duration::from_millis(self.worker_state_reset_ms)
    }

    pub fn has_sector_timeout(&self) -> Duration {
        Duration::from_millis(self.has_sector_timeout_ms)
    }
}

impl Default for RefreshLimits {
    fn default() -> Self {
        Self {
            // 9 hours between generations, 3 minutes per gather pass.
            worker_state_reset_ms: 9 * 60 * 60 * 1000,
            has_sector_timeout_ms: 3 * 60 * 1000,
        }
    }
}

/// Renter budget parameters used for price-gouging decisions.
///
/// `funds == 0` disables the cost-based checks: with no budget there is no
/// baseline for deciding what counts as gouging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Allowance {
    /// Total spendable funds for the current period.
    pub funds: Currency,
    /// Cap on a host's per-byte download price. Zero means uncapped.
    pub max_download_bandwidth_price: Currency,
    /// Cap on a host's per-byte upload price. Zero means uncapped.
    pub max_upload_bandwidth_price: Currency,
    /// Bytes of download traffic expected over the period.
    pub expected_download: u64,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Load the config file at `path`, or the defaults if it does not exist,
/// then apply environment overrides on top.
pub fn load_or_default(path: &Path) -> ConfigResult<Config> {
    let mut config = match load(path)? {
        Some(config) => config,
        None => Config::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn load(path: &Path) -> ConfigResult<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Apply `PIECEWORK_*` environment overrides. Unparsable values are ignored
/// with a warning rather than failing startup.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(filter) = std::env::var("PIECEWORK_LOG_FILTER") {
        config.logging.filter = filter;
    }
    override_u64(
        "PIECEWORK_WORKER_STATE_RESET_MS",
        &mut config.limits.worker_state_reset_ms,
    );
    override_u64(
        "PIECEWORK_HAS_SECTOR_TIMEOUT_MS",
        &mut config.limits.has_sector_timeout_ms,
    );
    override_u64("PIECEWORK_ALLOWANCE_FUNDS", &mut config.allowance.funds);
    override_u64(
        "PIECEWORK_EXPECTED_DOWNLOAD",
        &mut config.allowance.expected_download,
    );
}

fn override_u64(var: &str, target: &mut u64) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *target = value,
        Err(err) => {
            tracing::warn!("invalid {var}, ignoring: {err}");
        }
    }
}
