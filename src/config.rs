//! Scan configuration from hints and environment variables.
//!
//! | Info key          | Environment variable          | Meaning                          |
//! |-------------------|-------------------------------|----------------------------------|
//! | `scan_algorithm`  | `FERROSCAN_SCAN_ALGORITHM`    | `auto`, `flat` or `hierarchical` |
//! | `scratch_limit`   | `FERROSCAN_SCRATCH_LIMIT`     | max live scratch bytes           |
//! | `recv_timeout_ms` | `FERROSCAN_RECV_TIMEOUT_MS`   | local engine receive timeout     |

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::info::Info;
use crate::scratch::ScratchPool;

/// Environment variable selecting the scan algorithm.
pub const ENV_SCAN_ALGORITHM: &str = "FERROSCAN_SCAN_ALGORITHM";
/// Environment variable bounding live scratch bytes.
pub const ENV_SCRATCH_LIMIT: &str = "FERROSCAN_SCRATCH_LIMIT";
/// Environment variable setting the local engine receive timeout.
pub const ENV_RECV_TIMEOUT_MS: &str = "FERROSCAN_RECV_TIMEOUT_MS";

const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Which scan builder a communicator should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlgorithmChoice {
    /// Hierarchical when the topology allows it, flat otherwise
    #[default]
    Auto,
    /// Always recursive doubling
    Flat,
    /// Hierarchical; still falls back to flat on unsuitable topologies
    Hierarchical,
}

impl FromStr for AlgorithmChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(AlgorithmChoice::Auto),
            "flat" | "recursive_doubling" | "rec_dbl" => Ok(AlgorithmChoice::Flat),
            "hierarchical" | "smp" => Ok(AlgorithmChoice::Hierarchical),
            _ => Err(Error::InvalidConfig {
                key: "scan_algorithm".into(),
                value: s.into(),
            }),
        }
    }
}

impl fmt::Display for AlgorithmChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlgorithmChoice::Auto => "auto",
            AlgorithmChoice::Flat => "flat",
            AlgorithmChoice::Hierarchical => "hierarchical",
        };
        f.write_str(s)
    }
}

/// Tunables shared by a communicator and its sub-communicators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Scan builder selection
    pub algorithm: AlgorithmChoice,
    /// Maximum live scratch bytes, unbounded when `None`
    pub scratch_limit: Option<usize>,
    /// How long the local engine waits for a message before failing the step
    pub recv_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            algorithm: AlgorithmChoice::Auto,
            scratch_limit: None,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidConfig {
        key: key.into(),
        value: value.into(),
    })
}

impl ScanConfig {
    /// Defaults overridden by `FERROSCAN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ScanConfig::default();
        if let Some(v) = lookup(ENV_SCAN_ALGORITHM) {
            config.algorithm = v.parse()?;
        }
        if let Some(v) = lookup(ENV_SCRATCH_LIMIT) {
            config.scratch_limit = Some(parse(ENV_SCRATCH_LIMIT, &v)?);
        }
        if let Some(v) = lookup(ENV_RECV_TIMEOUT_MS) {
            config.recv_timeout = Duration::from_millis(parse(ENV_RECV_TIMEOUT_MS, &v)?);
        }
        Ok(config)
    }

    /// Defaults overridden by hints.
    ///
    /// Recognised keys: `scan_algorithm`, `scratch_limit`, `recv_timeout_ms`.
    pub fn from_info(info: &Info) -> Result<Self> {
        ScanConfig::default().with_info(info)
    }

    /// Apply hints on top of this configuration.
    pub fn with_info(mut self, info: &Info) -> Result<Self> {
        if let Some(v) = info.get("scan_algorithm") {
            self.algorithm = v.parse()?;
        }
        if let Some(v) = info.get("scratch_limit") {
            self.scratch_limit = Some(parse("scratch_limit", v)?);
        }
        if let Some(v) = info.get("recv_timeout_ms") {
            self.recv_timeout = Duration::from_millis(parse("recv_timeout_ms", v)?);
        }
        Ok(self)
    }

    /// A scratch pool honouring `scratch_limit`.
    pub fn scratch_pool(&self) -> ScratchPool {
        match self.scratch_limit {
            Some(limit) => ScratchPool::with_limit(limit),
            None => ScratchPool::unbounded(),
        }
    }
}
