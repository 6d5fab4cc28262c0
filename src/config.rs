use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::catalog::{Catalog, CatalogError};
use crate::engine::RetryPolicy;

/// Backing store for reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// WAL-backed, survives restarts.
    Wal,
    /// Process memory only.
    Memory,
}

impl FromStr for StoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "wal" => Ok(StoreKind::Wal),
            "memory" => Ok(StoreKind::Memory),
            _ => Err(()),
        }
    }
}

/// Server settings, read once from `SEATD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub store: StoreKind,
    pub data_dir: PathBuf,
    pub catalog: Catalog,
    pub retry: RetryPolicy,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Tables(CatalogError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid {var}: {value:?}"),
            ConfigError::Tables(e) => write!(f, "invalid SEATD_TABLES: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Tables(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl Config {
    pub const WAL_FILE: &'static str = "reservations.wal";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults; set
    /// but unparseable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let catalog = match lookup("SEATD_TABLES") {
            Some(text) => Catalog::parse(&text).map_err(ConfigError::Tables)?,
            None => Catalog::restaurant_default(),
        };
        let max_attempts: u32 = parsed(&lookup, "SEATD_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "SEATD_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }
        let backoff_ms: u64 = parsed(&lookup, "SEATD_RETRY_BACKOFF_MS", 0)?;

        Ok(Self {
            bind: lookup("SEATD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SEATD_PORT", 5434)?,
            store: parsed(&lookup, "SEATD_STORE", StoreKind::Wal)?,
            data_dir: lookup("SEATD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            catalog,
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(backoff_ms)),
            max_connections: parsed(&lookup, "SEATD_MAX_CONNECTIONS", 256)?,
            compact_threshold: parsed(&lookup, "SEATD_COMPACT_THRESHOLD", 1000)?,
            metrics_port: match lookup("SEATD_METRICS_PORT") {
                Some(value) => Some(parse_value("SEATD_METRICS_PORT", value)?),
                None => None,
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(Self::WAL_FILE)
    }
}

fn parsed<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => parse_value(var, value),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}
