use crate::ledger::LedgerSettings;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ─── Top-level config ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: default_database_path(),
            idempotency: IdempotencyConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("orderd.sqlite")
}

// ─── Idempotency ledger config ────────────────────────────────────

/// All idempotency timing is explicit configuration injected into the
/// ledger at construction; the ledger itself carries no defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Lifetime of a committed record, in hours.
    #[serde(default = "default_record_ttl_hours")]
    pub record_ttl_hours: i64,

    /// Lifetime of a pending reservation, in seconds. Bounds how long a
    /// crashed request can hold a key before it is treated as absent.
    /// Must exceed the gateway request timeout, so a still-running request
    /// never outlives its own reservation; `validate` enforces this.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: i64,

    /// Cadence of the expired-record sweeper, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            record_ttl_hours: default_record_ttl_hours(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_record_ttl_hours() -> i64 {
    24
}

fn default_reservation_ttl_secs() -> i64 {
    120
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl IdempotencyConfig {
    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            record_ttl: chrono::Duration::hours(self.record_ttl_hours),
            reservation_ttl: chrono::Duration::seconds(self.reservation_ttl_secs),
        }
    }
}

impl Config {
    /// Load from a TOML file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idempotency.record_ttl_hours <= 0 {
            anyhow::bail!("idempotency.record_ttl_hours must be positive");
        }
        if self.idempotency.reservation_ttl_secs <= 0 {
            anyhow::bail!("idempotency.reservation_ttl_secs must be positive");
        }
        let request_timeout =
            i64::try_from(crate::gateway::REQUEST_TIMEOUT_SECS).unwrap_or(i64::MAX);
        if self.idempotency.reservation_ttl_secs <= request_timeout {
            anyhow::bail!(
                "idempotency.reservation_ttl_secs must exceed the {request_timeout}s request timeout"
            );
        }
        if self.idempotency.sweep_interval_secs == 0 {
            anyhow::bail!("idempotency.sweep_interval_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.idempotency.record_ttl_hours, 24);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "port = 8080\n\n[idempotency]\nrecord_ttl_hours = 1\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.idempotency.record_ttl_hours, 1);
        assert_eq!(config.idempotency.sweep_interval_secs, 3600);
    }

    #[test]
    fn zero_ttl_rejected() {
        let mut config = Config::default();
        config.idempotency.record_ttl_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reservation_ttl_must_outlast_request_timeout() {
        let mut config = Config::default();
        config.idempotency.reservation_ttl_secs =
            i64::try_from(crate::gateway::REQUEST_TIMEOUT_SECS).unwrap();
        assert!(config.validate().is_err());

        config.idempotency.reservation_ttl_secs += 1;
        config.validate().unwrap();
    }
}
