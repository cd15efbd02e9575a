//! # Router Configuration
//!
//! Server address, credentials, pool sizing and eviction policy. Every field
//! has a default, so a partial JSON document (or none at all) is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectSettings;
use crate::error::{RouteError, RouteResult};
use crate::pool::PoolConfig;

/// Configuration for the dispatcher, its registry and every pool it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Server host name or IP.
    pub host: String,
    pub port: u16,
    /// Blank passwords are treated as absent.
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,

    /// Maximum total connections per pool (idle + in-use).
    pub max_total: usize,
    /// Maximum idle connections kept per pool.
    pub max_idle: usize,
    /// Connections opened when a pool is created.
    pub min_idle: usize,
    /// How long a call may wait for a connection.
    pub max_wait_ms: u64,
    pub test_on_borrow: bool,

    /// Pools untouched for longer than this are evicted.
    pub idle_ttl_secs: u64,
    /// Period of the background eviction sweep.
    pub sweep_interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            connect_timeout_ms: 2000,
            read_timeout_ms: 2000,
            write_timeout_ms: 2000,
            max_total: 100,
            max_idle: 20,
            min_idle: 5,
            max_wait_ms: 3000,
            test_on_borrow: true,
            idle_ttl_secs: 30 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl RouterConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> RouteResult<Self> {
        let config: RouterConfig =
            serde_json::from_str(json).map_err(|err| RouteError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects sizing combinations no pool could satisfy.
    pub fn validate(&self) -> RouteResult<()> {
        if self.host.trim().is_empty() {
            return Err(RouteError::InvalidConfig("host must not be empty".into()));
        }
        if self.max_total == 0 {
            return Err(RouteError::InvalidConfig("max_total must be at least 1".into()));
        }
        if self.max_idle > self.max_total {
            return Err(RouteError::InvalidConfig(format!(
                "max_idle ({}) exceeds max_total ({})",
                self.max_idle, self.max_total
            )));
        }
        if self.min_idle > self.max_idle {
            return Err(RouteError::InvalidConfig(format!(
                "min_idle ({}) exceeds max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_total: self.max_total,
            max_idle: self.max_idle,
            min_idle: self.min_idle,
            max_wait: Duration::from_millis(self.max_wait_ms),
            test_on_borrow: self.test_on_borrow,
        }
    }

    pub fn connect_settings(&self) -> ConnectSettings {
        ConnectSettings {
            host: self.host.clone(),
            port: self.port,
            password: self
                .password
                .as_ref()
                .filter(|password| !password.trim().is_empty())
                .cloned(),
            connect_timeout: non_zero_millis(self.connect_timeout_ms),
            read_timeout: non_zero_millis(self.read_timeout_ms),
            write_timeout: non_zero_millis(self.write_timeout_ms),
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// Zero disables the timeout.
fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
