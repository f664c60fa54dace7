// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Supervisor process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// How many manager processes to keep alive
    pub managers: u32,
    /// Binary spawned into each manager slot
    pub manager_bin: PathBuf,
    /// Unix socket the managers report to
    pub control_socket: PathBuf,
    /// Liveness poll period
    pub poll_interval: Duration,
    /// Silence window after which a manager counts as hung
    pub stale_after: Duration,
    /// How long a stopping manager gets before it is killed
    pub spawn_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `PORTICO_MANAGERS`: manager process count (default: 1)
    /// - `PORTICO_MANAGER_BIN`: manager binary, resolved on PATH when
    ///   relative (default: portico-manager)
    /// - `PORTICO_CONTROL_SOCKET`: control socket path
    ///   (default: /tmp/portico-control.sock)
    /// - `PORTICO_POLL_INTERVAL_MS`: liveness poll period (default: 1000)
    /// - `PORTICO_STALE_AFTER_MS`: silence window before a manager counts
    ///   as hung (default: 15000)
    /// - `PORTICO_SPAWN_GRACE_MS`: stop-to-kill window (default: 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let managers = parse_var("PORTICO_MANAGERS", "1", "must be a positive integer")?;
        if managers == 0 {
            return Err(ConfigError::Invalid("PORTICO_MANAGERS", "must be at least 1"));
        }

        let manager_bin = PathBuf::from(
            std::env::var("PORTICO_MANAGER_BIN").unwrap_or_else(|_| "portico-manager".to_string()),
        );
        let control_socket = PathBuf::from(
            std::env::var("PORTICO_CONTROL_SOCKET")
                .unwrap_or_else(|_| "/tmp/portico-control.sock".to_string()),
        );

        let poll_interval = parse_millis("PORTICO_POLL_INTERVAL_MS", "1000")?;
        let stale_after = parse_millis("PORTICO_STALE_AFTER_MS", "15000")?;
        let spawn_grace = parse_millis("PORTICO_SPAWN_GRACE_MS", "10000")?;

        Ok(Self {
            managers,
            manager_bin,
            control_socket,
            poll_interval,
            stale_after,
            spawn_grace,
        })
    }
}

fn parse_var(name: &'static str, default: &str, what: &'static str) -> Result<u32, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, what))
}

fn parse_millis(name: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let millis: u64 = std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "must be a duration in milliseconds"))?;
    Ok(Duration::from_millis(millis))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
