// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use portico_backend::BackendCreds;

/// Fallback crash log location, also used when configuration loading
/// itself is what failed.
pub const DEFAULT_CRASH_LOG: &str = "portico-manager.crash.log";

/// Manager process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the JSON schema document describing all callable methods
    pub schema_path: PathBuf,
    /// Directory where uploaded/produced blob files are exchanged
    pub exchange_dir: PathBuf,
    /// Queue the workers consume requests from
    pub queue: String,
    /// Workers to start with
    pub workers: u32,
    /// Hard cap for scale-up
    pub max_workers: u32,
    /// Reconciliation loop period
    pub reconcile_interval: Duration,
    /// Queue channel open window before a Connecting consumer is expired
    pub connect_deadline: Duration,
    pub login_deadline: Duration,
    pub logoff_deadline: Duration,
    pub request_deadline: Duration,
    /// Backend account the whole pool logs in with
    pub creds: BackendCreds,
    /// Supervisor control socket; absent when running standalone
    pub control_socket: Option<PathBuf>,
    /// Where init failures are recorded for post-mortem reading
    pub crash_log: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PORTICO_SCHEMA_PATH`: path to the method schema JSON
    /// - `PORTICO_EXCHANGE_DIR`: blob exchange directory
    /// - `PORTICO_BACKEND_HOST`: backend endpoint the pool connects to
    ///
    /// Optional (with defaults):
    /// - `PORTICO_QUEUE`: request queue name (default: portico.requests)
    /// - `PORTICO_WORKERS`: initial worker count (default: 2)
    /// - `PORTICO_MAX_WORKERS`: scale-up cap (default: 8)
    /// - `PORTICO_RECONCILE_INTERVAL_MS`: health loop period (default: 1000)
    /// - `PORTICO_CONNECT_DEADLINE_MS`: queue connect window (default: 10000)
    /// - `PORTICO_LOGIN_DEADLINE_MS`: backend login window (default: 30000)
    /// - `PORTICO_LOGOFF_DEADLINE_MS`: backend logoff window (default: 15000)
    /// - `PORTICO_REQUEST_DEADLINE_MS`: execute window (default: 60000)
    /// - `PORTICO_BACKEND_USER` / `PORTICO_BACKEND_PASSWORD`: credentials
    /// - `PORTICO_CONTROL_SOCKET`: supervisor link socket path
    /// - `PORTICO_CRASH_LOG`: init failure log (default: portico-manager.crash.log)
    pub fn from_env() -> Result<Self, ConfigError> {
        let schema_path = PathBuf::from(
            std::env::var("PORTICO_SCHEMA_PATH")
                .map_err(|_| ConfigError::Missing("PORTICO_SCHEMA_PATH"))?,
        );
        let exchange_dir = PathBuf::from(
            std::env::var("PORTICO_EXCHANGE_DIR")
                .map_err(|_| ConfigError::Missing("PORTICO_EXCHANGE_DIR"))?,
        );
        let host = std::env::var("PORTICO_BACKEND_HOST")
            .map_err(|_| ConfigError::Missing("PORTICO_BACKEND_HOST"))?;

        let queue =
            std::env::var("PORTICO_QUEUE").unwrap_or_else(|_| "portico.requests".to_string());

        let workers = parse_var("PORTICO_WORKERS", "2", "must be a positive integer")?;
        let max_workers = parse_var("PORTICO_MAX_WORKERS", "8", "must be a positive integer")?;
        if workers == 0 || max_workers == 0 || workers > max_workers {
            return Err(ConfigError::Invalid(
                "PORTICO_WORKERS",
                "must be between 1 and PORTICO_MAX_WORKERS",
            ));
        }

        let reconcile_interval = parse_millis("PORTICO_RECONCILE_INTERVAL_MS", "1000")?;
        let connect_deadline = parse_millis("PORTICO_CONNECT_DEADLINE_MS", "10000")?;
        let login_deadline = parse_millis("PORTICO_LOGIN_DEADLINE_MS", "30000")?;
        let logoff_deadline = parse_millis("PORTICO_LOGOFF_DEADLINE_MS", "15000")?;
        let request_deadline = parse_millis("PORTICO_REQUEST_DEADLINE_MS", "60000")?;

        let creds = BackendCreds {
            host,
            user: std::env::var("PORTICO_BACKEND_USER").unwrap_or_default(),
            password: std::env::var("PORTICO_BACKEND_PASSWORD").unwrap_or_default(),
        };

        let control_socket = std::env::var("PORTICO_CONTROL_SOCKET").ok().map(PathBuf::from);
        let crash_log = PathBuf::from(
            std::env::var("PORTICO_CRASH_LOG").unwrap_or_else(|_| DEFAULT_CRASH_LOG.to_string()),
        );

        Ok(Self {
            schema_path,
            exchange_dir,
            queue,
            workers,
            max_workers,
            reconcile_interval,
            connect_deadline,
            login_deadline,
            logoff_deadline,
            request_deadline,
            creds,
            control_socket,
            crash_log,
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
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
