// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Portico manager entry point.
//!
//! Spawned by the supervisor with `--identity <slot> --parent-pid <pid>`,
//! or run standalone with neither. Configuration comes from the
//! environment; failures before the pool is up are recorded in the crash
//! log so a respawn loop leaves a readable trail.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use portico_backend::{ExchangeDir, MockBackend};
use portico_manager::config::{Config, DEFAULT_CRASH_LOG};
use portico_manager::crash::record_crash;
use portico_manager::link::LinkSettings;
use portico_manager::manager::ManagerSettings;
use portico_manager::runtime::ManagerRuntime;
use portico_protocol::ManagerState;
use portico_queue::InMemoryBroker;
use portico_schema::SchemaModel;
use tracing::{error, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    identity: Option<u32>,
    parent_pid: Option<u32>,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--identity" => {
                i += 1;
                let value = args.get(i).ok_or("--identity requires a value")?;
                parsed.identity = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid --identity: {value}"))?,
                );
            }
            "--parent-pid" => {
                i += 1;
                let value = args.get(i).ok_or("--parent-pid requires a value")?;
                parsed.parent_pid = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid --parent-pid: {value}"))?,
                );
            }
            arg => return Err(format!("Unknown argument: {arg}")),
        }
        i += 1;
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("portico_manager=info".parse().unwrap()),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("portico-manager: {e}");
            eprintln!("usage: portico-manager [--identity <n>] [--parent-pid <pid>]");
            return ExitCode::from(2);
        }
    };

    info!(
        identity = args.identity.unwrap_or(0),
        "Starting Portico manager"
    );

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            record_crash(
                Path::new(DEFAULT_CRASH_LOG),
                &format!("configuration error: {e}"),
            );
            return ExitCode::FAILURE;
        }
    };

    info!(
        queue = %config.queue,
        workers = config.workers,
        schema = %config.schema_path.display(),
        "Configuration loaded"
    );

    let model = match SchemaModel::from_path(&config.schema_path) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            error!("Schema load failed: {e}");
            record_crash(&config.crash_log, &format!("schema load failed: {e}"));
            return ExitCode::FAILURE;
        }
    };
    info!(methods = model.method_names().len(), "Schema model loaded");

    let settings = ManagerSettings::from_config(&config);
    let exchange = ExchangeDir::new(&config.exchange_dir);

    // Bundled adapters: the in-process broker and the mock connector.
    // Deployments with a real broker or a native connector assemble a
    // ManagerRuntime through the library API instead.
    let mut runtime = ManagerRuntime::new(
        settings,
        Arc::new(InMemoryBroker::new()),
        Arc::new(MockBackend::new()),
        model,
        exchange,
    );
    if let Some(socket) = config.control_socket.clone() {
        let mut link = LinkSettings::new(socket);
        link.parent_pid = args.parent_pid;
        runtime = runtime.link(link);
    }

    let handle = runtime.start().await;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Signal listener failed: {e}");
            }
            info!("Interrupt received, shutting down");
        }
        state = handle.wait() => {
            info!(state = %state, "Exit requested");
        }
    }

    let state = handle.shutdown(SHUTDOWN_GRACE).await;
    info!(state = %state, "Shutdown complete");
    match state {
        ManagerState::ErrorStop | ManagerState::Crash => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
