// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Portico supervisor entry point.
//!
//! Binds the control socket, spawns the configured number of manager
//! processes and supervises them until interrupted.

use std::sync::Arc;

use tracing::{info, warn};

use portico_supervisor::config::Config;
use portico_supervisor::server::ControlServer;
use portico_supervisor::supervisor::{Supervisor, SupervisorSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portico_supervisor=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        managers = config.managers,
        manager_bin = %config.manager_bin.display(),
        control_socket = %config.control_socket.display(),
        "Starting Portico supervisor"
    );

    let server = ControlServer::bind(&config.control_socket)?;
    let supervisor = Supervisor::new(SupervisorSettings::from_config(&config), server.registry());
    let loop_task = tokio::spawn(Arc::clone(&supervisor).run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    supervisor.shutdown_handle().notify_one();
    let _ = loop_task.await;

    supervisor.stop_all().await;
    server.close().await;
    info!("Supervisor shut down");

    Ok(())
}
