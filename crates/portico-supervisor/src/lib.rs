// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The supervisor process: keeps a fixed set of manager processes alive
//! and listens to their state reports.
//!
//! - `config`: environment configuration
//! - `error`: supervisor error types
//! - `process`: spawning and reaping of manager children
//! - `server`: control socket server and report registry
//! - `supervisor`: the supervision loop

pub mod config;
pub mod error;
pub mod process;
pub mod server;
pub mod supervisor;

pub use config::{Config, ConfigError};
pub use error::SupervisorError;
pub use process::ProcessRecord;
pub use server::{ControlServer, Registry};
pub use supervisor::{ChildStatus, Supervisor, SupervisorSettings};
