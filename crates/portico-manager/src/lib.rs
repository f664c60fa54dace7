// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The manager process: a pool of workers bridging one request queue to
//! a set of fragile backend sessions.
//!
//! - `config`: environment configuration
//! - `chain`: ordered queue for backend session operations
//! - `consumer`: queue-side worker state machine and delivery flow
//! - `worker`: consumer/connection slots with counters
//! - `manager`: the pool and its reconciliation loop
//! - `link`: client side of the supervisor control socket
//! - `crash`: size-capped crash log for failed startups
//! - `runtime`: assembly of pool, loop and link into one process

pub mod chain;
pub mod config;
pub mod consumer;
pub mod crash;
pub mod link;
pub mod manager;
pub mod runtime;
pub mod worker;

pub use chain::TaskChain;
pub use config::Config;
pub use consumer::{Consumer, ConsumerSnapshot, ConsumerState, DESCRIBE_METHODS};
pub use link::LinkSettings;
pub use manager::{Manager, ManagerSettings, PoolStatus};
pub use runtime::{ManagerHandle, ManagerRuntime};
pub use worker::{CounterSnapshot, WorkerCounters, WorkerSlot, WorkerStatus};
