// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for portico-supervisor.

use std::path::PathBuf;

use thiserror::Error;

/// Supervisor errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// The control socket could not be bound.
    #[error("cannot bind control socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A manager child failed to spawn.
    #[error("cannot spawn manager into slot {slot}: {source}")]
    Spawn { slot: u32, source: std::io::Error },

    /// The child exited before its pid could be read.
    #[error("manager in slot {slot} has no pid")]
    PidUnavailable { slot: u32 },
}
