// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cross-process status/command envelope.
//!
//! The same `PipeMessage` shape travels both directions on the control
//! socket: managers report state changes and heartbeats upward, the
//! supervisor commands a stop mode downward. The frame type (see `frame`)
//! distinguishes report from command.

use serde::{Deserialize, Serialize};

/// Lifecycle of one manager process, as reported over the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagerState {
    /// Pool is up and reconciling.
    Running,
    /// Operator asked this manager to stop; it will not be respawned.
    UserStop,
    /// Operator asked for a restart; supervisor respawns after exit.
    UserRestart,
    /// Manager found its own state unrecoverable and is exiting.
    ErrorStop,
    /// Supervisor is shutting the whole tree down.
    SupervisorStop,
    /// Supervisor-side marker for a child that died without reporting.
    Crash,
}

impl ManagerState {
    /// States after which the supervisor should spawn a replacement into
    /// the same identity slot.
    pub fn wants_respawn(self) -> bool {
        matches!(
            self,
            ManagerState::UserRestart | ManagerState::ErrorStop | ManagerState::Crash
        )
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ManagerState::Running => "Running",
            ManagerState::UserStop => "UserStop",
            ManagerState::UserRestart => "UserRestart",
            ManagerState::ErrorStop => "ErrorStop",
            ManagerState::SupervisorStop => "SupervisorStop",
            ManagerState::Crash => "Crash",
        };
        f.write_str(s)
    }
}

/// One control-socket message: sender pid, reported (or commanded) state,
/// free-text description. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeMessage {
    pub pid: u32,
    pub state: ManagerState,
    pub description: String,
}

impl PipeMessage {
    pub fn new(pid: u32, state: ManagerState, description: impl Into<String>) -> Self {
        Self {
            pid,
            state,
            description: description.into(),
        }
    }
}
