// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spawning and reaping of manager child processes.

use std::path::Path;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::SupervisorError;

/// One spawned manager process and the bookkeeping the supervisor
/// keeps about it.
#[derive(Debug)]
pub struct ProcessRecord {
    slot: u32,
    pid: u32,
    child: Child,
    spawned_at: DateTime<Utc>,
    spawned_instant: Instant,
    stop_requested: Option<Instant>,
}

impl ProcessRecord {
    /// Spawn a manager binary into the given slot.
    ///
    /// The child learns its slot through `--identity`, the supervisor's
    /// pid through `--parent-pid` and the control socket through the
    /// `PORTICO_CONTROL_SOCKET` environment variable.
    pub fn spawn(bin: &Path, slot: u32, socket: &Path) -> Result<Self, SupervisorError> {
        let child = Command::new(bin)
            .arg("--identity")
            .arg(slot.to_string())
            .arg("--parent-pid")
            .arg(std::process::id().to_string())
            .env("PORTICO_CONTROL_SOCKET", socket)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn { slot, source })?;

        let pid = child.id().ok_or(SupervisorError::PidUnavailable { slot })?;

        Ok(Self {
            slot,
            pid,
            child,
            spawned_at: Utc::now(),
            spawned_instant: Instant::now(),
            stop_requested: None,
        })
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    /// Time since the process was spawned.
    ///
    /// Staleness baseline for a child that has not reported yet.
    pub fn age(&self) -> Duration {
        self.spawned_instant.elapsed()
    }

    /// Check whether the child has exited, without blocking.
    pub fn try_reap(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(err) => {
                warn!(pid = self.pid, error = %err, "Cannot poll manager process");
                None
            }
        }
    }

    /// Mark that this child was asked to stop. Idempotent.
    pub fn mark_stopping(&mut self) {
        if self.stop_requested.is_none() {
            self.stop_requested = Some(Instant::now());
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_requested.is_some()
    }

    /// How long ago the stop was requested, if it was.
    pub fn stopping_for(&self) -> Option<Duration> {
        self.stop_requested.map(|at| at.elapsed())
    }

    /// Kill the child with SIGKILL and reap it.
    ///
    /// The wait is what actually frees the process table entry; until
    /// the parent collects the exit status the child lingers as a
    /// zombie. Callers must drop the record afterwards.
    pub async fn force_kill(&mut self) -> Option<ExitStatus> {
        match signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pid = self.pid, "Manager process already gone");
            }
            Err(err) => {
                warn!(pid = self.pid, error = %err, "Cannot signal manager process");
            }
        }

        match tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                warn!(pid = self.pid, error = %err, "Cannot reap manager process");
                None
            }
            Err(_) => {
                warn!(pid = self.pid, "Manager process did not die after SIGKILL");
                None
            }
        }
    }
}
