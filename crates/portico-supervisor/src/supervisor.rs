// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Top-level supervision loop over the manager processes.
//!
//! The reconcile pass is convergence, not event handling: reap what
//! exited, kill what went silent, then fill or trim to the target count.
//! Startup is the same pass run against an empty table. A manager that
//! exits announcing `UserStop` retires its slot for good; every other
//! death is refilled into the same slot.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use portico_protocol::pipe::ManagerState;
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::process::ProcessRecord;
use crate::server::{Registry, lock_std};

/// Tunables for the supervision loop.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Target manager process count
    pub managers: u32,
    /// Binary spawned into each slot
    pub manager_bin: PathBuf,
    /// Control socket passed down to the children
    pub socket: PathBuf,
    /// Liveness poll period
    pub poll_interval: Duration,
    /// Silence window after which a manager counts as hung
    pub stale_after: Duration,
    /// How long a stopping manager gets before it is killed
    pub spawn_grace: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            managers: config.managers,
            manager_bin: config.manager_bin.clone(),
            socket: config.control_socket.clone(),
            poll_interval: config.poll_interval,
            stale_after: config.stale_after,
            spawn_grace: config.spawn_grace,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            managers: 1,
            manager_bin: PathBuf::from("portico-manager"),
            socket: PathBuf::from("/tmp/portico-control.sock"),
            poll_interval: Duration::from_millis(1000),
            stale_after: Duration::from_millis(15_000),
            spawn_grace: Duration::from_millis(10_000),
        }
    }
}

/// Snapshot of one supervised manager.
#[derive(Debug, Clone)]
pub struct ChildStatus {
    pub slot: u32,
    pub pid: u32,
    pub spawned_at: DateTime<Utc>,
    /// Last reported state. None until the manager's link comes up.
    pub state: Option<ManagerState>,
}

/// Keeps the configured number of manager processes alive.
pub struct Supervisor {
    settings: SupervisorSettings,
    registry: Arc<Registry>,
    children: Mutex<BTreeMap<u32, ProcessRecord>>,
    retired: StdMutex<HashSet<u32>>,
    shutdown: Arc<Notify>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            registry,
            children: Mutex::new(BTreeMap::new()),
            retired: StdMutex::new(HashSet::new()),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Handle that stops the run loop when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub async fn child_count(&self) -> usize {
        self.children.lock().await.len()
    }

    /// Snapshot of every supervised child, ordered by slot.
    pub async fn statuses(&self) -> Vec<ChildStatus> {
        let children = self.children.lock().await;
        children
            .values()
            .map(|record| ChildStatus {
                slot: record.slot(),
                pid: record.pid(),
                spawned_at: record.spawned_at(),
                state: self.registry.last_report(record.pid()).map(|m| m.state),
            })
            .collect()
    }

    /// Relay a stop or restart request to the manager in a slot. Returns
    /// false when the slot is empty or its link is down.
    pub async fn relay_stop(&self, slot: u32, state: ManagerState, description: &str) -> bool {
        let pid = {
            let children = self.children.lock().await;
            match children.get(&slot) {
                Some(record) => record.pid(),
                None => return false,
            }
        };
        self.registry.command(pid, state, description).await
    }

    /// Run the supervision loop until the shutdown handle fires.
    pub async fn run(self: Arc<Self>) {
        info!(
            managers = self.settings.managers,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Supervision loop started"
        );
        self.reconcile().await;
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,
                _ = sleep(self.settings.poll_interval) => self.reconcile().await,
            }
        }
        info!("Supervision loop stopped");
    }

    /// One convergence pass over the child table.
    pub async fn reconcile(&self) {
        let mut children = self.children.lock().await;

        // Reap exits, classified by the child's last report.
        let mut freed = Vec::new();
        for record in children.values_mut() {
            let Some(status) = record.try_reap() else {
                continue;
            };
            let reported = self.registry.last_report(record.pid()).map(|m| m.state);
            self.registry.forget(record.pid());

            // A child that died while still Running, or before ever
            // reporting, never announced a stop: that is a crash.
            let state = match reported {
                Some(state) if state != ManagerState::Running => state,
                _ => ManagerState::Crash,
            };
            info!(
                slot = record.slot(),
                pid = record.pid(),
                exit_code = status.code(),
                state = %state,
                respawn = state.wants_respawn(),
                "Manager exited"
            );
            if state == ManagerState::UserStop && !record.is_stopping() {
                info!(slot = record.slot(), "Slot retired");
                lock_std(&self.retired).insert(record.slot());
            }
            freed.push(record.slot());
        }
        for slot in freed {
            children.remove(&slot);
        }

        // Kill children that have gone silent past the deadline. The slot
        // is refilled further down in the same pass.
        let stale: Vec<u32> = children
            .values()
            .filter(|record| {
                let silence = self
                    .registry
                    .report_age(record.pid())
                    .unwrap_or_else(|| record.age());
                silence > self.settings.stale_after
            })
            .map(|record| record.slot())
            .collect();
        for slot in stale {
            if let Some(mut record) = children.remove(&slot) {
                warn!(
                    slot,
                    pid = record.pid(),
                    "Manager silent past deadline, killing"
                );
                record.force_kill().await;
                self.registry.forget(record.pid());
            }
        }

        // A stopping child that has outlived its grace gets killed
        // regardless of the current balance.
        let overdue: Vec<u32> = children
            .values()
            .filter(|record| {
                record
                    .stopping_for()
                    .is_some_and(|waited| waited > self.settings.spawn_grace)
            })
            .map(|record| record.slot())
            .collect();
        for slot in overdue {
            if let Some(mut record) = children.remove(&slot) {
                warn!(slot, pid = record.pid(), "Manager ignored stop, killing");
                record.force_kill().await;
                self.registry.forget(record.pid());
            }
        }

        // Fill free slots up to the target, or trim back down to it.
        let target = self.target();
        if children.len() < target {
            let retired = lock_std(&self.retired).clone();
            let free: Vec<u32> = (1..=self.settings.managers)
                .filter(|slot| !children.contains_key(slot) && !retired.contains(slot))
                .take(target - children.len())
                .collect();
            for slot in free {
                match ProcessRecord::spawn(&self.settings.manager_bin, slot, &self.settings.socket)
                {
                    Ok(record) => {
                        info!(slot, pid = record.pid(), "Manager spawned");
                        children.insert(slot, record);
                    }
                    Err(err) => {
                        error!(slot, error = %err, "Cannot spawn manager");
                    }
                }
            }
        } else if children.len() > target {
            self.trim_excess(&mut children, target).await;
        }
    }

    /// Ask one excess child to stop, newest first. A child with no link
    /// cannot be asked and is killed outright.
    async fn trim_excess(&self, children: &mut BTreeMap<u32, ProcessRecord>, target: usize) {
        let stopping = children.values().filter(|r| r.is_stopping()).count();
        if children.len() - stopping <= target {
            return;
        }

        let victim = children
            .values()
            .rev()
            .find(|r| !r.is_stopping())
            .map(|r| (r.slot(), r.pid()));
        let Some((slot, pid)) = victim else {
            return;
        };

        if self
            .registry
            .command(pid, ManagerState::UserStop, "scaling down")
            .await
        {
            info!(slot, pid, "Asked excess manager to stop");
            if let Some(record) = children.get_mut(&slot) {
                record.mark_stopping();
            }
        } else {
            // No link to ask nicely over.
            if let Some(mut record) = children.remove(&slot) {
                warn!(slot, pid, "Killing excess manager with no link");
                record.force_kill().await;
                self.registry.forget(pid);
            }
        }
    }

    /// Broadcast a stop to every manager, wait out the grace period, then
    /// kill whatever is left.
    pub async fn stop_all(&self) {
        let reached = self
            .registry
            .broadcast(ManagerState::SupervisorStop, "supervisor shutting down")
            .await;
        info!(reached, "Stop broadcast to managers");

        let deadline = tokio::time::Instant::now() + self.settings.spawn_grace;
        loop {
            {
                let mut children = self.children.lock().await;
                let mut done = Vec::new();
                for record in children.values_mut() {
                    if let Some(status) = record.try_reap() {
                        info!(
                            slot = record.slot(),
                            pid = record.pid(),
                            exit_code = status.code(),
                            "Manager stopped"
                        );
                        self.registry.forget(record.pid());
                        done.push(record.slot());
                    }
                }
                for slot in done {
                    children.remove(&slot);
                }
                if children.is_empty() {
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        let mut children = self.children.lock().await;
        warn!(
            remaining = children.len(),
            "Managers still up after grace period"
        );
        let slots: Vec<u32> = children.keys().copied().collect();
        for slot in slots {
            if let Some(mut record) = children.remove(&slot) {
                warn!(slot, pid = record.pid(), "Killing manager that ignored stop");
                record.force_kill().await;
                self.registry.forget(record.pid());
            }
        }
    }

    fn target(&self) -> usize {
        (self.settings.managers as usize).saturating_sub(lock_std(&self.retired).len())
    }
}
