// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Assembles one running manager process: worker pool, reconciliation
//! loop, and the optional supervisor link.

use std::sync::Arc;
use std::time::Duration;

use portico_backend::{BackendClient, CallJournal, ExchangeDir, TracingJournal};
use portico_protocol::ManagerState;
use portico_queue::QueueTransport;
use portico_schema::SchemaModel;
use tokio::task::JoinHandle;
use tracing::info;

use crate::link::{LinkSettings, run_link};
use crate::manager::{Manager, ManagerSettings};

pub struct ManagerRuntime {
    settings: ManagerSettings,
    transport: Arc<dyn QueueTransport>,
    client: Arc<dyn BackendClient>,
    model: Arc<SchemaModel>,
    exchange: ExchangeDir,
    journal: Arc<dyn CallJournal>,
    link: Option<LinkSettings>,
}

impl ManagerRuntime {
    pub fn new(
        settings: ManagerSettings,
        transport: Arc<dyn QueueTransport>,
        client: Arc<dyn BackendClient>,
        model: Arc<SchemaModel>,
        exchange: ExchangeDir,
    ) -> Self {
        Self {
            settings,
            transport,
            client,
            model,
            exchange,
            journal: Arc::new(TracingJournal::default()),
            link: None,
        }
    }

    pub fn journal(mut self, journal: Arc<dyn CallJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn link(mut self, link: LinkSettings) -> Self {
        self.link = Some(link);
        self
    }

    /// Spawn everything and hand back the steering handle.
    pub async fn start(self) -> ManagerHandle {
        let manager = Manager::new(
            self.settings,
            self.transport,
            self.client,
            self.model,
            self.exchange,
            self.journal,
        );
        let mut tasks = Vec::new();
        if let Some(link) = self.link {
            tasks.push(tokio::spawn(run_link(manager.clone(), link)));
        }
        manager.start_pool().await;
        tasks.push(tokio::spawn(manager.clone().run()));
        info!("Manager runtime started");
        ManagerHandle { manager, tasks }
    }
}

pub struct ManagerHandle {
    manager: Arc<Manager>,
    tasks: Vec<JoinHandle<()>>,
}

impl ManagerHandle {
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Block until the manager leaves `Running`.
    pub async fn wait(&self) -> ManagerState {
        let mut lifecycle = self.manager.lifecycle();
        loop {
            let state = *lifecycle.borrow_and_update();
            if state != ManagerState::Running {
                return state;
            }
            if lifecycle.changed().await.is_err() {
                return self.manager.state();
            }
        }
    }

    /// Stop the pool and wait for all runtime tasks. Returns the final
    /// lifecycle state.
    pub async fn shutdown(self, grace: Duration) -> ManagerState {
        self.manager
            .request_exit(ManagerState::UserStop, "shutdown requested");
        if self.manager.state() == ManagerState::ErrorStop {
            // Corrupted state is not drained; the replacement process
            // starts from nothing either way
            info!("Skipping drain on error stop");
        } else {
            self.manager.drain(grace).await;
        }
        for task in self.tasks {
            let _ = task.await;
        }
        let state = self.manager.state();
        info!(state = %state, "Manager runtime stopped");
        state
    }
}
