// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One worker slot: a consumer/connection pair plus its counters and the
//! task driving the consumer loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use portico_backend::{
    BackendClient, BackendConnection, BackendStatus, CallJournal, ConnectionConfig, ExchangeDir,
};
use portico_queue::QueueTransport;
use portico_schema::SchemaModel;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::consumer::{Consumer, ConsumerSnapshot};

/// Per-worker request counters, bumped from the delivery path.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    processed: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub processed: u64,
    pub errors: u64,
    pub timeouts: u64,
}

/// Point-in-time status of one worker, as reported over control surfaces.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStatus {
    pub id: u32,
    pub created_at: DateTime<Utc>,
    pub consumer: ConsumerSnapshot,
    pub backend: BackendStatus,
    pub counters: CounterSnapshot,
}

/// A live worker. The slot owns nothing the loop needs; consumer and
/// connection are shared so reconciliation can steer them while the
/// loop runs.
pub struct WorkerSlot {
    id: u32,
    created_at: DateTime<Utc>,
    consumer: Arc<Consumer>,
    connection: Arc<BackendConnection>,
    counters: Arc<WorkerCounters>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerSlot {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        id: u32,
        queue: &str,
        transport: Arc<dyn QueueTransport>,
        client: Arc<dyn BackendClient>,
        config: ConnectionConfig,
        model: Arc<SchemaModel>,
        exchange: ExchangeDir,
        journal: Arc<dyn CallJournal>,
    ) -> Arc<Self> {
        let consumer = Arc::new(Consumer::new(id, queue, transport, model.clone()));
        let connection = Arc::new(BackendConnection::new(
            id, client, config, model, exchange, journal,
        ));
        let counters = Arc::new(WorkerCounters::new());
        let task = tokio::spawn(
            consumer
                .clone()
                .run(connection.clone(), counters.clone()),
        );
        Arc::new(Self {
            id,
            created_at: Utc::now(),
            consumer,
            connection,
            counters,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn consumer(&self) -> &Arc<Consumer> {
        &self.consumer
    }

    pub fn connection(&self) -> &Arc<BackendConnection> {
        &self.connection
    }

    pub fn counters(&self) -> &Arc<WorkerCounters> {
        &self.counters
    }

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id,
            created_at: self.created_at,
            consumer: self.consumer.snapshot().await,
            backend: self.connection.status().await,
            counters: self.counters.snapshot(),
        }
    }

    /// Await the consumer loop. Meaningful once the consumer has reached
    /// Stopped; idempotent afterwards.
    pub async fn join(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(worker_id = self.id, error = %e, "Consumer task ended abnormally");
        }
    }
}
