// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker pool and its reconciliation loop.
//!
//! The manager never repairs a worker inline. Each reconciliation pass
//! reads both state machines of every worker and queues the blocking
//! repairs (login, logoff) on one ordered task chain, so the backend
//! only ever sees a single session operation at a time across the whole
//! pool. Everything else (consumer transitions, slot removal) is cheap
//! and happens directly in the pass.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use portico_backend::{BackendClient, BackendState, CallJournal, ConnectionConfig, ExchangeDir, RequestState};
use portico_protocol::ManagerState;
use portico_queue::QueueTransport;
use portico_schema::SchemaModel;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::chain::TaskChain;
use crate::config::Config;
use crate::consumer::ConsumerState;
use crate::worker::{WorkerSlot, WorkerStatus};

/// Queued-but-not-started repairs the chain will accept before refusing.
const CHAIN_CAPACITY: usize = 64;

/// Pool-level knobs, extracted from `Config` so tests can construct them
/// directly.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub queue: String,
    pub initial_workers: u32,
    pub max_workers: u32,
    pub reconcile_interval: Duration,
    /// How long a consumer may sit in Connecting before it is expired.
    pub connect_deadline: Duration,
    pub connection: ConnectionConfig,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: config.queue.clone(),
            initial_workers: config.workers,
            max_workers: config.max_workers,
            reconcile_interval: config.reconcile_interval,
            connect_deadline: config.connect_deadline,
            connection: ConnectionConfig {
                creds: config.creds.clone(),
                login_deadline: config.login_deadline,
                logoff_deadline: config.logoff_deadline,
                request_deadline: config.request_deadline,
            },
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            queue: "portico.requests".to_string(),
            initial_workers: 2,
            max_workers: 8,
            reconcile_interval: Duration::from_millis(1000),
            connect_deadline: Duration::from_millis(10_000),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Everything a status query reports about the pool.
#[derive(Debug)]
pub struct PoolStatus {
    pub state: ManagerState,
    pub chain_depth: usize,
    pub workers: Vec<WorkerStatus>,
}

pub struct Manager {
    settings: ManagerSettings,
    transport: Arc<dyn QueueTransport>,
    client: Arc<dyn BackendClient>,
    model: Arc<SchemaModel>,
    exchange: ExchangeDir,
    journal: Arc<dyn CallJournal>,
    workers: Mutex<BTreeMap<u32, Arc<WorkerSlot>>>,
    next_worker_id: AtomicU32,
    chain: TaskChain,
    reconciling: AtomicBool,
    // Workers with a session repair queued but not yet finished
    repairs_queued: Arc<StdMutex<HashSet<u32>>>,
    lifecycle: watch::Sender<ManagerState>,
    exit_reason: StdMutex<String>,
    shutdown: Arc<Notify>,
}

impl Manager {
    pub fn new(
        settings: ManagerSettings,
        transport: Arc<dyn QueueTransport>,
        client: Arc<dyn BackendClient>,
        model: Arc<SchemaModel>,
        exchange: ExchangeDir,
        journal: Arc<dyn CallJournal>,
    ) -> Arc<Self> {
        let (lifecycle, _) = watch::channel(ManagerState::Running);
        Arc::new(Self {
            settings,
            transport,
            client,
            model,
            exchange,
            journal,
            workers: Mutex::new(BTreeMap::new()),
            next_worker_id: AtomicU32::new(0),
            chain: TaskChain::start(CHAIN_CAPACITY),
            reconciling: AtomicBool::new(false),
            repairs_queued: Arc::new(StdMutex::new(HashSet::new())),
            lifecycle,
            exit_reason: StdMutex::new(String::new()),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Current lifecycle state; `Running` until an exit is requested.
    pub fn state(&self) -> ManagerState {
        *self.lifecycle.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub fn lifecycle(&self) -> watch::Receiver<ManagerState> {
        self.lifecycle.subscribe()
    }

    pub fn exit_reason(&self) -> String {
        lock_std(&self.exit_reason).clone()
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Move out of `Running` exactly once. Later calls keep the first
    /// state and reason; the reconciliation loop stops either way.
    pub fn request_exit(&self, state: ManagerState, reason: impl Into<String>) {
        let reason = reason.into();
        let changed = self.lifecycle.send_if_modified(|current| {
            if *current == ManagerState::Running {
                *current = state;
                true
            } else {
                false
            }
        });
        if changed {
            info!(state = %state, reason = %reason, "Manager exit requested");
            *lock_std(&self.exit_reason) = reason;
        }
        self.shutdown.notify_one();
    }

    /// Spawn the configured number of workers.
    pub async fn start_pool(&self) {
        for _ in 0..self.settings.initial_workers {
            self.add_worker().await;
        }
    }

    /// Periodic reconciliation until shutdown is requested.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_ms = self.settings.reconcile_interval.as_millis() as u64,
            "Reconciliation loop started"
        );
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,
                _ = sleep(self.settings.reconcile_interval) => self.reconcile().await,
            }
        }
        info!("Reconciliation loop stopped");
    }

    /// One reconciliation pass. Re-entry is a no-op; a slow pass must not
    /// stack behind itself.
    pub async fn reconcile(&self) {
        if self.reconciling.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reconcile_pass().await;
        self.reconciling.store(false, Ordering::SeqCst);
    }

    async fn reconcile_pass(&self) {
        let snapshot: Vec<Arc<WorkerSlot>> =
            { self.workers.lock().await.values().cloned().collect() };

        // Corruption check first: when every connection has been marked
        // invalid the process state itself is suspect, and the only safe
        // repair is a fresh process.
        if !snapshot.is_empty() {
            let mut corrupted = 0;
            for slot in &snapshot {
                if slot.connection().status().await.invalid_state {
                    corrupted += 1;
                }
            }
            if corrupted == snapshot.len() {
                error!(
                    workers = corrupted,
                    "Every backend connection is corrupted, exiting for a clean respawn"
                );
                self.request_exit(ManagerState::ErrorStop, "all backend connections corrupted");
                return;
            }
        }

        let mut removable: Vec<u32> = Vec::new();

        for slot in &snapshot {
            let id = slot.id();
            let consumer = slot.consumer();
            let connection = slot.connection();
            let consumer_state = consumer.snapshot().await;
            let backend = connection.status().await;

            if consumer_state.state == ConsumerState::Stopped {
                match backend.state {
                    BackendState::Init if !backend.pending => removable.push(id),
                    BackendState::Ready | BackendState::InitError | BackendState::FinError => {
                        let connection = connection.clone();
                        self.submit_repair(id, format!("worker-{id} logoff"), async move {
                            connection.fin().await;
                        });
                    }
                    _ => {}
                }
                continue;
            }
            if consumer_state.state == ConsumerState::StopPending {
                // Draining; leave both sides alone until the loop parks
                continue;
            }

            match consumer_state.state {
                ConsumerState::Init => {
                    consumer.begin_connect().await;
                }
                ConsumerState::Connecting => {
                    if consumer.expire_connect(self.settings.connect_deadline).await {
                        warn!(worker_id = id, "Queue channel open timed out");
                    }
                }
                ConsumerState::Error => {
                    consumer.reset().await;
                }
                ConsumerState::Ready
                    if backend.state == BackendState::Ready
                        && backend.request == RequestState::WaitingForRequest =>
                {
                    consumer.start_consuming().await;
                }
                ConsumerState::ForcePaused
                    if backend.state == BackendState::Ready
                        && backend.request == RequestState::WaitingForRequest
                        && !backend.request_timed_out
                        && !backend.pending =>
                {
                    info!(worker_id = id, "Backend healthy again, resuming consumer");
                    consumer.force_resume().await;
                }
                _ => {}
            }

            match backend.state {
                BackendState::Init if !backend.pending => {
                    let connection = connection.clone();
                    self.submit_repair(id, format!("worker-{id} login"), async move {
                        connection.init().await;
                    });
                }
                BackendState::InitError | BackendState::FinError => {
                    // Refused while a fenced call is still running; retried
                    // on a later pass once the fence has been joined
                    if connection.reset_error().await {
                        debug!(worker_id = id, "Backend error state cleared");
                    }
                }
                BackendState::Ready
                    if backend.request.failed() || backend.request_timed_out =>
                {
                    let connection = connection.clone();
                    self.submit_repair(id, format!("worker-{id} recycle"), async move {
                        connection.fin().await;
                    });
                }
                _ => {}
            }
        }

        if !removable.is_empty() {
            let removed: Vec<Arc<WorkerSlot>> = {
                let mut workers = self.workers.lock().await;
                removable
                    .iter()
                    .filter_map(|id| workers.remove(id))
                    .collect()
            };
            for slot in removed {
                slot.join().await;
                info!(worker_id = slot.id(), "Worker removed");
            }
        }

        let workers = self.workers.lock().await.len();
        debug!(
            workers,
            repairs = self.chain.depth(),
            "Reconcile pass complete"
        );
    }

    /// Queue a session repair unless the same worker already has one
    /// queued or running.
    fn submit_repair(
        &self,
        id: u32,
        label: String,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> bool {
        if !lock_std(&self.repairs_queued).insert(id) {
            return false;
        }
        let queued = self.repairs_queued.clone();
        let accepted = self.chain.submit(label, async move {
            task.await;
            lock_std(&queued).remove(&id);
        });
        if !accepted {
            lock_std(&self.repairs_queued).remove(&id);
        }
        accepted
    }

    // ----- administrative operations -----

    /// Create one worker. Refused at the configured cap.
    pub async fn add_worker(&self) -> Option<u32> {
        let mut workers = self.workers.lock().await;
        if workers.len() as u32 >= self.settings.max_workers {
            warn!(max_workers = self.settings.max_workers, "Worker cap reached");
            return None;
        }
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed) + 1;
        let slot = WorkerSlot::spawn(
            id,
            &self.settings.queue,
            self.transport.clone(),
            self.client.clone(),
            self.settings.connection.clone(),
            self.model.clone(),
            self.exchange.clone(),
            self.journal.clone(),
        );
        workers.insert(id, slot);
        info!(worker_id = id, "Worker added");
        Some(id)
    }

    /// Begin draining one worker by id. The slot disappears from the pool
    /// once reconciliation has torn its backend down.
    pub async fn stop_worker(&self, id: u32) -> bool {
        let slot = { self.workers.lock().await.get(&id).cloned() };
        match slot {
            Some(slot) => slot.consumer().stop_pend().await,
            None => false,
        }
    }

    /// Drain the newest running worker.
    pub async fn stop_one(&self) -> Option<u32> {
        let snapshot: Vec<Arc<WorkerSlot>> =
            { self.workers.lock().await.values().cloned().collect() };
        for slot in snapshot.iter().rev() {
            if slot.consumer().snapshot().await.state == ConsumerState::Running {
                slot.consumer().stop_pend().await;
                return Some(slot.id());
            }
        }
        None
    }

    pub async fn pause_worker(&self, id: u32) -> bool {
        let slot = { self.workers.lock().await.get(&id).cloned() };
        match slot {
            Some(slot) => slot.consumer().pause().await,
            None => false,
        }
    }

    pub async fn resume_worker(&self, id: u32) -> bool {
        let slot = { self.workers.lock().await.get(&id).cloned() };
        match slot {
            Some(slot) => slot.consumer().resume().await,
            None => false,
        }
    }

    pub async fn pause_all(&self) -> usize {
        let snapshot: Vec<Arc<WorkerSlot>> =
            { self.workers.lock().await.values().cloned().collect() };
        let mut paused = 0;
        for slot in snapshot {
            if slot.consumer().pause().await {
                paused += 1;
            }
        }
        paused
    }

    pub async fn resume_all(&self) -> usize {
        let snapshot: Vec<Arc<WorkerSlot>> =
            { self.workers.lock().await.values().cloned().collect() };
        let mut resumed = 0;
        for slot in snapshot {
            if slot.consumer().resume().await {
                resumed += 1;
            }
        }
        resumed
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn status(&self) -> PoolStatus {
        let snapshot: Vec<Arc<WorkerSlot>> =
            { self.workers.lock().await.values().cloned().collect() };
        let mut workers = Vec::with_capacity(snapshot.len());
        for slot in snapshot {
            workers.push(slot.status().await);
        }
        PoolStatus {
            state: self.state(),
            chain_depth: self.chain.depth(),
            workers,
        }
    }

    /// Drain every worker and tear the pool down, bounded by `grace`.
    pub async fn drain(&self, grace: Duration) {
        info!(grace_ms = grace.as_millis() as u64, "Draining worker pool");
        {
            let snapshot: Vec<Arc<WorkerSlot>> =
                { self.workers.lock().await.values().cloned().collect() };
            for slot in snapshot {
                slot.consumer().stop_pend().await;
            }
        }
        let deadline = Instant::now() + grace;
        loop {
            self.reconcile().await;
            if self.workers.lock().await.is_empty() {
                info!("Worker pool drained");
                break;
            }
            if Instant::now() >= deadline {
                let left = self.worker_count().await;
                warn!(workers_left = left, "Drain window exceeded, abandoning remaining workers");
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        self.chain.stop();
    }
}

fn lock_std<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
