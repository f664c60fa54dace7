// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Serialized task chain for backend session operations.
//!
//! The backend tolerates exactly one login or logoff in flight per
//! process. Every such operation, for every worker, goes through one
//! chain: a bounded queue drained by a single runner task that awaits
//! each task to completion before taking the next. Duplicate submissions
//! are harmless because the connection operations themselves are guarded
//! by their state machines.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{Notify, mpsc, oneshot};
use tracing::debug;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueuedTask {
    label: String,
    task: BoxedTask,
    done: Option<oneshot::Sender<()>>,
}

pub struct TaskChain {
    tx: mpsc::Sender<QueuedTask>,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl TaskChain {
    /// Start the runner task. `capacity` bounds how many operations may sit
    /// queued; an overflowing submit is dropped and retried by the next
    /// reconciliation pass.
    pub fn start(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueuedTask>(capacity);
        let stop = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let runner_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = runner_stop.notified() => break,

                    next = rx.recv() => {
                        let Some(queued) = next else { break };
                        debug!(task = %queued.label, "Chain task started");
                        let started = Instant::now();
                        queued.task.await;
                        debug!(
                            task = %queued.label,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Chain task finished"
                        );
                        if let Some(done) = queued.done {
                            let _ = done.send(());
                        }
                    }
                }
            }
            debug!("Chain runner stopped");
        });

        Self { tx, stop, stopped }
    }

    /// Queue a task without waiting for it. Returns false when the chain is
    /// full or stopped.
    pub fn submit(
        &self,
        label: impl Into<String>,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        self.tx
            .try_send(QueuedTask {
                label: label.into(),
                task: Box::pin(task),
                done: None,
            })
            .is_ok()
    }

    /// Queue a task and wait until the runner has fully executed it.
    pub async fn run(
        &self,
        label: impl Into<String>,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let (done_tx, done_rx) = oneshot::channel();
        let queued = QueuedTask {
            label: label.into(),
            task: Box::pin(task),
            done: Some(done_tx),
        };
        if self.tx.send(queued).await.is_err() {
            return false;
        }
        done_rx.await.is_ok()
    }

    /// Operations sitting in the queue (excludes the one being executed).
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Stop the runner. Queued tasks that have not started are abandoned.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_one();
    }
}

// ========== Task Chain Tests ==========
