// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue-side half of a worker.
//!
//! The consumer owns the worker's queue channel and the
//! acknowledge/requeue decisions. Its state machine:
//!
//! ```text
//! Init → Connecting → Ready → Running ⇄ Paused ⇄ ForcePaused
//! (transport failure) → Error → Init        (reset by reconciliation)
//! Running/Paused/ForcePaused → StopPending → Stopped
//! ```
//!
//! The delivery flow is two-phase and its ordering is the point of the
//! whole module: prepare first, acknowledge on PreparedOk/PreparedWarn,
//! and only then execute. A delivery is never acknowledged after a failed
//! prepare, and never still unacknowledged once execution has begun.

use std::sync::Arc;
use std::time::{Duration, Instant};

use portico_backend::{BackendConnection, ExecuteOutcome, PrepareOutcome, PrepareWarning};
use portico_protocol::{RpcError, RpcRequest, RpcResponse};
use portico_queue::{Delivery, Publication, QueueChannel, QueueError, QueueTransport};
use portico_schema::SchemaModel;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::worker::WorkerCounters;

/// Answered locally from the schema model, without touching the backend.
pub const DESCRIBE_METHODS: &str = "describe_methods";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Init,
    Connecting,
    Ready,
    Running,
    Paused,
    ForcePaused,
    Error,
    StopPending,
    Stopped,
}

impl ConsumerState {
    pub fn draining(self) -> bool {
        matches!(self, ConsumerState::StopPending | ConsumerState::Stopped)
    }
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConsumerState::Init => "Init",
            ConsumerState::Connecting => "Connecting",
            ConsumerState::Ready => "Ready",
            ConsumerState::Running => "Running",
            ConsumerState::Paused => "Paused",
            ConsumerState::ForcePaused => "ForcePaused",
            ConsumerState::Error => "Error",
            ConsumerState::StopPending => "StopPending",
            ConsumerState::Stopped => "Stopped",
        })
    }
}

/// Point-in-time view for the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub state: ConsumerState,
    pub init_timed_out: bool,
    pub processing: bool,
}

struct ConsumerInner {
    state: ConsumerState,
    init_timed_out: bool,
    processing: bool,
    connecting_since: Option<Instant>,
}

/// One worker's queue consumer. Transitions are requested by the manager;
/// the consumer's own task loop performs the work they imply.
pub struct Consumer {
    worker_id: u32,
    queue: String,
    transport: Arc<dyn QueueTransport>,
    model: Arc<SchemaModel>,
    inner: Mutex<ConsumerInner>,
    wake: Notify,
}

impl Consumer {
    pub fn new(
        worker_id: u32,
        queue: impl Into<String>,
        transport: Arc<dyn QueueTransport>,
        model: Arc<SchemaModel>,
    ) -> Self {
        Self {
            worker_id,
            queue: queue.into(),
            transport,
            model,
            inner: Mutex::new(ConsumerInner {
                state: ConsumerState::Init,
                init_timed_out: false,
                processing: false,
                connecting_since: None,
            }),
            wake: Notify::new(),
        }
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub async fn snapshot(&self) -> ConsumerSnapshot {
        let inner = self.inner.lock().await;
        ConsumerSnapshot {
            state: inner.state,
            init_timed_out: inner.init_timed_out,
            processing: inner.processing,
        }
    }

    // ----- transitions requested from outside the loop -----

    /// Init → Connecting. The loop performs the actual channel open.
    pub async fn begin_connect(&self) -> bool {
        self.transition(|inner| {
            if inner.state == ConsumerState::Init {
                inner.state = ConsumerState::Connecting;
                inner.connecting_since = Some(Instant::now());
                true
            } else {
                false
            }
        })
        .await
    }

    /// Ready → Running.
    pub async fn start_consuming(&self) -> bool {
        self.transition(|inner| {
            if inner.state == ConsumerState::Ready {
                inner.state = ConsumerState::Running;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Administrative pause. Running → Paused.
    pub async fn pause(&self) -> bool {
        self.transition(|inner| {
            if inner.state == ConsumerState::Running {
                inner.state = ConsumerState::Paused;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Paused → Running.
    pub async fn resume(&self) -> bool {
        self.transition(|inner| {
            if inner.state == ConsumerState::Paused {
                inner.state = ConsumerState::Running;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Stand the worker down until its backend is demonstrably healthy
    /// again. Unlike `pause` this is also applied from the delivery path.
    pub async fn force_pause(&self) -> bool {
        self.transition(|inner| {
            if matches!(inner.state, ConsumerState::Running | ConsumerState::Paused) {
                inner.state = ConsumerState::ForcePaused;
                true
            } else {
                false
            }
        })
        .await
    }

    /// ForcePaused → Running, issued by reconciliation once the paired
    /// backend is Ready with nothing in flight.
    pub async fn force_resume(&self) -> bool {
        self.transition(|inner| {
            if inner.state == ConsumerState::ForcePaused {
                inner.state = ConsumerState::Running;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Request graceful drain. Consumption stops immediately; the loop
    /// reaches Stopped once nothing is mid-flight.
    pub async fn stop_pend(&self) -> bool {
        self.transition(|inner| {
            if inner.state == ConsumerState::Stopped {
                false
            } else {
                inner.state = ConsumerState::StopPending;
                true
            }
        })
        .await
    }

    /// Error → Init.
    pub async fn reset(&self) -> bool {
        self.transition(|inner| {
            if inner.state == ConsumerState::Error {
                inner.state = ConsumerState::Init;
                inner.init_timed_out = false;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Expire a channel open that has been Connecting for longer than
    /// `window`. Sets the timed-out flag and parks the consumer in Error.
    pub async fn expire_connect(&self, window: Duration) -> bool {
        self.transition(|inner| {
            if inner.state == ConsumerState::Connecting
                && let Some(since) = inner.connecting_since
                && since.elapsed() > window
            {
                inner.state = ConsumerState::Error;
                inner.init_timed_out = true;
                true
            } else {
                false
            }
        })
        .await
    }

    async fn transition(&self, apply: impl FnOnce(&mut ConsumerInner) -> bool) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.state;
        let applied = apply(&mut inner);
        if applied {
            debug!(
                worker_id = self.worker_id,
                from = %before,
                to = %inner.state,
                "Consumer transition"
            );
            self.wake.notify_one();
        }
        applied
    }

    async fn to_error(&self, reason: &str) {
        warn!(worker_id = self.worker_id, reason, "Consumer entering error state");
        let mut inner = self.inner.lock().await;
        if inner.state != ConsumerState::Stopped {
            inner.state = ConsumerState::Error;
        }
        self.wake.notify_one();
    }

    // ----- the worker task loop -----

    /// Drive the consumer until Stopped. Owns the queue channel; every
    /// delivery is handed to the paired backend connection through the
    /// prepare/execute split.
    pub async fn run(
        self: Arc<Self>,
        connection: Arc<BackendConnection>,
        counters: Arc<WorkerCounters>,
    ) {
        info!(worker_id = self.worker_id, queue = %self.queue, "Consumer loop started");
        let mut channel: Option<Box<dyn QueueChannel>> = None;

        loop {
            let state = self.inner.lock().await.state;
            match state {
                ConsumerState::Init
                | ConsumerState::Ready
                | ConsumerState::Paused
                | ConsumerState::ForcePaused => {
                    self.wake.notified().await;
                }

                ConsumerState::Error => {
                    // Dropping the channel requeues anything unacked
                    channel = None;
                    self.wake.notified().await;
                }

                ConsumerState::Connecting => match self.transport.open(&self.queue).await {
                    Ok(opened) => {
                        channel = Some(opened);
                        let mut inner = self.inner.lock().await;
                        if inner.state == ConsumerState::Connecting {
                            inner.state = ConsumerState::Ready;
                            inner.connecting_since = None;
                            info!(worker_id = self.worker_id, "Queue channel open");
                        }
                    }
                    Err(e) => {
                        self.to_error(&format!("channel open failed: {e}")).await;
                    }
                },

                ConsumerState::Running => {
                    let Some(open) = channel.as_mut() else {
                        self.to_error("queue channel missing").await;
                        continue;
                    };
                    tokio::select! {
                        biased;

                        _ = self.wake.notified() => {}

                        next = open.next_delivery() => match next {
                            Ok(Some(delivery)) => {
                                self.handle_delivery(open, &connection, &counters, delivery)
                                    .await;
                            }
                            Ok(None) => {
                                self.to_error("queue channel closed").await;
                            }
                            Err(e) => {
                                self.to_error(&format!("delivery failed: {e}")).await;
                            }
                        },
                    }
                }

                ConsumerState::StopPending => {
                    if let Some(mut open) = channel.take() {
                        open.close().await;
                    }
                    let mut inner = self.inner.lock().await;
                    inner.state = ConsumerState::Stopped;
                    info!(worker_id = self.worker_id, "Consumer stopped");
                }

                ConsumerState::Stopped => break,
            }
        }
        info!(worker_id = self.worker_id, "Consumer loop finished");
    }

    async fn handle_delivery(
        &self,
        channel: &mut Box<dyn QueueChannel>,
        connection: &BackendConnection,
        counters: &WorkerCounters,
        delivery: Delivery,
    ) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != ConsumerState::Running {
                // A paused or stopping worker must not swallow work
                drop(inner);
                if let Err(e) = channel.nack_requeue(delivery.tag).await {
                    self.to_error(&format!("requeue failed: {e}")).await;
                }
                return;
            }
            inner.processing = true;
        }

        let started = Instant::now();
        let result = self
            .process(channel, connection, counters, &delivery, started)
            .await;
        self.inner.lock().await.processing = false;

        if let Err(e) = result {
            counters.record_error();
            self.to_error(&format!("queue operation failed: {e}")).await;
        }
    }

    /// One delivery, end to end. Transport failures bubble as errors;
    /// every RPC-level failure is converted into an ack/nack decision and
    /// (when a reply address exists) a response payload.
    async fn process(
        &self,
        channel: &mut Box<dyn QueueChannel>,
        connection: &BackendConnection,
        counters: &WorkerCounters,
        delivery: &Delivery,
        started: Instant,
    ) -> Result<(), QueueError> {
        let request = match RpcRequest::from_body(&delivery.body) {
            Ok(request) => request,
            Err(e) => {
                // Unparsable bodies are consumed, not requeued: ack plus a
                // synthesized invalid-request reply
                warn!(worker_id = self.worker_id, error = %e, "Unparsable request body");
                channel.ack(delivery.tag).await?;
                counters.record_error();
                let response =
                    RpcResponse::error(RpcError::invalid_request(), Value::Null, elapsed(started));
                return self.reply(channel, delivery, &response).await;
            }
        };

        debug!(
            worker_id = self.worker_id,
            method = %request.method,
            rpc_id = %request.id,
            redelivered = delivery.redelivered,
            "Request received"
        );

        if request.method == DESCRIBE_METHODS {
            channel.ack(delivery.tag).await?;
            counters.record_processed();
            let response =
                RpcResponse::ok(self.model.describe(), request.id.clone(), elapsed(started));
            return self.reply(channel, delivery, &response).await;
        }

        match connection.prepare_request(&request.method, &request.params).await {
            PrepareOutcome::Ok => {
                // Ack strictly before execute: an accepted request must
                // never be redelivered, however execution ends
                channel.ack(delivery.tag).await?;
                self.execute_and_reply(channel, connection, counters, &request, delivery, started)
                    .await
            }
            PrepareOutcome::Warn(warning) => {
                channel.ack(delivery.tag).await?;
                counters.record_error();
                let error = match warning {
                    PrepareWarning::UnknownMethod(method) => RpcError::unknown_method(&method),
                    PrepareWarning::Marshal(e) => RpcError::message(e.to_string()),
                };
                let response = RpcResponse::error(error, request.id.clone(), elapsed(started));
                let sent = self.reply(channel, delivery, &response).await;
                connection.finish_request().await;
                sent
            }
            PrepareOutcome::Failed(reason) => {
                // Unclassified: requeue for another worker, no reply
                debug!(
                    worker_id = self.worker_id,
                    method = %request.method,
                    reason = %reason,
                    "Prepare failed, requeueing"
                );
                counters.record_error();
                channel.nack_requeue(delivery.tag).await
            }
        }
    }

    async fn execute_and_reply(
        &self,
        channel: &mut Box<dyn QueueChannel>,
        connection: &BackendConnection,
        counters: &WorkerCounters,
        request: &RpcRequest,
        delivery: &Delivery,
        started: Instant,
    ) -> Result<(), QueueError> {
        let response = match connection.execute_request().await {
            ExecuteOutcome::Ok(result) => {
                counters.record_processed();
                RpcResponse::ok(result, request.id.clone(), elapsed(started))
            }
            ExecuteOutcome::Business { code, message } => {
                counters.record_processed();
                counters.record_error();
                RpcResponse::error(RpcError::coded(code, message), request.id.clone(), elapsed(started))
            }
            ExecuteOutcome::Warn(message) => {
                counters.record_processed();
                counters.record_error();
                RpcResponse::error(RpcError::message(message), request.id.clone(), elapsed(started))
            }
            ExecuteOutcome::Fatal(reason) => {
                warn!(
                    worker_id = self.worker_id,
                    method = %request.method,
                    reason = %reason,
                    "Execute failed, standing down"
                );
                counters.record_error();
                self.force_pause().await;
                // Opaque on the wire; the detail stays in our logs
                RpcResponse::error(RpcError::fatal(), request.id.clone(), elapsed(started))
            }
            ExecuteOutcome::TimedOut => {
                warn!(
                    worker_id = self.worker_id,
                    method = %request.method,
                    "Execute deadline exceeded, standing down"
                );
                counters.record_error();
                counters.record_timeout();
                self.force_pause().await;
                RpcResponse::error(RpcError::timeout(), request.id.clone(), elapsed(started))
            }
        };
        self.reply(channel, delivery, &response).await
    }

    async fn reply(
        &self,
        channel: &mut Box<dyn QueueChannel>,
        delivery: &Delivery,
        response: &RpcResponse,
    ) -> Result<(), QueueError> {
        let Some((address, correlation_id)) = delivery.reply_address() else {
            return Ok(());
        };
        let mut publication = Publication::new(response.to_body());
        publication.correlation_id = Some(correlation_id.to_string());
        channel.publish(address, publication).await
    }
}

fn elapsed(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
