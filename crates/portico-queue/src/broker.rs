// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process broker.
//!
//! Backs the transport traits with plain queues held in process memory.
//! Semantics follow the AMQP subset the workers rely on: named queues,
//! competing consumers, per-channel prefetch of one, nack-with-requeue
//! placing the message back at the head of the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::QueueError;
use crate::message::{Delivery, Publication};
use crate::transport::{QueueChannel, QueueTransport};

struct Stored {
    publication: Publication,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Stored>,
    notify: Arc<Notify>,
}

struct BrokerInner {
    queues: Mutex<HashMap<String, QueueState>>,
    next_tag: AtomicU64,
}

impl BrokerInner {
    fn lock_queues(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(&self, queue: &str, stored: Stored) {
        let mut queues = self.lock_queues();
        let state = queues.entry(queue.to_string()).or_default();
        state.ready.push_back(stored);
        state.notify.notify_one();
    }

    /// Requeued messages go back to the head so redelivery beats newer work.
    fn requeue(&self, queue: &str, mut stored: Stored) {
        stored.redelivered = true;
        let mut queues = self.lock_queues();
        let state = queues.entry(queue.to_string()).or_default();
        state.ready.push_front(stored);
        state.notify.notify_one();
    }
}

/// Process-local broker. Cheap to clone; clones share the queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                queues: Mutex::new(HashMap::new()),
                next_tag: AtomicU64::new(0),
            }),
        }
    }

    /// Producer-side publish, used by callers that are not consumers
    /// themselves (request injectors, tests).
    pub fn send(&self, queue: &str, publication: Publication) {
        debug!(queue, bytes = publication.body.len(), "Message enqueued");
        self.inner.enqueue(
            queue,
            Stored {
                publication,
                redelivered: false,
            },
        );
    }

    /// Number of messages ready for delivery (unacked ones excluded).
    pub fn depth(&self, queue: &str) -> usize {
        self.inner
            .lock_queues()
            .get(queue)
            .map(|state| state.ready.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryBroker {
    async fn open(&self, queue: &str) -> Result<Box<dyn QueueChannel>, QueueError> {
        Ok(Box::new(InMemoryChannel {
            broker: self.inner.clone(),
            queue: queue.to_string(),
            unacked: None,
            closed: false,
        }))
    }
}

struct InMemoryChannel {
    broker: Arc<BrokerInner>,
    queue: String,
    // Prefetch window of one: at most a single unacked delivery
    unacked: Option<(u64, Stored)>,
    closed: bool,
}

#[async_trait]
impl QueueChannel for InMemoryChannel {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, QueueError> {
        if self.unacked.is_some() {
            return Err(QueueError::OutstandingDelivery);
        }
        loop {
            if self.closed {
                return Ok(None);
            }
            let notify = {
                let mut queues = self.broker.lock_queues();
                let state = queues.entry(self.queue.clone()).or_default();
                if let Some(stored) = state.ready.pop_front() {
                    if !state.ready.is_empty() {
                        // Backlog remains: pass the wakeup on
                        state.notify.notify_one();
                    }
                    let tag = self.broker.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
                    let delivery = Delivery {
                        tag,
                        body: stored.publication.body.clone(),
                        method: stored.publication.method.clone(),
                        rpc_id: stored.publication.rpc_id.clone(),
                        reply_to: stored.publication.reply_to.clone(),
                        correlation_id: stored.publication.correlation_id.clone(),
                        redelivered: stored.redelivered,
                    };
                    self.unacked = Some((tag, stored));
                    return Ok(Some(delivery));
                }
                state.notify.clone()
            };
            // A publish between the lock drop and this await leaves a
            // stored permit, so the wakeup cannot be lost.
            notify.notified().await;
        }
    }

    async fn ack(&mut self, tag: u64) -> Result<(), QueueError> {
        match self.unacked.take() {
            Some((held, _)) if held == tag => Ok(()),
            other => {
                self.unacked = other;
                Err(QueueError::UnknownTag(tag))
            }
        }
    }

    async fn nack_requeue(&mut self, tag: u64) -> Result<(), QueueError> {
        match self.unacked.take() {
            Some((held, stored)) if held == tag => {
                self.broker.requeue(&self.queue, stored);
                Ok(())
            }
            other => {
                self.unacked = other;
                Err(QueueError::UnknownTag(tag))
            }
        }
    }

    async fn publish(&mut self, address: &str, publication: Publication) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        debug!(address, bytes = publication.body.len(), "Reply published");
        self.broker.enqueue(
            address,
            Stored {
                publication,
                redelivered: false,
            },
        );
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
        if let Some((_, stored)) = self.unacked.take() {
            self.broker.requeue(&self.queue, stored);
        }
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        // A dropped channel must not strand its unacked delivery
        if let Some((_, stored)) = self.unacked.take() {
            self.broker.requeue(&self.queue, stored);
        }
    }
}

// ========== Broker Tests ==========
