// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker abstraction.
//!
//! Workers never talk to a broker directly; they hold a boxed
//! [`QueueChannel`] obtained from the process-wide [`QueueTransport`].
//! The in-memory implementation lives in [`crate::broker`]; an AMQP
//! implementation plugs in behind the same pair of traits.

use async_trait::async_trait;

use crate::error::QueueError;
use crate::message::{Delivery, Publication};

/// Connection-level handle, shared by all workers of one process.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Open a consume channel on `queue` with a prefetch window of one
    /// unacknowledged delivery.
    async fn open(&self, queue: &str) -> Result<Box<dyn QueueChannel>, QueueError>;
}

/// One worker's channel. Not `Sync`: a channel belongs to exactly one
/// consumer task.
#[async_trait]
pub trait QueueChannel: Send {
    /// Wait for the next delivery. Returns `None` once the channel is
    /// closed and drained. Fails with [`QueueError::OutstandingDelivery`]
    /// if the previous delivery has not been acked or nacked yet.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge a delivery. The broker discards it permanently.
    async fn ack(&mut self, tag: u64) -> Result<(), QueueError>;

    /// Negatively acknowledge a delivery; the broker requeues it for
    /// redelivery (to this or any other consumer of the queue).
    async fn nack_requeue(&mut self, tag: u64) -> Result<(), QueueError>;

    /// Publish a message to a named address (used for RPC replies).
    async fn publish(&mut self, address: &str, publication: Publication) -> Result<(), QueueError>;

    /// Close the channel. An unacknowledged delivery is requeued.
    async fn close(&mut self);
}
