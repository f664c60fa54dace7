// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The channel or its broker has been closed.
    #[error("queue channel closed")]
    Closed,

    /// Ack/nack referenced a tag this channel does not hold.
    #[error("unknown delivery tag {0}")]
    UnknownTag(u64),

    /// A second delivery was requested while one is still unacknowledged.
    /// The prefetch window is exactly one.
    #[error("previous delivery not yet acknowledged")]
    OutstandingDelivery,

    /// Broker-side failure, surfaced verbatim.
    #[error("transport failure: {0}")]
    Transport(String),
}
