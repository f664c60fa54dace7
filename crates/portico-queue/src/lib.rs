// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue transport for portico workers.
//!
//! This crate abstracts the message broker behind two small traits:
//! - [`QueueTransport`]: opens consume channels against a named queue
//! - [`QueueChannel`]: pulls deliveries, acks/nacks them, publishes replies
//!
//! Every channel carries a prefetch window of exactly one unacknowledged
//! delivery, which is what gives workers their one-request-in-flight
//! discipline. [`InMemoryBroker`] is the bundled implementation, used by
//! tests and single-process deployments.

pub mod broker;
pub mod error;
pub mod message;
pub mod transport;

pub use broker::InMemoryBroker;
pub use error::QueueError;
pub use message::{Delivery, Publication};
pub use transport::{QueueChannel, QueueTransport};
