// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Everything that touches the blocking backend connector.
//!
//! The backend is a synchronous native client: calls can hang forever,
//! cannot be cancelled, and a failure can corrupt process-wide state.
//! This crate isolates that hazard behind:
//!
//! - `client`: the narrow blocking contract the real connector must
//!   satisfy, plus the lifecycle call names
//! - `mock`: deterministic in-tree fake used by tests and dev mode
//! - `owner` / `blob`: caller identity derivation and the exchange
//!   directory with its access-control choke point
//! - `marshal`: the schema-driven input/output marshalling engine
//! - `deadline`: bounded waits around blocking calls, without true
//!   cancellation (timed-out calls are fenced and joined later)
//! - `connection`: one worker's session, object cache and the
//!   backend/request state machines
//! - `journal`: injectable per-call log sink

pub mod blob;
pub mod client;
pub mod connection;
pub mod deadline;
pub mod journal;
pub mod marshal;
pub mod mock;
pub mod owner;

pub use blob::ExchangeDir;
pub use client::{BackendCallError, BackendClient, BackendCreds, BackendObject, BackendSession};
pub use connection::{
    BackendConnection, BackendState, BackendStatus, ConnectionConfig, ExecuteOutcome,
    PrepareOutcome, PrepareWarning, RequestState,
};
pub use deadline::{DeadlineOutcome, run_with_deadline};
pub use journal::{CallJournal, CallPhase, JournalEntry, MemoryJournal, TracingJournal};
pub use marshal::{MarshalError, collect_output, marshal_input};
pub use mock::MockBackend;
pub use owner::derive_owner_id;
