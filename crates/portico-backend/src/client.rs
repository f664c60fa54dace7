// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blocking contract the backend connector must satisfy.
//!
//! All three traits are synchronous on purpose: the native client blocks,
//! and pretending otherwise would hide the hazard. Callers must only reach
//! these methods from the blocking pool, never from an async task directly.
//! A session and its objects are owned by exactly one worker.

use serde_json::Value;
use thiserror::Error;

/// Lifecycle call invoked on a fresh object before validation.
pub const CALL_INIT: &str = "init";
/// Lifecycle call that validates marshalled input.
pub const CALL_VALIDATE: &str = "validate";
/// Lifecycle call that performs the actual work.
pub const CALL_RUN: &str = "run";
/// Post-run getter: non-zero means the backend declared a business error.
pub const CALL_ERROR_TYPE: &str = "error_type";
/// Post-run getter: human-readable description of the declared error.
pub const CALL_ERROR_DESCRIPTION: &str = "error_description";

/// Login parameters for the backend.
#[derive(Debug, Clone, Default)]
pub struct BackendCreds {
    pub host: String,
    pub user: String,
    pub password: String,
}

/// Failure of one backend call.
///
/// The connector offers no reliable error classification; the only signal
/// worth distinguishing is `invalid_state`, the process-wide corruption
/// marker that no amount of in-process retrying can clear.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendCallError {
    pub message: String,
    pub invalid_state: bool,
}

impl BackendCallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            invalid_state: false,
        }
    }

    /// Failure carrying the corruption marker.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            invalid_state: true,
        }
    }
}

/// Entry point: performs a blocking login.
pub trait BackendClient: Send + Sync + 'static {
    fn connect(&self, creds: &BackendCreds) -> Result<Box<dyn BackendSession>, BackendCallError>;
}

/// One logged-in session. Not re-entrant; never share across workers.
pub trait BackendSession: Send {
    /// Create an object handle of the given class. Moderately expensive;
    /// handles are cached per class by the owning connection.
    fn create_object(&mut self, class: &str) -> Result<Box<dyn BackendObject>, BackendCallError>;

    /// Blocking logoff. The session is unusable afterwards regardless of
    /// the result.
    fn logoff(&mut self) -> Result<(), BackendCallError>;
}

impl std::fmt::Debug for dyn BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BackendSession")
    }
}

/// One handle into the backend's dynamically-typed object model. Every
/// operation (lifecycle, setters, getters, iterators) is a call by
/// string name.
pub trait BackendObject: Send {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, BackendCallError>;
}
