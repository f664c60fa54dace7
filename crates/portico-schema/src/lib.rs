// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Immutable description of every method the bridge can serve.
//!
//! A schema file is loaded exactly once at process start and shared
//! read-only across all workers:
//! - [`MethodSchema`]: target object class plus ordered input/output
//!   [`FieldSpec`] lists
//! - [`EnumTable`]: named ordered token lists, translated by ordinal
//! - [`SchemaModel`]: the whole document, with lookup and a
//!   `describe()` rendering served for the describe pseudo-method
//!
//! Nothing here talks to the backend; the marshalling engine walks these
//! specs against live object handles.

pub mod error;
pub mod model;

pub use error::SchemaError;
pub use model::{EnumTable, FieldKind, FieldSpec, MethodSchema, SchemaModel};
