// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Schema loading errors.

use thiserror::Error;

/// Errors raised while loading and validating a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("schema is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("method {method}: field {field} has unknown kind '{kind}'")]
    InvalidKind {
        method: String,
        field: String,
        kind: String,
    },

    #[error("method {method}: missing target object class")]
    MissingObjectClass { method: String },
}
