// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caller identity derivation.
//!
//! Every request derives one ownerId from the caller-supplied `user_hash`
//! param; all blob operations in that request are scoped to it. The id is
//! the md5 hex digest, which also fixes its length at the 32 characters
//! the exchange-file layout expects.

use md5::{Digest, Md5};

/// Lowercase md5 hex digest of arbitrary bytes.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Derive the request's ownerId. Absent or empty `user_hash` yields the
/// empty id; such requests can only address unowned exchange files.
pub fn derive_owner_id(user_hash: Option<&str>) -> String {
    match user_hash {
        Some(hash) if !hash.is_empty() => md5_hex(hash.as_bytes()),
        _ => String::new(),
    }
}
