// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-call journal sink.
//!
//! Every prepare/execute attempt is reported to an injected sink: method
//! name with vowels stripped (operators scan these lines by shape), elapsed
//! milliseconds, and the error description on failure. The default sink
//! logs through `tracing`; tests capture entries in memory.

use std::sync::Mutex;

use tracing::{info, warn};

/// Which half of the request the entry covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Prepare,
    Execute,
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CallPhase::Prepare => "prepare",
            CallPhase::Execute => "execute",
        })
    }
}

/// One journaled backend attempt.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub worker_id: u32,
    pub phase: CallPhase,
    /// Vowel-stripped method name, e.g. `crt_rdr` for `create_order`.
    pub method: String,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Injectable journal sink. Append-only, safe for concurrent use.
pub trait CallJournal: Send + Sync {
    fn record(&self, entry: JournalEntry);
}

/// Strip vowels for quick scanning. Digits, underscores and consonants
/// survive unchanged.
pub fn strip_vowels(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'A' | 'E' | 'I' | 'O' | 'U'))
        .collect()
}

/// Default sink: structured log lines.
#[derive(Debug, Default)]
pub struct TracingJournal;

impl CallJournal for TracingJournal {
    fn record(&self, entry: JournalEntry) {
        match &entry.error {
            None => info!(
                worker_id = entry.worker_id,
                phase = %entry.phase,
                method = %entry.method,
                elapsed_ms = entry.elapsed_ms,
                "Backend call"
            ),
            Some(error) => warn!(
                worker_id = entry.worker_id,
                phase = %entry.phase,
                method = %entry.method,
                elapsed_ms = entry.elapsed_ms,
                error = %error,
                "Backend call failed"
            ),
        }
    }
}

/// Capturing sink for tests.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl CallJournal for MemoryJournal {
    fn record(&self, entry: JournalEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}
