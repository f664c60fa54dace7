// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Crash log for failures that happen before (or instead of) a working
//! tracing pipeline: bad config, unreadable schema, panicked startup.
//! The supervisor respawns us in a loop, so the log is size-capped with
//! a single `.old` rotation to keep repeated crashes from filling disk.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;

/// Cap before the current log is rotated aside.
const MAX_CRASH_LOG_BYTES: u64 = 256 * 1024;

/// Append one timestamped line. Best effort: a failure to record the
/// crash must not mask the crash itself.
pub fn record_crash(path: &Path, message: &str) {
    rotate_if_needed(path);
    let line = format!("{} {}\n", Utc::now().to_rfc3339(), message.trim_end());
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()));
    if let Err(e) = written {
        eprintln!("cannot write crash log {}: {e}", path.display());
    }
}

fn rotate_if_needed(path: &Path) {
    let Ok(meta) = fs::metadata(path) else {
        return;
    };
    if meta.len() < MAX_CRASH_LOG_BYTES {
        return;
    }
    let mut rotated = path.as_os_str().to_os_string();
    rotated.push(".old");
    if let Err(e) = fs::rename(path, &rotated) {
        eprintln!("cannot rotate crash log {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.log");
        record_crash(&path, "schema unreadable");
        record_crash(&path, "schema unreadable again\n");

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("schema unreadable"));
        assert!(lines[1].ends_with("schema unreadable again"));
        // Each line leads with an RFC 3339 timestamp
        let stamp = lines[0].split_whitespace().next().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn test_oversized_log_rotates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.log");
        fs::write(&path, vec![b'x'; (MAX_CRASH_LOG_BYTES + 1) as usize]).unwrap();

        record_crash(&path, "fresh crash");

        let rotated = dir.path().join("crash.log.old");
        assert!(rotated.exists());
        assert_eq!(
            fs::metadata(&rotated).unwrap().len(),
            MAX_CRASH_LOG_BYTES + 1
        );
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("fresh crash"));
    }

    #[test]
    fn test_second_rotation_replaces_old() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.log");

        fs::write(&path, vec![b'a'; (MAX_CRASH_LOG_BYTES + 1) as usize]).unwrap();
        record_crash(&path, "first");
        fs::write(&path, vec![b'b'; (MAX_CRASH_LOG_BYTES + 1) as usize]).unwrap();
        record_crash(&path, "second");

        let rotated = fs::read(dir.path().join("crash.log.old")).unwrap();
        assert_eq!(rotated[0], b'b');
        assert!(fs::read_to_string(&path).unwrap().contains("second"));
    }
}
