// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Exchange directory for file blobs.
//!
//! Uploaded files live under one fixed directory, addressed as
//! `<ownerId>_<fileId>` with fileId always 32 lowercase hex characters.
//! Resolution is the access-control choke point: a request may only
//! address files carrying its own derived ownerId, and ownership is
//! checked before existence so a mismatch never leaks whether the file
//! is there.

use std::path::{Path, PathBuf};

use crate::marshal::MarshalError;
use crate::owner::md5_hex;

/// Exactly 32 lowercase hex characters.
fn is_file_id(s: &str) -> bool {
    s.len() == 32
        && s.chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// The fixed directory blob files are exchanged through.
#[derive(Debug, Clone)]
pub struct ExchangeDir {
    root: PathBuf,
}

impl ExchangeDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an inbound blob reference to a path under the exchange
    /// directory.
    ///
    /// The reference is either `<ownerId>_<fileId>` or a bare fileId, in
    /// which case the request's own `owner_id` is assumed.
    pub fn resolve(&self, reference: &str, owner_id: &str) -> Result<PathBuf, MarshalError> {
        let (ref_owner, file_id) = if is_file_id(reference) {
            (owner_id, reference)
        } else {
            match reference.split_once('_') {
                Some((owner, file)) if is_file_id(file) => (owner, file),
                _ => {
                    return Err(MarshalError::BlobMalformed {
                        reference: reference.to_string(),
                    });
                }
            }
        };

        if ref_owner != owner_id {
            return Err(MarshalError::BlobAccess {
                reference: reference.to_string(),
            });
        }

        let path = self.root.join(format!("{owner_id}_{file_id}"));
        if !path.is_file() {
            return Err(MarshalError::BlobMissing {
                reference: reference.to_string(),
            });
        }
        Ok(path)
    }

    /// Copy a backend-produced file into the exchange directory and return
    /// the composite id `<ownerId>_<md5(path)>`. The raw backend path never
    /// leaves the worker.
    pub fn export(&self, source: &Path, owner_id: &str) -> Result<String, MarshalError> {
        let file_id = md5_hex(source.display().to_string().as_bytes());
        let name = format!("{owner_id}_{file_id}");
        let dest = self.root.join(&name);
        std::fs::copy(source, &dest).map_err(|e| MarshalError::BlobIo {
            message: format!("cannot export {}: {e}", source.display()),
        })?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::derive_owner_id;

    fn put_file(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"payload").unwrap();
    }

    #[test]
    fn test_is_file_id() {
        assert!(is_file_id("900150983cd24fb0d6963f7d28e17f72"));
        assert!(!is_file_id("900150983CD24FB0D6963F7D28E17F72")); // uppercase
        assert!(!is_file_id("900150983cd24fb0d6963f7d28e17f7")); // 31 chars
        assert!(!is_file_id("900150983cd24fb0d6963f7d28e17f7z")); // non-hex
    }

    #[test]
    fn test_resolve_composite_reference() {
        let tmp = tempfile::tempdir().unwrap();
        let exchange = ExchangeDir::new(tmp.path());
        let owner = derive_owner_id(Some("abc"));
        let file_id = "11112222333344445555666677778888";
        put_file(tmp.path(), &format!("{owner}_{file_id}"));

        let path = exchange
            .resolve(&format!("{owner}_{file_id}"), &owner)
            .unwrap();
        assert!(path.ends_with(format!("{owner}_{file_id}")));
    }

    #[test]
    fn test_resolve_bare_file_id_assumes_own_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let exchange = ExchangeDir::new(tmp.path());
        let owner = derive_owner_id(Some("abc"));
        let file_id = "11112222333344445555666677778888";
        put_file(tmp.path(), &format!("{owner}_{file_id}"));

        assert!(exchange.resolve(file_id, &owner).is_ok());
    }

    #[test]
    fn test_resolve_rejects_foreign_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let exchange = ExchangeDir::new(tmp.path());
        let owner = derive_owner_id(Some("abc"));
        let thief = derive_owner_id(Some("mallory"));
        let file_id = "11112222333344445555666677778888";
        put_file(tmp.path(), &format!("{owner}_{file_id}"));

        let err = exchange
            .resolve(&format!("{owner}_{file_id}"), &thief)
            .unwrap_err();
        assert!(matches!(err, MarshalError::BlobAccess { .. }));
    }

    #[test]
    fn test_resolve_rejects_malformed_reference() {
        let exchange = ExchangeDir::new("/tmp");
        let owner = derive_owner_id(Some("abc"));
        for bad in ["not-a-reference", "owner_shortid", "", "a_b_c"] {
            let err = exchange.resolve(bad, &owner).unwrap_err();
            assert!(matches!(err, MarshalError::BlobMalformed { .. }), "{bad}");
        }
    }

    #[test]
    fn test_resolve_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let exchange = ExchangeDir::new(tmp.path());
        let owner = derive_owner_id(Some("abc"));
        let err = exchange
            .resolve("11112222333344445555666677778888", &owner)
            .unwrap_err();
        assert!(matches!(err, MarshalError::BlobMissing { .. }));
    }

    #[test]
    fn test_ownership_checked_before_existence() {
        // A mismatched owner must fail with BlobAccess even when the file
        // does not exist at all.
        let tmp = tempfile::tempdir().unwrap();
        let exchange = ExchangeDir::new(tmp.path());
        let err = exchange
            .resolve(
                "deadbeefdeadbeefdeadbeefdeadbeef_11112222333344445555666677778888",
                &derive_owner_id(Some("abc")),
            )
            .unwrap_err();
        assert!(matches!(err, MarshalError::BlobAccess { .. }));
    }

    #[test]
    fn test_export_returns_composite_id() {
        let tmp = tempfile::tempdir().unwrap();
        let exchange = ExchangeDir::new(tmp.path());
        let owner = derive_owner_id(Some("abc"));

        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("report.dat");
        std::fs::write(&source, b"result bytes").unwrap();

        let id = exchange.export(&source, &owner).unwrap();
        let (id_owner, id_file) = id.split_once('_').unwrap();
        assert_eq!(id_owner, owner);
        assert!(is_file_id(id_file));
        assert_eq!(
            std::fs::read(tmp.path().join(&id)).unwrap(),
            b"result bytes"
        );

        // Round trip: the exported id resolves for the same owner
        assert!(exchange.resolve(&id, &owner).is_ok());
    }

    #[test]
    fn test_export_missing_source() {
        let tmp = tempfile::tempdir().unwrap();
        let exchange = ExchangeDir::new(tmp.path());
        let err = exchange
            .export(Path::new("/nonexistent/file.dat"), "")
            .unwrap_err();
        assert!(matches!(err, MarshalError::BlobIo { .. }));
    }
}
