//! Content-addressed artifact storage.

use crate::{sha256_hex, EvidenceError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A content-addressed pointer to a persisted byproduct of execution —
/// a page capture, a response body, a pre-state snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path relative to the store root.
    pub path: String,
    /// MIME type of the stored bytes.
    pub mime: String,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
}

/// Filesystem-backed artifact store rooted at a single directory.
///
/// All evidence persisted by the engine goes through [`write`]; nothing
/// referenced from a receipt may bypass it.
///
/// [`write`]: ArtifactStore::write
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EvidenceError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist bytes under `relative_path` and return a content-addressed
    /// reference. Parent directories are created as needed. Paths that
    /// would escape the store root are rejected.
    pub fn write(
        &self,
        relative_path: &str,
        bytes: &[u8],
        mime: &str,
    ) -> Result<ArtifactRef, EvidenceError> {
        let full = self.resolve(relative_path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, bytes)?;

        Ok(ArtifactRef {
            path: relative_path.to_string(),
            mime: mime.to_string(),
            sha256: sha256_hex(bytes),
        })
    }

    /// Read back the bytes an artifact reference points at.
    pub fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, EvidenceError> {
        let full = self.resolve(&artifact.path)?;
        if !full.exists() {
            return Err(EvidenceError::NotFound(artifact.path.clone()));
        }
        Ok(fs::read(full)?)
    }

    /// Recompute an artifact's digest and compare it to the reference.
    pub fn verify(&self, artifact: &ArtifactRef) -> Result<(), EvidenceError> {
        let bytes = self.read(artifact)?;
        let actual = sha256_hex(&bytes);
        if actual != artifact.sha256 {
            return Err(EvidenceError::DigestMismatch {
                path: artifact.path.clone(),
                expected: artifact.sha256.clone(),
                actual,
            });
        }
        Ok(())
    }

    fn resolve(&self, relative_path: &str) -> Result<PathBuf, EvidenceError> {
        let rel = Path::new(relative_path);
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || relative_path.is_empty() {
            return Err(EvidenceError::PathEscape(relative_path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_write_and_read_back() {
        let (_dir, store) = store();
        let artifact = store
            .write("job-1/step-1/response.json", b"{\"ok\":true}", "application/json")
            .unwrap();

        assert_eq!(artifact.path, "job-1/step-1/response.json");
        assert_eq!(artifact.sha256, sha256_hex(b"{\"ok\":true}"));
        assert_eq!(store.read(&artifact).unwrap(), b"{\"ok\":true}");
    }

    #[test]
    fn test_verify_detects_mutation() {
        let (_dir, store) = store();
        let artifact = store
            .write("capture.html", b"<html></html>", "text/html")
            .unwrap();
        assert!(store.verify(&artifact).is_ok());

        std::fs::write(store.root().join("capture.html"), b"<html>tampered</html>").unwrap();
        assert!(matches!(
            store.verify(&artifact),
            Err(EvidenceError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_path_escape_is_rejected() {
        let (_dir, store) = store();
        let result = store.write("../outside.txt", b"data", "text/plain");
        assert!(matches!(result, Err(EvidenceError::PathEscape(_))));

        let result = store.write("/etc/absolute.txt", b"data", "text/plain");
        assert!(matches!(result, Err(EvidenceError::PathEscape(_))));
    }

    #[test]
    fn test_read_missing_artifact() {
        let (_dir, store) = store();
        let artifact = ArtifactRef {
            path: "never-written.bin".into(),
            mime: "application/octet-stream".into(),
            sha256: sha256_hex(b""),
        };
        assert!(matches!(
            store.read(&artifact),
            Err(EvidenceError::NotFound(_))
        ));
    }
}
