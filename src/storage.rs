//! Temporary scratch storage: per-session directories and artifact files.
//!
//! ## Ownership model
//!
//! The scratch root is shared; each `{user_id}_{token}/` subdirectory is
//! exclusively owned by one session (and later by the conversion request
//! that session triggers). [`ScratchDir`] is the ownership token: whoever
//! holds it may write artifacts, and when it drops the directory is
//! removed. Holding the guard on every path between allocation and exit is
//! the single most safety-critical invariant in this crate — a leaked
//! scratch directory leaks disk indefinitely under sustained load.
//!
//! ## Why removal never fails
//!
//! Cleanup runs while a success or failure response is already on its way
//! to the user. A removal error must not mask or interrupt that response,
//! so every removal here is best-effort: failures are logged via `tracing`
//! and swallowed.

use crate::error::EngineError;
use crate::request::{Artifact, InputClass};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Allocates and tears down per-session scratch directories.
#[derive(Debug, Clone)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate (or re-open) the scratch directory for a session.
    ///
    /// Idempotent for the same `(user_id, token)` pair: the directory is
    /// created if absent and reused if present. The returned guard owns
    /// the directory; callers must hold exactly one guard per session.
    pub fn allocate(&self, user_id: i64, token: &str) -> Result<ScratchDir, EngineError> {
        let dir = self.root.join(format!("{user_id}_{token}"));
        std::fs::create_dir_all(&dir).map_err(|source| EngineError::StorageFault {
            path: dir.clone(),
            source,
        })?;
        debug!(dir = %dir.display(), "scratch directory ready");
        Ok(ScratchDir { path: dir })
    }

    /// Best-effort removal of an arbitrary scratch path.
    ///
    /// Used when a directory's guard is no longer in hand (e.g. sweeping a
    /// predecessor session's directory after an overwriting workflow
    /// start). Never returns an error.
    pub fn remove_path(path: &Path) {
        let res = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match res {
            Ok(()) => debug!(path = %path.display(), "scratch removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to remove scratch path");
            }
        }
    }
}

/// Exclusive handle to one session's scratch directory.
///
/// Removing the directory is tied to `Drop`, so every exit path — success,
/// conversion failure, cancellation, panic unwind — releases the disk.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write bytes as a new artifact with a collision-free name.
    ///
    /// `suggested_name` is sanitised to its final component; if that name
    /// is taken, `stem-2.ext`, `stem-3.ext`, … are tried. Callers are
    /// serialized per session, so existence checks here cannot race within
    /// one directory.
    pub async fn write_artifact(
        &self,
        suggested_name: &str,
        bytes: &[u8],
        class: InputClass,
    ) -> Result<Artifact, EngineError> {
        let name = sanitise_file_name(suggested_name);
        let target = unique_path(&self.path, &name);

        tokio::fs::write(&target, bytes)
            .await
            .map_err(|source| EngineError::StorageFault {
                path: target.clone(),
                source,
            })?;

        debug!(path = %target.display(), size = bytes.len(), "artifact written");
        Ok(Artifact {
            path: target,
            size: bytes.len() as u64,
            class,
        })
    }

    /// Wrap an existing file in this directory as an [`Artifact`].
    ///
    /// Used for adapter outputs, which adapters write directly into the
    /// request's scratch directory.
    pub fn adopt(&self, path: PathBuf, class: InputClass) -> Artifact {
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Artifact { path, size, class }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        ScratchStore::remove_path(&self.path);
    }
}

/// Reduce a suggested name to a safe final path component.
fn sanitise_file_name(suggested: &str) -> String {
    let base = Path::new(suggested)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    if base.is_empty() || base == "." || base == ".." {
        "file".to_string()
    } else {
        base.to_string()
    }
}

/// First free path for `name` inside `dir`, suffixing the stem on collision.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = Path::new(name).extension().and_then(|e| e.to_str());

    let mut idx = 2usize;
    loop {
        let candidate_name = match ext {
            Some(ext) if !ext.is_empty() => format!("{stem}-{idx}.{ext}"),
            _ => format!("{stem}-{idx}"),
        };
        let candidate = dir.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ScratchStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = ScratchStore::new(tmp.path());
        (tmp, store)
    }

    #[tokio::test]
    async fn allocate_is_idempotent() {
        let (_tmp, store) = store();
        let a = store.allocate(7, "tok").unwrap();
        let first = a.path().to_path_buf();
        // Write a file, re-allocate, file must survive.
        a.write_artifact("x.bin", b"abc", InputClass::Other)
            .await
            .unwrap();
        std::mem::forget(a); // keep the dir alive past this guard
        let b = store.allocate(7, "tok").unwrap();
        assert_eq!(b.path(), first.as_path());
        assert!(first.join("x.bin").exists());
    }

    #[tokio::test]
    async fn repeated_names_get_unique_paths() {
        let (_tmp, store) = store();
        let dir = store.allocate(1, "t").unwrap();
        let a = dir
            .write_artifact("photo.jpg", b"1", InputClass::Image)
            .await
            .unwrap();
        let b = dir
            .write_artifact("photo.jpg", b"2", InputClass::Image)
            .await
            .unwrap();
        let c = dir
            .write_artifact("photo.jpg", b"3", InputClass::Image)
            .await
            .unwrap();
        assert_eq!(a.file_name(), "photo.jpg");
        assert_eq!(b.file_name(), "photo-2.jpg");
        assert_eq!(c.file_name(), "photo-3.jpg");
        assert_ne!(a.path, b.path);
        assert_ne!(b.path, c.path);
    }

    #[tokio::test]
    async fn traversal_in_suggested_name_is_stripped() {
        let (_tmp, store) = store();
        let dir = store.allocate(1, "t").unwrap();
        let a = dir
            .write_artifact("../../etc/passwd", b"x", InputClass::Other)
            .await
            .unwrap();
        assert!(a.path.starts_with(dir.path()));
        assert_eq!(a.file_name(), "passwd");
    }

    #[tokio::test]
    async fn drop_removes_directory() {
        let (_tmp, store) = store();
        let dir = store.allocate(9, "gone").unwrap();
        let path = dir.path().to_path_buf();
        dir.write_artifact("a.txt", b"a", InputClass::Other)
            .await
            .unwrap();
        assert!(path.exists());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn remove_path_swallows_missing_target() {
        ScratchStore::remove_path(Path::new("/definitely/not/here/xyz"));
    }
}
