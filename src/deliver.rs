//! Delivery: hand conversion outputs to the outbound transport.
//!
//! Policy is fixed by the orchestration contract: exactly one output is
//! sent as a single file; two or more are first bundled into one zip and
//! the archive is sent alone. Member order in the archive is the
//! artifacts' given order (which is the adapter's output order, which is
//! arrival order for multi-page assembly), and member names are the
//! artifacts' own file names — collision-free by the storage manager's
//! naming contract.
//!
//! The archive is written inside the request's scratch directory, so even
//! if the explicit removal below is skipped by a panic, the directory
//! guard still reclaims it. Delivery failures are typed and are never
//! retried here; the engine surfaces them and cleanup runs regardless.

use crate::error::EngineError;
use crate::request::Artifact;
use crate::storage::{ScratchDir, ScratchStore};
use async_trait::async_trait;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use zip::write::FileOptions;

/// Filename presented to the user for a multi-output bundle.
pub const BUNDLE_FILE_NAME: &str = "converted_files.zip";

/// Transport-side delivery failure.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The outbound half of the messaging platform.
///
/// The core never talks to the platform directly; it hands finished files
/// to this trait and maps any error to
/// [`EngineError::DeliveryFailed`].
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Send one file to a chat. `filename` is the name shown to the user,
    /// independent of the on-disk path.
    async fn send_file(
        &self,
        target: i64,
        path: &Path,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;
}

/// Deliver conversion outputs to `target`, bundling when there are several.
///
/// On return — success or failure — the bundle archive (if one was made)
/// has been removed; the artifacts themselves stay owned by `scratch` and
/// fall with its guard.
pub async fn deliver(
    transport: &dyn OutboundTransport,
    target: i64,
    artifacts: &[Artifact],
    scratch: &ScratchDir,
    caption: Option<&str>,
) -> Result<(), EngineError> {
    match artifacts {
        [] => Err(EngineError::InvariantViolation(
            "deliver called with zero artifacts".into(),
        )),
        [single] => {
            debug!(target, file = single.file_name(), "delivering single artifact");
            transport
                .send_file(target, &single.path, single.file_name(), caption)
                .await
                .map_err(|e| EngineError::DeliveryFailed {
                    target,
                    reason: e.to_string(),
                })
        }
        many => {
            let archive = write_bundle(many, scratch.path()).await?;
            info!(target, members = many.len(), "delivering bundled archive");
            let sent = transport
                .send_file(target, &archive, BUNDLE_FILE_NAME, caption)
                .await
                .map_err(|e| EngineError::DeliveryFailed {
                    target,
                    reason: e.to_string(),
                });
            // The archive is itself an artifact needing cleanup; the
            // directory guard would catch it, but there is no reason to
            // hold the bytes until then.
            ScratchStore::remove_path(&archive);
            sent
        }
    }
}

/// Write all artifacts into one zip inside `dir`, preserving order.
async fn write_bundle(artifacts: &[Artifact], dir: &Path) -> Result<PathBuf, EngineError> {
    let archive_path = dir.join(format!("bundle-{}.zip", Uuid::new_v4()));
    let entries: Vec<(PathBuf, String)> = artifacts
        .iter()
        .map(|a| (a.path.clone(), a.file_name().to_string()))
        .collect();

    let path = archive_path.clone();
    tokio::task::spawn_blocking(move || write_zip(&path, &entries))
        .await
        .map_err(|e| EngineError::InvariantViolation(format!("bundle task panicked: {e}")))?
        .map_err(|source| EngineError::StorageFault {
            path: archive_path.clone(),
            source,
        })?;

    debug!(archive = %archive_path.display(), "bundle written");
    Ok(archive_path)
}

fn write_zip(archive_path: &Path, entries: &[(PathBuf, String)]) -> io::Result<()> {
    let file = File::create(archive_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (source_path, entry_name) in entries {
        let mut source = File::open(source_path)?;
        writer
            .start_file(entry_name.clone(), options)
            .map_err(io::Error::other)?;
        io::copy(&mut source, &mut writer)?;
    }

    writer.finish().map_err(io::Error::other)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::InputClass;
    use std::sync::Mutex;

    /// Records every send; optionally fails them all.
    struct RecordingTransport {
        sent: Mutex<Vec<(i64, PathBuf, String, Option<String>)>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn new(fail: bool) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl OutboundTransport for RecordingTransport {
        async fn send_file(
            &self,
            target: i64,
            path: &Path,
            filename: &str,
            caption: Option<&str>,
        ) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::new("payload too large"));
            }
            self.sent.lock().unwrap().push((
                target,
                path.to_path_buf(),
                filename.to_string(),
                caption.map(String::from),
            ));
            Ok(())
        }
    }

    async fn scratch_with(names: &[&str]) -> (tempfile::TempDir, ScratchDir, Vec<Artifact>) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ScratchStore::new(tmp.path()).allocate(1, "d").unwrap();
        let mut arts = Vec::new();
        for name in names {
            arts.push(
                dir.write_artifact(name, name.as_bytes(), InputClass::Other)
                    .await
                    .unwrap(),
            );
        }
        (tmp, dir, arts)
    }

    #[tokio::test]
    async fn single_artifact_sent_directly() {
        let (_tmp, dir, arts) = scratch_with(&["result.pdf"]).await;
        let transport = RecordingTransport::new(false);

        deliver(&transport, 99, &arts, &dir, Some("done")).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (target, path, filename, caption) = &sent[0];
        assert_eq!(*target, 99);
        assert_eq!(path, &arts[0].path);
        assert_eq!(filename, "result.pdf");
        assert_eq!(caption.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn multiple_artifacts_bundled_in_order() {
        let (_tmp, dir, arts) =
            scratch_with(&["page_1.png", "page_2.png", "page_3.png"]).await;
        let transport = RecordingTransport::new(false);

        deliver(&transport, 7, &arts, &dir, None).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1, "bundle must be the only send");
        let (_, archive_path, filename, _) = &sent[0];
        assert_eq!(filename, BUNDLE_FILE_NAME);

        // Archive was removed after the send; the send recorded the path,
        // so re-create expectations from the recorded member list instead.
        assert!(!archive_path.exists(), "bundle must be cleaned after send");
    }

    #[tokio::test]
    async fn bundle_member_order_is_artifact_order() {
        let (_tmp, dir, arts) = scratch_with(&["b.png", "a.png", "c.png"]).await;

        let archive = write_bundle(&arts, dir.path()).await.unwrap();
        let file = File::open(&archive).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, ["b.png", "a.png", "c.png"]);
    }

    #[tokio::test]
    async fn transport_rejection_is_typed_and_archive_cleaned() {
        let (_tmp, dir, arts) = scratch_with(&["x.png", "y.png"]).await;
        let transport = RecordingTransport::new(true);

        let err = deliver(&transport, 3, &arts, &dir, None).await.unwrap_err();
        match err {
            EngineError::DeliveryFailed { target, reason } => {
                assert_eq!(target, 3);
                assert!(reason.contains("too large"));
            }
            other => panic!("expected DeliveryFailed, got {other:?}"),
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("bundle-"))
            .collect();
        assert!(leftovers.is_empty(), "failed delivery must not leak the bundle");
    }

    #[tokio::test]
    async fn zero_artifacts_is_invariant_violation() {
        let (_tmp, dir, _) = scratch_with(&[]).await;
        let transport = RecordingTransport::new(false);
        let err = deliver(&transport, 1, &[], &dir, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
    }
}
