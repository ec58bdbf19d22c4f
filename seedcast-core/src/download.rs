//! Peer-side download of a descriptor through a swarm engine

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::descriptor::{InfoHash, TorrentDescriptor};
use crate::storage::{PieceStore, StorageBackend, StorageError};
use crate::swarm::progress::summary_line;
use crate::swarm::{ProgressReporter, StatsSnapshot, SwarmEngine, SwarmError, SwarmHandle};
use crate::waiter::{PieceCompletionWaiter, WaitOutcome};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Download cancelled")]
    Cancelled,

    /// The engine stopped publishing before every piece arrived
    #[error("Download interrupted with {remaining} pieces outstanding")]
    Interrupted { remaining: usize },
}

/// Result of a finished download.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub info_hash: InfoHash,
    /// Session that now seeds the downloaded pieces
    pub handle: SwarmHandle,
    /// Where the content landed, `None` for in-memory targets
    pub location: Option<PathBuf>,
    pub bytes: u64,
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
}

impl DownloadReport {
    /// Average useful bytes per second.
    pub fn average_rate(&self) -> u64 {
        self.stats.average_rate(self.elapsed)
    }
}

/// Downloads every piece of `descriptor` into the backend's download target.
///
/// Progress is logged every `progress_interval` while waiting. On success the
/// engine keeps seeding the downloaded content. There is no stall timeout: a
/// download with no reachable seed waits until `cancel` fires.
///
/// # Errors
///
/// - `DownloadError::Storage` - Target could not be prepared (including unsupported backends)
/// - `DownloadError::Swarm` - Engine refused the download
/// - `DownloadError::Cancelled` - `cancel` fired before completion
/// - `DownloadError::Interrupted` - Engine dropped the session mid-transfer
pub async fn download_descriptor(
    backend: &dyn StorageBackend,
    engine: &dyn SwarmEngine,
    descriptor: &TorrentDescriptor,
    progress_interval: Duration,
    cancel: &CancellationToken,
) -> Result<DownloadReport, DownloadError> {
    let target = backend.download_target(descriptor).await?;
    let session = engine.start_download(descriptor, target).await?;

    let reporter_cancel = cancel.child_token();
    let reporter = ProgressReporter::new(
        descriptor.name.clone(),
        session.feed.clone(),
        session.stats.clone(),
        progress_interval,
    )
    .spawn(reporter_cancel.clone());

    let waiter = PieceCompletionWaiter::all(session.feed.clone());
    let outcome = waiter.wait(cancel).await;

    reporter_cancel.cancel();
    if let Err(e) = reporter.await {
        tracing::debug!("Progress reporter ended abnormally: {e}");
    }

    match outcome {
        WaitOutcome::Completed => {
            let elapsed = session.stats.elapsed();
            let stats = session.stats.snapshot();
            tracing::info!(info_hash = %descriptor.info_hash, "{}", summary_line(&stats, elapsed));
            Ok(DownloadReport {
                info_hash: descriptor.info_hash,
                handle: session.handle,
                location: session.store.location(),
                bytes: descriptor.total_length,
                elapsed,
                stats,
            })
        }
        WaitOutcome::Cancelled => {
            engine.drop_session(&session.handle);
            tracing::warn!(info_hash = %descriptor.info_hash, "Download cancelled");
            Err(DownloadError::Cancelled)
        }
        WaitOutcome::FeedClosed { remaining } => {
            engine.drop_session(&session.handle);
            Err(DownloadError::Interrupted { remaining })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::test_fixtures::{filesystem_backend, memory_backend, settings_for};
    use crate::storage::{FilesystemBackend, MemoryPieceStore, StorageMethod, UnsupportedBackend};
    use crate::swarm::{DirectSwarm, DirectSwarmConfig};

    fn swarm() -> DirectSwarm {
        DirectSwarm::new(DirectSwarmConfig {
            poll_interval: Duration::from_millis(10),
            ..DirectSwarmConfig::default()
        })
    }

    #[tokio::test]
    async fn test_filesystem_download_lands_next_to_artifact_name() {
        let (_origin_dir, origin, data) = filesystem_backend(5000, 1024).unwrap();
        let engine = swarm();
        let source = origin.source().await.unwrap();
        let descriptor = origin.create_descriptor(&source).await.unwrap();
        let store = origin.materialize(&descriptor).await.unwrap();
        engine.start_seeding(&descriptor, store).await.unwrap();

        let destination = tempfile::TempDir::new().unwrap();
        let receiving =
            FilesystemBackend::new(settings_for(destination.path(), "model.bin", 1024));
        let report = download_descriptor(
            &receiving,
            &engine,
            &descriptor,
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let location = report.location.clone().unwrap();
        assert_eq!(location, destination.path().join("model.bin"));
        assert_eq!(std::fs::read(location).unwrap(), data.to_vec());
        assert_eq!(report.bytes, 5000);
        assert_eq!(report.stats.bytes_read_useful, 5000);
    }

    #[tokio::test]
    async fn test_cancelled_download_is_dropped() {
        let (backend, data) = memory_backend(4096, 512);
        let descriptor = backend
            .create_descriptor(&crate::storage::DataSource::InMemoryBuffer(data))
            .await
            .unwrap();
        let engine = swarm();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                cancel.cancel();
            })
        };
        let result = download_descriptor(
            backend.as_ref(),
            &engine,
            &descriptor,
            Duration::from_secs(3),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(!engine.status(&descriptor.info_hash).exists);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_disk_backend_rejects_download() {
        let (backend, data) = memory_backend(64, 16);
        let descriptor = backend
            .create_descriptor(&crate::storage::DataSource::InMemoryBuffer(data))
            .await
            .unwrap();
        let disk = UnsupportedBackend::new(StorageMethod::Disk);

        let result = download_descriptor(
            &disk,
            &swarm(),
            &descriptor,
            Duration::from_secs(3),
            &CancellationToken::new(),
        )
        .await;
        match result {
            Err(DownloadError::Storage(e)) => assert!(e.is_unsupported()),
            other => panic!("expected unsupported backend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_memory_download_from_local_seed() {
        let (backend, data) = memory_backend(3000, 256);
        let descriptor = backend
            .create_descriptor(&crate::storage::DataSource::InMemoryBuffer(data.clone()))
            .await
            .unwrap();
        let engine = swarm();
        let seed: Arc<dyn PieceStore> = Arc::new(MemoryPieceStore::shared(&descriptor, data));
        engine.start_seeding(&descriptor, seed).await.unwrap();

        let report = download_descriptor(
            backend.as_ref(),
            &engine,
            &descriptor,
            Duration::from_secs(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.location, None);
        assert_eq!(report.bytes, 3000);
    }
}
