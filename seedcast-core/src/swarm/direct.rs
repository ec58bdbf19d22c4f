//! In-process swarm engine
//!
//! Seeds serve pieces straight from their piece stores. Downloads pull
//! pieces from local seeds first, then from HTTP seeds exposing
//! `GET {seed}/piece/{info_hash}/{index}`, verify each piece against the
//! descriptor and write it to the target store. A finished download keeps
//! serving its pieces as a seed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use super::{
    DownloadSession, PieceStateFeed, PieceStateTable, PieceStatus, SwarmEngine, SwarmError,
    SwarmHandle, SwarmRole, SwarmStatus, TransferStats,
};
use crate::descriptor::{InfoHash, PieceIndex, TorrentDescriptor};
use crate::storage::PieceStore;

/// Tuning for [`DirectSwarm`].
#[derive(Debug, Clone)]
pub struct DirectSwarmConfig {
    /// Control-plane origins serving `/piece/{info_hash}/{index}`
    pub http_seeds: Vec<Url>,
    /// Delay before retrying when no seed has a piece
    pub poll_interval: Duration,
    /// Concurrent piece fetchers per download
    pub workers: usize,
}

impl Default for DirectSwarmConfig {
    fn default() -> Self {
        Self {
            http_seeds: Vec::new(),
            poll_interval: Duration::from_millis(200),
            workers: 4,
        }
    }
}

#[derive(Clone)]
struct SessionEntry {
    handle: SwarmHandle,
    store: Arc<dyn PieceStore>,
    pieces: Arc<PieceStateTable>,
    cancel: CancellationToken,
}

struct SwarmInner {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    config: DirectSwarmConfig,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

/// Swarm engine running every session inside this process.
#[derive(Clone)]
pub struct DirectSwarm {
    inner: Arc<SwarmInner>,
}

impl DirectSwarm {
    pub fn new(config: DirectSwarmConfig) -> Self {
        Self {
            inner: Arc::new(SwarmInner {
                sessions: RwLock::new(HashMap::new()),
                config,
                client: reqwest::Client::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Stops every session and refuses new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let drained: Vec<SessionEntry> = self
            .inner
            .sessions
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            entry.cancel.cancel();
            entry.pieces.close();
        }
        tracing::info!("Swarm engine shut down, dropped {} sessions", drained.len());
    }

    fn register(
        &self,
        descriptor: &TorrentDescriptor,
        store: Arc<dyn PieceStore>,
        role: SwarmRole,
        pieces: Arc<PieceStateTable>,
    ) -> Result<SessionEntry, SwarmError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SwarmError::Shutdown);
        }
        if store.piece_count() != descriptor.piece_count() {
            return Err(SwarmError::StoreMismatch {
                store: store.piece_count(),
                descriptor: descriptor.piece_count(),
            });
        }

        let entry = SessionEntry {
            handle: SwarmHandle {
                id: Uuid::new_v4(),
                info_hash: descriptor.info_hash,
                role,
            },
            store,
            pieces,
            cancel: self.inner.shutdown.child_token(),
        };
        self.inner
            .sessions
            .write()
            .insert(entry.handle.id, entry.clone());
        Ok(entry)
    }
}

impl SwarmInner {
    /// Local sessions other than `exclude` that hold the piece.
    fn local_holder(
        &self,
        info_hash: &InfoHash,
        index: PieceIndex,
        exclude: Option<Uuid>,
    ) -> Option<Arc<dyn PieceStore>> {
        self.sessions
            .read()
            .values()
            .filter(|entry| entry.handle.info_hash == *info_hash)
            .filter(|entry| Some(entry.handle.id) != exclude)
            .find(|entry| entry.pieces.status(index) == Some(PieceStatus::Complete))
            .map(|entry| Arc::clone(&entry.store))
    }

    async fn fetch_piece(
        &self,
        downloader: Uuid,
        descriptor: &TorrentDescriptor,
        index: PieceIndex,
    ) -> Result<Bytes, SwarmError> {
        let info_hash = &descriptor.info_hash;
        if let Some(store) = self.local_holder(info_hash, index, Some(downloader)) {
            match store.read_piece(index).await {
                Ok(piece) => return Ok(piece),
                Err(e) => tracing::debug!("Local seed failed to read piece {index}: {e}"),
            }
        }

        let piece_len = descriptor
            .piece_size(index)
            .map_or(u64::from(descriptor.piece_length), u64::from);
        for seed in &self.config.http_seeds {
            let Ok(url) = seed.join(&format!("piece/{info_hash}/{index}")) else {
                continue;
            };
            match self.fetch_from_http_seed(url, piece_len).await {
                Ok(Some(piece)) => return Ok(piece),
                Ok(None) => {}
                Err(e) => tracing::debug!("HTTP seed {seed} failed for piece {index}: {e}"),
            }
        }

        Err(SwarmError::PieceUnavailable {
            info_hash: *info_hash,
            index,
        })
    }

    /// Fetches one piece body, giving up once it grows past `piece_len`.
    async fn fetch_from_http_seed(
        &self,
        url: Url,
        piece_len: u64,
    ) -> Result<Option<Bytes>, SwarmError> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        if let Some(announced) = response.content_length().filter(|&len| len > piece_len) {
            tracing::debug!("HTTP seed announced {announced} bytes for a {piece_len} byte piece");
            return Ok(None);
        }

        let mut piece = BytesMut::with_capacity(piece_len as usize);
        while let Some(chunk) = response.chunk().await? {
            if (piece.len() + chunk.len()) as u64 > piece_len {
                tracing::debug!("HTTP seed sent more than {piece_len} bytes for one piece");
                return Ok(None);
            }
            piece.extend_from_slice(&chunk);
        }
        Ok(Some(piece.freeze()))
    }

    fn promote_to_seed(&self, id: Uuid) {
        if let Some(entry) = self.sessions.write().get_mut(&id) {
            entry.handle.role = SwarmRole::Seeding;
        }
    }
}

/// Sleeps for `delay`; false when cancelled first.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

struct DownloadJob {
    inner: Arc<SwarmInner>,
    id: Uuid,
    descriptor: Arc<TorrentDescriptor>,
    store: Arc<dyn PieceStore>,
    pieces: Arc<PieceStateTable>,
    stats: Arc<TransferStats>,
    cancel: CancellationToken,
}

impl DownloadJob {
    async fn run(self: Arc<Self>) {
        let worker_count = self.inner.config.workers.max(1) as u32;
        let piece_count = self.descriptor.piece_count();

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let job = Arc::clone(&self);
            let start = worker * piece_count / worker_count;
            workers.spawn(async move { job.fetch_loop(start).await });
        }
        while workers.join_next().await.is_some() {}

        if self.pieces.is_complete() && !self.cancel.is_cancelled() {
            self.inner.promote_to_seed(self.id);
            tracing::info!(
                "Downloaded all {} pieces in {:.2?}, now seeding",
                piece_count,
                self.stats.elapsed()
            );
        }
    }

    async fn fetch_loop(&self, start: u32) {
        let poll_interval = self.inner.config.poll_interval;
        let mut hint = start;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let Some(index) = self.pieces.claim_pending(hint) else {
                if self.pieces.is_complete() {
                    return;
                }
                // Remaining pieces are in flight on other workers.
                if !pause(&self.cancel, poll_interval).await {
                    return;
                }
                continue;
            };
            hint = index.as_u32() + 1;

            let fetched = tokio::select! {
                () = self.cancel.cancelled() => return,
                fetched = self.inner.fetch_piece(self.id, &self.descriptor, index) => fetched,
            };

            let retry = match fetched {
                Ok(piece) => self.accept_piece(index, piece).await,
                Err(SwarmError::PieceUnavailable { .. }) => {
                    tracing::trace!("Piece {index} not available yet");
                    true
                }
                Err(e) => {
                    tracing::warn!("Fetching piece {index} failed: {e}");
                    true
                }
            };

            if retry {
                self.pieces.set(index, PieceStatus::Pending);
                if !pause(&self.cancel, poll_interval).await {
                    return;
                }
            }
        }
    }

    /// Verifies and stores a piece. Returns true when it must be fetched again.
    async fn accept_piece(&self, index: PieceIndex, piece: Bytes) -> bool {
        self.stats.record_read(piece.len() as u64);

        if !self.descriptor.verify_piece(index, &piece) {
            self.stats.record_rejected();
            tracing::warn!("Piece {index} failed hash verification, will refetch");
            return true;
        }

        if let Err(e) = self.store.write_piece(index, &piece).await {
            tracing::error!("Failed to store piece {index}: {e}");
            return true;
        }

        self.stats.record_useful(piece.len() as u64);
        self.pieces.set(index, PieceStatus::Complete);
        tracing::trace!("Piece {index} complete");
        false
    }
}

#[async_trait]
impl SwarmEngine for DirectSwarm {
    async fn start_seeding(
        &self,
        descriptor: &TorrentDescriptor,
        store: Arc<dyn PieceStore>,
    ) -> Result<SwarmHandle, SwarmError> {
        let pieces = Arc::new(PieceStateTable::completed(descriptor.piece_count()));
        let entry = self.register(descriptor, store, SwarmRole::Seeding, pieces)?;

        tracing::info!(
            info_hash = %descriptor.info_hash,
            "Seeding {:?}: {} pieces of {} bytes",
            descriptor.name,
            descriptor.piece_count(),
            descriptor.piece_length
        );
        Ok(entry.handle)
    }

    async fn start_download(
        &self,
        descriptor: &TorrentDescriptor,
        store: Arc<dyn PieceStore>,
    ) -> Result<DownloadSession, SwarmError> {
        let pieces = Arc::new(PieceStateTable::new(descriptor.piece_count()));
        let entry = self.register(
            descriptor,
            Arc::clone(&store),
            SwarmRole::Downloading,
            Arc::clone(&pieces),
        )?;
        let stats = Arc::new(TransferStats::new(descriptor.total_length));

        let job = Arc::new(DownloadJob {
            inner: Arc::clone(&self.inner),
            id: entry.handle.id,
            descriptor: Arc::new(descriptor.clone()),
            store: Arc::clone(&store),
            pieces: Arc::clone(&pieces),
            stats: Arc::clone(&stats),
            cancel: entry.cancel.clone(),
        });
        let span = tracing::info_span!("download", info_hash = %descriptor.info_hash);
        tokio::spawn(job.run().instrument(span));

        tracing::info!(
            info_hash = %descriptor.info_hash,
            "Downloading {:?}: {} pieces",
            descriptor.name,
            descriptor.piece_count()
        );
        Ok(DownloadSession {
            handle: entry.handle,
            feed: pieces,
            stats,
            store,
        })
    }

    fn drop_session(&self, handle: &SwarmHandle) -> bool {
        let Some(entry) = self.inner.sessions.write().remove(&handle.id) else {
            return false;
        };
        entry.cancel.cancel();
        entry.pieces.close();
        tracing::info!(
            info_hash = %entry.handle.info_hash,
            "Dropped {} session {}",
            entry.handle.role,
            entry.handle.id
        );
        true
    }

    fn status(&self, info_hash: &InfoHash) -> SwarmStatus {
        let sessions = self.inner.sessions.read();
        let mut status = SwarmStatus::default();
        for entry in sessions.values() {
            if entry.handle.info_hash == *info_hash {
                status.exists = true;
                status.seeding |= entry.handle.role == SwarmRole::Seeding;
            }
        }
        status
    }

    fn sessions_for(&self, info_hash: &InfoHash) -> Vec<SwarmHandle> {
        self.inner
            .sessions
            .read()
            .values()
            .filter(|entry| entry.handle.info_hash == *info_hash)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    async fn read_seeded_piece(
        &self,
        info_hash: &InfoHash,
        index: PieceIndex,
    ) -> Result<Bytes, SwarmError> {
        if !self.status(info_hash).exists {
            return Err(SwarmError::NotFound {
                info_hash: *info_hash,
            });
        }
        let store = self
            .inner
            .local_holder(info_hash, index, None)
            .ok_or(SwarmError::PieceUnavailable {
                info_hash: *info_hash,
                index,
            })?;
        Ok(store.read_piece(index).await?)
    }
}
