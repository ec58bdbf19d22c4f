//! Distribution session: one artifact, one origin, a fixed number of peers
//!
//! The session is created by the composition root and shared with request
//! handlers. The descriptor is built on the first request, at most once,
//! and the encoded bytes are cached so every peer receives the same output.

mod state;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use state::SessionState;

use crate::completion::{PeerCompletionTracker, ReceiveOutcome};
use crate::descriptor::{DescriptorError, TorrentDescriptor};
use crate::storage::{StorageBackend, StorageError};
use crate::swarm::{SwarmEngine, SwarmError, SwarmHandle};

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Distribution session was aborted")]
    Aborted,
}

/// Descriptor served to peers together with its encoded form.
#[derive(Debug)]
pub struct PublishedDescriptor {
    pub descriptor: TorrentDescriptor,
    pub encoded: Bytes,
}

/// Orchestrates one distribution from the origin's side.
pub struct DistributionSession {
    id: Uuid,
    label: String,
    expected_peers: u64,
    backend: Arc<dyn StorageBackend>,
    engine: Arc<dyn SwarmEngine>,
    published: OnceCell<Arc<PublishedDescriptor>>,
    state: Mutex<SessionState>,
    seeding: Mutex<Option<SwarmHandle>>,
    tracker: PeerCompletionTracker,
    cancel: CancellationToken,
}

impl DistributionSession {
    /// Creates a session expecting `expected_peers` completion reports.
    ///
    /// `label` names the artifact in completion logs.
    pub fn new(
        label: impl Into<String>,
        expected_peers: u64,
        backend: Arc<dyn StorageBackend>,
        engine: Arc<dyn SwarmEngine>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            expected_peers,
            backend,
            engine,
            published: OnceCell::new(),
            state: Mutex::new(SessionState::Uninitialized),
            seeding: Mutex::new(None),
            tracker: PeerCompletionTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn expected_peers(&self) -> u64 {
        self.expected_peers
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn engine(&self) -> &Arc<dyn SwarmEngine> {
        &self.engine
    }

    pub fn tracker(&self) -> &PeerCompletionTracker {
        &self.tracker
    }

    /// Token cancelled by [`DistributionSession::abort`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Descriptor if it has been built.
    pub fn descriptor(&self) -> Option<Arc<PublishedDescriptor>> {
        self.published.get().cloned()
    }

    /// Returns the descriptor, building it and starting seeding on first use.
    ///
    /// Concurrent first callers share a single build and all receive the same
    /// descriptor. The first call also starts the session timer. A failed build
    /// leaves the session `Uninitialized` and the next call retries.
    ///
    /// # Errors
    ///
    /// - `SessionError::Storage` - Source unavailable or backend unsupported
    /// - `SessionError::Descriptor` - Descriptor could not be encoded
    /// - `SessionError::Swarm` - Seeding could not start
    /// - `SessionError::Aborted` - The session was aborted
    pub async fn request_descriptor(&self) -> Result<Arc<PublishedDescriptor>, SessionError> {
        if let Some(published) = self.published.get() {
            return Ok(Arc::clone(published));
        }
        if self.cancel.is_cancelled() {
            return Err(SessionError::Aborted);
        }
        if self.tracker.mark_started() {
            tracing::info!(session = %self.id, "start timer");
        }

        let published = self
            .published
            .get_or_try_init(|| async {
                tokio::select! {
                    () = self.cancel.cancelled() => Err(SessionError::Aborted),
                    built = self.build_and_seed() => built,
                }
            })
            .await?;
        Ok(Arc::clone(published))
    }

    async fn build_and_seed(&self) -> Result<Arc<PublishedDescriptor>, SessionError> {
        match self.try_build_and_seed().await {
            Ok(published) => Ok(published),
            Err(e) => {
                tracing::error!(session = %self.id, "Descriptor build failed: {e}");
                self.transition(SessionState::Uninitialized);
                Err(e)
            }
        }
    }

    async fn try_build_and_seed(&self) -> Result<Arc<PublishedDescriptor>, SessionError> {
        let source = self.backend.source().await?;
        let descriptor = self.backend.create_descriptor(&source).await?;
        let encoded = Bytes::from(descriptor.to_bytes()?);
        self.transition(SessionState::DescriptorReady);
        tracing::info!(
            info_hash = %descriptor.info_hash,
            "Built descriptor for {:?}: {} bytes in {} pieces, encoded {} bytes",
            descriptor.name,
            descriptor.total_length,
            descriptor.piece_count(),
            encoded.len()
        );

        let store = self.backend.materialize(&descriptor).await?;
        let handle = self.engine.start_seeding(&descriptor, store).await?;
        if self.cancel.is_cancelled() {
            self.engine.drop_session(&handle);
            return Err(SessionError::Aborted);
        }
        *self.seeding.lock() = Some(handle);

        self.transition(SessionState::Seeding);
        self.transition(SessionState::AwaitingPeers);
        tracing::info!(
            session = %self.id,
            "Seeding started, waiting for {} peers",
            self.expected_peers
        );

        Ok(Arc::new(PublishedDescriptor {
            descriptor,
            encoded,
        }))
    }

    /// Counts one peer receipt report.
    ///
    /// The report that reaches the expected peer count moves the session to
    /// `Completed` and logs the total time; later reports are counted and
    /// otherwise ignored.
    pub fn record_peer_received(&self, report_len: usize) -> ReceiveOutcome {
        let outcome = self.tracker.record_received(self.expected_peers);
        match outcome {
            ReceiveOutcome::Counted { received, expected } => {
                tracing::info!("Peer report {received}/{expected} ({report_len} bytes)");
            }
            ReceiveOutcome::Completed { elapsed, .. } => {
                self.transition(SessionState::Completed);
                match elapsed {
                    Some(elapsed) => {
                        tracing::info!("PS, {}, total time: {:.3?}", self.label, elapsed);
                    }
                    None => tracing::warn!(
                        "PS, {}, all peers reported before any descriptor request",
                        self.label
                    ),
                }
            }
            ReceiveOutcome::Duplicate { received } => {
                tracing::debug!("Peer report {received} after completion, ignored");
            }
        }
        outcome
    }

    /// Counts one send acknowledgement; returns the new total.
    pub fn record_send_ack(&self, status: &str) -> u64 {
        let send_times = self.tracker.record_send_ack();
        tracing::info!("Send status {:?}, send times now {send_times}", status.trim());
        send_times
    }

    pub fn send_times(&self) -> u64 {
        self.tracker.snapshot_send_times()
    }

    /// Stops seeding and moves the session to `Aborted`.
    ///
    /// Waiters holding the cancellation token return promptly. A completed
    /// session keeps its state but still releases its seeding session.
    pub fn abort(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.seeding.lock().take() {
            self.engine.drop_session(&handle);
        }
        if self.transition(SessionState::Aborted) {
            tracing::info!(session = %self.id, "Distribution session aborted");
        }
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state == next || !state.can_transition_to(next) {
            return false;
        }
        tracing::debug!(session = %self.id, "Session {} -> {}", *state, next);
        *state = next;
        true
    }
}
