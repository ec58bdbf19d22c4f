//! Seed-management endpoints: create, seed, stop, inspect and download descriptors
//!
//! Every handler dispatches through the backend selected at startup, so an
//! unsupported storage method is rejected here before any descriptor work.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::response::Json;
use bytes::Bytes;
use seedcast_core::storage::DataSource;
use seedcast_core::{
    InfoHash, PieceIndex, StorageError, StorageMethod, TorrentDescriptor, download_descriptor,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::server::AppState;

/// Body of `/create_torrent`; an empty body means "describe the configured artifact".
#[derive(Debug, Default, Deserialize)]
pub struct CreateTorrentRequest {
    /// Content to describe instead of the configured artifact
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Reply to `/start_seeding`.
#[derive(Debug, Serialize)]
pub struct SeedingStarted {
    /// Hex info hash of the seeded descriptor
    pub info_hash: String,
}

/// Reply to `/get_torrent_status`.
#[derive(Debug, Serialize)]
pub struct TorrentStatus {
    /// The engine holds a session for the descriptor
    pub exist: bool,
    /// At least one of those sessions is seeding
    pub seeding: bool,
}

/// Reply to `/start_downloading`.
#[derive(Debug, Serialize)]
pub struct DownloadFinished {
    /// Where the content landed; `null` for in-memory storage
    pub path: Option<String>,
    /// Bytes downloaded
    pub bytes: u64,
}

fn ensure_supported(state: &AppState) -> Result<(), ApiError> {
    let method = state.backend.method();
    if method.is_supported() {
        Ok(())
    } else {
        Err(StorageError::Unsupported { method }.into())
    }
}

fn decode(body: &[u8]) -> Result<TorrentDescriptor, ApiError> {
    Ok(TorrentDescriptor::from_bytes(body)?)
}

/// Builds a descriptor and returns its encoded bytes.
///
/// # Errors
///
/// Fails on malformed JSON, unreadable content or an unsupported backend.
pub async fn create_torrent(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Bytes, ApiError> {
    let request: CreateTorrentRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateTorrentRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest {
            reason: format!("invalid create_torrent body: {e}"),
        })?
    };

    let source = match request.path {
        Some(path) if state.backend.method() == StorageMethod::Memory => {
            let data = tokio::fs::read(&path).await.map_err(StorageError::from)?;
            DataSource::InMemoryBuffer(Bytes::from(data))
        }
        Some(path) => DataSource::FilesystemPath(path),
        None => state.backend.source().await?,
    };

    let descriptor = state.backend.create_descriptor(&source).await?;
    tracing::info!(
        info_hash = %descriptor.info_hash,
        "Created descriptor for {} ({} pieces)",
        descriptor.name,
        descriptor.piece_count()
    );
    Ok(Bytes::from(descriptor.to_bytes()?))
}

/// Materializes a descriptor through the backend and seeds it.
///
/// # Errors
///
/// Fails on a malformed descriptor, a backend mismatch or an unsupported backend.
pub async fn start_seeding(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SeedingStarted>, ApiError> {
    ensure_supported(&state)?;
    let descriptor = decode(&body)?;
    let store = state.backend.materialize(&descriptor).await?;
    let handle = state.engine.start_seeding(&descriptor, store).await?;
    Ok(Json(SeedingStarted {
        info_hash: handle.info_hash.to_string(),
    }))
}

/// Drops every engine session for a descriptor. Unknown descriptors are a no-op.
///
/// # Errors
///
/// Fails on a malformed descriptor or an unsupported backend.
pub async fn stop_seeding(State(state): State<AppState>, body: Bytes) -> Result<(), ApiError> {
    ensure_supported(&state)?;
    let descriptor = decode(&body)?;
    let sessions = state.engine.sessions_for(&descriptor.info_hash);
    if sessions.is_empty() {
        tracing::info!(info_hash = %descriptor.info_hash, "Nothing to stop");
        return Ok(());
    }
    for handle in &sessions {
        state.engine.drop_session(handle);
    }
    Ok(())
}

/// Reports whether the engine holds and seeds a descriptor.
///
/// # Errors
///
/// Fails on a malformed descriptor or an unsupported backend.
pub async fn get_torrent_status(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TorrentStatus>, ApiError> {
    ensure_supported(&state)?;
    let descriptor = decode(&body)?;
    let status = state.engine.status(&descriptor.info_hash);
    Ok(Json(TorrentStatus {
        exist: status.exists,
        seeding: status.seeding,
    }))
}

/// Downloads a descriptor into the backend's download target and waits for it.
///
/// # Errors
///
/// Fails on a malformed descriptor, an unsupported backend, or shutdown
/// before the download finishes.
pub async fn start_downloading(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DownloadFinished>, ApiError> {
    ensure_supported(&state)?;
    let descriptor = decode(&body)?;
    let report = download_descriptor(
        state.backend.as_ref(),
        state.engine.as_ref(),
        &descriptor,
        state.config.torrent.progress_interval(),
        &state.shutdown,
    )
    .await?;

    Ok(Json(DownloadFinished {
        path: report.location.map(|path| path.display().to_string()),
        bytes: report.bytes,
    }))
}

/// Raw bytes of one seeded piece.
///
/// # Errors
///
/// Fails with 404 when no local session holds the piece.
pub async fn read_piece(
    State(state): State<AppState>,
    Path((info_hash, index)): Path<(String, u32)>,
) -> Result<Bytes, ApiError> {
    ensure_supported(&state)?;
    let info_hash = InfoHash::from_hex(&info_hash)?;
    let piece = state
        .engine
        .read_seeded_piece(&info_hash, PieceIndex::new(index))
        .await?;
    Ok(piece)
}
