//! Control-plane server: application state, routing and the serve loop

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{MethodRouter, get, post};
use seedcast_core::{DistributionSession, SeedcastConfig, StorageBackend, SwarmEngine};
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::handlers::{
    complete_send, create_torrent, get_torrent_status, read_piece, recv, send, send_times,
    start_downloading, start_seeding, status, stop_seeding,
};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Distribution driven by `/send` and `/recv`
    pub session: Arc<DistributionSession>,
    /// Backend selected at startup
    pub backend: Arc<dyn StorageBackend>,
    /// Engine that seeds and downloads descriptors
    pub engine: Arc<dyn SwarmEngine>,
    /// Loaded configuration
    pub config: Arc<SeedcastConfig>,
    /// Process shutdown token; downloads stop when it fires
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Builds state around `session`, sharing its backend and engine.
    pub fn new(
        session: Arc<DistributionSession>,
        config: Arc<SeedcastConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend: Arc::clone(session.backend()),
            engine: Arc::clone(session.engine()),
            session,
            config,
            shutdown,
        }
    }
}

/// Registers `path` with and without a trailing slash.
fn route_both(
    router: Router<AppState>,
    path: &str,
    handler: MethodRouter<AppState>,
) -> Router<AppState> {
    router
        .route(path, handler.clone())
        .route(&format!("{path}/"), handler)
}

/// Builds the control-plane router.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new();
    let router = route_both(router, "/status", get(status));
    let router = route_both(router, "/send", get(send));
    let router = route_both(router, "/recv", post(recv));
    let router = route_both(router, "/completesend", post(complete_send));
    let router = route_both(router, "/sendtimes", get(send_times));
    let router = route_both(router, "/create_torrent", post(create_torrent));
    let router = route_both(router, "/start_seeding", post(start_seeding));
    let router = route_both(router, "/stop_seeding", post(stop_seeding));
    let router = route_both(router, "/get_torrent_status", post(get_torrent_status));
    let router = route_both(router, "/start_downloading", post(start_downloading));
    let router = route_both(router, "/piece/{info_hash}/{index}", get(read_piece));

    router
        .layer(middleware::from_fn(log_access))
        .with_state(state)
}

async fn log_access(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let response = next.run(request).await;
    match remote {
        Some(peer) => tracing::info!(peer = %peer, "{method} {uri} -> {}", response.status()),
        None => tracing::info!("{method} {uri} -> {}", response.status()),
    }
    response
}

/// Serves the control plane on `address` until the state's shutdown token fires.
///
/// # Errors
///
/// - `ServerError::Bind` - The listen address could not be bound
/// - `ServerError::Serve` - The accept loop failed
pub async fn run_server(state: AppState, address: SocketAddr) -> Result<(), ServerError> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind { address, source })?;
    tracing::info!("Seedcast control plane listening on http://{address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    tracing::info!("Control plane stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use seedcast_core::storage::UnsupportedBackend;
    use seedcast_core::storage::test_fixtures::memory_backend;
    use seedcast_core::{
        DirectSwarm, DirectSwarmConfig, SessionState, StorageMethod, TorrentDescriptor,
    };
    use tower::ServiceExt;

    use super::*;

    const PEERS: u64 = 3;

    fn engine() -> Arc<DirectSwarm> {
        Arc::new(DirectSwarm::new(DirectSwarmConfig {
            poll_interval: Duration::from_millis(10),
            ..DirectSwarmConfig::default()
        }))
    }

    fn state_with(backend: Arc<dyn StorageBackend>) -> AppState {
        let session = Arc::new(DistributionSession::new(
            "model.bin",
            PEERS,
            backend,
            engine(),
        ));
        AppState::new(
            session,
            Arc::new(SeedcastConfig::default()),
            CancellationToken::new(),
        )
    }

    fn memory_state() -> AppState {
        let (backend, _) = memory_backend(10_000, 1024);
        state_with(backend)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: impl Into<Body>,
    ) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_status_answers_with_and_without_trailing_slash() {
        let app = build_router(memory_state());
        for uri in ["/status", "/status/"] {
            let (status, body) = call(&app, "GET", uri, Body::empty()).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"hello");
        }
    }

    #[tokio::test]
    async fn test_send_returns_identical_descriptor_bytes() {
        let state = memory_state();
        let app = build_router(state.clone());

        let (status, first) = call(&app, "GET", "/send", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let (_, second) = call(&app, "GET", "/send/", Body::empty()).await;
        assert_eq!(first, second);

        let descriptor = TorrentDescriptor::from_bytes(&first).unwrap();
        assert_eq!(descriptor.total_length, 10_000);
        assert_eq!(state.session.state(), SessionState::AwaitingPeers);
        assert!(state.engine.status(&descriptor.info_hash).seeding);
    }

    #[tokio::test]
    async fn test_recv_completes_once_at_expected_peer_count() {
        let state = memory_state();
        let app = build_router(state.clone());
        let (status, _) = call(&app, "GET", "/send", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);

        for received in 1..=PEERS {
            let (status, body) = call(&app, "POST", "/recv", "peer done").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"OK");
            assert_eq!(state.session.tracker().is_completed(), received == PEERS);
        }
        assert_eq!(state.session.state(), SessionState::Completed);

        let (status, _) = call(&app, "POST", "/recv/", "late").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.session.tracker().snapshot_recv_times(), PEERS + 1);
        assert_eq!(state.session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_sendtimes_counts_acknowledgements() {
        let app = build_router(memory_state());

        let (_, body) = call(&app, "GET", "/sendtimes", Body::empty()).await;
        assert_eq!(body, b"0");

        for _ in 0..2 {
            let (status, body) = call(&app, "POST", "/completesend", "finished").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"ok");
        }
        let (_, body) = call(&app, "GET", "/sendtimes/", Body::empty()).await;
        assert_eq!(body, b"2");
    }

    #[tokio::test]
    async fn test_disk_backend_is_rejected_with_not_implemented() {
        let disk: Arc<dyn StorageBackend> = Arc::new(UnsupportedBackend::new(StorageMethod::Disk));
        let state = state_with(disk);
        let app = build_router(state.clone());

        let (status, _) = call(&app, "GET", "/send", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(state.session.state(), SessionState::Uninitialized);

        let (status, _) = call(&app, "POST", "/get_torrent_status", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        let (status, _) = call(&app, "POST", "/create_torrent", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_malformed_descriptor_is_a_client_error() {
        let state = memory_state();
        let app = build_router(state.clone());

        for uri in ["/start_seeding", "/stop_seeding", "/get_torrent_status"] {
            let (status, _) = call(&app, "POST", uri, "definitely not bencode").await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
        assert_eq!(state.session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_seed_management_round() {
        let state = memory_state();
        let app = build_router(state.clone());

        let (status, encoded) = call(&app, "POST", "/create_torrent", "{}").await;
        assert_eq!(status, StatusCode::OK);
        let descriptor = TorrentDescriptor::from_bytes(&encoded).unwrap();

        let (_, body) = call(&app, "POST", "/get_torrent_status", encoded.clone()).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "exist": false, "seeding": false }));

        let (status, body) = call(&app, "POST", "/start_seeding/", encoded.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["info_hash"], descriptor.info_hash.to_string());

        let uri = format!("/piece/{}/0", descriptor.info_hash);
        let (status, piece) = call(&app, "GET", &uri, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(piece.len(), 1024);
        assert!(descriptor.verify_piece(seedcast_core::PieceIndex::new(0), &piece));

        let (status, body) = call(&app, "POST", "/start_downloading", encoded.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["bytes"], 10_000);
        assert!(json["path"].is_null());

        let (status, _) = call(&app, "POST", "/stop_seeding", encoded.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "POST", "/get_torrent_status/", encoded.clone()).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["seeding"], false);

        // Stopping again is a no-op.
        let (status, _) = call(&app, "POST", "/stop_seeding", encoded).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_piece_is_not_found() {
        let app = build_router(memory_state());
        let uri = format!("/piece/{}/0", "ab".repeat(20));
        let (status, _) = call(&app, "GET", &uri, Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "GET", "/piece/nothex/0", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
