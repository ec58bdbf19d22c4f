//! Origin to peers distribution through one in-process swarm

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use seedcast_core::descriptor::DescriptorBuilder;
use seedcast_core::storage::{
    BackendSettings, MemoryBackend, MemoryPieceStore, PieceStore, StorageBackend,
};
use seedcast_core::swarm::PieceStatus;
use seedcast_core::{
    DirectSwarm, DirectSwarmConfig, DistributionSession, PieceCompletionWaiter, ReceiveOutcome,
    SessionState, SwarmEngine, TorrentDescriptor, WaitOutcome, download_descriptor,
};
use tokio_util::sync::CancellationToken;

const PEERS: u64 = 3;

fn settings(piece_length: u32) -> BackendSettings {
    BackendSettings {
        base_dir: std::path::PathBuf::from("/nonexistent"),
        artifact_name: "model.bin".to_string(),
        builder: DescriptorBuilder::new().with_piece_length(piece_length),
    }
}

fn origin_backend(len: usize, piece_length: u32) -> (Arc<MemoryBackend>, Bytes) {
    let artifact: Bytes = (0..len).map(|i| (i * 7 + i / 251) as u8).collect::<Vec<_>>().into();
    let backend = MemoryBackend::with_buffer(settings(piece_length), artifact.clone());
    (Arc::new(backend), artifact)
}

fn engine() -> Arc<DirectSwarm> {
    Arc::new(DirectSwarm::new(DirectSwarmConfig {
        poll_interval: Duration::from_millis(10),
        ..DirectSwarmConfig::default()
    }))
}

#[tokio::test]
async fn test_every_peer_receives_the_artifact_and_completion_fires_once() {
    let (origin_backend, artifact) = origin_backend(64 * 1024 + 123, 4096);
    let engine = engine();
    let session = Arc::new(DistributionSession::new(
        "model.bin",
        PEERS,
        origin_backend,
        engine.clone(),
    ));

    let peers: Vec<_> = (0..PEERS)
        .map(|_| {
            let session = Arc::clone(&session);
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let published = session.request_descriptor().await.unwrap();
                let descriptor = TorrentDescriptor::from_bytes(&published.encoded).unwrap();

                let peer_backend = MemoryBackend::new(settings(0));
                let target = peer_backend.download_target(&descriptor).await.unwrap();
                let download = engine
                    .start_download(&descriptor, Arc::clone(&target))
                    .await
                    .unwrap();

                let outcome = tokio::time::timeout(
                    Duration::from_secs(10),
                    PieceCompletionWaiter::all(download.feed.clone())
                        .wait(&CancellationToken::new()),
                )
                .await
                .unwrap();
                assert_eq!(outcome, WaitOutcome::Completed);
                assert_eq!(download.feed.count(PieceStatus::Complete), descriptor.piece_count());

                let mut contents = Vec::new();
                for index in 0..target.piece_count() {
                    let piece = target
                        .read_piece(seedcast_core::PieceIndex::new(index))
                        .await
                        .unwrap();
                    contents.extend_from_slice(&piece);
                }

                session.record_send_ack("finished");
                let report = session.record_peer_received(contents.len());
                (contents, report)
            })
        })
        .collect();

    let mut completions = 0;
    for peer in peers {
        let (contents, report) = peer.await.unwrap();
        assert_eq!(contents, artifact.to_vec());
        if report.just_completed() {
            completions += 1;
        }
    }

    assert_eq!(completions, 1);
    assert_eq!(session.send_times(), PEERS);
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(
        session.record_peer_received(0),
        ReceiveOutcome::Duplicate {
            received: PEERS + 1
        }
    );
}

#[tokio::test]
async fn test_peer_download_helper_reseeds_for_later_peers() {
    let (origin_backend, artifact) = origin_backend(20_000, 1024);
    let engine = engine();
    let session = DistributionSession::new("model.bin", 2, origin_backend, engine.clone());

    let published = session.request_descriptor().await.unwrap();
    let descriptor = TorrentDescriptor::from_bytes(&published.encoded).unwrap();
    let peer_backend = MemoryBackend::new(settings(0));

    let report = download_descriptor(
        &peer_backend,
        engine.as_ref(),
        &descriptor,
        Duration::from_millis(50),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.bytes, artifact.len() as u64);

    // Once the origin stops, the finished peer still serves every piece.
    session.abort();
    assert_eq!(session.state(), SessionState::Aborted);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !engine.status(&descriptor.info_hash).seeding {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let late_target: Arc<dyn PieceStore> =
        Arc::new(MemoryPieceStore::zeroed(&descriptor).unwrap());
    let late = engine
        .start_download(&descriptor, Arc::clone(&late_target))
        .await
        .unwrap();
    let outcome = PieceCompletionWaiter::all(late.feed.clone())
        .wait(&CancellationToken::new())
        .await;
    assert_eq!(outcome, WaitOutcome::Completed);
}
