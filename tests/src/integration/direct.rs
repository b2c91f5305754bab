//! SEND-DIRECT scenarios: one-shot buffers and chunked streaming.

use hm_06_operations::DirectDataHandler;
use shared_types::PeerAddress;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::common::perfect_mesh;

#[derive(Default)]
struct Collector {
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl DirectDataHandler for Collector {
    fn receive(&self, _from: &PeerAddress, payload: Vec<u8>) {
        self.chunks.lock().expect("collector lock").push(payload);
    }
}

#[tokio::test]
async fn test_send_direct_reaches_closest_peers() {
    let mesh = perfect_mesh(4).await;
    let target = mesh.peers[3].peer_id();

    let acked = mesh.peers[0]
        .send_direct(target, b"direct hello".to_vec(), false)
        .await_result()
        .await
        .expect("send settles");

    assert!(
        acked.contains(&target),
        "the peer owning the target id acknowledged"
    );

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_empty_payload_is_a_local_error() {
    let mesh = perfect_mesh(2).await;

    let result = mesh.peers[0]
        .send_direct(mesh.peers[1].peer_id(), Vec::new(), false)
        .await_result()
        .await;
    assert!(
        matches!(result, Err(hm_04_rpc::FailReason::IllegalArgument(_))),
        "misuse surfaces before anything hits the wire"
    );

    mesh.shutdown_all().await;
}

#[tokio::test]
async fn test_streamed_send_pipelines_chunks_with_progress() {
    use node_runtime::{PeerBuilder, PeerConfig};

    let mesh = perfect_mesh(3).await;
    let collector = Arc::new(Collector::default());
    let receiver = PeerBuilder::new(PeerConfig::for_testing())
        .peer_id(super::common::mesh_id(6))
        .network(Arc::clone(&mesh.network))
        .time_source(mesh.clock.clone())
        .direct_handler(collector.clone())
        .build()
        .expect("receiver builds");
    receiver
        .bootstrap(mesh.peers[0].advertised_address())
        .await_result()
        .await
        .expect("bootstrap succeeds");

    let chunks: Vec<Vec<u8>> = (0u8..4).map(|i| vec![i; 1_000]).collect();
    let progress = Arc::new(AtomicUsize::new(0));
    let progress_in_listener = progress.clone();

    let acked = mesh.peers[1]
        .send_direct_streamed(
            receiver.peer_id(),
            chunks.clone(),
            move |done, total| {
                assert!(done <= total);
                progress_in_listener.store(done, Ordering::SeqCst);
            },
        )
        .await_result()
        .await
        .expect("stream settles");

    assert!(acked.contains(&receiver.peer_id()));
    assert_eq!(progress.load(Ordering::SeqCst), 4, "every chunk reported");

    let received = collector.chunks.lock().expect("collector lock").clone();
    assert_eq!(received.len(), 4, "receiver saw each chunk exactly once");
    for (index, chunk) in received.iter().enumerate() {
        assert_eq!(chunk, &chunks[index], "chunks arrive in order");
    }

    receiver.shutdown().await;
    mesh.shutdown_all().await;
}
