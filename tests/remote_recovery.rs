// tests/remote_recovery.rs
//
// Covers recovery from http(s) locations against a local fixture server:
// the full download-verify-swap path, the checksum gate on remote bytes,
// non-2xx handling, and corrupt-archive rejection.

use sha2::{Digest, Sha256};
use shardsnap::{RecoveryRequest, ShardKey, SnapshotConfig, SnapshotError, SnapshotService};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn service(root: &Path) -> SnapshotService {
    SnapshotService::new(SnapshotConfig {
        data_root: root.join("shards"),
        snapshots_root: root.join("snapshots"),
        download_retry_interval_ms: 50,
        download_retry_attempts: 1,
        task_retention: Duration::from_secs(300),
    })
}

async fn seeded_shard(service: &SnapshotService, collection: &str, shard_id: u32) -> ShardKey {
    let key = ShardKey::new(collection, shard_id);
    let shard = service.catalog().register(key.clone()).unwrap();
    shard
        .write_file("segments/seg0.dat", b"alpha beta gamma")
        .await
        .unwrap();
    key
}

/// Serves `bytes` at `/snapshot.tar` on an ephemeral port; anything else
/// gets a 404.
fn fixture_server(bytes: Vec<u8>) -> (String, Arc<tiny_http::Server>) {
    let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
    let addr = server.server_addr().to_ip().unwrap();
    let base = format!("http://{}", addr);

    let background = Arc::clone(&server);
    thread::spawn(move || {
        for request in background.incoming_requests() {
            if request.url() == "/snapshot.tar" {
                let _ = request.respond(tiny_http::Response::from_data(bytes.clone()));
            } else {
                let _ = request.respond(tiny_http::Response::empty(404));
            }
        }
    });
    (base, server)
}

/// Creates a snapshot, downloads its bytes, deletes it, and hands back the
/// raw archive plus its reported checksum.
async fn exported_archive(service: &SnapshotService, key: &ShardKey) -> (Vec<u8>, String) {
    let snapshot = service
        .create_snapshot(key, true)
        .await
        .unwrap()
        .into_completed()
        .unwrap();

    let mut reader = service.open_snapshot(key, &snapshot.name).await.unwrap();
    let mut bytes = Vec::new();
    reader.file.read_to_end(&mut bytes).await.unwrap();

    service
        .delete_snapshot(key, &snapshot.name, true)
        .await
        .unwrap();
    (bytes, snapshot.checksum)
}

#[tokio::test]
async fn remote_recovery_with_correct_checksum_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let key = seeded_shard(&service, "books", 0).await;
    let (bytes, checksum) = exported_archive(&service, &key).await;

    // mutate the shard so success is observable
    let shard = service.catalog().get(&key).unwrap();
    shard
        .write_file("segments/seg0.dat", b"mutated")
        .await
        .unwrap();

    let (base, _server) = fixture_server(bytes);
    let request = RecoveryRequest {
        location: format!("{}/snapshot.tar", base),
        checksum: Some(checksum),
    };
    let outcome = service.recover_shard(&key, request, true).await.unwrap();
    assert!(!outcome.is_accepted());

    assert_eq!(
        shard.read_file("segments/seg0.dat").await.unwrap(),
        b"alpha beta gamma"
    );
}

#[tokio::test]
async fn remote_recovery_with_wrong_checksum_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let key = seeded_shard(&service, "books", 0).await;
    let (bytes, checksum) = exported_archive(&service, &key).await;

    let shard = service.catalog().get(&key).unwrap();
    shard
        .write_file("segments/seg0.dat", b"mutated")
        .await
        .unwrap();

    let (base, _server) = fixture_server(bytes);
    let request = RecoveryRequest {
        location: format!("{}/snapshot.tar", base),
        checksum: Some("3".repeat(checksum.len())),
    };
    let result = service.recover_shard(&key, request, true).await;
    assert!(matches!(
        result,
        Err(SnapshotError::ChecksumMismatch { .. })
    ));

    // rejected before the swap: the mutation is still live
    assert_eq!(
        shard.read_file("segments/seg0.dat").await.unwrap(),
        b"mutated"
    );
}

#[tokio::test]
async fn remote_404_is_invalid_location() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let key = seeded_shard(&service, "books", 0).await;

    let (base, _server) = fixture_server(Vec::new());
    let request = RecoveryRequest {
        location: format!("{}/missing.snapshot", base),
        checksum: None,
    };
    let result = service.recover_shard(&key, request, true).await;
    assert!(matches!(result, Err(SnapshotError::InvalidLocation(_))));
}

#[tokio::test]
async fn garbage_archive_with_matching_checksum_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let key = seeded_shard(&service, "books", 0).await;

    let garbage = b"this is definitely not a tar archive".to_vec();
    let checksum = format!("{:x}", Sha256::digest(&garbage));

    let shard = service.catalog().get(&key).unwrap();
    let (base, _server) = fixture_server(garbage);
    let request = RecoveryRequest {
        location: format!("{}/snapshot.tar", base),
        checksum: Some(checksum),
    };
    let result = service.recover_shard(&key, request, true).await;
    assert!(matches!(result, Err(SnapshotError::CorruptArchive(_))));

    // structural rejection happens before the swap
    assert_eq!(
        shard.read_file("segments/seg0.dat").await.unwrap(),
        b"alpha beta gamma"
    );
}
