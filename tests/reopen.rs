//! Restart semantics over an on-disk store: identity, clock, notes, change
//! log and the rebuilt vector index all survive a close-and-reopen cycle.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use noted_core::{Noted, NotedConfig};

fn temp_db_path() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("noted-reopen-{}-{}.db", std::process::id(), nanos))
}

fn config_at(path: &PathBuf) -> NotedConfig {
    NotedConfig {
        db_path: Some(path.clone()),
        listen_port: 0,
        batch_size: 50,
        device_name: Some("reopen-test".into()),
        enable_discovery: false,
        embedder: None,
    }
}

#[tokio::test]
async fn state_survives_reopen() {
    let path = temp_db_path();

    let device = Noted::open(config_at(&path)).await.unwrap();
    let device_id = device.device_id().to_string();
    let public_key = device.public_key_der().to_vec();
    let uuid = device
        .create_note("Persistent", "survives restarts", "durability")
        .await
        .unwrap();
    assert_eq!(device.clock().now(), 1);
    device.shutdown().await;

    let device = Noted::open(config_at(&path)).await.unwrap();
    assert_eq!(device.device_id(), device_id);
    assert_eq!(device.public_key_der(), public_key.as_slice());
    assert_eq!(device.device_name(), "reopen-test");
    assert_eq!(device.clock().now(), 1);

    let note = device.get_note(&uuid).await.unwrap().unwrap();
    assert_eq!(note.title, "Persistent");
    assert!(note.embedding.is_some());

    // Derived state is back: vector index rebuilt from stored embeddings,
    // token and full-text indexes straight from the store.
    assert_eq!(device.vectors().len(), 1);
    let hits = device.search().search("Persistent").await.unwrap();
    assert_eq!(hits[0].0, uuid);
    let semantic = device
        .search()
        .semantic_search("survives restarts", 5)
        .await
        .unwrap();
    assert_eq!(semantic[0].0, uuid);

    let ops = device.change_log().since_lamport(0).await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].origin_device, device_id);

    device.shutdown().await;
    let _ = std::fs::remove_file(&path);
}
