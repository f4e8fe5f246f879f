//! End-to-end synchronization over real loopback TCP: two full devices,
//! encrypted framed transport, watermarked batching and idempotent apply.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use noted_core::notes::NoteUpdate;
use noted_core::oplog::Operation;
use noted_core::transport::InboundHandler;
use noted_core::{Noted, NotedConfig};

async fn open_device(name: &str) -> Noted {
    let mut config = NotedConfig::in_memory();
    config.device_name = Some(name.to_string());
    Noted::open(config).await.unwrap()
}

/// Both devices confirm each other, as the trust-on-first-use flow would.
fn pair(a: &Noted, b: &Noted) {
    a.accept_peer(&b.loopback_descriptor()).unwrap();
    b.accept_peer(&a.loopback_descriptor()).unwrap();
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Counts delivered batch sizes alongside the sync manager's own handler.
struct BatchRecorder {
    tx: async_channel::Sender<usize>,
}

#[async_trait]
impl InboundHandler for BatchRecorder {
    async fn handle(&self, _sender_device_id: &str, operations: Vec<Operation>) {
        let _ = self.tx.send(operations.len()).await;
    }
}

#[tokio::test]
async fn create_round_trip_converges() {
    let a = open_device("device-a").await;
    let b = open_device("device-b").await;
    pair(&a, &b);

    let uuid = a.create_note("Hello", "World", "t1").await.unwrap();
    a.sync().await.unwrap();

    assert!(
        eventually(|| async { b.get_note(&uuid).await.unwrap().is_some() }).await,
        "note never arrived at device B"
    );

    let a_note = a.get_note(&uuid).await.unwrap().unwrap();
    let b_note = b.get_note(&uuid).await.unwrap().unwrap();
    assert_eq!(b_note.title, "Hello");
    assert_eq!(b_note.contents, "World");
    assert_eq!(a_note.note_hash, b_note.note_hash);
    assert!(b.clock().now() >= 2);

    // Re-deliver the same operations; the apply path must treat them as
    // no-ops.
    let ops = a.change_log().since_lamport(0).await.unwrap();
    a.transport().push(b.device_id(), &ops).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(b.list_notes(true).await.unwrap().len(), 1);
    assert_eq!(
        b.get_note(&uuid).await.unwrap().unwrap().note_hash,
        a_note.note_hash
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn batches_of_fifty_with_watermark_advance() {
    let a = open_device("device-a").await;
    let b = open_device("device-b").await;
    pair(&a, &b);

    let (tx, rx) = async_channel::unbounded();
    b.transport().register_handler(Arc::new(BatchRecorder { tx }));

    for i in 0..120 {
        a.create_note(&format!("note {}", i), "body", "bulk")
            .await
            .unwrap();
    }
    a.sync().await.unwrap();

    // Exactly three pushes: 50, 50, 20. Each push travels on its own
    // connection, so delivery order across batches is not guaranteed.
    let mut sizes = Vec::new();
    for _ in 0..3 {
        let size = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a batch")
            .unwrap();
        sizes.push(size);
    }
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(sizes, vec![50, 50, 20]);
    assert!(tokio::time::timeout(Duration::from_millis(300), rx.recv())
        .await
        .is_err());

    // The watermark equals the largest Lamport among the 120 operations.
    assert_eq!(
        a.sync_manager().watermark(b.device_id()).await.unwrap(),
        a.clock().now()
    );

    assert!(
        eventually(|| async { b.list_notes(false).await.unwrap().len() == 120 }).await,
        "device B never converged to all 120 notes"
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn bidirectional_sync_converges_content_hashes() {
    let a = open_device("device-a").await;
    let b = open_device("device-b").await;
    pair(&a, &b);

    let shopping = a.create_note("Shopping", "milk", "errands").await.unwrap();
    let ideas = a.create_note("Ideas", "rust crate", "dev").await.unwrap();
    let journal = b.create_note("Journal", "sunny day", "diary").await.unwrap();

    a.sync().await.unwrap();
    assert!(eventually(|| async { b.list_notes(false).await.unwrap().len() == 3 }).await);

    // Concurrent divergence: B edits a note A originated, A deletes another.
    b.update_note(
        &shopping,
        NoteUpdate {
            contents: Some("milk, eggs, bread".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    a.delete_note(&ideas).await.unwrap();

    b.sync().await.unwrap();
    assert!(
        eventually(|| async {
            a.get_note(&journal).await.unwrap().is_some()
                && a.get_note(&shopping).await.unwrap().unwrap().contents == "milk, eggs, bread"
        })
        .await
    );
    a.sync().await.unwrap();
    assert!(
        eventually(|| async { b.get_note(&ideas).await.unwrap().map(|n| n.deleted) == Some(true) })
            .await
    );

    // Every uuid either exists on both sides with equal hashes or on neither.
    let a_notes = a.list_notes(true).await.unwrap();
    let b_notes = b.list_notes(true).await.unwrap();
    assert_eq!(a_notes.len(), 3);
    assert_eq!(b_notes.len(), 3);
    for a_note in &a_notes {
        let b_note = b_notes
            .iter()
            .find(|n| n.uuid == a_note.uuid)
            .expect("note missing on device B");
        assert_eq!(
            a_note.note_hash, b_note.note_hash,
            "hash divergence on {}",
            a_note.uuid
        );
        assert_eq!(a_note.deleted, b_note.deleted);
    }

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn unsynced_peer_receives_nothing_without_trust() {
    let a = open_device("device-a").await;
    let b = open_device("device-b").await;

    // A trusts B, but B never confirmed A: inbound handshakes are refused.
    a.accept_peer(&b.loopback_descriptor()).unwrap();
    let uuid = a.create_note("Secret", "draft", "private").await.unwrap();
    a.sync().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(b.get_note(&uuid).await.unwrap().is_none());
    // The push failed end-to-end or was dropped; either way nothing applied
    // and the next sync will retry from the same watermark state.
    assert!(b.list_notes(true).await.unwrap().is_empty());

    a.shutdown().await;
    b.shutdown().await;
}
