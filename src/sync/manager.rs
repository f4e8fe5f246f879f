use std::sync::Arc;

use async_lock::Mutex as AsyncMutex;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value};

use crate::clock::LamportClock;
use crate::index::{EmbeddingProvider, LexicalIndex, VectorIndex};
use crate::notes::{NoteDraft, NotesRepository, NoteUpdate};
use crate::oplog::{ChangeLog, Operation, OperationKind};
use crate::persistence::PersistenceWorker;
use crate::search::SearchEngine;
use crate::sync::error::{apply_error, internal_error, SyncResult};
use crate::transport::{InboundHandler, Transport};
use crate::util::time::now_iso8601;

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Orchestrates outbound batching against per-peer watermarks and the
/// idempotent apply of inbound batches. Also the entry point for local
/// mutations, so store, indexes and change log always move together.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<SyncManagerInner>,
}

struct SyncManagerInner {
    worker: PersistenceWorker,
    device_id: String,
    notes: NotesRepository,
    change_log: ChangeLog,
    clock: LamportClock,
    search: SearchEngine,
    lexical: LexicalIndex,
    vectors: VectorIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    transport: Transport,
    batch_size: usize,
    /// Serialises inbound applies across concurrent connections.
    apply_lock: AsyncMutex<()>,
}

/// The delivery callback registered with the transport; breaks the
/// manager/transport cycle with a one-way registration hook.
struct OperationDelivery {
    manager: SyncManager,
}

#[async_trait]
impl InboundHandler for OperationDelivery {
    async fn handle(&self, sender_device_id: &str, operations: Vec<Operation>) {
        if let Err(err) = self
            .manager
            .apply_remote_batch(sender_device_id, operations)
            .await
        {
            log::error!("failed to apply batch from {}: {}", sender_device_id, err);
        }
    }
}

impl SyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker: PersistenceWorker,
        device_id: impl Into<String>,
        notes: NotesRepository,
        change_log: ChangeLog,
        clock: LamportClock,
        search: SearchEngine,
        lexical: LexicalIndex,
        vectors: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        transport: Transport,
        batch_size: usize,
    ) -> Self {
        let manager = Self {
            inner: Arc::new(SyncManagerInner {
                worker,
                device_id: device_id.into(),
                notes,
                change_log,
                clock,
                search,
                lexical,
                vectors,
                embedder,
                transport: transport.clone(),
                batch_size,
                apply_lock: AsyncMutex::new(()),
            }),
        };
        transport.register_handler(Arc::new(OperationDelivery {
            manager: manager.clone(),
        }));
        manager
    }

    /// Creates the sync bookkeeping tables and seeds the last-sync row.
    pub async fn initialize(&self) -> SyncResult<()> {
        self.inner
            .worker
            .submit(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS last_sync (
                        id INTEGER PRIMARY KEY CHECK (id = 1) DEFAULT 1,
                        last_updated DATETIME)",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO last_sync (id, last_updated)
                     SELECT 1, ?1 WHERE NOT EXISTS (SELECT * FROM last_sync)",
                    [now_iso8601()],
                )?;
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS last_lamport_sync (
                        peer_device_id TEXT PRIMARY KEY,
                        last_lamport INTEGER)",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    // ---- outbound -------------------------------------------------------

    /// Pushes originated operations to every registered peer, each peer in
    /// parallel. A failing peer is aborted without advancing its watermark
    /// and does not affect the others.
    pub async fn sync(&self) -> SyncResult<()> {
        let peers = self.inner.transport.peers();
        let pushes = peers
            .iter()
            .map(|peer| self.sync_with(peer.device_id.clone()));
        let results = futures::future::join_all(pushes).await;

        for (peer, result) in peers.iter().zip(results) {
            if let Err(err) = result {
                log::error!("sync-up to {} failed: {}", peer.device_id, err);
            }
        }
        Ok(())
    }

    /// Sync-up against one peer: everything past its watermark that this
    /// device originated, in batches, watermark advanced only on full
    /// success.
    pub async fn sync_with(&self, peer_device_id: String) -> SyncResult<()> {
        let watermark = self.watermark(&peer_device_id).await?;
        let operations = self.inner.change_log.since_lamport(watermark).await?;
        let originated: Vec<Operation> = operations
            .into_iter()
            .filter(|op| op.origin_device == self.inner.device_id)
            .collect();

        if originated.is_empty() {
            return Ok(());
        }

        let mut highest = watermark;
        for batch in originated.chunks(self.inner.batch_size) {
            self.inner.transport.push(&peer_device_id, batch).await?;
            let batch_max = batch
                .iter()
                .map(|op| op.lamport_clock)
                .max()
                .unwrap_or(watermark);
            highest = highest.max(batch_max);
        }

        self.set_watermark(&peer_device_id, highest).await?;
        log::info!(
            "pushed {} operations to {}, watermark now {}",
            originated.len(),
            peer_device_id,
            highest
        );
        Ok(())
    }

    /// The highest Lamport value confirmed delivered to this peer; 0 when we
    /// never pushed to it.
    pub async fn watermark(&self, peer_device_id: &str) -> SyncResult<u64> {
        let peer = peer_device_id.to_string();
        let value = self
            .inner
            .worker
            .submit(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT last_lamport FROM last_lamport_sync WHERE peer_device_id = ?1",
                        [&peer],
                        |row| row.get::<_, u64>(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_watermark(&self, peer_device_id: &str, value: u64) -> SyncResult<()> {
        let peer = peer_device_id.to_string();
        self.inner
            .worker
            .submit(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO last_lamport_sync (peer_device_id, last_lamport)
                     VALUES (?1, ?2)",
                    params![peer, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // ---- inbound --------------------------------------------------------

    /// Applies a delivered batch: Lamport-ascending with op-id tie-break,
    /// each operation in its own protected scope so one failure never kills
    /// the rest.
    pub async fn apply_remote_batch(
        &self,
        sender_device_id: &str,
        mut operations: Vec<Operation>,
    ) -> SyncResult<()> {
        log::info!(
            "applying {} operations from {}",
            operations.len(),
            sender_device_id
        );
        operations.sort_by(|a, b| {
            a.lamport_clock
                .cmp(&b.lamport_clock)
                .then_with(|| a.op_id.cmp(&b.op_id))
        });

        let _guard = self.inner.apply_lock.lock().await;
        for op in &operations {
            match self.apply_operation(op).await {
                Ok(true) => {
                    self.touch_last_sync().await?;
                }
                Ok(false) => {}
                Err(err) => {
                    log::warn!("failed to apply operation {}: {}", op.op_id, err);
                }
            }
        }
        Ok(())
    }

    /// Applies one operation. `Ok(true)` means the store changed and the
    /// operation is now in the local change log; `Ok(false)` means it was
    /// skipped (duplicate, missing prerequisite, or collision).
    async fn apply_operation(&self, op: &Operation) -> SyncResult<bool> {
        if self.inner.change_log.exists(&op.op_id).await? {
            log::debug!("skipping duplicate operation {}", op.op_id);
            return Ok(false);
        }

        let payload = op
            .payload_value()
            .map_err(|err| apply_error(format!("malformed payload in {}: {}", op.op_id, err)))?;

        self.inner.clock.observe(op.lamport_clock);
        self.inner.clock.persist().await?;

        match op.operation_type {
            OperationKind::Create => self.apply_create(op, &payload).await,
            OperationKind::Update => self.apply_update(op, &payload).await,
            OperationKind::Delete => self.apply_delete(op).await,
        }
    }

    async fn apply_create(&self, op: &Operation, payload: &Value) -> SyncResult<bool> {
        if self.inner.notes.get(&op.note_id).await?.is_some() {
            log::warn!(
                "could not create note {}: a note with this id already exists",
                op.note_id
            );
            return Ok(false);
        }

        let title = field_str(payload, "title");
        let contents = field_str(payload, "contents");
        let tags = field_str(payload, "tags");
        let created_at = field_str_or(payload, "created_at", &op.timestamp);
        let last_updated = field_str_or(payload, "last_updated", &op.timestamp);

        let embedding = self
            .inner
            .embedder
            .embed(&format!("{} {} {}", title, contents, tags))
            .await?;

        self.inner
            .notes
            .insert(NoteDraft {
                uuid: op.note_id.clone(),
                title: title.clone(),
                contents: contents.clone(),
                created_at,
                last_updated,
                embedding: Some(embedding.clone()),
                tags,
            })
            .await?;

        self.inner.vectors.add(&op.note_id, embedding)?;
        self.inner.search.index_note(&op.note_id).await?;
        self.inner.lexical.index_note(&op.note_id, &title, &contents).await?;
        self.inner.change_log.append(op).await?;

        log::info!("inserted note {} originated by {}", op.note_id, op.origin_device);
        Ok(true)
    }

    async fn apply_update(&self, op: &Operation, payload: &Value) -> SyncResult<bool> {
        let Some(existing) = self.inner.notes.get(&op.note_id).await? else {
            log::warn!(
                "could not update note {}: no note with this id exists yet",
                op.note_id
            );
            return Ok(false);
        };

        let update = NoteUpdate {
            title: field_opt(payload, "title"),
            contents: field_opt(payload, "contents"),
            tags: field_opt(payload, "tags"),
            embedding: None,
        };

        let title = update.title.clone().unwrap_or_else(|| existing.title.clone());
        let contents = update
            .contents
            .clone()
            .unwrap_or_else(|| existing.contents.clone());
        let tags = update.tags.clone().unwrap_or_else(|| existing.tags.clone());

        let embedding = self
            .inner
            .embedder
            .embed(&format!("{} {} {}", title, contents, tags))
            .await?;

        self.inner
            .notes
            .update(
                &op.note_id,
                NoteUpdate {
                    embedding: Some(embedding.clone()),
                    ..update
                },
            )
            .await?;

        if existing.deleted {
            // The tombstone absorbs visibility: fields may change but the
            // note never re-enters the indexes.
            log::debug!("note {} is tombstoned; skipping re-index", op.note_id);
        } else {
            self.inner.search.update_index(&op.note_id).await?;
            self.inner.lexical.index_note(&op.note_id, &title, &contents).await?;
            self.inner.vectors.update(&op.note_id, embedding)?;
        }

        self.inner.change_log.append(op).await?;
        log::info!("updated note {} from operation {}", op.note_id, op.op_id);
        Ok(true)
    }

    async fn apply_delete(&self, op: &Operation) -> SyncResult<bool> {
        if self.inner.notes.get(&op.note_id).await?.is_none() {
            log::warn!(
                "could not delete note {}: no note with this id exists",
                op.note_id
            );
            return Ok(false);
        }

        self.inner.notes.mark_deleted(&op.note_id).await?;
        self.inner.lexical.remove_note(&op.note_id).await?;
        self.inner.search.remove_from_index(&op.note_id).await?;
        self.inner.vectors.remove(&op.note_id);
        self.inner.change_log.append(op).await?;

        log::info!("marked note {} as deleted", op.note_id);
        Ok(true)
    }

    // ---- local mutations ------------------------------------------------

    /// Creates a note from a local user action and logs the operation.
    pub async fn create_note(
        &self,
        title: &str,
        contents: &str,
        tags: &str,
    ) -> SyncResult<String> {
        let embedding = self
            .inner
            .embedder
            .embed(&format!("{} {} {}", title, contents, tags))
            .await?;

        let uuid = self
            .inner
            .notes
            .create(title, contents, tags, Some(embedding.clone()))
            .await?;

        self.inner.search.index_note(&uuid).await?;
        self.inner.lexical.index_note(&uuid, title, contents).await?;
        self.inner.vectors.add(&uuid, embedding)?;

        let note = self
            .inner
            .notes
            .get(&uuid)
            .await?
            .ok_or_else(|| internal_error("freshly created note vanished"))?;
        let payload = json!({
            "uuid": note.uuid,
            "title": note.title,
            "contents": note.contents,
            "tags": note.tags,
            "created_at": note.created_at,
            "last_updated": note.last_updated,
        });

        let lamport = self.inner.clock.tick();
        self.inner.clock.persist().await?;
        let op = Operation::originate(
            OperationKind::Create,
            &uuid,
            &payload,
            lamport,
            &self.inner.device_id,
        );
        self.inner.change_log.append(&op).await?;

        log::info!("created note {}", uuid);
        Ok(uuid)
    }

    /// Applies a local partial edit and logs an update operation carrying
    /// only the changed fields. Returns false when the note does not exist.
    pub async fn update_note(&self, uuid: &str, update: NoteUpdate) -> SyncResult<bool> {
        let Some(existing) = self.inner.notes.get(uuid).await? else {
            return Ok(false);
        };

        let title = update.title.clone().unwrap_or_else(|| existing.title.clone());
        let contents = update
            .contents
            .clone()
            .unwrap_or_else(|| existing.contents.clone());
        let tags = update.tags.clone().unwrap_or_else(|| existing.tags.clone());

        let embedding = self
            .inner
            .embedder
            .embed(&format!("{} {} {}", title, contents, tags))
            .await?;

        let mut payload = serde_json::Map::new();
        if let Some(value) = &update.title {
            payload.insert("title".into(), Value::String(value.clone()));
        }
        if let Some(value) = &update.contents {
            payload.insert("contents".into(), Value::String(value.clone()));
        }
        if let Some(value) = &update.tags {
            payload.insert("tags".into(), Value::String(value.clone()));
        }

        self.inner
            .notes
            .update(
                uuid,
                NoteUpdate {
                    title: update.title,
                    contents: update.contents,
                    tags: update.tags,
                    embedding: Some(embedding.clone()),
                },
            )
            .await?;

        if existing.deleted {
            log::debug!("note {} is tombstoned; skipping re-index", uuid);
        } else {
            self.inner.search.update_index(uuid).await?;
            self.inner.lexical.index_note(uuid, &title, &contents).await?;
            self.inner.vectors.update(uuid, embedding)?;
        }

        let lamport = self.inner.clock.tick();
        self.inner.clock.persist().await?;
        let op = Operation::originate(
            OperationKind::Update,
            uuid,
            &Value::Object(payload),
            lamport,
            &self.inner.device_id,
        );
        self.inner.change_log.append(&op).await?;

        log::info!("updated note {}", uuid);
        Ok(true)
    }

    /// Tombstones a note locally and logs the delete operation. Returns
    /// false when the note does not exist.
    pub async fn delete_note(&self, uuid: &str) -> SyncResult<bool> {
        if self.inner.notes.get(uuid).await?.is_none() {
            return Ok(false);
        }

        self.inner.notes.mark_deleted(uuid).await?;
        self.inner.lexical.remove_note(uuid).await?;
        self.inner.search.remove_from_index(uuid).await?;
        self.inner.vectors.remove(uuid);

        let lamport = self.inner.clock.tick();
        self.inner.clock.persist().await?;
        let op = Operation::originate(
            OperationKind::Delete,
            uuid,
            &json!({"deleted": 1}),
            lamport,
            &self.inner.device_id,
        );
        self.inner.change_log.append(&op).await?;

        log::info!("marked note {} as deleted", uuid);
        Ok(true)
    }

    // ---- bookkeeping ----------------------------------------------------

    pub async fn last_sync(&self) -> SyncResult<String> {
        let value = self
            .inner
            .worker
            .submit(|conn| {
                Ok(conn.query_row("SELECT last_updated FROM last_sync WHERE id = 1", [], |row| {
                    row.get::<_, String>(0)
                })?)
            })
            .await?;
        Ok(value)
    }

    async fn touch_last_sync(&self) -> SyncResult<()> {
        self.inner
            .worker
            .submit(|conn| {
                conn.execute(
                    "UPDATE last_sync SET last_updated = ?1 WHERE id = 1",
                    [now_iso8601()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn field_str(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn field_str_or(payload: &Value, key: &str, fallback: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn field_opt(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{eventually, TestDevice};

    fn manual_op(
        kind: OperationKind,
        op_id: &str,
        note_id: &str,
        lamport: u64,
        origin: &str,
        payload: Value,
    ) -> Operation {
        Operation {
            op_id: op_id.into(),
            note_id: note_id.into(),
            operation_type: kind,
            lamport_clock: lamport,
            origin_device: origin.into(),
            timestamp: "2026-01-01T00:00:00.000Z".into(),
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn create_round_trips_between_devices() {
        let a = TestDevice::new("device-a").await;
        let b = TestDevice::new("device-b").await;

        let uuid = a.sync.create_note("Hello", "World", "t1").await.unwrap();
        assert_eq!(a.clock.now(), 1);

        let ops = a.change_log.since_lamport(0).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation_type, OperationKind::Create);
        assert_eq!(ops[0].lamport_clock, 1);
        assert_eq!(ops[0].origin_device, "device-a");
        assert_eq!(ops[0].note_id, uuid);

        b.sync.apply_remote_batch("device-a", ops.clone()).await.unwrap();

        let note = b.notes.get(&uuid).await.unwrap().unwrap();
        assert_eq!(note.title, "Hello");
        assert_eq!(note.contents, "World");
        assert_eq!(note.tags, "t1");
        assert!(b.clock.now() >= 2);
        assert!(b.change_log.exists(&ops[0].op_id).await.unwrap());

        // The derived indexes follow the apply.
        let hits = b.search.search("Hello").await.unwrap();
        assert_eq!(hits[0].0, uuid);
        assert!(b.vectors.contains(&uuid));
        assert_eq!(b.lexical.search("World").await.unwrap(), vec![uuid.clone()]);

        // Both devices agree on the content hash.
        let a_note = a.notes.get(&uuid).await.unwrap().unwrap();
        assert_eq!(a_note.note_hash, note.note_hash);

        // Applying the batch touched the last-sync marker.
        let last_sync = b.sync.last_sync().await.unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&last_sync).is_ok());

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn replaying_a_batch_is_idempotent() {
        let a = TestDevice::new("device-a").await;
        let b = TestDevice::new("device-b").await;

        let uuid = a.sync.create_note("Hello", "World", "t1").await.unwrap();
        let ops = a.change_log.since_lamport(0).await.unwrap();

        b.sync.apply_remote_batch("device-a", ops.clone()).await.unwrap();
        let clock_after_first = b.clock.now();

        b.sync.apply_remote_batch("device-a", ops).await.unwrap();

        let all = b.notes.list(true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uuid, uuid);
        // The duplicate is detected before observe, so the clock holds.
        assert_eq!(b.clock.now(), clock_after_first);

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn out_of_order_update_applies_after_its_create_arrives() {
        let b = TestDevice::new("device-b").await;

        let update = manual_op(
            OperationKind::Update,
            "op-update",
            "U1",
            5,
            "device-a",
            json!({"title": "New"}),
        );
        let create = manual_op(
            OperationKind::Create,
            "op-create",
            "U1",
            4,
            "device-a",
            json!({"title": "Hello", "contents": "World", "tags": "t1"}),
        );

        // The update arrives first: logged as a warning, not recorded.
        b.sync
            .apply_remote_batch("device-a", vec![update.clone()])
            .await
            .unwrap();
        assert!(!b.change_log.exists("op-update").await.unwrap());
        assert!(b.notes.get("U1").await.unwrap().is_none());

        b.sync.apply_remote_batch("device-a", vec![create]).await.unwrap();
        assert_eq!(b.notes.get("U1").await.unwrap().unwrap().title, "Hello");

        // Retransmission satisfies the update once its prerequisite exists.
        b.sync.apply_remote_batch("device-a", vec![update]).await.unwrap();
        let note = b.notes.get("U1").await.unwrap().unwrap();
        assert_eq!(note.title, "New");
        assert!(b.change_log.exists("op-update").await.unwrap());

        b.shutdown().await;
    }

    #[tokio::test]
    async fn delete_absorbs_a_later_update() {
        let b = TestDevice::new("device-b").await;

        let batch = vec![
            manual_op(
                OperationKind::Create,
                "op-1",
                "U1",
                1,
                "device-a",
                json!({"title": "Hello", "contents": "World", "tags": "t1"}),
            ),
            manual_op(
                OperationKind::Delete,
                "op-2",
                "U1",
                2,
                "device-a",
                json!({"deleted": 1}),
            ),
            manual_op(
                OperationKind::Update,
                "op-3",
                "U1",
                3,
                "device-a",
                json!({"title": "X"}),
            ),
        ];
        b.sync.apply_remote_batch("device-a", batch).await.unwrap();

        let note = b.notes.get("U1").await.unwrap().unwrap();
        assert!(note.deleted, "the tombstone must survive the later update");
        assert!(b.notes.list(false).await.unwrap().is_empty());

        // The tombstoned note never re-enters the indexes.
        assert!(b.search.search("X").await.unwrap().is_empty());
        assert!(b.lexical.search("Hello").await.unwrap().is_empty());
        assert!(!b.vectors.contains("U1"));
        assert!(b.change_log.exists("op-3").await.unwrap());

        b.shutdown().await;
    }

    #[tokio::test]
    async fn sync_up_forwards_only_operations_this_device_originated() {
        let a = TestDevice::new("device-a").await;
        let mut b = TestDevice::new("device-b").await;
        b.start_listener().await;

        // One note of our own, one applied on behalf of a third device.
        let own = a.sync.create_note("Mine", "local note", "t").await.unwrap();
        let foreign = manual_op(
            OperationKind::Create,
            "op-foreign",
            "U-foreign",
            10,
            "device-c",
            json!({"title": "Theirs", "contents": "remote note", "tags": "t"}),
        );
        a.sync.apply_remote_batch("device-c", vec![foreign]).await.unwrap();

        a.trust(&b);
        b.trust(&a);
        a.sync.sync().await.unwrap();

        assert!(
            eventually(|| async { b.notes.get(&own).await.unwrap().is_some() }).await,
            "own note must reach the peer"
        );
        // The foreign note is never forwarded by a non-origin device.
        assert!(b.notes.get("U-foreign").await.unwrap().is_none());
        assert!(!b.change_log.exists("op-foreign").await.unwrap());

        // Watermark covers everything we originated.
        let ops = a.change_log.since_lamport(0).await.unwrap();
        let own_max = ops
            .iter()
            .filter(|op| op.origin_device == "device-a")
            .map(|op| op.lamport_clock)
            .max()
            .unwrap();
        assert_eq!(a.sync.watermark("device-b").await.unwrap(), own_max);

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn failed_push_leaves_the_watermark_unchanged() {
        let a = TestDevice::new("device-a").await;
        a.sync.create_note("Hello", "World", "t1").await.unwrap();

        // A peer that is registered but unreachable.
        let dead_secret = x25519_dalek::StaticSecret::random_from_rng(rand::rngs::OsRng);
        let dead = crate::discovery::DiscoveredPeer {
            device_id: "device-dead".into(),
            device_name: "device-dead".into(),
            address: "127.0.0.1".into(),
            port: 1,
            public_key: crate::identity::encode_public_key_der(&x25519_dalek::PublicKey::from(
                &dead_secret,
            )),
            service_name: "device-dead._noted._tcp.local.".into(),
        };
        a.transport.register_peer(&dead).unwrap();

        let err = a.sync.sync_with("device-dead".to_string()).await.unwrap_err();
        assert_eq!(err.code_str(), "sync/transport");
        assert_eq!(a.sync.watermark("device-dead").await.unwrap(), 0);

        // The peer-level failure never escapes a full sync pass.
        a.sync.sync().await.unwrap();

        a.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_create_is_ignored_without_mutation() {
        let b = TestDevice::new("device-b").await;

        let uuid = b.sync.create_note("Original", "body", "t").await.unwrap();
        let colliding = manual_op(
            OperationKind::Create,
            "op-collide",
            &uuid,
            9,
            "device-a",
            json!({"title": "Impostor", "contents": "x", "tags": ""}),
        );
        b.sync.apply_remote_batch("device-a", vec![colliding]).await.unwrap();

        let note = b.notes.get(&uuid).await.unwrap().unwrap();
        assert_eq!(note.title, "Original");
        assert!(!b.change_log.exists("op-collide").await.unwrap());

        b.shutdown().await;
    }

    #[tokio::test]
    async fn local_update_and_delete_log_operations() {
        let a = TestDevice::new("device-a").await;

        let uuid = a.sync.create_note("Hello", "World", "t1").await.unwrap();
        let updated = a
            .sync
            .update_note(
                &uuid,
                NoteUpdate {
                    title: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated);
        assert!(a.sync.delete_note(&uuid).await.unwrap());

        let ops = a.change_log.since_lamport(0).await.unwrap();
        let kinds: Vec<OperationKind> = ops.iter().map(|op| op.operation_type).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Create,
                OperationKind::Update,
                OperationKind::Delete
            ]
        );
        // Lamport stamps are strictly increasing and persisted.
        assert!(ops.windows(2).all(|w| w[0].lamport_clock < w[1].lamport_clock));
        assert_eq!(a.clock.now(), 3);

        // The update payload carries only the changed fields.
        let update_payload = ops[1].payload_value().unwrap();
        assert_eq!(update_payload, json!({"title": "Renamed"}));

        // Editing a missing note is reported, not an error.
        assert!(!a
            .sync
            .update_note("no-such", NoteUpdate::default())
            .await
            .unwrap());
        assert!(!a.sync.delete_note("no-such").await.unwrap());

        a.shutdown().await;
    }
}
