use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::clock::LamportClock;
use crate::discovery::DiscoveredPeer;
use crate::identity::encode_public_key_der;
use crate::index::{EmbeddingProvider, HashEmbedding, LexicalIndex, TokenIndex, VectorIndex};
use crate::notes::NotesRepository;
use crate::oplog::ChangeLog;
use crate::persistence::PersistenceWorker;
use crate::search::SearchEngine;
use crate::sync::{SyncManager, DEFAULT_BATCH_SIZE};
use crate::transport::Transport;

const TEST_EMBEDDING_DIMENSION: usize = 32;

/// A complete in-process device over an in-memory store, wired exactly like
/// the composition root but with ephemeral listener ports and the
/// deterministic hash embedder.
pub struct TestDevice {
    pub device_id: String,
    pub public_key_der: Vec<u8>,
    pub worker: PersistenceWorker,
    pub notes: NotesRepository,
    pub change_log: ChangeLog,
    pub clock: LamportClock,
    pub tokens: TokenIndex,
    pub lexical: LexicalIndex,
    pub vectors: VectorIndex,
    pub search: SearchEngine,
    pub transport: Transport,
    pub sync: SyncManager,
    pub port: Option<u16>,
}

impl TestDevice {
    pub async fn new(device_id: &str) -> Self {
        Self::with_batch_size(device_id, DEFAULT_BATCH_SIZE).await
    }

    pub async fn with_batch_size(device_id: &str, batch_size: usize) -> Self {
        let worker = PersistenceWorker::open_in_memory().await.unwrap();

        let secret = StaticSecret::random_from_rng(OsRng);
        let public_key_der = encode_public_key_der(&PublicKey::from(&secret));

        let notes = NotesRepository::new(worker.clone());
        notes.initialize().await.unwrap();
        let tokens = TokenIndex::new(worker.clone());
        tokens.initialize().await.unwrap();
        let lexical = LexicalIndex::new(worker.clone());
        lexical.initialize().await.unwrap();
        let change_log = ChangeLog::new(worker.clone(), device_id);
        change_log.initialize().await.unwrap();
        let clock = LamportClock::new(worker.clone());
        clock.initialize().await.unwrap();

        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(HashEmbedding::new(TEST_EMBEDDING_DIMENSION));
        let vectors = VectorIndex::new(TEST_EMBEDDING_DIMENSION);
        let search = SearchEngine::new(
            notes.clone(),
            tokens.clone(),
            lexical.clone(),
            vectors.clone(),
            embedder.clone(),
        );

        let transport = Transport::new(device_id, secret);
        let sync = SyncManager::new(
            worker.clone(),
            device_id,
            notes.clone(),
            change_log.clone(),
            clock.clone(),
            search.clone(),
            lexical.clone(),
            vectors.clone(),
            embedder,
            transport.clone(),
            batch_size,
        );
        sync.initialize().await.unwrap();

        Self {
            device_id: device_id.to_string(),
            public_key_der,
            worker,
            notes,
            change_log,
            clock,
            tokens,
            lexical,
            vectors,
            search,
            transport,
            sync,
            port: None,
        }
    }

    pub async fn start_listener(&mut self) -> u16 {
        let port = self.transport.start_listener(0).await.unwrap();
        self.port = Some(port);
        port
    }

    /// How this device would appear to a peer's discovery browser.
    pub fn descriptor(&self) -> DiscoveredPeer {
        DiscoveredPeer {
            device_id: self.device_id.clone(),
            device_name: self.device_id.clone(),
            address: "127.0.0.1".to_string(),
            port: self.port.unwrap_or(0),
            public_key: self.public_key_der.clone(),
            service_name: format!("{}._noted._tcp.local.", self.device_id),
        }
    }

    /// Registers `other` as a confirmed peer of this device.
    pub fn trust(&self, other: &TestDevice) {
        self.transport.register_peer(&other.descriptor()).unwrap();
    }

    pub async fn shutdown(self) {
        self.transport.shutdown();
        self.worker.shutdown().await;
    }
}

/// Polls an async condition until it holds or a five-second deadline passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
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
