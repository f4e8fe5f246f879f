use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::AppResult;
use crate::clock::LamportClock;
use crate::discovery::{DiscoveredPeer, Discovery, PeerEvent, SERVICE_PORT, SERVICE_TYPE};
use crate::identity::{encode_public_key_der, IdentityStore};
use crate::index::{EmbeddingProvider, HashEmbedding, LexicalIndex, TokenIndex, VectorIndex};
use crate::notes::{Note, NotesRepository, NoteUpdate};
use crate::oplog::ChangeLog;
use crate::persistence::PersistenceWorker;
use crate::search::SearchEngine;
use crate::sync::{SyncManager, DEFAULT_BATCH_SIZE};
use crate::transport::Transport;

const DEFAULT_DB_PATH: &str = "database/database.db";

/// Bootstrap options for a device. The default configuration opens (or
/// creates) the on-disk store, binds the advertised service port and starts
/// discovery; [`NotedConfig::in_memory`] is the self-contained variant used
/// by tests and throwaway instances.
pub struct NotedConfig {
    /// Store location; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Listener port; 0 binds an ephemeral port.
    pub listen_port: u16,
    pub batch_size: usize,
    /// Persisted on open when provided.
    pub device_name: Option<String>,
    pub enable_discovery: bool,
    /// Embedding oracle; the deterministic hash embedder when absent.
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl Default for NotedConfig {
    fn default() -> Self {
        let db_path = std::env::var("NOTED_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
        Self {
            db_path: Some(db_path),
            listen_port: SERVICE_PORT,
            batch_size: DEFAULT_BATCH_SIZE,
            device_name: None,
            enable_discovery: true,
            embedder: None,
        }
    }
}

impl NotedConfig {
    /// An isolated instance: in-memory store, ephemeral port, no mDNS.
    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            listen_port: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            device_name: None,
            enable_discovery: false,
            embedder: None,
        }
    }
}

/// One running device: the persistence worker, identity, clock, note store,
/// derived indexes, transport and sync manager, wired together the way the
/// components expect and torn down cooperatively.
pub struct Noted {
    device_id: String,
    device_name: String,
    public_key_der: Vec<u8>,
    port: u16,
    worker: PersistenceWorker,
    identity: IdentityStore,
    clock: LamportClock,
    notes: NotesRepository,
    change_log: ChangeLog,
    tokens: TokenIndex,
    lexical: LexicalIndex,
    vectors: VectorIndex,
    search: SearchEngine,
    transport: Transport,
    sync: SyncManager,
    discovery: Option<Discovery>,
    peer_events: Option<async_channel::Receiver<PeerEvent>>,
}

impl Noted {
    pub async fn open(config: NotedConfig) -> AppResult<Self> {
        let worker = match &config.db_path {
            Some(path) => PersistenceWorker::open(path.clone()).await?,
            None => PersistenceWorker::open_in_memory().await?,
        };

        let identity = IdentityStore::new(worker.clone());
        let device_id = identity.device_id().await?;
        if let Some(name) = &config.device_name {
            identity.set_device_name(name.clone()).await?;
        }
        let device_name = identity
            .device_name()
            .await?
            .unwrap_or_else(|| format!("noted-{}", &device_id[..8]));
        let (secret, public) = identity.keypair().await?;
        let public_key_der = encode_public_key_der(&public);

        let clock = LamportClock::new(worker.clone());
        clock.initialize().await?;
        let notes = NotesRepository::new(worker.clone());
        notes.initialize().await?;
        let tokens = TokenIndex::new(worker.clone());
        tokens.initialize().await?;
        let lexical = LexicalIndex::new(worker.clone());
        lexical.initialize().await?;
        let change_log = ChangeLog::new(worker.clone(), device_id.clone());
        change_log.initialize().await?;

        let embedder: Arc<dyn EmbeddingProvider> = config
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbedding::default()));
        // The vector dimension is whatever the oracle actually produces.
        let dimension = embedder.embed("dimension probe").await?.len();
        let vectors = VectorIndex::new(dimension);
        let loaded = vectors.load(&notes.list(false).await?);
        log::debug!("loaded {} stored embeddings into the vector index", loaded);

        let search = SearchEngine::new(
            notes.clone(),
            tokens.clone(),
            lexical.clone(),
            vectors.clone(),
            embedder.clone(),
        );

        let transport = Transport::new(device_id.clone(), secret);
        let port = transport.start_listener(config.listen_port).await?;

        let sync = SyncManager::new(
            worker.clone(),
            device_id.clone(),
            notes.clone(),
            change_log.clone(),
            clock.clone(),
            search.clone(),
            lexical.clone(),
            vectors.clone(),
            embedder,
            transport.clone(),
            config.batch_size,
        );
        sync.initialize().await?;

        let (discovery, peer_events) = if config.enable_discovery {
            let discovery = Discovery::new()?;
            discovery.advertise(&device_id, &device_name, &public_key_der)?;
            let events = discovery.browse(&device_id)?;
            (Some(discovery), Some(events))
        } else {
            (None, None)
        };

        log::info!("device {} ({}) ready on port {}", device_name, device_id, port);

        Ok(Self {
            device_id,
            device_name,
            public_key_der,
            port,
            worker,
            identity,
            clock,
            notes,
            change_log,
            tokens,
            lexical,
            vectors,
            search,
            transport,
            sync,
            discovery,
            peer_events,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn notes(&self) -> &NotesRepository {
        &self.notes
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    pub fn tokens(&self) -> &TokenIndex {
        &self.tokens
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn search(&self) -> &SearchEngine {
        &self.search
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn sync_manager(&self) -> &SyncManager {
        &self.sync
    }

    /// Peer arrivals and departures from discovery, when it is enabled. The
    /// application confirms each arrival (trust-on-first-use) before calling
    /// [`accept_peer`].
    ///
    /// [`accept_peer`]: Noted::accept_peer
    pub fn peer_events(&self) -> Option<async_channel::Receiver<PeerEvent>> {
        self.peer_events.clone()
    }

    /// Registers a user-confirmed peer with the transport.
    pub fn accept_peer(&self, peer: &DiscoveredPeer) -> AppResult<()> {
        self.transport.register_peer(peer)?;
        Ok(())
    }

    /// Drops the peer advertised under `service_name` after a departure.
    pub fn remove_peer(&self, service_name: &str) -> Option<String> {
        self.transport.remove_peer_by_service(service_name)
    }

    /// How this device appears to a peer on the same host; used when pairing
    /// without mDNS (tests, manual setup over loopback).
    pub fn loopback_descriptor(&self) -> DiscoveredPeer {
        DiscoveredPeer {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            address: "127.0.0.1".to_string(),
            port: self.port,
            public_key: self.public_key_der.clone(),
            service_name: format!("{}.{}", self.device_name, SERVICE_TYPE),
        }
    }

    // Convenience passthroughs for front-ends.

    pub async fn create_note(&self, title: &str, contents: &str, tags: &str) -> AppResult<String> {
        Ok(self.sync.create_note(title, contents, tags).await?)
    }

    pub async fn update_note(&self, uuid: &str, update: NoteUpdate) -> AppResult<bool> {
        Ok(self.sync.update_note(uuid, update).await?)
    }

    pub async fn delete_note(&self, uuid: &str) -> AppResult<bool> {
        Ok(self.sync.delete_note(uuid).await?)
    }

    pub async fn get_note(&self, uuid: &str) -> AppResult<Option<Note>> {
        Ok(self.notes.get(uuid).await?)
    }

    pub async fn list_notes(&self, include_deleted: bool) -> AppResult<Vec<Note>> {
        Ok(self.notes.list(include_deleted).await?)
    }

    pub async fn sync(&self) -> AppResult<()> {
        self.sync.sync().await?;
        Ok(())
    }

    /// Cooperative shutdown: discovery first, then the listener, then the
    /// persistence queue is drained and the store closed.
    pub async fn shutdown(&self) {
        if let Some(discovery) = &self.discovery {
            discovery.shutdown();
        }
        self.transport.shutdown();
        self.worker.shutdown().await;
        log::info!("device {} shut down", self.device_id);
    }
}
