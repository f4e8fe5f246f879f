use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::Either;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use x25519_dalek::StaticSecret;

use crate::discovery::DiscoveredPeer;
use crate::identity::decode_public_key_der;
use crate::oplog::Operation;
use crate::transport::error::{connect_error, crypto_error, unknown_peer, TransportResult};
use crate::transport::frame::{
    read_frame, read_handshake, write_frame, write_handshake, write_terminator,
};
use crate::transport::session::{decrypt_frame, derive_session_key, encrypt_frame};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives decrypted operation batches from the inbound dispatcher, one call
/// per frame, in stream order.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, sender_device_id: &str, operations: Vec<Operation>);
}

/// A peer that passed trust-on-first-use confirmation. The session key is
/// cached separately and never exposed.
#[derive(Clone, Debug)]
pub struct RegisteredPeer {
    pub device_id: String,
    pub device_name: String,
    pub address: String,
    pub port: u16,
    pub service_name: String,
}

struct PeerEntry {
    peer: RegisteredPeer,
    session_key: [u8; 32],
}

/// Maintains the registered peer set and their session keys, pushes encrypted
/// operation batches outbound, and dispatches inbound batches to registered
/// handlers.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    device_id: String,
    secret: StaticSecret,
    peers: StdMutex<HashMap<String, PeerEntry>>,
    handlers: StdMutex<Vec<Arc<dyn InboundHandler>>>,
    shutdown: async_channel::Sender<()>,
    shutdown_signal: async_channel::Receiver<()>,
}

impl Transport {
    pub fn new(device_id: impl Into<String>, secret: StaticSecret) -> Self {
        let (shutdown, shutdown_signal) = async_channel::bounded(1);
        Self {
            inner: Arc::new(TransportInner {
                device_id: device_id.into(),
                secret,
                peers: StdMutex::new(HashMap::new()),
                handlers: StdMutex::new(Vec::new()),
                shutdown,
                shutdown_signal,
            }),
        }
    }

    /// Derives and caches the session key for a confirmed peer. Registering
    /// an already-known device id keeps the existing entry.
    pub fn register_peer(&self, peer: &DiscoveredPeer) -> TransportResult<()> {
        let public = decode_public_key_der(&peer.public_key)
            .map_err(|err| crypto_error(format!("peer advertised an invalid public key: {}", err)))?;

        let mut peers = self.inner.peers.lock().unwrap();
        if peers.contains_key(&peer.device_id) {
            log::warn!("peer {} already registered", peer.device_id);
            return Ok(());
        }

        let session_key = derive_session_key(&self.inner.secret, &public);
        peers.insert(
            peer.device_id.clone(),
            PeerEntry {
                peer: RegisteredPeer {
                    device_id: peer.device_id.clone(),
                    device_name: peer.device_name.clone(),
                    address: peer.address.clone(),
                    port: peer.port,
                    service_name: peer.service_name.clone(),
                },
                session_key,
            },
        );
        log::info!("registered peer {} at {}:{}", peer.device_id, peer.address, peer.port);
        Ok(())
    }

    /// Removes the peer advertised under `service_name`, purging its session
    /// key. Returns the device id that was dropped, if any.
    pub fn remove_peer_by_service(&self, service_name: &str) -> Option<String> {
        let mut peers = self.inner.peers.lock().unwrap();
        let device_id = peers
            .values()
            .find(|entry| entry.peer.service_name == service_name)
            .map(|entry| entry.peer.device_id.clone());

        match device_id {
            Some(device_id) => {
                peers.remove(&device_id);
                log::info!("removed peer {} after service departure", device_id);
                Some(device_id)
            }
            None => {
                log::warn!("departure for unregistered service {}", service_name);
                None
            }
        }
    }

    pub fn peers(&self) -> Vec<RegisteredPeer> {
        self.inner
            .peers
            .lock()
            .unwrap()
            .values()
            .map(|entry| entry.peer.clone())
            .collect()
    }

    pub fn register_handler(&self, handler: Arc<dyn InboundHandler>) {
        self.inner.handlers.lock().unwrap().push(handler);
    }

    /// Pushes one batch of operations to a named peer: handshake, a single
    /// encrypted frame, then the terminator. Synchronous per peer; distinct
    /// peers may be pushed in parallel.
    pub async fn push(&self, device_id: &str, operations: &[Operation]) -> TransportResult<()> {
        let (address, port, session_key) = {
            let peers = self.inner.peers.lock().unwrap();
            let entry = peers
                .get(device_id)
                .ok_or_else(|| unknown_peer(format!("no registered peer {}", device_id)))?;
            (entry.peer.address.clone(), entry.peer.port, entry.session_key)
        };

        let payload = serde_json::to_vec(operations)
            .map_err(|err| crypto_error(format!("failed to encode batch: {}", err)))?;
        let frame = encrypt_frame(&session_key, &payload)?;

        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((address.as_str(), port)))
            .await
            .map_err(|_| connect_error(format!("timed out connecting to {}:{}", address, port)))?
            .map_err(|err| {
                connect_error(format!("failed to connect to {}:{}: {}", address, port, err))
            })?;

        write_handshake(&mut stream, &self.inner.device_id).await?;
        write_frame(&mut stream, &frame).await?;
        write_terminator(&mut stream).await?;
        stream.flush().await?;
        stream.shutdown().await?;

        log::debug!("pushed {} operations to {}", operations.len(), device_id);
        Ok(())
    }

    /// Binds the listener and starts accepting connections, each handled on
    /// its own task. Returns the locally bound port.
    pub async fn start_listener(&self, port: u16) -> TransportResult<u16> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let bound_port = listener.local_addr()?.port();
        log::info!("transport listening on port {}", bound_port);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let accept = std::pin::pin!(listener.accept());
                let stop = std::pin::pin!(inner.shutdown_signal.recv());
                match futures::future::select(accept, stop).await {
                    Either::Left((Ok((stream, address)), _)) => {
                        log::info!("new connection from {}", address);
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            handle_connection(inner, stream).await;
                        });
                    }
                    Either::Left((Err(err), _)) => {
                        log::error!("accept failed: {}", err);
                    }
                    Either::Right(_) => break,
                }
            }
            log::info!("transport listener stopped");
        });

        Ok(bound_port)
    }

    /// Stops the accept loop. In-flight connections run to completion.
    pub fn shutdown(&self) {
        self.inner.shutdown.close();
    }

    #[cfg(test)]
    pub(crate) fn session_key_for(&self, device_id: &str) -> Option<[u8; 32]> {
        self.inner.session_key_for(device_id)
    }
}

impl TransportInner {
    fn session_key_for(&self, device_id: &str) -> Option<[u8; 32]> {
        self.peers
            .lock()
            .unwrap()
            .get(device_id)
            .map(|entry| entry.session_key)
    }
}

async fn handle_connection(inner: Arc<TransportInner>, mut stream: TcpStream) {
    let sender = match timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut stream)).await {
        Ok(Ok(device_id)) => device_id,
        Ok(Err(err)) => {
            log::warn!("dropping connection: {}", err);
            return;
        }
        Err(_) => {
            log::warn!("dropping connection: handshake timed out");
            return;
        }
    };

    let Some(session_key) = inner.session_key_for(&sender) else {
        log::warn!("handshake from unknown device {}, dropping connection", sender);
        return;
    };

    loop {
        let frame = match timeout(FRAME_READ_TIMEOUT, read_frame(&mut stream)).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break,
            Ok(Err(err)) => {
                log::warn!("dropping connection from {}: {}", sender, err);
                return;
            }
            Err(_) => {
                log::warn!("dropping connection from {}: frame read timed out", sender);
                return;
            }
        };

        let plaintext = match decrypt_frame(&session_key, &frame) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                log::warn!("dropping connection from {}: {}", sender, err);
                return;
            }
        };

        let operations: Vec<Operation> = match serde_json::from_slice(&plaintext) {
            Ok(operations) => operations,
            Err(err) => {
                log::warn!("dropping connection from {}: malformed batch: {}", sender, err);
                return;
            }
        };

        let handlers: Vec<Arc<dyn InboundHandler>> =
            inner.handlers.lock().unwrap().iter().cloned().collect();
        for handler in handlers {
            handler.handle(&sender, operations.clone()).await;
        }
    }
}
