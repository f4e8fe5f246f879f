use std::sync::Mutex as StdMutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::discovery::error::DiscoveryResult;

/// DNS-SD service type every device advertises and browses.
pub const SERVICE_TYPE: &str = "_noted._tcp.local.";
/// TCP port carried in the advertisement; the transport listener binds it.
pub const SERVICE_PORT: u16 = 5000;

/// A peer seen on the local network, with its long-term public key decoded
/// from the TXT record. Handed to the UI for a trust-on-first-use decision;
/// only confirmed peers reach the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredPeer {
    pub device_id: String,
    pub device_name: String,
    pub address: String,
    pub port: u16,
    /// DER `SubjectPublicKeyInfo` bytes.
    pub public_key: Vec<u8>,
    /// Full service instance name; the key used for departure handling.
    pub service_name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PeerEvent {
    Discovered(DiscoveredPeer),
    Departed { service_name: String },
}

/// Local-network service advertisement and browsing over mDNS.
pub struct Discovery {
    daemon: ServiceDaemon,
    registered: StdMutex<Option<String>>,
}

impl Discovery {
    pub fn new() -> DiscoveryResult<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
            registered: StdMutex::new(None),
        })
    }

    /// Announces this device: instance `"{device_name}._noted._tcp.local."`
    /// with `device_id`, `device_name` and the base64 public key as TXT
    /// properties.
    pub fn advertise(
        &self,
        device_id: &str,
        device_name: &str,
        public_key_der: &[u8],
    ) -> DiscoveryResult<()> {
        let public_key = STANDARD.encode(public_key_der);
        let properties = [
            ("device_id", device_id),
            ("device_name", device_name),
            ("public_key", public_key.as_str()),
        ];
        let host_name = format!("{}.local.", device_id);

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            device_name,
            &host_name,
            "",
            SERVICE_PORT,
            &properties[..],
        )?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon.register(info)?;
        log::info!("advertising {} on {}", fullname, SERVICE_PORT);
        *self.registered.lock().unwrap() = Some(fullname);
        Ok(())
    }

    /// Starts browsing; peer arrivals and departures are delivered on the
    /// returned channel. Arrivals matching `own_device_id` are ignored.
    pub fn browse(&self, own_device_id: &str) -> DiscoveryResult<async_channel::Receiver<PeerEvent>> {
        let events = self.daemon.browse(SERVICE_TYPE)?;
        let (tx, rx) = async_channel::unbounded();
        let own_device_id = own_device_id.to_string();

        std::thread::Builder::new()
            .name("noted-discovery".into())
            .spawn(move || {
                while let Ok(event) = events.recv() {
                    let forwarded = match event {
                        ServiceEvent::ServiceResolved(info) => {
                            match peer_from_service_info(&info, &own_device_id) {
                                Some(peer) => {
                                    log::info!(
                                        "discovered peer {} ({}) at {}:{}",
                                        peer.device_name,
                                        peer.device_id,
                                        peer.address,
                                        peer.port
                                    );
                                    PeerEvent::Discovered(peer)
                                }
                                None => continue,
                            }
                        }
                        ServiceEvent::ServiceRemoved(_, service_name) => {
                            log::info!("peer service removed: {}", service_name);
                            PeerEvent::Departed { service_name }
                        }
                        _ => continue,
                    };
                    if tx.send_blocking(forwarded).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| {
                crate::discovery::error::daemon_error(format!(
                    "failed to spawn discovery thread: {}",
                    err
                ))
            })?;

        Ok(rx)
    }

    /// Unregisters the advertised service and stops the daemon.
    pub fn shutdown(&self) {
        if let Some(fullname) = self.registered.lock().unwrap().take() {
            if let Err(err) = self.daemon.unregister(&fullname) {
                log::warn!("failed to unregister {}: {}", fullname, err);
            }
        }
        if let Err(err) = self.daemon.shutdown() {
            log::warn!("failed to shut down mdns daemon: {}", err);
        }
    }
}

/// Decodes a resolved service into a peer record; `None` for our own
/// advertisement or a record missing required properties.
fn peer_from_service_info(info: &ServiceInfo, own_device_id: &str) -> Option<DiscoveredPeer> {
    let properties = info.get_properties();
    let device_id = properties.get_property_val_str("device_id")?.to_string();
    if device_id == own_device_id {
        return None;
    }

    let device_name = properties.get_property_val_str("device_name")?.to_string();
    let encoded_key = properties.get_property_val_str("public_key")?;
    let public_key = match STANDARD.decode(encoded_key) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!(
                "ignoring peer {} with an undecodable public key: {}",
                device_id,
                err
            );
            return None;
        }
    };

    let address = info
        .get_addresses()
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| info.get_addresses().iter().next())
        .map(|ip| ip.to_string())?;

    Some(DiscoveredPeer {
        device_id,
        device_name,
        address,
        port: info.get_port(),
        public_key,
        service_name: info.get_fullname().to_string(),
    })
}
