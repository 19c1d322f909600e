//! GATT transport layer abstraction.
//!
//! Defines the `GattCentral` and `GattSession` traits for BLE communication,
//! allowing different implementations (btleplug, mock, etc.).

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    #[error("Peer not found: {id}")]
    PeerNotFound { id: String },

    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound { uuid: Uuid },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Bluetooth backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform identifier of a discovered peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub id: PeerId,
    /// Advertised local name.
    pub name: String,
    pub rssi: Option<i16>,
}

/// Whether attribute discovery may answer from a local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Cached,
    /// Always re-fetch the attribute table from the peer.
    Uncached,
}

/// Acknowledgment mode of a characteristic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Resolves once the peer confirms the write.
    #[default]
    WithResponse,
    /// Resolves once the write has been sent locally.
    WithoutResponse,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::WithResponse => write!(f, "with-response"),
            WriteMode::WithoutResponse => write!(f, "without-response"),
        }
    }
}

/// Outcome of a single write attempt reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    /// Peer did not answer or the stack could not reach it.
    Unreachable,
    /// Peer rejected the write with an ATT error.
    ProtocolError,
    AccessDenied,
}

impl WriteStatus {
    pub fn is_success(self) -> bool {
        self == WriteStatus::Success
    }
}

impl fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStatus::Success => write!(f, "Success"),
            WriteStatus::Unreachable => write!(f, "Unreachable"),
            WriteStatus::ProtocolError => write!(f, "ProtocolError"),
            WriteStatus::AccessDenied => write!(f, "AccessDenied"),
        }
    }
}

/// A primary service exposed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub uuid: Uuid,
    pub primary: bool,
}

/// Characteristic property subset relevant to the OTA flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl fmt::Display for CharProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.read, "read"),
            (self.write, "write"),
            (self.write_without_response, "write-without-response"),
            (self.notify, "notify"),
            (self.indicate, "indicate"),
        ];
        let names: Vec<&str> = flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// A characteristic inside a service. Opaque to the protocol layer beyond
/// identity; backends use it to locate the platform object on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharProps,
}

/// Scanning and connection establishment.
#[async_trait]
pub trait GattCentral: Send + Sync {
    type Session: GattSession;

    /// Start scanning and return the stream of advertisements.
    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredPeer>, TransportError>;

    /// Stop a scan started with [`GattCentral::scan`].
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Connect to a previously discovered peer.
    async fn connect(&self, peer: &DiscoveredPeer) -> Result<Self::Session, TransportError>;
}

/// Attribute access on one established connection.
#[async_trait]
pub trait GattSession: Send + Sync {
    /// The peer this session is connected to.
    fn peer(&self) -> &DiscoveredPeer;

    /// Check if the link is still up.
    async fn is_connected(&self) -> bool;

    /// List services with the given UUID.
    async fn list_services(
        &self,
        service: Uuid,
        cache: CacheMode,
    ) -> Result<Vec<ServiceHandle>, TransportError>;

    /// List all characteristics of a service.
    async fn list_characteristics(
        &self,
        service: &ServiceHandle,
        cache: CacheMode,
    ) -> Result<Vec<CharacteristicHandle>, TransportError>;

    /// Issue a single write attempt.
    ///
    /// A rejected write is reported through `WriteStatus`; `Err` is reserved
    /// for failures of the link itself.
    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<WriteStatus, TransportError>;

    /// Tear down the connection.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
