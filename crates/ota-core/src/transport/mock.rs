//! Mock GATT transport for testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use uuid::Uuid;

use super::traits::{
    CacheMode, CharProps, CharacteristicHandle, DiscoveredPeer, GattCentral, GattSession, PeerId,
    ServiceHandle, TransportError, WriteMode, WriteStatus,
};
use crate::protocol::constants::{OTA_CONTROL_UUID, OTA_DATA_UUID, OTA_SERVICE_UUID};

/// Operation observed by a mock session, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    ListServices { uuid: Uuid, cache: CacheMode },
    ListCharacteristics { service: Uuid, cache: CacheMode },
    WriteIssued { uuid: Uuid, data: Vec<u8>, mode: WriteMode },
    WriteCompleted { uuid: Uuid, data: Vec<u8>, status: WriteStatus },
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    services: Vec<(ServiceHandle, Vec<CharacteristicHandle>)>,
    /// Statuses returned before a characteristic starts succeeding.
    scripted: HashMap<Uuid, VecDeque<WriteStatus>>,
    /// Characteristics whose writes never complete.
    stalled: HashSet<Uuid>,
    /// Attribute discovery never completes.
    discovery_stalled: bool,
    /// Link drops once this many writes have completed.
    disconnect_after: Option<usize>,
    completed_writes: usize,
    log: Vec<MockOp>,
    connected: bool,
}

/// Mock session backed by an in-memory attribute table.
///
/// Clones share state, so a test can keep a handle after passing the
/// session to code that consumes it.
#[derive(Debug, Clone)]
pub struct MockSession {
    peer: DiscoveredPeer,
    state: Arc<Mutex<MockState>>,
}

fn writable(uuid: Uuid, service_uuid: Uuid) -> CharacteristicHandle {
    CharacteristicHandle {
        uuid,
        service_uuid,
        properties: CharProps {
            write: true,
            ..Default::default()
        },
    }
}

impl MockSession {
    /// Peer with an empty attribute table.
    pub fn new(name: &str) -> Self {
        Self {
            peer: DiscoveredPeer {
                id: PeerId(format!("mock:{name}")),
                name: name.to_string(),
                rssi: Some(-50),
            },
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                ..Default::default()
            })),
        }
    }

    /// Peer running the OTA loader: service with control and data.
    pub fn ota_loader(name: &str) -> Self {
        Self::new(name).with_service(
            OTA_SERVICE_UUID,
            &[
                writable(OTA_CONTROL_UUID, OTA_SERVICE_UUID),
                writable(OTA_DATA_UUID, OTA_SERVICE_UUID),
            ],
        )
    }

    /// Peer running application firmware: the OTA service only exposes control.
    pub fn application(name: &str) -> Self {
        Self::new(name).with_service(
            OTA_SERVICE_UUID,
            &[writable(OTA_CONTROL_UUID, OTA_SERVICE_UUID)],
        )
    }

    /// Add a service with the given characteristic table.
    pub fn with_service(self, uuid: Uuid, characteristics: &[CharacteristicHandle]) -> Self {
        self.state.lock().unwrap().services.push((
            ServiceHandle {
                uuid,
                primary: true,
            },
            characteristics.to_vec(),
        ));
        self
    }

    /// Returned statuses for the next writes to `uuid`, before it succeeds.
    pub fn fail_writes(&self, uuid: Uuid, statuses: impl IntoIterator<Item = WriteStatus>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(uuid)
            .or_default()
            .extend(statuses);
    }

    /// Make every write to `uuid` hang forever.
    pub fn stall_writes(&self, uuid: Uuid) {
        self.state.lock().unwrap().stalled.insert(uuid);
    }

    /// Make service discovery hang forever.
    pub fn stall_discovery(&self) {
        self.state.lock().unwrap().discovery_stalled = true;
    }

    /// Drop the link after `count` completed writes.
    pub fn disconnect_after_writes(&self, count: usize) {
        self.state.lock().unwrap().disconnect_after = Some(count);
    }

    /// Get all observed operations.
    pub fn ops(&self) -> Vec<MockOp> {
        self.state.lock().unwrap().log.clone()
    }

    /// Get payloads of successful writes to `uuid`, in order.
    pub fn delivered(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                MockOp::WriteCompleted {
                    uuid: u,
                    data,
                    status: WriteStatus::Success,
                } if u == uuid => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Number of write attempts issued to `uuid`.
    pub fn attempts(&self, uuid: Uuid) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, MockOp::WriteIssued { uuid: u, .. } if *u == uuid))
            .count()
    }

    /// Whether the session was released through `disconnect`.
    pub fn was_released(&self) -> bool {
        self.ops().contains(&MockOp::Disconnect)
    }

    fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }
}

#[async_trait]
impl GattSession for MockSession {
    fn peer(&self) -> &DiscoveredPeer {
        &self.peer
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn list_services(
        &self,
        service: Uuid,
        cache: CacheMode,
    ) -> Result<Vec<ServiceHandle>, TransportError> {
        let stalled = {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(TransportError::Disconnected);
            }
            state.log.push(MockOp::ListServices {
                uuid: service,
                cache,
            });
            state.discovery_stalled
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .services
            .iter()
            .filter(|(s, _)| s.uuid == service)
            .map(|(s, _)| s.clone())
            .collect())
    }

    async fn list_characteristics(
        &self,
        service: &ServiceHandle,
        cache: CacheMode,
    ) -> Result<Vec<CharacteristicHandle>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        state.log.push(MockOp::ListCharacteristics {
            service: service.uuid,
            cache,
        });
        Ok(state
            .services
            .iter()
            .filter(|(s, _)| s == service)
            .flat_map(|(_, chars)| chars.iter().cloned())
            .collect())
    }

    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<WriteStatus, TransportError> {
        let uuid = characteristic.uuid;
        let stalled = {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(TransportError::Disconnected);
            }
            state.log.push(MockOp::WriteIssued {
                uuid,
                data: data.to_vec(),
                mode,
            });
            state.stalled.contains(&uuid)
        };

        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.disconnect_after == Some(state.completed_writes) {
            state.connected = false;
            return Err(TransportError::Disconnected);
        }

        let status = state
            .scripted
            .get_mut(&uuid)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(WriteStatus::Success);
        state.completed_writes += 1;
        state.log.push(MockOp::WriteCompleted {
            uuid,
            data: data.to_vec(),
            status,
        });
        Ok(status)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.log.push(MockOp::Disconnect);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CentralState {
    adverts: Vec<DiscoveredPeer>,
    /// Sessions handed out per peer; the last one is reused.
    sessions: HashMap<PeerId, VecDeque<MockSession>>,
    scans_started: usize,
    scans_stopped: usize,
    connects: usize,
    /// Connection attempts never complete.
    connect_stalled: bool,
}

/// Mock central replaying a fixed advertisement list.
#[derive(Debug, Clone, Default)]
pub struct MockCentral {
    state: Arc<Mutex<CentralState>>,
    /// End the scan stream after the adverts instead of keeping it open.
    finite_scan: bool,
}

impl MockCentral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan stream ends after the scripted adverts.
    pub fn with_finite_scan(mut self) -> Self {
        self.finite_scan = true;
        self
    }

    /// Advertise a connectable peer. Adding the same peer again queues
    /// the next session returned by `connect`, e.g. after a reboot.
    pub fn add_peer(&self, session: MockSession) {
        let mut state = self.state.lock().unwrap();
        let peer = session.peer().clone();
        if !state.adverts.contains(&peer) {
            state.adverts.push(peer.clone());
        }
        state.sessions.entry(peer.id).or_default().push_back(session);
    }

    /// Advertise a peer that is not connectable.
    pub fn add_advert(&self, peer: DiscoveredPeer) {
        self.state.lock().unwrap().adverts.push(peer);
    }

    /// Make every `connect` hang forever.
    pub fn stall_connects(&self) {
        self.state.lock().unwrap().connect_stalled = true;
    }

    pub fn scans_started(&self) -> usize {
        self.state.lock().unwrap().scans_started
    }

    pub fn scans_stopped(&self) -> usize {
        self.state.lock().unwrap().scans_stopped
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }
}

#[async_trait]
impl GattCentral for MockCentral {
    type Session = MockSession;

    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredPeer>, TransportError> {
        let adverts = {
            let mut state = self.state.lock().unwrap();
            state.scans_started += 1;
            state.adverts.clone()
        };
        let replay = stream::iter(adverts);
        if self.finite_scan {
            Ok(replay.boxed())
        } else {
            Ok(replay.chain(stream::pending()).boxed())
        }
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state.lock().unwrap().scans_stopped += 1;
        Ok(())
    }

    async fn connect(&self, peer: &DiscoveredPeer) -> Result<MockSession, TransportError> {
        let stalled = {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            state.connect_stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        let queue = state
            .sessions
            .get_mut(&peer.id)
            .ok_or_else(|| TransportError::PeerNotFound {
                id: peer.id.0.clone(),
            })?;
        let session = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
        .ok_or_else(|| TransportError::PeerNotFound {
            id: peer.id.0.clone(),
        })?;
        session.set_connected(true);
        Ok(session)
    }
}
