//! btleplug-based GATT transport implementation.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use super::traits::{
    CacheMode, CharProps, CharacteristicHandle, DiscoveredPeer, GattCentral, GattSession, PeerId,
    ServiceHandle, TransportError, WriteMode, WriteStatus,
};

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::NotConnected | btleplug::Error::DeviceNotFound => {
                TransportError::Disconnected
            }
            other => TransportError::Backend(other.to_string()),
        }
    }
}

impl From<WriteMode> for WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        }
    }
}

/// Classify a completed platform write.
///
/// Link loss is a transport error; every other failure is a status the
/// writer may retry.
fn write_status(result: Result<(), btleplug::Error>) -> Result<WriteStatus, TransportError> {
    match result {
        Ok(()) => Ok(WriteStatus::Success),
        Err(btleplug::Error::NotConnected) | Err(btleplug::Error::DeviceNotFound) => {
            Err(TransportError::Disconnected)
        }
        Err(btleplug::Error::PermissionDenied) => Ok(WriteStatus::AccessDenied),
        Err(btleplug::Error::TimedOut(_)) => Ok(WriteStatus::Unreachable),
        Err(e) => {
            debug!(error = %e, "Write rejected");
            Ok(WriteStatus::ProtocolError)
        }
    }
}

/// Central backed by the first Bluetooth adapter of the platform.
pub struct BtleplugCentral {
    adapter: Adapter,
}

impl BtleplugCentral {
    /// Open the default adapter.
    #[instrument(level = "info")]
    pub async fn open() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterNotFound)?;

        match adapter.adapter_info().await {
            Ok(name) => info!(adapter = %name, "Opened Bluetooth adapter"),
            Err(e) => debug!(error = %e, "Adapter info unavailable"),
        }

        Ok(Self { adapter })
    }
}

#[async_trait]
impl GattCentral for BtleplugCentral {
    type Session = BtleplugSession;

    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredPeer>, TransportError> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        debug!("Scan started");

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                let peripheral = adapter.peripheral(&id).await.ok()?;
                let props = peripheral.properties().await.ok()??;
                let name = props.local_name?;
                trace!(id = %id, name = %name, rssi = ?props.rssi, "Advertisement");
                Some(DiscoveredPeer {
                    id: PeerId(id.to_string()),
                    name,
                    rssi: props.rssi,
                })
            }
        });

        Ok(stream.boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(id = %peer.id, name = %peer.name))]
    async fn connect(&self, peer: &DiscoveredPeer) -> Result<BtleplugSession, TransportError> {
        let peripheral = self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == peer.id.0)
            .ok_or_else(|| TransportError::PeerNotFound {
                id: peer.id.0.clone(),
            })?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        Ok(BtleplugSession {
            peripheral,
            peer: peer.clone(),
        })
    }
}

/// One connection to a peripheral.
pub struct BtleplugSession {
    peripheral: Peripheral,
    peer: DiscoveredPeer,
}

impl BtleplugSession {
    async fn refresh(&self, cache: CacheMode) -> Result<(), TransportError> {
        if cache == CacheMode::Uncached || self.peripheral.services().is_empty() {
            self.peripheral.discover_services().await?;
        }
        Ok(())
    }

    fn platform_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service_uuid)
            .ok_or(TransportError::CharacteristicNotFound { uuid: handle.uuid })
    }
}

fn char_props(flags: CharPropFlags) -> CharProps {
    CharProps {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

#[async_trait]
impl GattSession for BtleplugSession {
    fn peer(&self) -> &DiscoveredPeer {
        &self.peer
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn list_services(
        &self,
        service: Uuid,
        cache: CacheMode,
    ) -> Result<Vec<ServiceHandle>, TransportError> {
        self.refresh(cache).await?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .map(|s| ServiceHandle {
                uuid: s.uuid,
                primary: s.primary,
            })
            .collect())
    }

    async fn list_characteristics(
        &self,
        service: &ServiceHandle,
        cache: CacheMode,
    ) -> Result<Vec<CharacteristicHandle>, TransportError> {
        self.refresh(cache).await?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == service.uuid)
            .flat_map(|s| s.characteristics.into_iter())
            .map(|c| CharacteristicHandle {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
                properties: char_props(c.properties),
            })
            .collect())
    }

    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<WriteStatus, TransportError> {
        let target = self.platform_characteristic(characteristic)?;
        write_status(
            self.peripheral
                .write(&target, data, WriteType::from(mode))
                .await,
        )
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_write_mode_maps_to_platform_type() {
        assert_eq!(WriteType::from(WriteMode::WithResponse), WriteType::WithResponse);
        assert_eq!(
            WriteType::from(WriteMode::WithoutResponse),
            WriteType::WithoutResponse
        );
    }

    #[test]
    fn test_write_status_classification() {
        assert_eq!(write_status(Ok(())).unwrap(), WriteStatus::Success);
        assert_eq!(
            write_status(Err(btleplug::Error::PermissionDenied)).unwrap(),
            WriteStatus::AccessDenied
        );
        assert_eq!(
            write_status(Err(btleplug::Error::TimedOut(Duration::from_secs(1)))).unwrap(),
            WriteStatus::Unreachable
        );
        assert_eq!(
            write_status(Err(btleplug::Error::NotSupported("write".into()))).unwrap(),
            WriteStatus::ProtocolError
        );
        assert!(matches!(
            write_status(Err(btleplug::Error::NotConnected)),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_char_props_mapping() {
        let props = char_props(CharPropFlags::WRITE | CharPropFlags::NOTIFY);
        assert!(props.write);
        assert!(props.notify);
        assert!(!props.write_without_response);
        assert!(!props.read);
    }
}
