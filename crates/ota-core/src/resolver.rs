//! Endpoint resolution - locate the OTA service and its characteristics.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::OtaError;
use crate::protocol::constants::{OTA_CONTROL_UUID, OTA_DATA_UUID, OTA_SERVICE_UUID};
use crate::transport::{CacheMode, CharacteristicHandle, GattSession, ServiceHandle};
use crate::writer::bounded;

/// Handles needed by an upgrade, scoped to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub service: ServiceHandle,
    pub control: CharacteristicHandle,
    pub data: CharacteristicHandle,
}

/// One service and its characteristic table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReport {
    pub service: ServiceHandle,
    pub characteristics: Vec<CharacteristicHandle>,
}

/// Attribute table access for one session.
///
/// Every discovery call is bounded by `timeout` (zero waits forever) and
/// aborted when `cancel` fires. Tables are always fetched uncached: the
/// loader may expose a different table than the application firmware
/// under the same address.
pub struct Resolver<'a, S: GattSession + ?Sized> {
    session: &'a S,
    cancel: &'a CancellationToken,
    timeout: Duration,
}

impl<'a, S: GattSession + ?Sized> Resolver<'a, S> {
    pub fn new(session: &'a S, cancel: &'a CancellationToken, timeout: Duration) -> Self {
        Self {
            session,
            cancel,
            timeout,
        }
    }

    async fn services(&self, uuid: Uuid) -> Result<Vec<ServiceHandle>, OtaError> {
        let list = self.session.list_services(uuid, CacheMode::Uncached);
        Ok(bounded(self.cancel, self.timeout, "service discovery", list).await??)
    }

    async fn characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>, OtaError> {
        let list = self.session.list_characteristics(service, CacheMode::Uncached);
        Ok(bounded(self.cancel, self.timeout, "characteristic discovery", list).await??)
    }

    /// Resolve the standard OTA endpoints.
    pub async fn resolve_ota(&self) -> Result<ServiceEndpoints, OtaError> {
        self.resolve(OTA_SERVICE_UUID, OTA_CONTROL_UUID, OTA_DATA_UUID)
            .await
    }

    /// Resolve service, control and data handles by UUID.
    #[instrument(skip(self), fields(peer = %self.session.peer().name))]
    pub async fn resolve(
        &self,
        service_id: Uuid,
        control_id: Uuid,
        data_id: Uuid,
    ) -> Result<ServiceEndpoints, OtaError> {
        let services = self.services(service_id).await?;
        if services.is_empty() {
            return Err(OtaError::endpoint_not_found(format!("service {service_id}")));
        }

        let mut missing = control_id;
        for service in services {
            let characteristics = self.characteristics(&service).await?;
            let control = characteristics.iter().find(|c| c.uuid == control_id);
            let data = characteristics.iter().find(|c| c.uuid == data_id);

            match (control, data) {
                (Some(control), Some(data)) => {
                    debug!(service = %service.uuid, "OTA endpoints resolved");
                    return Ok(ServiceEndpoints {
                        control: control.clone(),
                        data: data.clone(),
                        service,
                    });
                }
                (Some(_), None) => missing = data_id,
                _ => missing = control_id,
            }
        }

        Err(OtaError::endpoint_not_found(format!(
            "characteristic {missing} in service {service_id}"
        )))
    }

    /// Resolve only the control characteristic of the OTA service.
    ///
    /// Application firmware exposes control without data; writing BEGIN
    /// there reboots the device into its OTA loader.
    pub async fn resolve_control(&self) -> Result<CharacteristicHandle, OtaError> {
        for service in self.services(OTA_SERVICE_UUID).await? {
            let characteristics = self.characteristics(&service).await?;
            if let Some(control) = characteristics
                .into_iter()
                .find(|c| c.uuid == OTA_CONTROL_UUID)
            {
                return Ok(control);
            }
        }
        Err(OtaError::endpoint_not_found(format!(
            "characteristic {OTA_CONTROL_UUID}"
        )))
    }

    /// Dump every service matching `service_id` with its characteristics.
    pub async fn inspect(&self, service_id: Uuid) -> Result<Vec<ServiceReport>, OtaError> {
        let mut reports = Vec::new();
        for service in self.services(service_id).await? {
            let characteristics = self.characteristics(&service).await?;
            reports.push(ServiceReport {
                service,
                characteristics,
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CharProps, MockOp, MockSession};

    async fn resolve_ota(session: &MockSession) -> Result<ServiceEndpoints, OtaError> {
        let cancel = CancellationToken::new();
        Resolver::new(session, &cancel, Duration::ZERO)
            .resolve_ota()
            .await
    }

    async fn resolve_control(session: &MockSession) -> Result<CharacteristicHandle, OtaError> {
        let cancel = CancellationToken::new();
        Resolver::new(session, &cancel, Duration::ZERO)
            .resolve_control()
            .await
    }

    #[tokio::test]
    async fn test_resolves_ota_endpoints() {
        let session = MockSession::ota_loader("dev");
        let endpoints = resolve_ota(&session).await.unwrap();

        assert_eq!(endpoints.service.uuid, OTA_SERVICE_UUID);
        assert_eq!(endpoints.control.uuid, OTA_CONTROL_UUID);
        assert_eq!(endpoints.data.uuid, OTA_DATA_UUID);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let session = MockSession::ota_loader("dev");
        let first = resolve_ota(&session).await.unwrap();
        let second = resolve_ota(&session).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_always_uncached() {
        let session = MockSession::ota_loader("dev");
        resolve_ota(&session).await.unwrap();

        for op in session.ops() {
            match op {
                MockOp::ListServices { cache, .. } | MockOp::ListCharacteristics { cache, .. } => {
                    assert_eq!(cache, CacheMode::Uncached)
                }
                other => panic!("unexpected op {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_missing_service() {
        let session = MockSession::new("dev");
        let err = resolve_ota(&session).await.unwrap_err();
        assert!(matches!(err, OtaError::EndpointNotFound { .. }));
        assert!(err.to_string().contains("service"));
    }

    #[tokio::test]
    async fn test_missing_data_characteristic() {
        let session = MockSession::application("dev");
        let err = resolve_ota(&session).await.unwrap_err();
        match err {
            OtaError::EndpointNotFound { what } => {
                assert!(what.contains(&OTA_DATA_UUID.to_string()))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_control_characteristic() {
        let data = CharacteristicHandle {
            uuid: OTA_DATA_UUID,
            service_uuid: OTA_SERVICE_UUID,
            properties: CharProps::default(),
        };
        let session = MockSession::new("dev").with_service(OTA_SERVICE_UUID, &[data]);
        assert!(resolve_ota(&session).await.is_err());
        assert!(resolve_control(&session).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_control_on_application_firmware() {
        let session = MockSession::application("dev");
        let control = resolve_control(&session).await.unwrap();
        assert_eq!(control.uuid, OTA_CONTROL_UUID);
    }

    #[tokio::test]
    async fn test_inspect_lists_characteristics() {
        let session = MockSession::ota_loader("dev");
        let cancel = CancellationToken::new();
        let reports = Resolver::new(&session, &cancel, Duration::ZERO)
            .inspect(OTA_SERVICE_UUID)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        let uuids: Vec<Uuid> = reports[0].characteristics.iter().map(|c| c.uuid).collect();
        assert_eq!(uuids, vec![OTA_CONTROL_UUID, OTA_DATA_UUID]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_discovery_times_out() {
        let session = MockSession::ota_loader("dev");
        session.stall_discovery();

        let cancel = CancellationToken::new();
        let err = Resolver::new(&session, &cancel, Duration::from_secs(10))
            .resolve_ota()
            .await
            .unwrap_err();
        match err {
            OtaError::Timeout { operation, after } => {
                assert_eq!(operation, "service discovery");
                assert_eq!(after, Duration::from_secs(10));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stalled_discovery_cancelled() {
        let session = MockSession::ota_loader("dev");
        session.stall_discovery();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let resolver = Resolver::new(&session, &cancel, Duration::ZERO);
        assert!(matches!(
            resolver.resolve_control().await,
            Err(OtaError::Cancelled)
        ));
        assert!(matches!(
            resolver.inspect(OTA_SERVICE_UUID).await,
            Err(OtaError::Cancelled)
        ));
    }
}
