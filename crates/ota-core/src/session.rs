//! OTA Session - High-level orchestrator for the upgrade process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::discovery::find_by_name;
use crate::error::OtaError;
use crate::events::{OtaEvent, OtaObserver, OtaPhase, TracingObserver};
use crate::payload::FirmwareImage;
use crate::protocol::ControlCommand;
use crate::protocol::constants::{
    INTER_CHUNK_DELAY, OTA_SERVICE_UUID, PACKET_DATA_SIZE, REBOOT_SETTLE_DELAY,
};
use crate::resolver::{Resolver, ServiceReport};
use crate::transfer::{TransferEngine, TransferOutcome, TransferSettings};
use crate::transport::{CharacteristicHandle, GattCentral, GattSession, WriteMode};
use crate::writer::{ChunkWriter, RetryPolicy, bounded, cancellable_sleep};

/// Configuration for an OTA session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Advertised name of the target device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Path to the firmware image (.gbl).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    /// Bytes per data write.
    pub chunk_size: usize,
    pub inter_chunk_delay_ms: u64,
    pub discovery_timeout_secs: u64,
    /// Connection establishment deadline; 0 disables it.
    pub connect_timeout_secs: u64,
    /// Deadline per attribute discovery call; 0 disables it.
    pub attribute_timeout_ms: u64,
    /// Per-attempt write deadline; 0 disables it.
    pub write_timeout_ms: u64,
    /// Attempts per write; 0 retries forever.
    pub max_write_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Reboot application firmware into the OTA loader before upgrading.
    pub reboot_first: bool,
    pub reboot_settle_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            device_name: None,
            image_path: None,
            chunk_size: PACKET_DATA_SIZE,
            inter_chunk_delay_ms: INTER_CHUNK_DELAY.as_millis() as u64,
            discovery_timeout_secs: 30,
            connect_timeout_secs: 10,
            attribute_timeout_ms: 10_000,
            write_timeout_ms: retry.write_timeout.as_millis() as u64,
            max_write_attempts: retry.max_attempts,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: retry.max_backoff.as_millis() as u64,
            reboot_first: false,
            reboot_settle_ms: REBOOT_SETTLE_DELAY.as_millis() as u64,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.discovery_timeout_secs == 0 {
            bail!("discovery_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_write_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            chunk_size: self.chunk_size,
            inter_chunk_delay: Duration::from_millis(self.inter_chunk_delay_ms),
            write_mode: WriteMode::WithResponse,
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn attribute_timeout(&self) -> Duration {
        Duration::from_millis(self.attribute_timeout_ms)
    }

    pub fn reboot_settle(&self) -> Duration {
        Duration::from_millis(self.reboot_settle_ms)
    }
}

/// Summary of a successful upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub peer: String,
    pub bytes_sent: usize,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// OTA Session - orchestrates the complete upgrade process.
pub struct OtaSession<O: OtaObserver> {
    config: SessionConfig,
    observer: Arc<O>,
    cancel: CancellationToken,
}

impl OtaSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: OtaObserver + 'static> OtaSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Token that aborts every pending step of this session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: OtaEvent) {
        self.observer.on_event(&event);
    }

    fn fail(&self, err: OtaError) -> OtaError {
        self.emit(OtaEvent::Error {
            message: err.to_string(),
        });
        err
    }

    fn resolver<'a, S: GattSession + ?Sized>(&'a self, session: &'a S) -> Resolver<'a, S> {
        Resolver::new(session, &self.cancel, self.config.attribute_timeout())
    }

    fn writer<'a, S: GattSession + ?Sized>(&'a self, session: &'a S) -> ChunkWriter<'a, S> {
        ChunkWriter::new(
            session,
            self.config.retry_policy(),
            &self.cancel,
            self.observer.as_ref(),
        )
    }

    /// Find the named device and connect to it.
    #[instrument(skip(self, central))]
    pub async fn discover<C: GattCentral>(
        &self,
        central: &C,
        name: &str,
    ) -> Result<C::Session, OtaError> {
        self.emit(OtaEvent::PhaseChanged(OtaPhase::Discovering));
        let peer = find_by_name(central, name, self.config.discovery_timeout(), &self.cancel).await?;
        self.emit(OtaEvent::PeerDiscovered {
            id: peer.id.to_string(),
            name: peer.name.clone(),
            rssi: peer.rssi,
        });

        let connect = central.connect(&peer);
        let session = bounded(&self.cancel, self.config.connect_timeout(), "connect", connect).await??;
        self.emit(OtaEvent::Connected {
            name: peer.name.clone(),
        });
        Ok(session)
    }

    /// Run BEGIN, the image transfer and END on a connected session.
    ///
    /// The session is released on every exit path.
    pub async fn perform_upgrade<S: GattSession>(
        &self,
        session: S,
        image: &FirmwareImage,
    ) -> Result<TransferResult, OtaError> {
        let started = Instant::now();
        let result = self.upgrade_steps(&session, image.as_bytes()).await;
        self.release(&session).await;

        match result {
            Ok(outcome) => {
                let result = TransferResult {
                    peer: session.peer().name.clone(),
                    bytes_sent: outcome.bytes_sent,
                    chunks: outcome.chunks,
                    elapsed: started.elapsed(),
                };
                self.emit(OtaEvent::PhaseChanged(OtaPhase::Complete));
                self.emit(OtaEvent::Complete {
                    bytes_sent: result.bytes_sent,
                });
                Ok(result)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    #[instrument(skip_all, fields(peer = %session.peer().name, len = image.len()))]
    async fn upgrade_steps<S: GattSession>(
        &self,
        session: &S,
        image: &[u8],
    ) -> Result<TransferOutcome, OtaError> {
        self.emit(OtaEvent::PhaseChanged(OtaPhase::Resolving));
        let endpoints = self.resolver(session).resolve_ota().await?;
        let writer = self.writer(session);

        self.emit(OtaEvent::PhaseChanged(OtaPhase::Handshake));
        self.send_control(&writer, &endpoints.control, ControlCommand::Begin)
            .await?;

        self.emit(OtaEvent::PhaseChanged(OtaPhase::Transfer));
        let outcome = TransferEngine::new(self.config.transfer_settings())
            .run(&writer, image, &endpoints.data)
            .await?;

        self.emit(OtaEvent::PhaseChanged(OtaPhase::Commit));
        self.send_control(&writer, &endpoints.control, ControlCommand::End)
            .await
            .map_err(|e| match e {
                OtaError::TransferAborted { .. } => OtaError::TransferAborted {
                    bytes_sent: outcome.bytes_sent,
                },
                other => other,
            })?;

        Ok(outcome)
    }

    async fn send_control<S: GattSession + ?Sized>(
        &self,
        writer: &ChunkWriter<'_, S>,
        control: &CharacteristicHandle,
        command: ControlCommand,
    ) -> Result<(), OtaError> {
        writer
            .write(control, &command.to_bytes(), WriteMode::WithResponse)
            .await?;
        self.emit(OtaEvent::ControlSent { command });
        Ok(())
    }

    async fn release<S: GattSession + ?Sized>(&self, session: &S) {
        let name = session.peer().name.clone();
        if let Err(e) = session.disconnect().await {
            warn!(error = %e, "Failed to release session");
        }
        self.emit(OtaEvent::Disconnected { name });
    }

    /// Ask application firmware to restart into the OTA loader.
    ///
    /// The device may drop the link before acknowledging BEGIN; that
    /// counts as success.
    pub async fn reboot_into_dfu<S: GattSession>(&self, session: S) -> Result<(), OtaError> {
        self.emit(OtaEvent::PhaseChanged(OtaPhase::Rebooting));
        let result = self.reboot_steps(&session).await;
        self.release(&session).await;
        result.map_err(|e| self.fail(e))
    }

    async fn reboot_steps<S: GattSession>(&self, session: &S) -> Result<(), OtaError> {
        let control = self.resolver(session).resolve_control().await?;
        let writer = self.writer(session);
        match self
            .send_control(&writer, &control, ControlCommand::Begin)
            .await
        {
            Ok(()) | Err(OtaError::TransferAborted { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Connect to the named device and list its OTA service layout.
    pub async fn inspect<C: GattCentral>(
        &self,
        central: &C,
        name: &str,
    ) -> Result<Vec<ServiceReport>, OtaError> {
        let session = self.discover(central, name).await?;
        let reports = self.resolver(&session).inspect(OTA_SERVICE_UUID).await;
        self.release(&session).await;
        reports
    }

    /// Run the complete upgrade against the named device.
    #[instrument(skip(self, central, image), fields(len = image.len()))]
    pub async fn run<C: GattCentral>(
        &self,
        central: &C,
        name: &str,
        image: &FirmwareImage,
    ) -> Result<TransferResult, OtaError> {
        if self.config.reboot_first {
            let application = self.discover(central, name).await.map_err(|e| self.fail(e))?;
            self.reboot_into_dfu(application).await?;
            info!(
                settle_ms = self.config.reboot_settle_ms,
                "Waiting for device to restart into OTA loader"
            );
            cancellable_sleep(&self.cancel, self.config.reboot_settle())
                .await
                .map_err(|e| self.fail(e))?;
        }

        let session = self.discover(central, name).await.map_err(|e| self.fail(e))?;
        self.perform_upgrade(session, image).await
    }
}
