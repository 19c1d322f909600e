//! OTA-Core: BLE over-the-air firmware upgrade client in Rust.
//!
//! This crate implements the host side of the vendor OTA GATT protocol:
//! a firmware image is streamed to the OTA data characteristic in
//! 20-byte acknowledged writes, framed by BEGIN and END commands on the
//! OTA control characteristic.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: UUIDs, chunk size, control commands
//! - **Transport**: GATT abstraction (btleplug, mock)
//! - **Discovery**: Name-matching scan with a one-shot result
//! - **Resolver**: OTA service/characteristic lookup
//! - **Writer**: Acknowledged writes with bounded retry and deadlines
//! - **Transfer**: Sequential chunk pump with pacing
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use ota_core::payload::FirmwareImage;
//! use ota_core::session::{OtaSession, SessionConfig};
//! use ota_core::transport::BtleplugCentral;
//!
//! # async fn upgrade() -> anyhow::Result<()> {
//! let central = BtleplugCentral::open().await?;
//! let image = FirmwareImage::load("application.gbl")?;
//!
//! let session = OtaSession::new(SessionConfig::default());
//! session.run(&central, "Thermometer", &image).await?;
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod error;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod resolver;
pub mod session;
pub mod transfer;
pub mod transport;
pub mod writer;

// Re-exports for convenience
pub use error::OtaError;
pub use events::{NullObserver, OtaEvent, OtaObserver, OtaPhase, TracingObserver, percent};
pub use payload::{ChunkIterator, FirmwareImage, ImageError, TransferCursor};
pub use protocol::ControlCommand;
pub use resolver::{Resolver, ServiceEndpoints, ServiceReport};
pub use session::{OtaSession, SessionConfig, TransferResult};
pub use transfer::{TransferEngine, TransferOutcome, TransferSettings};
pub use transport::{
    BtleplugCentral, GattCentral, GattSession, MockCentral, MockSession, TransportError,
    WriteMode, WriteStatus,
};
pub use writer::{ChunkWriter, RetryPolicy};
