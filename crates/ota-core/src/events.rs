//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow an upgrade
//! without tight coupling to the protocol engine.

use std::fmt;

use uuid::Uuid;

use crate::protocol::ControlCommand;
use crate::transport::WriteStatus;

/// Upgrade phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    /// Scanning for the named peer.
    Discovering,
    /// Restarting application firmware into the OTA loader.
    Rebooting,
    /// Locating the OTA service and characteristics.
    Resolving,
    /// BEGIN sent, waiting for acknowledgment.
    Handshake,
    /// Image chunks in flight.
    Transfer,
    /// END sent, device verifies and installs.
    Commit,
    /// All operations complete.
    Complete,
}

impl fmt::Display for OtaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaPhase::Discovering => write!(f, "Discovering"),
            OtaPhase::Rebooting => write!(f, "Rebooting"),
            OtaPhase::Resolving => write!(f, "Resolving"),
            OtaPhase::Handshake => write!(f, "Handshake"),
            OtaPhase::Transfer => write!(f, "Transfer"),
            OtaPhase::Commit => write!(f, "Commit"),
            OtaPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Events emitted during an upgrade.
#[derive(Debug, Clone)]
pub enum OtaEvent {
    PhaseChanged(OtaPhase),
    /// Matching advertisement seen.
    PeerDiscovered { id: String, name: String, rssi: Option<i16> },
    Connected { name: String },
    Disconnected { name: String },
    /// Control command acknowledged.
    ControlSent { command: ControlCommand },
    /// A write attempt failed and will be retried.
    WriteRetry {
        endpoint: Uuid,
        attempt: u32,
        status: WriteStatus,
    },
    /// Bytes acknowledged so far.
    Progress { offset: usize, total: usize },
    /// Error occurred.
    Error { message: String },
    /// Upgrade finished successfully.
    Complete { bytes_sent: usize },
}

/// Share of `total` covered by `offset`, in percent.
pub fn percent(offset: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        (offset.min(total) * 100 / total) as u8
    }
}

/// Observer trait for receiving OTA events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait OtaObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &OtaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl OtaObserver for NullObserver {
    fn on_event(&self, _event: &OtaEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl OtaObserver for TracingObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::PhaseChanged(phase) => {
                tracing::info!(phase = %phase, "Phase changed");
            }
            OtaEvent::PeerDiscovered { id, name, rssi } => {
                tracing::info!(id = %id, name = %name, rssi = ?rssi, "Device found");
            }
            OtaEvent::Connected { name } => {
                tracing::info!(name = %name, "Connected");
            }
            OtaEvent::Disconnected { name } => {
                tracing::info!(name = %name, "Disconnected");
            }
            OtaEvent::ControlSent { command } => {
                tracing::info!(command = %command, "Control command acknowledged");
            }
            OtaEvent::WriteRetry {
                endpoint,
                attempt,
                status,
            } => {
                tracing::warn!(endpoint = %endpoint, attempt, status = %status, "Write failed, retrying");
            }
            OtaEvent::Progress { offset, total } => {
                let pct = percent(*offset, *total);
                tracing::debug!(offset, total, progress = %format!("{}%", pct), "Progress");
            }
            OtaEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            OtaEvent::Complete { bytes_sent } => {
                tracing::info!(bytes_sent, "Upgrade complete");
            }
        }
    }
}
