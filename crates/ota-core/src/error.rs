//! Errors surfaced by an upgrade attempt.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::payload::ImageError;
use crate::transport::{TransportError, WriteStatus};

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("No device named \"{name}\" found within {}s", .after.as_secs())]
    DiscoveryTimeout { name: String, after: Duration },

    #[error("Scan ended without finding a device named \"{name}\"")]
    PeerNotFound { name: String },

    #[error("OTA endpoint not found: {what}")]
    EndpointNotFound { what: String },

    #[error("Write to {endpoint} failed after {attempts} attempts (last status: {last_status})")]
    WriteFailure {
        endpoint: Uuid,
        attempts: u32,
        last_status: WriteStatus,
    },

    #[error("Transfer aborted: connection lost after {bytes_sent} bytes")]
    TransferAborted { bytes_sent: usize },

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Upgrade cancelled")]
    Cancelled,

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl OtaError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            OtaError::DiscoveryTimeout { .. } => 2,
            OtaError::PeerNotFound { .. } => 3,
            OtaError::EndpointNotFound { .. } => 4,
            OtaError::WriteFailure { .. } => 5,
            OtaError::TransferAborted { .. } => 6,
            OtaError::Timeout { .. } => 7,
            OtaError::Image(_) => 8,
            OtaError::Transport(_) => 9,
            OtaError::Cancelled => 130,
        }
    }

    pub(crate) fn endpoint_not_found(what: impl Into<String>) -> Self {
        OtaError::EndpointNotFound { what: what.into() }
    }
}
