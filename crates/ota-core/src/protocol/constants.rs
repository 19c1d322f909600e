//! Protocol constants for the vendor OTA GATT service.
//!
//! These values must match the peer's OTA loader bit for bit.

use std::time::Duration;

use uuid::Uuid;

// ============================================================================
// GATT Identifiers
// ============================================================================

/// OTA service.
pub const OTA_SERVICE_UUID: Uuid = Uuid::from_u128(0x1D14D6EE_FD63_4FA1_BFA4_8F47B42119F0);

/// OTA control characteristic (one-byte lifecycle commands).
pub const OTA_CONTROL_UUID: Uuid = Uuid::from_u128(0xF7BF3564_FB6D_4E53_88A4_5E37E0326063);

/// OTA data characteristic (image chunks).
pub const OTA_DATA_UUID: Uuid = Uuid::from_u128(0x984227F3_34FC_4045_A5D0_2C581F81A153);

// ============================================================================
// Size / Timing Constants
// ============================================================================

/// Payload bytes per data write. The OTA data characteristic accepts at most
/// this many bytes with the default ATT MTU.
pub const PACKET_DATA_SIZE: usize = 20;

/// Pause after every acknowledged data chunk.
pub const INTER_CHUNK_DELAY: Duration = Duration::from_millis(200);

/// Time the device needs to drop the link and restart into its OTA loader.
pub const REBOOT_SETTLE_DELAY: Duration = Duration::from_millis(1500);

// ============================================================================
// Control Codes (Host -> Device, OTA control characteristic)
// ============================================================================

/// Start OTA: the loader initializes its storage slot and resets its write position.
pub const OTA_CMD_BEGIN: u8 = 0x00;

/// Finish OTA: the loader verifies the image and installs it on disconnect.
pub const OTA_CMD_END: u8 = 0x03;
