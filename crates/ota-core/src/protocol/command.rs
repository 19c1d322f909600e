//! OTA control commands.

use std::fmt;

use thiserror::Error;

use super::constants::{OTA_CMD_BEGIN, OTA_CMD_END};

/// Lifecycle command written to the OTA control characteristic.
///
/// The loader reserves further codes; only the two used by the
/// upgrade flow are modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    /// Start an upgrade (0x00).
    Begin,
    /// Commit the transferred image (0x03).
    End,
}

impl ControlCommand {
    /// Wire value of the command.
    pub fn code(self) -> u8 {
        match self {
            ControlCommand::Begin => OTA_CMD_BEGIN,
            ControlCommand::End => OTA_CMD_END,
        }
    }

    /// Single-byte payload for the control write.
    pub fn to_bytes(self) -> [u8; 1] {
        [self.code()]
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Begin => write!(f, "BEGIN"),
            ControlCommand::End => write!(f, "END"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unknown OTA control code 0x{0:02X}")]
pub struct UnknownCommand(pub u8);

impl TryFrom<u8> for ControlCommand {
    type Error = UnknownCommand;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            OTA_CMD_BEGIN => Ok(ControlCommand::Begin),
            OTA_CMD_END => Ok(ControlCommand::End),
            other => Err(UnknownCommand(other)),
        }
    }
}
