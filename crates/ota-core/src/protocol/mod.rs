//! Protocol module - OTA GATT protocol definitions.

pub mod command;
pub mod constants;

pub use command::{ControlCommand, UnknownCommand};
pub use constants::*;
