//! Payload handling module.
//!
//! Provides loading and chunking for firmware images.

pub mod image;

pub use image::{ChunkIterator, FirmwareImage, ImageError, TransferCursor};
