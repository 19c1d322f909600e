//! Firmware image loading and chunking.
//!
//! The image is opaque: it is read in full and cut into fixed-size
//! chunks for the OTA data characteristic. No header parsing or
//! validation takes place on the host.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Firmware image is empty")]
    Empty,
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Immutable firmware image, loaded once per transfer.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(Self { data })
    }

    /// Read the whole file into memory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(data)
    }

    /// Get raw data.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get total size.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a constructed image.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Iterator over fixed-size chunks with a shorter final chunk.
#[derive(Debug)]
pub struct ChunkIterator<'a> {
    data: &'a [u8],
    cursor: TransferCursor,
}

impl<'a> ChunkIterator<'a> {
    pub fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            cursor: TransferCursor::new(data.len(), chunk_size),
        }
    }

    /// Get total number of chunks (including partial).
    pub fn total(&self) -> usize {
        self.cursor.total_chunks()
    }

    /// Progress so far.
    pub fn cursor(&self) -> &TransferCursor {
        &self.cursor
    }
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.cursor.offset();
        let len = self.cursor.next_len()?;
        self.cursor.advance(len);
        Some(&self.data[start..start + len])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cursor.total_chunks() - self.cursor.chunks_sent();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkIterator<'_> {}

/// Progress through an image during a transfer.
///
/// `offset` never decreases and never exceeds the image length.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferCursor {
    offset: usize,
    len: usize,
    chunk_size: usize,
    chunks_sent: usize,
}

impl TransferCursor {
    pub fn new(len: usize, chunk_size: usize) -> Self {
        Self {
            offset: 0,
            len,
            chunk_size: chunk_size.max(1),
            chunks_sent: 0,
        }
    }

    /// Bytes already sent.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Image length.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    /// `ceil(len / chunk_size)`.
    pub fn total_chunks(&self) -> usize {
        self.len.div_ceil(self.chunk_size)
    }

    /// Size of the next chunk, or `None` when complete.
    pub fn next_len(&self) -> Option<usize> {
        if self.is_complete() {
            return None;
        }
        Some(self.chunk_size.min(self.len - self.offset))
    }

    /// Record `n` more bytes as sent. Clamped to the image length.
    pub fn advance(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.len);
        self.chunks_sent += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.offset == self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::PACKET_DATA_SIZE;

    fn chunk_sizes(len: usize) -> Vec<usize> {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        ChunkIterator::new(&data, PACKET_DATA_SIZE)
            .map(<[u8]>::len)
            .collect()
    }

    #[test]
    fn test_chunk_boundaries() {
        assert!(chunk_sizes(0).is_empty());
        assert_eq!(chunk_sizes(19), vec![19]);
        assert_eq!(chunk_sizes(20), vec![20]);
        assert_eq!(chunk_sizes(40), vec![20, 20]);
        assert_eq!(chunk_sizes(41), vec![20, 20, 1]);
    }

    #[test]
    fn test_chunks_reconstruct_image() {
        for len in [1usize, 7, 20, 21, 199, 200, 1013] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let iter = ChunkIterator::new(&data, PACKET_DATA_SIZE);
            assert_eq!(iter.total(), len.div_ceil(PACKET_DATA_SIZE));

            let chunks: Vec<&[u8]> = ChunkIterator::new(&data, PACKET_DATA_SIZE).collect();
            assert_eq!(chunks.len(), len.div_ceil(PACKET_DATA_SIZE));
            assert_eq!(chunks.concat(), data);
        }
    }

    #[test]
    fn test_cursor() {
        let mut cursor = TransferCursor::new(41, 20);
        assert_eq!(cursor.total_chunks(), 3);

        assert_eq!(cursor.next_len(), Some(20));
        cursor.advance(20);
        assert_eq!(cursor.next_len(), Some(20));
        cursor.advance(20);
        assert_eq!(cursor.next_len(), Some(1));
        cursor.advance(1);

        assert!(cursor.is_complete());
        assert_eq!(cursor.next_len(), None);
        assert_eq!(cursor.chunks_sent(), 3);
    }

    #[test]
    fn test_empty_cursor_is_complete() {
        let cursor = TransferCursor::new(0, 20);
        assert!(cursor.is_complete());
        assert_eq!(cursor.total_chunks(), 0);
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new()),
            Err(ImageError::Empty)
        ));
    }

    #[test]
    fn test_load_reads_whole_file() {
        let path = std::env::temp_dir().join(format!("ota-core-image-{}.gbl", std::process::id()));
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        std::fs::write(&path, &data).unwrap();

        let image = FirmwareImage::load(&path).unwrap();
        assert_eq!(image.as_bytes(), data.as_slice());
        assert_eq!(image.len(), 4096);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let err = FirmwareImage::load("/nonexistent/ota/image.gbl").unwrap_err();
        assert!(matches!(err, ImageError::Io { .. }));
    }
}
