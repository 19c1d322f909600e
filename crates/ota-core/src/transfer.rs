//! Transfer engine - streams an image to the OTA data characteristic.

use std::time::Duration;

use tracing::{info, instrument};

use crate::error::OtaError;
use crate::events::OtaEvent;
use crate::payload::ChunkIterator;
use crate::protocol::constants::{INTER_CHUNK_DELAY, PACKET_DATA_SIZE};
use crate::transport::{CharacteristicHandle, GattSession, WriteMode};
use crate::writer::{ChunkWriter, cancellable_sleep};

/// Result of a transfer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes_sent: usize,
    pub chunks: usize,
    pub completed: bool,
}

/// Chunking and pacing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub chunk_size: usize,
    /// Pause after every acknowledged chunk.
    pub inter_chunk_delay: Duration,
    pub write_mode: WriteMode,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: PACKET_DATA_SIZE,
            inter_chunk_delay: INTER_CHUNK_DELAY,
            write_mode: WriteMode::WithResponse,
        }
    }
}

/// Sequential chunk pump. One chunk is in flight at a time.
pub struct TransferEngine {
    settings: TransferSettings,
}

impl TransferEngine {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    /// Send `image` to `data` chunk by chunk.
    ///
    /// An empty image completes immediately without any write.
    #[instrument(skip_all, fields(len = image.len(), chunk_size = self.settings.chunk_size))]
    pub async fn run<S: GattSession + ?Sized>(
        &self,
        writer: &ChunkWriter<'_, S>,
        image: &[u8],
        data: &CharacteristicHandle,
    ) -> Result<TransferOutcome, OtaError> {
        let total = image.len();
        let mut chunks = ChunkIterator::new(image, self.settings.chunk_size);
        info!(chunks = chunks.total(), "Starting image transfer");

        while let Some(chunk) = chunks.next() {
            let offset = chunks.cursor().offset();

            writer
                .write(data, chunk, self.settings.write_mode)
                .await
                .map_err(|e| match e {
                    OtaError::TransferAborted { .. } => OtaError::TransferAborted {
                        bytes_sent: offset - chunk.len(),
                    },
                    other => other,
                })?;

            cancellable_sleep(writer.cancel_token(), self.settings.inter_chunk_delay).await?;

            writer
                .observer()
                .on_event(&OtaEvent::Progress { offset, total });
        }

        let cursor = chunks.cursor();
        info!(bytes_sent = cursor.offset(), "Image transfer finished");
        Ok(TransferOutcome {
            bytes_sent: cursor.offset(),
            chunks: cursor.chunks_sent(),
            completed: cursor.is_complete(),
        })
    }
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(TransferSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::events::NullObserver;
    use crate::events::testing::RecordingObserver;
    use crate::protocol::constants::OTA_DATA_UUID;
    use crate::resolver::{Resolver, ServiceEndpoints};
    use crate::transport::{MockOp, MockSession, WriteStatus};
    use crate::writer::RetryPolicy;

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    async fn resolve_ota(session: &MockSession) -> Result<ServiceEndpoints, OtaError> {
        let cancel = CancellationToken::new();
        Resolver::new(session, &cancel, Duration::ZERO)
            .resolve_ota()
            .await
    }

    async fn run_transfer(
        session: &MockSession,
        data: &[u8],
        observer: &RecordingObserver,
    ) -> Result<TransferOutcome, OtaError> {
        let endpoints = resolve_ota(session).await.unwrap();
        let cancel = CancellationToken::new();
        let writer = ChunkWriter::new(session, RetryPolicy::default(), &cancel, observer);
        TransferEngine::default()
            .run(&writer, data, &endpoints.data)
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_counts() {
        for (len, sizes) in [
            (19usize, vec![19usize]),
            (40, vec![20, 20]),
            (41, vec![20, 20, 1]),
        ] {
            let session = MockSession::ota_loader("dev");
            let observer = RecordingObserver::default();
            let outcome = run_transfer(&session, &image(len), &observer).await.unwrap();

            let delivered = session.delivered(OTA_DATA_UUID);
            let delivered_sizes: Vec<usize> = delivered.iter().map(Vec::len).collect();
            assert_eq!(delivered_sizes, sizes);
            assert_eq!(delivered.concat(), image(len));
            assert_eq!(
                outcome,
                TransferOutcome {
                    bytes_sent: len,
                    chunks: sizes.len(),
                    completed: true,
                }
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_image_completes_immediately() {
        let session = MockSession::ota_loader("dev");
        let observer = RecordingObserver::default();
        let outcome = run_transfer(&session, &[], &observer).await.unwrap();

        assert_eq!(
            outcome,
            TransferOutcome {
                bytes_sent: 0,
                chunks: 0,
                completed: true,
            }
        );
        assert_eq!(session.attempts(OTA_DATA_UUID), 0);
        assert!(observer.progress().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic() {
        let session = MockSession::ota_loader("dev");
        let observer = RecordingObserver::default();
        run_transfer(&session, &image(65), &observer).await.unwrap();

        assert_eq!(observer.progress(), vec![20, 40, 60, 65]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_chunk_delay() {
        let session = MockSession::ota_loader("dev");
        let observer = RecordingObserver::default();
        let start = tokio::time::Instant::now();
        run_transfer(&session, &image(100), &observer).await.unwrap();

        assert!(start.elapsed() >= INTER_CHUNK_DELAY * 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_chunk_not_duplicated() {
        let session = MockSession::ota_loader("dev");
        // Resolution does not write, so the first data write fails twice.
        session.fail_writes(OTA_DATA_UUID, [WriteStatus::Unreachable; 2]);
        let observer = RecordingObserver::default();
        run_transfer(&session, &image(50), &observer).await.unwrap();

        assert_eq!(session.attempts(OTA_DATA_UUID), 5);
        assert_eq!(session.delivered(OTA_DATA_UUID).concat(), image(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_transfer() {
        let session = MockSession::ota_loader("dev");
        session.disconnect_after_writes(2);
        let observer = RecordingObserver::default();
        let err = run_transfer(&session, &image(100), &observer)
            .await
            .unwrap_err();

        match err {
            OtaError::TransferAborted { bytes_sent } => assert_eq!(bytes_sent, 40),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay() {
        let session = MockSession::ota_loader("dev");
        let endpoints = resolve_ota(&session).await.unwrap();
        let cancel = CancellationToken::new();
        let writer = ChunkWriter::new(&session, RetryPolicy::default(), &cancel, &NullObserver);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(450)).await;
            canceller.cancel();
        });

        let err = TransferEngine::default()
            .run(&writer, &image(200), &endpoints.data)
            .await
            .unwrap_err();
        assert!(matches!(err, OtaError::Cancelled));
        assert!(session.delivered(OTA_DATA_UUID).len() < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_write_mode() {
        let session = MockSession::ota_loader("dev");
        let endpoints = resolve_ota(&session).await.unwrap();
        let cancel = CancellationToken::new();
        let writer = ChunkWriter::new(&session, RetryPolicy::default(), &cancel, &NullObserver);

        let settings = TransferSettings {
            write_mode: WriteMode::WithoutResponse,
            ..Default::default()
        };
        let outcome = TransferEngine::new(settings)
            .run(&writer, &image(45), &endpoints.data)
            .await
            .unwrap();
        assert!(outcome.completed);

        let modes: Vec<WriteMode> = session
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                MockOp::WriteIssued { mode, .. } => Some(mode),
                _ => None,
            })
            .collect();
        assert_eq!(modes, vec![WriteMode::WithoutResponse; 3]);
    }
}
