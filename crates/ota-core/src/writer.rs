//! Chunk writer - acknowledged GATT writes with bounded retry.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::OtaError;
use crate::events::{OtaEvent, OtaObserver};
use crate::transport::{CharacteristicHandle, GattSession, TransportError, WriteMode, WriteStatus};

/// Retry and deadline parameters for a single logical write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up. `0` retries forever.
    pub max_attempts: u32,
    /// Pause after the first failed attempt; doubles after each further failure.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Deadline for one attempt. `Duration::ZERO` waits forever.
    pub write_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately and forever, never time out.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            write_timeout: Duration::ZERO,
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }

    /// Pause before the attempt following `failures` failed ones.
    fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Sleep unless the token fires first.
pub(crate) async fn cancellable_sleep(
    cancel: &CancellationToken,
    duration: Duration,
) -> Result<(), OtaError> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OtaError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Await `fut` under a deadline and the cancel token.
///
/// A zero `deadline` waits forever. Only expiry and cancellation are
/// reported here; the future's own output is returned unchanged.
pub(crate) async fn bounded<F: Future>(
    cancel: &CancellationToken,
    deadline: Duration,
    operation: &'static str,
    fut: F,
) -> Result<F::Output, OtaError> {
    let timed = async {
        if deadline.is_zero() {
            Ok(fut.await)
        } else {
            tokio::time::timeout(deadline, fut).await
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OtaError::Cancelled),
        result = timed => result.map_err(|_| OtaError::Timeout {
            operation,
            after: deadline,
        }),
    }
}

/// Writes buffers to one session, retrying until the peer accepts them.
pub struct ChunkWriter<'a, S: GattSession + ?Sized> {
    session: &'a S,
    policy: RetryPolicy,
    cancel: &'a CancellationToken,
    observer: &'a dyn OtaObserver,
}

impl<'a, S: GattSession + ?Sized> ChunkWriter<'a, S> {
    pub fn new(
        session: &'a S,
        policy: RetryPolicy,
        cancel: &'a CancellationToken,
        observer: &'a dyn OtaObserver,
    ) -> Self {
        Self {
            session,
            policy,
            cancel,
            observer,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.cancel
    }

    pub(crate) fn observer(&self) -> &dyn OtaObserver {
        self.observer
    }

    /// Write `data` until the stack reports success.
    ///
    /// Every attempt sends the caller's bytes unchanged. Returns the
    /// number of attempts used.
    pub async fn write(
        &self,
        endpoint: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<u32, OtaError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let status = self.attempt(endpoint, data, mode).await?;
            if status.is_success() {
                trace!(uuid = %endpoint.uuid, len = data.len(), attempts, "Write acknowledged");
                return Ok(attempts);
            }

            if self.policy.exhausted(attempts) {
                return Err(OtaError::WriteFailure {
                    endpoint: endpoint.uuid,
                    attempts,
                    last_status: status,
                });
            }

            self.observer.on_event(&OtaEvent::WriteRetry {
                endpoint: endpoint.uuid,
                attempt: attempts,
                status,
            });
            cancellable_sleep(self.cancel, self.policy.backoff(attempts)).await?;
        }
    }

    async fn attempt(
        &self,
        endpoint: &CharacteristicHandle,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<WriteStatus, OtaError> {
        let write = self.session.write_characteristic(endpoint, data, mode);
        match bounded(self.cancel, self.policy.write_timeout, "GATT write", write).await? {
            Err(TransportError::Disconnected) => Err(OtaError::TransferAborted { bytes_sent: 0 }),
            Err(e) => Err(e.into()),
            Ok(status) => Ok(status),
        }
    }
}
