//! Peer discovery by advertised name.
//!
//! A watcher task consumes the scan stream and resolves a one-shot
//! channel on the first exact name match. The caller awaits the
//! receiver under a deadline and the session's cancellation token.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::OtaError;
use crate::transport::{DiscoveredPeer, GattCentral};

/// Scan until a peer advertising exactly `name` shows up.
///
/// The scan is stopped on every exit path.
#[instrument(skip(central, cancel))]
pub async fn find_by_name<C: GattCentral + ?Sized>(
    central: &C,
    name: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<DiscoveredPeer, OtaError> {
    let mut adverts = central.scan().await?;
    let (found_tx, found_rx) = oneshot::channel();

    let target = name.to_string();
    let watcher = tokio::spawn(async move {
        while let Some(peer) = adverts.next().await {
            if peer.name == target {
                let _ = found_tx.send(peer);
                return;
            }
            debug!(name = %peer.name, "Ignoring advertisement");
        }
    });

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OtaError::Cancelled),
        found = tokio::time::timeout(timeout, found_rx) => match found {
            Ok(Ok(peer)) => Ok(peer),
            Ok(Err(_)) => Err(OtaError::PeerNotFound { name: name.to_string() }),
            Err(_) => Err(OtaError::DiscoveryTimeout {
                name: name.to_string(),
                after: timeout,
            }),
        },
    };

    watcher.abort();
    if let Err(e) = central.stop_scan().await {
        warn!(error = %e, "Failed to stop scan cleanly");
    }
    result
}
