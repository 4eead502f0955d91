//! Retry worker for persisted-but-unprocessed alerts
//!
//! Handler failures (node RPC down, webhook unreachable) leave alerts in
//! the store with `processed = false`. This worker periodically asks the
//! processor to re-attempt them, instead of scattering backoff logic
//! through the handlers.

use crate::processor::Processor;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Spawn the retry loop. Cancelling the token stops it after the current
/// pass.
pub fn spawn_retry_worker(
    processor: Arc<Processor>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match processor.retry_unprocessed().await {
                Ok(0) => {}
                Ok(completed) => debug!(completed, "retry pass completed alerts"),
                Err(err) => warn!(error = %err, "retry pass failed"),
            }
        }
        debug!("retry worker stopped");
    })
}
