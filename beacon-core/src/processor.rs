//! The alert admission pipeline
//!
//! Every alert — pulled by sync or submitted locally — enters the system
//! through [`Processor::process_raw`]: parse, sanity-check the sequence,
//! verify the signature threshold, persist, then dispatch the payload
//! handler. Admission is serialized behind a mutex so concurrent peer
//! sessions cannot interleave inserts.
//!
//! Handlers run in strict sequence order: the handler for sequence `k`
//! runs only once `k-1` is marked processed. An alert whose predecessor is
//! still outstanding (or whose handler fails) stays persisted-but-
//! unprocessed and is picked up again by the retry worker.

use crate::verifier::{verify_threshold, VerifyError};
use beacon_model::{
    AdapterError, Alert, AlertNotification, AlertRecord, AlertStore, KeyRegistry,
    KeyRegistryError, NodeAdapter, Payload, StoreError, WebhookSink, WireError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Terminal rejection reasons. Anything here means the alert was not (or
/// will never be) admitted; handler failures are not errors at this level.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] KeyRegistryError),

    #[error("alert sequence number must be positive")]
    SequenceZero,
}

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Verified, persisted, and its handler completed.
    Processed,
    /// Verified and persisted, but the handler has not completed yet
    /// (predecessor outstanding, or the handler failed and will retry).
    Deferred,
    /// Already persisted and processed; nothing to do.
    AlreadyKnown,
}

#[derive(Error, Debug)]
enum HandlerError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Registry(#[from] KeyRegistryError),
}

/// The single sink through which every alert reaches the system.
pub struct Processor {
    store: Arc<dyn AlertStore>,
    registry: Arc<dyn KeyRegistry>,
    node: Arc<dyn NodeAdapter>,
    webhook: Arc<dyn WebhookSink>,
    admit: Mutex<()>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn AlertStore>,
        registry: Arc<dyn KeyRegistry>,
        node: Arc<dyn NodeAdapter>,
        webhook: Arc<dyn WebhookSink>,
    ) -> Self {
        Self {
            store,
            registry,
            node,
            webhook,
            admit: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    pub fn threshold(&self) -> usize {
        self.registry.threshold()
    }

    /// Admit a candidate envelope.
    ///
    /// Idempotent per sequence number: re-processing an admitted alert
    /// never re-applies side effects.
    pub async fn process_raw(&self, bytes: &[u8]) -> Result<ProcessOutcome, ProcessorError> {
        let threshold = self.registry.threshold();
        let alert = Alert::parse(bytes, threshold)?;
        if alert.sequence_number == 0 {
            return Err(ProcessorError::SequenceZero);
        }
        let seq = alert.sequence_number;

        let _guard = self.admit.lock().await;

        match self.store.get(seq).await? {
            Some(existing) if existing.raw != bytes => {
                warn!(sequence = seq, "conflicting alert at sequence");
                return Err(ProcessorError::Store(StoreError::Conflict(seq)));
            }
            Some(existing) if existing.processed => {
                return Ok(ProcessOutcome::AlreadyKnown);
            }
            Some(_) => {
                // Persisted earlier but side effects incomplete: retry the
                // handler below without re-verifying or re-inserting.
            }
            None => {
                let active = self.registry.active_keys().await?;
                verify_threshold(&alert, &active, threshold)?;
                self.store.insert_if_absent(AlertRecord::new(&alert)).await?;
                debug!(sequence = seq, alert_type = %alert.alert_type(), "alert persisted");
            }
        }

        if !self.dispatch_eligible(seq).await? {
            debug!(sequence = seq, "handler deferred until predecessor completes");
            return Ok(ProcessOutcome::Deferred);
        }

        match self.dispatch(&alert).await {
            Ok(()) => {
                self.store.mark_processed(seq).await?;
                info!(sequence = seq, alert_type = %alert.alert_type(), "alert processed");
                self.drain_successors(seq).await?;
                Ok(ProcessOutcome::Processed)
            }
            Err(err) => {
                warn!(sequence = seq, error = %err, "alert handler failed; will retry");
                Ok(ProcessOutcome::Deferred)
            }
        }
    }

    /// Re-attempt handlers for persisted-but-unprocessed alerts, in
    /// sequence order. Returns how many completed.
    pub async fn retry_unprocessed(&self) -> Result<usize, ProcessorError> {
        let _guard = self.admit.lock().await;
        let pending = self.store.unprocessed().await?;
        let threshold = self.registry.threshold();
        let mut completed = 0;

        for record in pending {
            let seq = record.sequence_number;
            if !self.dispatch_eligible(seq).await? {
                break;
            }
            let alert = Alert::parse(&record.raw, threshold)?;
            match self.dispatch(&alert).await {
                Ok(()) => {
                    self.store.mark_processed(seq).await?;
                    info!(sequence = seq, "alert processed on retry");
                    completed += 1;
                }
                Err(err) => {
                    warn!(sequence = seq, error = %err, "alert handler failed again");
                    break;
                }
            }
        }
        Ok(completed)
    }

    /// Handlers run strictly in order: sequence 1 is always eligible,
    /// sequence k only after k-1 is processed.
    async fn dispatch_eligible(&self, seq: u32) -> Result<bool, ProcessorError> {
        if seq == 1 {
            return Ok(true);
        }
        Ok(self
            .store
            .get(seq - 1)
            .await?
            .map(|r| r.processed)
            .unwrap_or(false))
    }

    /// After `seq` completes, drain any successors that were parked
    /// waiting on it.
    async fn drain_successors(&self, seq: u32) -> Result<(), ProcessorError> {
        let threshold = self.registry.threshold();
        let mut next = seq + 1;
        while let Some(record) = self.store.get(next).await? {
            if !record.processed {
                let alert = Alert::parse(&record.raw, threshold)?;
                match self.dispatch(&alert).await {
                    Ok(()) => {
                        self.store.mark_processed(next).await?;
                        info!(sequence = next, "parked alert processed");
                    }
                    Err(err) => {
                        warn!(sequence = next, error = %err, "parked alert handler failed");
                        break;
                    }
                }
            }
            next += 1;
        }
        Ok(())
    }

    /// Apply the payload's side effect. Every branch is safe to re-invoke
    /// for the same sequence number.
    async fn dispatch(&self, alert: &Alert) -> Result<(), HandlerError> {
        match &alert.payload {
            Payload::Informational { .. } | Payload::Legacy { .. } => {
                self.webhook
                    .notify(&AlertNotification::from_alert(alert))
                    .await?;
            }
            Payload::FreezeUtxo { funds } => {
                self.node.freeze_utxos(funds).await?;
            }
            Payload::UnfreezeUtxo { funds } => {
                self.node.unfreeze_utxos(funds).await?;
            }
            Payload::ConfiscateTransaction { enforce_at_height, tx } => {
                let outcome = self
                    .node
                    .confiscate_transaction(*enforce_at_height, tx)
                    .await?;
                // One transaction per alert, so any rejection fails the
                // whole handler.
                if let Some(rejected) = outcome.not_processed.first() {
                    return Err(AdapterError::ConfiscationRejected(rejected.reason.clone()).into());
                }
            }
            Payload::BanPeer { peer, reason } => {
                self.node
                    .ban_peer(
                        &String::from_utf8_lossy(peer),
                        &String::from_utf8_lossy(reason),
                    )
                    .await?;
            }
            Payload::UnbanPeer { peer, reason } => {
                self.node
                    .unban_peer(
                        &String::from_utf8_lossy(peer),
                        &String::from_utf8_lossy(reason),
                    )
                    .await?;
            }
            Payload::InvalidateBlock { block_hash, reason } => {
                self.node
                    .invalidate_block(block_hash, &String::from_utf8_lossy(reason))
                    .await?;
            }
            Payload::SetKeys { keys } => {
                // Verified against the pre-rotation set; the rotation
                // itself commits here.
                self.registry.rotate(keys).await?;
            }
        }
        Ok(())
    }
}
