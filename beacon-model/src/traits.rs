//! Capability traits consumed by the processing pipeline
//!
//! The processor is written against these narrow interfaces so the whole
//! pipeline runs unchanged over in-memory fakes in tests and over
//! redb/JSON-RPC/HTTP in the daemon.

use crate::alert::{content_hash, Alert};
use crate::payload::{FundRecord, KEY_SET_SIZE};
use crate::types::{BlockHash, Hash, PubKey};
use async_trait::async_trait;
use thiserror::Error;

/// A persisted alert. The raw envelope bytes are authoritative; the other
/// fields are derived caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRecord {
    pub sequence_number: u32,
    pub alert_type: u32,
    pub hash: Hash,
    pub raw: Vec<u8>,
    pub processed: bool,
}

impl AlertRecord {
    /// Build an unprocessed record from a parsed alert.
    pub fn new(alert: &Alert) -> Self {
        let raw = alert.serialize();
        Self {
            sequence_number: alert.sequence_number,
            alert_type: alert.alert_type().code(),
            hash: content_hash(&raw),
            raw,
            processed: false,
        }
    }

    /// Rebuild the derived fields from raw envelope bytes.
    ///
    /// The caller guarantees `raw` once parsed successfully; only the
    /// fixed-offset header fields are read back here.
    pub fn from_raw(raw: Vec<u8>, processed: bool) -> Self {
        let sequence_number = u32::from_le_bytes(raw[4..8].try_into().expect("4 bytes"));
        let alert_type = u32::from_le_bytes(raw[16..20].try_into().expect("4 bytes"));
        Self {
            sequence_number,
            alert_type,
            hash: content_hash(&raw),
            raw,
            processed,
        }
    }
}

/// Storage-layer errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("alert not found: sequence {0}")]
    NotFound(u32),

    #[error("conflicting alert at sequence {0}: same sequence, different bytes")]
    Conflict(u32),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable, ordered record of alerts keyed by sequence number.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn get(&self, sequence_number: u32) -> Result<Option<AlertRecord>, StoreError>;

    /// The alert with the greatest sequence number.
    async fn latest(&self) -> Result<Option<AlertRecord>, StoreError>;

    /// Insert once per sequence number. A second insert with identical
    /// bytes is a no-op returning the stored record; different bytes fail
    /// with [`StoreError::Conflict`].
    async fn insert_if_absent(&self, record: AlertRecord) -> Result<AlertRecord, StoreError>;

    /// Alerts persisted but whose side effects have not completed, in
    /// sequence order.
    async fn unprocessed(&self) -> Result<Vec<AlertRecord>, StoreError>;

    async fn mark_processed(&self, sequence_number: u32) -> Result<(), StoreError>;
}

/// Key registry errors.
#[derive(Error, Debug)]
pub enum KeyRegistryError {
    #[error("invalid public key format")]
    InvalidKeyFormat,

    #[error("key registry is already bootstrapped")]
    AlreadyBootstrapped,

    #[error("key registry has no active keys")]
    NotBootstrapped,

    #[error("key registry backend error: {0}")]
    Backend(String),
}

/// The authoritative key set and signing threshold.
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// The currently active keys, in a stable order.
    async fn active_keys(&self) -> Result<Vec<PubKey>, KeyRegistryError>;

    /// How many distinct active keys must sign an alert.
    fn threshold(&self) -> usize;

    /// Atomically deactivate all active keys and activate `new_keys`.
    async fn rotate(&self, new_keys: &[PubKey; KEY_SET_SIZE]) -> Result<(), KeyRegistryError>;

    /// Activate the genesis key set. Legal only while the registry is
    /// empty; afterwards rotation is the only mutation path.
    async fn bootstrap(&self, keys: &[PubKey]) -> Result<(), KeyRegistryError>;
}

/// Errors from the node RPC and webhook adapters. These leave the alert
/// persisted-but-unprocessed; the retry worker re-attempts later.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("node RPC error: {0}")]
    Rpc(String),

    #[error("node RPC call timed out")]
    Timeout,

    #[error("confiscation transaction rejected by node: {0}")]
    ConfiscationRejected(String),

    #[error("webhook unavailable: {0}")]
    WebhookUnavailable(String),

    #[error("webhook returned unexpected status: {0}")]
    WebhookUnexpectedStatus(u16),
}

/// One transaction the node declined to whitelist.
#[derive(Debug, Clone)]
pub struct NotProcessedTx {
    pub txid: String,
    pub reason: String,
}

/// Result of a confiscation-whitelist call.
#[derive(Debug, Clone, Default)]
pub struct ConfiscationOutcome {
    pub not_processed: Vec<NotProcessedTx>,
}

/// Administrative surface of the blockchain node.
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    async fn ban_peer(&self, peer: &str, reason: &str) -> Result<(), AdapterError>;

    async fn unban_peer(&self, peer: &str, reason: &str) -> Result<(), AdapterError>;

    async fn freeze_utxos(&self, funds: &[FundRecord]) -> Result<(), AdapterError>;

    async fn unfreeze_utxos(&self, funds: &[FundRecord]) -> Result<(), AdapterError>;

    async fn confiscate_transaction(
        &self,
        enforce_at_height: i64,
        tx: &[u8],
    ) -> Result<ConfiscationOutcome, AdapterError>;

    async fn invalidate_block(
        &self,
        block_hash: &BlockHash,
        reason: &str,
    ) -> Result<(), AdapterError>;
}

/// Payload posted to the external webhook sink.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AlertNotification {
    pub alert_type: u32,
    pub sequence: u32,
    /// Full envelope, hex-encoded.
    pub raw: String,
    pub text: String,
}

impl AlertNotification {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            alert_type: alert.alert_type().code(),
            sequence: alert.sequence_number,
            raw: hex::encode(alert.serialize()),
            text: alert.payload.message_string(),
        }
    }
}

/// Outbound notification sink.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn notify(&self, notification: &AlertNotification) -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;

    #[test]
    fn test_record_from_raw_matches_new() {
        let mut alert = Alert::unsigned(
            9,
            1_700_000_000,
            Payload::Informational { message: b"hi".to_vec() },
        );
        alert.signatures = vec![vec![0u8; 65]; 3];

        let record = AlertRecord::new(&alert);
        let rebuilt = AlertRecord::from_raw(record.raw.clone(), false);
        assert_eq!(record, rebuilt);
        assert_eq!(rebuilt.sequence_number, 9);
        assert_eq!(rebuilt.alert_type, 1);
    }

    #[test]
    fn test_notification_fields() {
        let mut alert = Alert::unsigned(
            4,
            0,
            Payload::Informational { message: b"maintenance window".to_vec() },
        );
        alert.signatures = vec![vec![0u8; 65]; 3];

        let n = AlertNotification::from_alert(&alert);
        assert_eq!(n.sequence, 4);
        assert_eq!(n.alert_type, 1);
        assert_eq!(n.text, "maintenance window");
        assert_eq!(n.raw, hex::encode(alert.serialize()));
    }
}
