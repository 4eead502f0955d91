//! Shared fixtures for sync integration tests
//!
//! Builds in-memory nodes (store + registry + processor) that share one
//! genesis key set, and signed alert chains to seed them with.

use async_trait::async_trait;
use beacon_core::{public_key_of, sign_digest, MemoryAlertStore, MemoryKeyRegistry, Processor};
use beacon_model::{
    AdapterError, Alert, AlertNotification, AlertStore, BlockHash, ConfiscationOutcome,
    FundRecord, KeyRegistry, NodeAdapter, Payload, PubKey, WebhookSink,
};
use k256::ecdsa::SigningKey;
use std::sync::Arc;

pub const THRESHOLD: usize = 3;

/// Deterministic signing keys shared by every node in a test.
pub fn test_signers() -> Vec<SigningKey> {
    (1u8..=5)
        .map(|i| {
            let mut bytes = [0u8; 32];
            bytes[31] = i;
            SigningKey::from_slice(&bytes).expect("small scalars are valid keys")
        })
        .collect()
}

pub struct NullNode;

#[async_trait]
impl NodeAdapter for NullNode {
    async fn ban_peer(&self, _: &str, _: &str) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn unban_peer(&self, _: &str, _: &str) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn freeze_utxos(&self, _: &[FundRecord]) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn unfreeze_utxos(&self, _: &[FundRecord]) -> Result<(), AdapterError> {
        Ok(())
    }
    async fn confiscate_transaction(
        &self,
        _: i64,
        _: &[u8],
    ) -> Result<ConfiscationOutcome, AdapterError> {
        Ok(ConfiscationOutcome::default())
    }
    async fn invalidate_block(&self, _: &BlockHash, _: &str) -> Result<(), AdapterError> {
        Ok(())
    }
}

pub struct NullWebhook;

#[async_trait]
impl WebhookSink for NullWebhook {
    async fn notify(&self, _: &AlertNotification) -> Result<(), AdapterError> {
        Ok(())
    }
}

pub struct TestNode {
    pub processor: Arc<Processor>,
    pub store: Arc<MemoryAlertStore>,
}

/// A node bootstrapped with the shared genesis key set.
pub async fn make_node() -> TestNode {
    let genesis: Vec<PubKey> = test_signers().iter().map(public_key_of).collect();
    let store = Arc::new(MemoryAlertStore::new());
    let registry = Arc::new(MemoryKeyRegistry::new(THRESHOLD));
    registry.bootstrap(&genesis).await.unwrap();
    let processor = Arc::new(Processor::new(
        store.clone(),
        registry,
        Arc::new(NullNode),
        Arc::new(NullWebhook),
    ));
    TestNode { processor, store }
}

/// A signed informational alert envelope at `seq`.
pub fn signed_alert(seq: u32, text: &str) -> Vec<u8> {
    let signers = test_signers();
    let mut alert = Alert::unsigned(
        seq,
        1_700_000_000 + seq as u64,
        Payload::Informational { message: text.as_bytes().to_vec() },
    );
    let digest = alert.signing_digest();
    alert.signatures = signers[..THRESHOLD]
        .iter()
        .map(|k| sign_digest(&digest, k).unwrap())
        .collect();
    alert.serialize()
}

/// Admit alerts 1..=n into the node.
pub async fn seed_alerts(node: &TestNode, n: u32) {
    for seq in 1..=n {
        node.processor
            .process_raw(&signed_alert(seq, &format!("alert {seq}")))
            .await
            .unwrap();
    }
}

/// Wait until the node holds processed alerts 1..=n (or panic after ~5s).
pub async fn wait_for_full_log(node: &TestNode, n: u32) {
    for _ in 0..500 {
        if log_is_complete(node, n).await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("node did not converge to a full log of {n} alerts");
}

pub async fn log_is_complete(node: &TestNode, n: u32) -> bool {
    for seq in 1..=n {
        match node.store.get(seq).await.unwrap() {
            Some(record) if record.processed => {}
            _ => return false,
        }
    }
    node.store
        .latest()
        .await
        .unwrap()
        .map(|r| r.sequence_number == n)
        .unwrap_or(false)
}
