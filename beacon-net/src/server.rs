//! Responder side of the sync protocol
//!
//! Answers a peer's requests from the local store. Sessions are
//! symmetric, so both inbound and outbound sessions route request
//! messages here while their own catch-up state machine handles the
//! responses.

use crate::error::NetError;
use crate::framing::MessageSink;
use beacon_model::{AlertStore, SyncMessage};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::debug;

/// Answer a request message from the store.
///
/// Returns true when the message was a request and has been handled;
/// false when the caller should treat it as a response. A peer asking for
/// a sequence we do not hold gets no reply: the protocol has no negative
/// response, so unknown sequences are silently dropped, as is
/// `IWantLatest` against an empty store.
pub async fn answer_request<W>(
    msg: &SyncMessage,
    peer: &str,
    store: &Arc<dyn AlertStore>,
    sink: &mut MessageSink<W>,
) -> Result<bool, NetError>
where
    W: AsyncWrite + Send + Unpin,
{
    match msg.kind {
        SyncMessage::I_WANT_LATEST => {
            if let Some(latest) = store.latest().await? {
                sink.send(&SyncMessage::got_latest(latest.sequence_number, latest.raw))
                    .await?;
            }
            Ok(true)
        }
        SyncMessage::I_WANT_SEQUENCE => {
            match store.get(msg.sequence_number).await? {
                Some(record) => {
                    sink.send(&SyncMessage::got_sequence(
                        record.sequence_number,
                        record.raw,
                    ))
                    .await?;
                }
                None => {
                    debug!(peer, sequence = msg.sequence_number,
                        "peer asked for a sequence we do not hold");
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::MessageStream;
    use beacon_core::MemoryAlertStore;
    use beacon_model::{Alert, AlertRecord, Payload};

    fn record(seq: u32) -> AlertRecord {
        let mut alert = Alert::unsigned(
            seq,
            0,
            Payload::Informational { message: b"held".to_vec() },
        );
        alert.signatures = vec![vec![0u8; 65]; 3];
        AlertRecord::new(&alert)
    }

    async fn seeded_store(up_to: u32) -> Arc<dyn AlertStore> {
        let store = MemoryAlertStore::new();
        for seq in 1..=up_to {
            store.insert_if_absent(record(seq)).await.unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_answers_want_latest() {
        let store = seeded_store(3).await;
        let (ours, theirs) = tokio::io::duplex(4096);
        let mut sink = MessageSink::new(ours);
        let mut peer = MessageStream::new(theirs);

        let handled = answer_request(&SyncMessage::want_latest(), "peer", &store, &mut sink)
            .await
            .unwrap();
        assert!(handled);

        let reply = peer.recv().await.unwrap().unwrap();
        assert_eq!(reply.kind, SyncMessage::I_GOT_LATEST);
        assert_eq!(reply.sequence_number, 3);
        assert_eq!(reply.data, record(3).raw);
    }

    #[tokio::test]
    async fn test_answers_want_sequence() {
        let store = seeded_store(3).await;
        let (ours, theirs) = tokio::io::duplex(4096);
        let mut sink = MessageSink::new(ours);
        let mut peer = MessageStream::new(theirs);

        answer_request(&SyncMessage::want_sequence(2), "peer", &store, &mut sink)
            .await
            .unwrap();

        let reply = peer.recv().await.unwrap().unwrap();
        assert_eq!(reply.kind, SyncMessage::I_GOT_SEQUENCE);
        assert_eq!(reply.sequence_number, 2);
        assert_eq!(reply.data, record(2).raw);
    }

    #[tokio::test]
    async fn test_unknown_sequence_dropped() {
        let store = seeded_store(3).await;
        let (ours, theirs) = tokio::io::duplex(4096);
        let mut sink = MessageSink::new(ours);
        let mut peer = MessageStream::new(theirs);

        let handled = answer_request(&SyncMessage::want_sequence(9), "peer", &store, &mut sink)
            .await
            .unwrap();
        assert!(handled);

        // Nothing was sent; closing our end gives the peer a clean EOF.
        drop(sink);
        assert!(peer.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_store_offers_nothing() {
        let store: Arc<dyn AlertStore> = Arc::new(MemoryAlertStore::new());
        let (ours, theirs) = tokio::io::duplex(4096);
        let mut sink = MessageSink::new(ours);
        let mut peer = MessageStream::new(theirs);

        answer_request(&SyncMessage::want_latest(), "peer", &store, &mut sink)
            .await
            .unwrap();

        drop(sink);
        assert!(peer.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_responses_left_to_caller() {
        let store = seeded_store(1).await;
        let (ours, _theirs) = tokio::io::duplex(4096);
        let mut sink = MessageSink::new(ours);

        let handled = answer_request(
            &SyncMessage::got_latest(4, vec![0xaa]),
            "peer",
            &store,
            &mut sink,
        )
        .await
        .unwrap();
        assert!(!handled);
    }
}
