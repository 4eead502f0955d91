//! HTTP shell over the core
//!
//! Three routes: a health gauge, a read view of one stored alert, and an
//! admin endpoint for submitting a locally crafted envelope. Everything
//! goes through the same store and processor the sync engine uses.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::{ProcessOutcome, Processor};
use beacon_model::{Alert, AlertRecord, AlertStore};
use beacon_net::SyncStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn AlertStore>,
    pub processor: Arc<Processor>,
    pub status: Arc<SyncStatus>,
    pub threshold: usize,
}

/// One stored alert, rendered the same way the webhook payload is.
#[derive(Debug, Serialize, Deserialize)]
pub struct AlertView {
    pub alert_type: u32,
    pub sequence: u32,
    pub raw: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub alert: Option<AlertView>,
    pub sequence: u32,
    pub synced: bool,
    pub active_peers: usize,
    pub unprocessed_alerts: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAlertRequest {
    /// Fully signed envelope, hex-encoded.
    pub raw: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAlertResponse {
    pub sequence: u32,
    pub outcome: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/alert/:sequence", get(alert_by_sequence))
        .route("/alert", post(submit_alert))
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn view_record(record: &AlertRecord, threshold: usize) -> Result<AlertView, ApiError> {
    let alert = Alert::parse(&record.raw, threshold).map_err(internal)?;
    Ok(AlertView {
        alert_type: record.alert_type,
        sequence: record.sequence_number,
        raw: hex::encode(&record.raw),
        text: alert.payload.message_string(),
    })
}

async fn health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, ApiError> {
    let latest = state.store.latest().await.map_err(internal)?;
    let unprocessed = state.store.unprocessed().await.map_err(internal)?;

    let sequence = latest.as_ref().map(|r| r.sequence_number).unwrap_or(0);
    let alert = latest
        .as_ref()
        .map(|record| view_record(record, state.threshold))
        .transpose()?;

    Ok(Json(HealthResponse {
        alert,
        sequence,
        synced: state.status.synced(sequence),
        active_peers: state.status.active_peers(),
        unprocessed_alerts: unprocessed.len(),
    }))
}

async fn alert_by_sequence(
    State(state): State<ApiState>,
    Path(sequence): Path<u32>,
) -> Result<Json<AlertView>, ApiError> {
    match state.store.get(sequence).await.map_err(internal)? {
        Some(record) => Ok(Json(view_record(&record, state.threshold)?)),
        None => Err((StatusCode::NOT_FOUND, "alert not found".into())),
    }
}

async fn submit_alert(
    State(state): State<ApiState>,
    Json(request): Json<SubmitAlertRequest>,
) -> Result<Json<SubmitAlertResponse>, ApiError> {
    let bytes = hex::decode(&request.raw)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid hex: {e}")))?;

    let outcome = state
        .processor
        .process_raw(&bytes)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let sequence = u32::from_le_bytes(bytes[4..8].try_into().expect("validated by parse"));
    let outcome = match outcome {
        ProcessOutcome::Processed => "processed",
        ProcessOutcome::Deferred => "deferred",
        ProcessOutcome::AlreadyKnown => "already known",
    };
    Ok(Json(SubmitAlertResponse {
        sequence,
        outcome: outcome.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use beacon_core::{
        public_key_of, sign_digest, MemoryAlertStore, MemoryKeyRegistry, Processor,
    };
    use beacon_model::{
        AdapterError, AlertNotification, BlockHash, ConfiscationOutcome, FundRecord, KeyRegistry,
        NodeAdapter, Payload, PubKey, WebhookSink,
    };
    use k256::ecdsa::SigningKey;
    use tower::util::ServiceExt;

    struct NullNode;

    #[async_trait::async_trait]
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

    struct NullWebhook;

    #[async_trait::async_trait]
    impl WebhookSink for NullWebhook {
        async fn notify(&self, _: &AlertNotification) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn signers() -> Vec<SigningKey> {
        (1u8..=5)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[31] = i;
                SigningKey::from_slice(&bytes).unwrap()
            })
            .collect()
    }

    async fn test_state() -> ApiState {
        let genesis: Vec<PubKey> = signers().iter().map(public_key_of).collect();
        let store = Arc::new(MemoryAlertStore::new());
        let registry = Arc::new(MemoryKeyRegistry::new(3));
        registry.bootstrap(&genesis).await.unwrap();
        let processor = Arc::new(Processor::new(
            store.clone(),
            registry,
            Arc::new(NullNode),
            Arc::new(NullWebhook),
        ));
        ApiState {
            store,
            processor,
            status: Arc::new(SyncStatus::new()),
            threshold: 3,
        }
    }

    fn signed_alert_hex(seq: u32, text: &str) -> String {
        let keys = signers();
        let mut alert = Alert::unsigned(
            seq,
            0,
            Payload::Informational { message: text.as_bytes().to_vec() },
        );
        let digest = alert.signing_digest();
        alert.signatures = keys[..3]
            .iter()
            .map(|k| sign_digest(&digest, k).unwrap())
            .collect();
        hex::encode(alert.serialize())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_empty_store() {
        let app = router(test_state().await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["sequence"], 0);
        assert_eq!(body["synced"], true);
        assert_eq!(body["active_peers"], 0);
        assert_eq!(body["unprocessed_alerts"], 0);
        assert!(body["alert"].is_null());
    }

    #[tokio::test]
    async fn test_submit_then_read_back() {
        let state = test_state().await;
        let app = router(state);
        let raw = signed_alert_hex(1, "planned maintenance");

        let response = app
            .clone()
            .oneshot(
                Request::post("/alert")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({ "raw": raw })).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sequence"], 1);
        assert_eq!(body["outcome"], "processed");

        let response = app
            .clone()
            .oneshot(Request::get("/alert/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sequence"], 1);
        assert_eq!(body["alert_type"], 1);
        assert_eq!(body["text"], "planned maintenance");
        assert_eq!(body["raw"], raw);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["sequence"], 1);
        assert_eq!(body["alert"]["text"], "planned maintenance");
    }

    #[tokio::test]
    async fn test_alert_not_found() {
        let app = router(test_state().await);
        let response = app
            .oneshot(Request::get("/alert/7").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_alert_bad_sequence_param() {
        let app = router(test_state().await);
        let response = app
            .oneshot(Request::get("/alert/not-a-number").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_hex() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::post("/alert")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({ "raw": "zz" })).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_rejects_unsigned_alert() {
        let app = router(test_state().await);
        let mut alert = Alert::unsigned(
            1,
            0,
            Payload::Informational { message: b"unsigned".to_vec() },
        );
        alert.signatures = vec![vec![0u8; 65]; 3];
        let raw = hex::encode(alert.serialize());

        let response = app
            .oneshot(
                Request::post("/alert")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({ "raw": raw })).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
