//! HTTP API of the attestation service.
//!
//! | Route | Response |
//! | --- | --- |
//! | `GET /health` | `{status, uptime}` |
//! | `GET /attestation/{messageHash}` | attestation or 404 |
//! | `GET /attestation/{domain}/{nonce}` | attestation or 404 |
//! | `GET /attestations/ready` | `{count, attestations}` |
//! | `GET /stats` | operational counters |
//! | `POST /attestation/{messageHash}/signatures` | signature outcome |

use alloy_primitives::{Bytes, FixedBytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use super::AttestationService;
use crate::error::{BridgeError, Result};
use crate::protocol::{
    Attestation, Domain, HealthResponse, ReadyAttestations, ServiceStats, SignatureOutcome,
};

/// Body of `POST /attestation/{messageHash}/signatures`
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitSignatureRequest {
    pub signature: Bytes,
}

/// Error response with a JSON body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "BadRequest",
            message,
        }
    }

    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "NotFound",
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        let status = match &err {
            BridgeError::AttestationNotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::MalformedMessage(_) | BridgeError::InvalidSignature(_) => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Builds the API router over `service`.
pub fn router(service: AttestationService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/attestation/:id", get(attestation_by_hash))
        .route("/attestation/:id/:nonce", get(attestation_by_nonce))
        .route("/attestation/:id/signatures", post(submit_signature))
        .route("/attestations/ready", get(ready))
        .route("/stats", get(stats))
        .with_state(service)
}

/// Serves the API on `listener` until `shutdown` flips to `true`.
pub async fn serve(
    service: AttestationService,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, event = "http_api_listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move {
            // A dropped sender also ends the server
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    info!(event = "http_api_stopped");
    Ok(())
}

fn parse_hash(raw: &str) -> std::result::Result<FixedBytes<32>, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::bad_request(format!("invalid message hash {raw:?}: {e}")))
}

async fn health(State(service): State<AttestationService>) -> Json<HealthResponse> {
    Json(service.health())
}

async fn attestation_by_hash(
    State(service): State<AttestationService>,
    Path(id): Path<String>,
) -> ApiResult<Attestation> {
    let message_hash = parse_hash(&id)?;
    service
        .get(message_hash)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no attestation for {message_hash}")))
}

async fn attestation_by_nonce(
    State(service): State<AttestationService>,
    Path((domain, nonce)): Path<(String, String)>,
) -> ApiResult<Attestation> {
    let domain: Domain = domain
        .parse()
        .map_err(|e| ApiError::bad_request(format!("invalid domain {domain:?}: {e}")))?;
    let nonce: u64 = nonce
        .parse()
        .map_err(|e| ApiError::bad_request(format!("invalid nonce {nonce:?}: {e}")))?;
    service
        .get_by_nonce(domain, nonce)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no attestation for {domain}/{nonce}")))
}

async fn ready(State(service): State<AttestationService>) -> Json<ReadyAttestations> {
    Json(ReadyAttestations::from(service.ready().await))
}

async fn stats(State(service): State<AttestationService>) -> Json<ServiceStats> {
    Json(service.stats().await)
}

async fn submit_signature(
    State(service): State<AttestationService>,
    Path(id): Path<String>,
    Json(request): Json<SubmitSignatureRequest>,
) -> ApiResult<SignatureOutcome> {
    let message_hash = parse_hash(&id)?;
    let outcome = service
        .submit_signature(message_hash, request.signature)
        .await?;
    debug!(message_hash = %message_hash, outcome = ?outcome, event = "signature_pushed");
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AttestationStatus, Message, MessageSent};
    use crate::testing::{AttesterKeys, StaticAttesterSets};
    use crate::traits::AttesterSetProvider;
    use alloy_primitives::U256;
    use axum_test::TestServer;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn service(keys: &AttesterKeys) -> AttestationService {
        let sets = StaticAttesterSets::new();
        sets.set(Domain::new(1), keys.identities(), 2);
        AttestationService::builder()
            .attester_sets(HashMap::from([(
                Domain::new(1),
                Arc::new(sets) as Arc<dyn AttesterSetProvider>,
            )]))
            .build()
    }

    fn sent() -> MessageSent {
        MessageSent {
            message: Message::new(
                Domain::new(0),
                Domain::new(1),
                0,
                vec![1u8; 20],
                vec![2u8; 20],
                U256::from(1u64),
            ),
            block_number: 0,
        }
    }

    #[tokio::test]
    async fn test_health() {
        let server = TestServer::new(router(service(&AttesterKeys::generate(1)))).unwrap();
        let response = server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["status"], "ok");
    }

    #[tokio::test]
    async fn test_bad_hash_is_bad_request() {
        let server = TestServer::new(router(service(&AttesterKeys::generate(1)))).unwrap();
        server
            .get("/attestation/not-a-hash")
            .expect_failure()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        server
            .get("/attestation/0/minus-one")
            .expect_failure()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_push_signature() {
        let keys = AttesterKeys::generate(2);
        let service = service(&keys);
        let hash = service.observe(&sent()).await.unwrap().message_hash;
        let server = TestServer::new(router(service)).unwrap();

        let response = server
            .post(&format!("/attestation/{hash}/signatures"))
            .json(&json!({ "signature": keys.sign_one(hash, 0) }))
            .await;
        response.assert_status_ok();
        let outcome: SignatureOutcome = response.json();
        assert_eq!(
            outcome,
            SignatureOutcome::Accepted {
                attester: keys.identity(0),
                signatures: 1,
                threshold: 2,
                status: AttestationStatus::Pending,
            }
        );

        let unknown = FixedBytes::<32>::repeat_byte(7);
        server
            .post(&format!("/attestation/{unknown}/signatures"))
            .json(&json!({ "signature": keys.sign_one(unknown, 0) }))
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
