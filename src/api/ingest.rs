//! Inbound mail webhook.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::api::AppState;
use crate::error::IngestError;
use crate::ingest::DeliveryOutcome;

/// Header carrying the shared secret from the mail edge.
pub const SECRET_HEADER: &str = "x-webhook-secret";

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::MissingRecipientOrSender { received } => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Missing required fields: to, from",
                    "received": received,
                })),
            )
                .into_response(),
            IngestError::RecipientNotFound { address } => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Recipient email not found", "email": address})),
            )
                .into_response(),
            IngestError::Store(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response(),
        }
    }
}

fn secret_matches(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.config.webhook_secret else {
        return true;
    };
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|given| given == expected.expose_secret())
}

/// Accept one inbound message. The response never waits on webhook fan-out.
pub async fn email_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !secret_matches(&state, &headers) {
        warn!("Rejected inbound email with bad webhook secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Inbound email body is not JSON");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid JSON body"})),
            )
                .into_response();
        }
    };

    match state.pipeline.deliver(&payload).await {
        Ok(delivery) => {
            // Fan-out keeps running after the handle is dropped.
            drop(delivery.fan_out);
            match delivery.outcome {
                DeliveryOutcome::Stored { email_id } => (
                    StatusCode::OK,
                    Json(json!({"success": true, "email_id": email_id})),
                )
                    .into_response(),
                DeliveryOutcome::Duplicate { message_id } => (
                    StatusCode::OK,
                    Json(json!({
                        "success": true,
                        "duplicate": true,
                        "message_id": message_id,
                    })),
                )
                    .into_response(),
            }
        }
        Err(e) => {
            match &e {
                IngestError::Store(inner) => error!(error = %inner, "Email delivery failed"),
                other => warn!(error = %other, "Email rejected"),
            }
            e.into_response()
        }
    }
}
