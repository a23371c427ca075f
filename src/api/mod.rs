//! HTTP surface: ingestion webhook, client query API, cleanup trigger.

pub mod admin;
pub mod client;
pub mod ingest;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::config::AppConfig;
use crate::ingest::{DeliveryPipeline, WebhookFanOut};
use crate::mailbox::MailboxService;
use crate::retention;
use crate::store::Database;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub pipeline: Arc<DeliveryPipeline>,
    pub mailboxes: MailboxService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire the pipeline and mailbox service from a store and configuration.
    pub fn new(db: Arc<dyn Database>, config: AppConfig) -> Self {
        let pipeline = DeliveryPipeline::new(
            Arc::clone(&db),
            WebhookFanOut::new(config.fanout_timeout),
        )
        .with_body_limit(config.fanout_body_limit);
        let mailboxes = MailboxService::new(Arc::clone(&db), config.fallback_domains.clone());
        Self {
            db,
            pipeline: Arc::new(pipeline),
            mailboxes,
            config: Arc::new(config),
        }
    }
}

/// Build the router. Paths mirror the hosted function names, each with a
/// short alias.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/functions/v1/email-webhook", post(ingest::email_webhook))
        .route("/webhook/email", post(ingest::email_webhook))
        .route(
            "/functions/v1/tempmail",
            get(client::index).post(client::dispatch),
        )
        .route("/api", get(client::index).post(client::dispatch))
        .route("/functions/v1/cleanup-emails", post(cleanup))
        .route("/cleanup", post(cleanup))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "tempmail"}))
}

/// Run a retention sweep now.
async fn cleanup(State(state): State<AppState>) -> impl IntoResponse {
    match retention::sweep(state.db.as_ref(), Utc::now(), state.config.retention_max_age).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "deleted_messages": summary.deleted_messages,
                "protected_addresses": summary.protected_addresses,
                "cleaned_at": summary.cleaned_at,
            })),
        ),
        Err(e) => {
            error!(error = %e, "Cleanup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}
