//! Admin actions on the client endpoint: protected mailboxes, receiving
//! domains and webhook subscriptions. Every request must carry the
//! configured `admin_token`.

use std::sync::LazyLock;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use regex::Regex;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::MailboxError;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$")
        .expect("domain regex")
});

/// Admin requests, dispatched on `action`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    /// Issue a protected address, optionally into an existing session.
    AdminCreate {
        session_token: Option<String>,
        domain: Option<String>,
        email_username: Option<String>,
    },
    AdminDomainsList,
    AdminDomainsAdd { domain_name: Option<String> },
    AdminWebhooksList,
    AdminWebhooksAdd {
        webhook_url: Option<String>,
        webhook_label: Option<String>,
        email_filter: Option<String>,
    },
    /// Flip a subscription between active and inactive.
    AdminWebhooksToggle { webhook_id: Option<String> },
}

/// Whether `action` names an admin action.
pub fn is_admin_action(body: &Value) -> bool {
    body.get("action")
        .and_then(Value::as_str)
        .is_some_and(|a| a.starts_with("admin_"))
}

fn authorized(state: &AppState, body: &Value) -> bool {
    let Some(expected) = &state.config.admin_token else {
        return false;
    };
    body.get("admin_token")
        .and_then(Value::as_str)
        .is_some_and(|given| given == expected.expose_secret())
}

fn invalid(message: &str) -> MailboxError {
    MailboxError::InvalidRequest(message.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Run one admin action. Unauthorized requests get 401 before the action
/// is even parsed.
pub async fn dispatch(state: &AppState, body: Value) -> Response {
    if !authorized(state, &body) {
        warn!("Rejected admin action with bad or missing admin token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response();
    }

    let action = match serde_json::from_value::<AdminAction>(body) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, "Unrecognized admin action");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid action"})),
            )
                .into_response();
        }
    };

    match run(state, action).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn run(state: &AppState, action: AdminAction) -> Result<Value, MailboxError> {
    match action {
        AdminAction::AdminCreate {
            session_token,
            domain,
            email_username,
        } => {
            let created = state
                .mailboxes
                .create_protected(
                    session_token.as_deref(),
                    domain.as_deref(),
                    non_empty(email_username).as_deref(),
                )
                .await?;
            Ok(json!({
                "id": created.id,
                "email": created.email,
                "session_token": created.session_token,
                "is_protected": true,
            }))
        }
        AdminAction::AdminDomainsList => {
            let domains = state.db.list_domains().await?;
            Ok(json!({"domains": domains}))
        }
        AdminAction::AdminDomainsAdd { domain_name } => {
            let domain = non_empty(domain_name)
                .map(|d| d.to_lowercase())
                .ok_or_else(|| invalid("Domain name required"))?;
            if !DOMAIN_RE.is_match(&domain) {
                return Err(invalid("Invalid domain format"));
            }
            if !state.db.add_domain(&domain).await? {
                return Err(invalid("Domain already exists"));
            }
            info!(domain = %domain, "Domain added");
            Ok(json!({"domain": domain}))
        }
        AdminAction::AdminWebhooksList => {
            let webhooks = state.db.list_webhooks().await?;
            Ok(json!({"webhooks": webhooks}))
        }
        AdminAction::AdminWebhooksAdd {
            webhook_url,
            webhook_label,
            email_filter,
        } => {
            let url = non_empty(webhook_url).ok_or_else(|| invalid("Webhook URL required"))?;
            let parsed = reqwest::Url::parse(&url).map_err(|_| invalid("Invalid URL format"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid("Invalid URL format"));
            }
            let label = non_empty(webhook_label).unwrap_or_default();
            let filter = non_empty(email_filter).map(|f| f.to_lowercase());
            let webhook = state
                .db
                .create_webhook(&url, &label, filter.as_deref())
                .await?;
            info!(webhook_id = %webhook.id, url = %webhook.url, "Webhook added");
            Ok(json!({"webhook": webhook}))
        }
        AdminAction::AdminWebhooksToggle { webhook_id } => {
            let raw = non_empty(webhook_id).ok_or_else(|| invalid("Webhook ID required"))?;
            let id = Uuid::parse_str(&raw).map_err(|_| invalid("Webhook ID is not a valid id"))?;
            let is_active = state
                .db
                .toggle_webhook(id)
                .await?
                .ok_or(MailboxError::NotFound)?;
            Ok(json!({"success": true, "is_active": is_active}))
        }
    }
}
