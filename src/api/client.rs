//! Client query API: one POST endpoint dispatching on `action`.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};
use uuid::Uuid;

use crate::api::{AppState, admin};
use crate::error::MailboxError;
use crate::mailbox::InboxScope;

/// Requests a client can make. Fields are optional so that a missing one
/// is reported by name instead of as a parse failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    /// Start a session with a random address.
    Create { domain: Option<String> },
    /// Add an address to an existing session.
    AddEmail {
        session_token: Option<String>,
        domain: Option<String>,
        username: Option<String>,
    },
    Domains,
    /// The session's primary address.
    Get { session_token: Option<String> },
    /// Messages for the whole session, or for one address without a session.
    Inbox {
        session_token: Option<String>,
        email: Option<String>,
    },
    Delete { session_token: Option<String> },
    MarkRead {
        session_token: Option<String>,
        email_id: Option<String>,
    },
    DeleteMessage {
        session_token: Option<String>,
        email_id: Option<String>,
    },
}

impl IntoResponse for MailboxError {
    fn into_response(self) -> Response {
        let status = match &self {
            MailboxError::NoDomains
            | MailboxError::AddressTaken(_)
            | MailboxError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            MailboxError::NotFound => StatusCode::NOT_FOUND,
            MailboxError::Protected => StatusCode::FORBIDDEN,
            MailboxError::Store(e) => {
                error!(error = %e, "Mailbox store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, MailboxError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| MailboxError::InvalidRequest(format!("{name} is required")))
}

fn message_id(value: Option<String>) -> Result<Uuid, MailboxError> {
    let raw = required(value, "email_id")?;
    Uuid::parse_str(raw.trim())
        .map_err(|_| MailboxError::InvalidRequest(format!("email_id is not a valid id: {raw}")))
}

/// `POST`: run one action. `admin_*` actions go to the admin handler.
pub async fn dispatch(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    if admin::is_admin_action(&body) {
        return admin::dispatch(&state, body).await;
    }

    let action = match serde_json::from_value::<ClientAction>(body) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, "Unrecognized client action");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid action"})),
            )
                .into_response();
        }
    };

    match run(&state, action).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn run(state: &AppState, action: ClientAction) -> Result<Value, MailboxError> {
    let mailboxes = &state.mailboxes;
    match action {
        ClientAction::Create { domain } => {
            let created = mailboxes.create(domain.as_deref()).await?;
            Ok(json!(created))
        }
        ClientAction::AddEmail {
            session_token,
            domain,
            username,
        } => {
            let token = required(session_token, "session_token")?;
            let username = username.filter(|u| !u.trim().is_empty());
            let mailbox = mailboxes
                .add(&token, domain.as_deref(), username.as_deref())
                .await?;
            Ok(json!({"id": mailbox.id, "email": mailbox.address}))
        }
        ClientAction::Domains => {
            let domains = mailboxes.available_domains().await?;
            Ok(json!({"domains": domains}))
        }
        ClientAction::Get { session_token } => {
            let token = required(session_token, "session_token")?;
            let mailbox = mailboxes.get(&token).await?;
            Ok(json!({
                "id": mailbox.id,
                "email": mailbox.address,
                "session_token": mailbox.owner_token,
                "created_at": mailbox.created_at,
            }))
        }
        ClientAction::Inbox {
            session_token,
            email,
        } => {
            let token = session_token.filter(|t| !t.trim().is_empty());
            let scope = match (token, email.filter(|e| !e.trim().is_empty())) {
                (Some(token), _) => InboxScope::Owner(token),
                (None, Some(email)) => InboxScope::Address(email),
                (None, None) => {
                    return Err(MailboxError::InvalidRequest(
                        "session_token is required".into(),
                    ));
                }
            };
            let messages = mailboxes.inbox(&scope).await?;
            Ok(json!({"messages": messages}))
        }
        ClientAction::Delete { session_token } => {
            let token = required(session_token, "session_token")?;
            let removed = mailboxes.delete(&token).await?;
            Ok(json!({"success": true, "deleted": removed}))
        }
        ClientAction::MarkRead {
            session_token,
            email_id,
        } => {
            let token = required(session_token, "session_token")?;
            mailboxes.mark_read(&token, message_id(email_id)?).await?;
            Ok(json!({"success": true}))
        }
        ClientAction::DeleteMessage {
            session_token,
            email_id,
        } => {
            let token = required(session_token, "session_token")?;
            mailboxes.delete_message(&token, message_id(email_id)?).await?;
            Ok(json!({"success": true}))
        }
    }
}

/// `GET`: service index with live counts.
pub async fn index(State(state): State<AppState>) -> Response {
    let stats = async {
        let mailboxes = state.db.count_mailboxes().await?;
        let messages = state.db.count_messages().await?;
        let domains = state.mailboxes.available_domains().await?;
        Ok::<_, MailboxError>(json!({
            "active_emails": mailboxes,
            "total_messages": messages,
            "domains": domains,
        }))
    }
    .await;

    match stats {
        Ok(stats) => Json(json!({
            "status": "ok",
            "service": "tempmail",
            "version": env!("CARGO_PKG_VERSION"),
            "actions": [
                "create", "add_email", "domains", "get",
                "inbox", "delete", "mark_read", "delete_message",
            ],
            "stats": stats,
            "updated_at": Utc::now(),
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}
