//! Error types for tempmail.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Forward error: {0}")]
    Forward(#[from] ForwardError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Map a libSQL error, classifying UNIQUE violations as `Constraint`.
    pub fn from_libsql(context: &str, err: libsql::Error) -> Self {
        let msg = err.to_string();
        if msg.contains("UNIQUE constraint failed") {
            DatabaseError::Constraint(format!("{context}: {msg}"))
        } else {
            DatabaseError::Query(format!("{context}: {msg}"))
        }
    }
}

/// Inbound delivery failures.
///
/// A duplicate delivery is not an error: it is reported as
/// [`DeliveryOutcome::Duplicate`](crate::ingest::DeliveryOutcome::Duplicate).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Permanent input defect (400). Carries the payload's top-level keys.
    #[error("Missing required fields: to, from")]
    MissingRecipientOrSender { received: Vec<String> },

    /// No mailbox for the recipient, never issued or already expired (404).
    #[error("Recipient email not found: {address}")]
    RecipientNotFound { address: String },

    /// Store unreachable or query failure (500, upstream retries).
    #[error("Store unavailable: {0}")]
    Store(#[from] DatabaseError),
}

/// Webhook fan-out failures. Logged per subscription, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Webhook {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Webhook {url} request failed: {reason}")]
    Request { url: String, reason: String },
}

/// Mailbox issuance and query errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("No domains configured")]
    NoDomains,

    #[error("Email already exists: {0}")]
    AddressTaken(String),

    #[error("Email not found")]
    NotFound,

    #[error("This session is protected and cannot be deleted here")]
    Protected,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store unavailable: {0}")]
    Store(#[from] DatabaseError),
}

/// Mail-edge forwarding failures. Reported, never turned into a bounce.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("WEBHOOK_URL is not configured")]
    MissingWebhookUrl,

    #[error("Webhook request failed: {0}")]
    Request(String),

    #[error("Webhook returned status {status}: {body}")]
    Status { status: u16, body: String },
}
