//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::ingest::types::AttachmentMeta;

/// An issued disposable address.
#[derive(Debug, Clone, Serialize)]
pub struct MailboxRecord {
    pub id: Uuid,
    /// Always lower-cased.
    pub address: String,
    /// Shared by every mailbox created in the same client session.
    pub owner_token: String,
    pub created_at: DateTime<Utc>,
    /// Protected mailboxes survive the retention sweep and cannot be deleted
    /// through the client API.
    pub is_protected: bool,
}

/// A stored inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub mailbox_id: Uuid,
    pub from_address: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
    pub message_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
}

/// Insert payload for a message. The store assigns `id`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub mailbox_id: Uuid,
    pub from_address: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
    pub message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A message together with the address it was delivered to.
#[derive(Debug, Clone)]
pub struct InboxMessage {
    pub recipient: String,
    pub message: MessageRecord,
}

/// A registered "new email" notification target.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub url: String,
    pub label: String,
    /// When set, only mail for this recipient is delivered (case-insensitive).
    pub email_filter: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic persistence for mailboxes, messages, webhooks and domains.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Mailboxes ───────────────────────────────────────────────────

    /// Create a mailbox. A taken address yields `DatabaseError::Constraint`.
    async fn create_mailbox(
        &self,
        address: &str,
        owner_token: &str,
        is_protected: bool,
    ) -> Result<MailboxRecord, DatabaseError>;

    /// Look up a mailbox by address (case-insensitive).
    async fn get_mailbox_by_address(
        &self,
        address: &str,
    ) -> Result<Option<MailboxRecord>, DatabaseError>;

    /// All mailboxes of an owner, oldest first.
    async fn list_mailboxes_by_owner(
        &self,
        owner_token: &str,
    ) -> Result<Vec<MailboxRecord>, DatabaseError>;

    /// Delete an owner's mailboxes and their messages. Returns mailboxes removed.
    async fn delete_mailboxes_by_owner(&self, owner_token: &str) -> Result<usize, DatabaseError>;

    async fn count_mailboxes(&self) -> Result<usize, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message. A repeated `message_id` yields `DatabaseError::Constraint`.
    async fn insert_message(&self, msg: &NewMessage) -> Result<MessageRecord, DatabaseError>;

    /// Find a message by its RFC-822 Message-ID.
    async fn get_message_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<MessageRecord>, DatabaseError>;

    /// Messages across every mailbox of an owner, newest first.
    async fn list_inbox_by_owner(
        &self,
        owner_token: &str,
    ) -> Result<Vec<InboxMessage>, DatabaseError>;

    /// Messages of one mailbox, newest first.
    async fn list_inbox_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<InboxMessage>, DatabaseError>;

    /// Mark a message read if it belongs to the owner. Returns whether it did.
    async fn mark_owned_message_read(
        &self,
        owner_token: &str,
        id: Uuid,
    ) -> Result<bool, DatabaseError>;

    /// Delete a message if it belongs to the owner. Returns whether it did.
    async fn delete_owned_message(&self, owner_token: &str, id: Uuid)
    -> Result<bool, DatabaseError>;

    async fn count_messages(&self) -> Result<usize, DatabaseError>;

    // ── Retention ───────────────────────────────────────────────────

    /// Delete messages received before `cutoff` outside protected mailboxes.
    async fn delete_expired_messages(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError>;

    async fn count_protected_mailboxes(&self) -> Result<usize, DatabaseError>;

    // ── Webhooks ────────────────────────────────────────────────────

    async fn create_webhook(
        &self,
        url: &str,
        label: &str,
        email_filter: Option<&str>,
    ) -> Result<WebhookSubscription, DatabaseError>;

    async fn list_active_webhooks(&self) -> Result<Vec<WebhookSubscription>, DatabaseError>;

    /// Every subscription, active or not, oldest first.
    async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>, DatabaseError>;

    /// Flip a subscription's active flag. Returns the new flag, or `None`
    /// when no such subscription exists.
    async fn toggle_webhook(&self, id: Uuid) -> Result<Option<bool>, DatabaseError>;

    // ── Domains ─────────────────────────────────────────────────────

    /// Register a receiving domain. Returns false when it was already registered.
    async fn add_domain(&self, domain: &str) -> Result<bool, DatabaseError>;

    /// Registered domains in insertion order.
    async fn list_domains(&self) -> Result<Vec<String>, DatabaseError>;
}
