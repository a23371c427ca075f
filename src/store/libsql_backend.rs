//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::ingest::types::AttachmentMeta;
use crate::store::migrations;
use crate::store::traits::{
    Database, InboxMessage, MailboxRecord, MessageRecord, NewMessage, WebhookSubscription,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn count(&self, sql: &str, ctx: &str) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
        match row {
            Some(row) => {
                let n: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
                Ok(n.max(0) as usize)
            }
            None => Ok(0),
        }
    }

    async fn query_mailboxes(
        &self,
        sql: &str,
        value: &str,
        ctx: &str,
    ) -> Result<Vec<MailboxRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![value])
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?
        {
            out.push(
                row_to_mailbox(&row).map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?,
            );
        }
        Ok(out)
    }

    async fn query_inbox(
        &self,
        sql: &str,
        value: &str,
        ctx: &str,
    ) -> Result<Vec<InboxMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![value])
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?
        {
            let message =
                row_to_message(&row).map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
            let recipient: String = row
                .get(11)
                .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
            out.push(InboxMessage { recipient, message });
        }
        Ok(out)
    }

    async fn query_webhooks(
        &self,
        sql: &str,
        ctx: &str,
    ) -> Result<Vec<WebhookSubscription>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;

        let mut hooks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?
        {
            hooks.push(
                row_to_webhook(&row).map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?,
            );
        }
        Ok(hooks)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed width so text comparison orders by time.
fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_default()
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const MAILBOX_COLUMNS: &str = "id, address, owner_token, is_protected, created_at";

/// Message columns prefixed with `m.` so they can be joined with mailboxes.
const MESSAGE_COLUMNS: &str = "m.id, m.mailbox_id, m.from_address, m.from_name, m.subject, \
     m.body_text, m.body_html, m.attachments, m.message_id, m.received_at, m.is_read";

const WEBHOOK_COLUMNS: &str = "id, url, label, email_filter, is_active, created_at";

/// Column order matches MAILBOX_COLUMNS.
fn row_to_mailbox(row: &libsql::Row) -> Result<MailboxRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let created: String = row.get(4)?;
    Ok(MailboxRecord {
        id: parse_uuid(&id),
        address: row.get(1)?,
        owner_token: row.get(2)?,
        is_protected: row.get::<i64>(3)? != 0,
        created_at: parse_datetime(&created),
    })
}

/// Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<MessageRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let mailbox_id: String = row.get(1)?;
    let attachments_json: String = row.get::<String>(7).unwrap_or_default();
    let received: String = row.get(9)?;

    // Unreadable attachment metadata is not worth failing the row over.
    let attachments: Vec<AttachmentMeta> =
        serde_json::from_str(&attachments_json).unwrap_or_default();

    Ok(MessageRecord {
        id: parse_uuid(&id),
        mailbox_id: parse_uuid(&mailbox_id),
        from_address: row.get(2)?,
        from_name: row.get::<String>(3).ok(),
        subject: row.get(4)?,
        body_text: row.get::<String>(5).ok(),
        body_html: row.get::<String>(6).ok(),
        attachments,
        message_id: row.get::<String>(8).ok(),
        received_at: parse_datetime(&received),
        is_read: row.get::<i64>(10)? != 0,
    })
}

/// Column order matches WEBHOOK_COLUMNS.
fn row_to_webhook(row: &libsql::Row) -> Result<WebhookSubscription, libsql::Error> {
    let id: String = row.get(0)?;
    let created: String = row.get(5)?;
    Ok(WebhookSubscription {
        id: parse_uuid(&id),
        url: row.get(1)?,
        label: row.get::<String>(2).unwrap_or_default(),
        email_filter: row.get::<String>(3).ok().filter(|s| !s.is_empty()),
        is_active: row.get::<i64>(4)? != 0,
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Mailboxes ───────────────────────────────────────────────────

    async fn create_mailbox(
        &self,
        address: &str,
        owner_token: &str,
        is_protected: bool,
    ) -> Result<MailboxRecord, DatabaseError> {
        let record = MailboxRecord {
            id: Uuid::new_v4(),
            address: address.trim().to_lowercase(),
            owner_token: owner_token.to_string(),
            created_at: Utc::now(),
            is_protected,
        };

        self.conn()
            .execute(
                "INSERT INTO mailboxes (id, address, owner_token, is_protected, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    record.address.clone(),
                    record.owner_token.clone(),
                    is_protected as i64,
                    fmt_datetime(record.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("create_mailbox", e))?;

        debug!(mailbox_id = %record.id, address = %record.address, "Mailbox created");
        Ok(record)
    }

    async fn get_mailbox_by_address(
        &self,
        address: &str,
    ) -> Result<Option<MailboxRecord>, DatabaseError> {
        let found = self
            .query_mailboxes(
                &format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE address = ?1"),
                &address.trim().to_lowercase(),
                "get_mailbox_by_address",
            )
            .await?;
        Ok(found.into_iter().next())
    }

    async fn list_mailboxes_by_owner(
        &self,
        owner_token: &str,
    ) -> Result<Vec<MailboxRecord>, DatabaseError> {
        self.query_mailboxes(
            &format!(
                "SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE owner_token = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ),
            owner_token,
            "list_mailboxes_by_owner",
        )
        .await
    }

    async fn delete_mailboxes_by_owner(&self, owner_token: &str) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM messages WHERE mailbox_id IN
                (SELECT id FROM mailboxes WHERE owner_token = ?1)",
            params![owner_token],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_mailboxes_by_owner: {e}")))?;

        let removed = conn
            .execute(
                "DELETE FROM mailboxes WHERE owner_token = ?1",
                params![owner_token],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_mailboxes_by_owner: {e}")))?;

        Ok(removed as usize)
    }

    async fn count_mailboxes(&self) -> Result<usize, DatabaseError> {
        self.count("SELECT COUNT(*) FROM mailboxes", "count_mailboxes")
            .await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, msg: &NewMessage) -> Result<MessageRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let attachments = serde_json::to_string(&msg.attachments)
            .map_err(|e| DatabaseError::Serialization(format!("attachments: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO messages (id, mailbox_id, from_address, from_name, subject,
                    body_text, body_html, attachments, message_id, received_at, is_read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)",
                params![
                    id.to_string(),
                    msg.mailbox_id.to_string(),
                    msg.from_address.clone(),
                    opt_text(msg.from_name.as_deref()),
                    msg.subject.clone(),
                    opt_text(msg.body_text.as_deref()),
                    opt_text(msg.body_html.as_deref()),
                    attachments,
                    opt_text(msg.message_id.as_deref()),
                    fmt_datetime(msg.received_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("insert_message", e))?;

        debug!(email_id = %id, mailbox_id = %msg.mailbox_id, "Message inserted into DB");

        Ok(MessageRecord {
            id,
            mailbox_id: msg.mailbox_id,
            from_address: msg.from_address.clone(),
            from_name: msg.from_name.clone(),
            subject: msg.subject.clone(),
            body_text: msg.body_text.clone(),
            body_html: msg.body_html.clone(),
            attachments: msg.attachments.clone(),
            message_id: msg.message_id.clone(),
            received_at: msg.received_at,
            is_read: false,
        })
    }

    async fn get_message_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<MessageRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message_by_message_id: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message_by_message_id: {e}")))?
        {
            Some(row) => Ok(Some(row_to_message(&row).map_err(|e| {
                DatabaseError::Query(format!("get_message_by_message_id: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    async fn list_inbox_by_owner(
        &self,
        owner_token: &str,
    ) -> Result<Vec<InboxMessage>, DatabaseError> {
        self.query_inbox(
            &format!(
                "SELECT {MESSAGE_COLUMNS}, b.address FROM messages m
                 JOIN mailboxes b ON b.id = m.mailbox_id
                 WHERE b.owner_token = ?1
                 ORDER BY m.received_at DESC, m.rowid DESC"
            ),
            owner_token,
            "list_inbox_by_owner",
        )
        .await
    }

    async fn list_inbox_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<InboxMessage>, DatabaseError> {
        self.query_inbox(
            &format!(
                "SELECT {MESSAGE_COLUMNS}, b.address FROM messages m
                 JOIN mailboxes b ON b.id = m.mailbox_id
                 WHERE b.address = ?1
                 ORDER BY m.received_at DESC, m.rowid DESC"
            ),
            &address.trim().to_lowercase(),
            "list_inbox_by_address",
        )
        .await
    }

    async fn mark_owned_message_read(
        &self,
        owner_token: &str,
        id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE messages SET is_read = 1 WHERE id = ?1 AND mailbox_id IN
                    (SELECT id FROM mailboxes WHERE owner_token = ?2)",
                params![id.to_string(), owner_token],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_owned_message_read: {e}")))?;
        Ok(changed > 0)
    }

    async fn delete_owned_message(
        &self,
        owner_token: &str,
        id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM messages WHERE id = ?1 AND mailbox_id IN
                    (SELECT id FROM mailboxes WHERE owner_token = ?2)",
                params![id.to_string(), owner_token],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_owned_message: {e}")))?;
        Ok(changed > 0)
    }

    async fn count_messages(&self) -> Result<usize, DatabaseError> {
        self.count("SELECT COUNT(*) FROM messages", "count_messages")
            .await
    }

    // ── Retention ───────────────────────────────────────────────────

    async fn delete_expired_messages(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM messages WHERE received_at < ?1 AND mailbox_id NOT IN
                    (SELECT id FROM mailboxes WHERE is_protected = 1)",
                params![fmt_datetime(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_expired_messages: {e}")))?;
        Ok(deleted as usize)
    }

    async fn count_protected_mailboxes(&self) -> Result<usize, DatabaseError> {
        self.count(
            "SELECT COUNT(*) FROM mailboxes WHERE is_protected = 1",
            "count_protected_mailboxes",
        )
        .await
    }

    // ── Webhooks ────────────────────────────────────────────────────

    async fn create_webhook(
        &self,
        url: &str,
        label: &str,
        email_filter: Option<&str>,
    ) -> Result<WebhookSubscription, DatabaseError> {
        let hook = WebhookSubscription {
            id: Uuid::new_v4(),
            url: url.to_string(),
            label: label.to_string(),
            email_filter: email_filter.map(str::to_string),
            is_active: true,
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO webhooks (id, url, label, email_filter, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![
                    hook.id.to_string(),
                    url,
                    label,
                    opt_text(email_filter),
                    fmt_datetime(hook.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_webhook: {e}")))?;

        Ok(hook)
    }

    async fn list_active_webhooks(&self) -> Result<Vec<WebhookSubscription>, DatabaseError> {
        self.query_webhooks(
            &format!(
                "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE is_active = 1
                 ORDER BY created_at ASC"
            ),
            "list_active_webhooks",
        )
        .await
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>, DatabaseError> {
        self.query_webhooks(
            &format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks ORDER BY created_at ASC"),
            "list_webhooks",
        )
        .await
    }

    async fn toggle_webhook(&self, id: Uuid) -> Result<Option<bool>, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE webhooks SET is_active = 1 - is_active WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("toggle_webhook: {e}")))?;
        if changed == 0 {
            return Ok(None);
        }

        let mut rows = self
            .conn()
            .query(
                "SELECT is_active FROM webhooks WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("toggle_webhook: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("toggle_webhook: {e}")))?;
        match row {
            Some(row) => {
                let active: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("toggle_webhook: {e}")))?;
                Ok(Some(active != 0))
            }
            None => Ok(None),
        }
    }

    // ── Domains ─────────────────────────────────────────────────────

    async fn add_domain(&self, domain: &str) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO domains (domain, created_at) VALUES (?1, ?2)",
                params![domain.trim().to_lowercase(), fmt_datetime(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_domain: {e}")))?;
        Ok(inserted > 0)
    }

    async fn list_domains(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT domain FROM domains ORDER BY created_at ASC, rowid ASC", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_domains: {e}")))?;

        let mut domains = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_domains: {e}")))?
        {
            domains.push(
                row.get::<String>(0)
                    .map_err(|e| DatabaseError::Query(format!("list_domains: {e}")))?,
            );
        }
        Ok(domains)
    }
}
