//! Persistence layer: libSQL-backed storage for mailboxes, messages and webhooks.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, InboxMessage, MailboxRecord, MessageRecord, NewMessage, WebhookSubscription,
};
