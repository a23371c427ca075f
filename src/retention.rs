//! Retention sweep: delete messages past their lifetime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::error::DatabaseError;
use crate::store::Database;

/// Default message lifetime.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3 * 60 * 60);

/// Default pause between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Counts reported by one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub deleted_messages: usize,
    pub protected_addresses: usize,
    pub cleaned_at: DateTime<Utc>,
}

/// Delete messages received more than `max_age` before `now`, except in
/// protected mailboxes.
pub async fn sweep(
    db: &dyn Database,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<SweepSummary, DatabaseError> {
    let max_age = chrono::Duration::from_std(max_age)
        .map_err(|e| DatabaseError::Query(format!("retention max age out of range: {e}")))?;
    let cutoff = now - max_age;

    let protected_addresses = db.count_protected_mailboxes().await?;
    let deleted_messages = db.delete_expired_messages(cutoff).await?;

    let summary = SweepSummary {
        deleted_messages,
        protected_addresses,
        cleaned_at: Utc::now(),
    };
    info!(
        deleted = summary.deleted_messages,
        protected = summary.protected_addresses,
        "Cleanup completed"
    );
    Ok(summary)
}

/// Spawn a background task that sweeps on a fixed interval.
pub fn spawn_retention_task(
    db: Arc<dyn Database>,
    every: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = sweep(db.as_ref(), Utc::now(), max_age).await {
                error!(error = %e, "Retention sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LibSqlBackend, NewMessage};
    use uuid::Uuid;

    fn message(mailbox_id: Uuid, received_at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            mailbox_id,
            from_address: "a@x.test".into(),
            from_name: None,
            subject: "s".into(),
            body_text: Some("t".into()),
            body_html: None,
            attachments: Vec::new(),
            message_id: None,
            received_at,
        }
    }

    #[tokio::test]
    async fn sweep_skips_protected_and_fresh_messages() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let open = db.create_mailbox("open@t.test", "t1", false).await.unwrap();
        let vip = db.create_mailbox("vip@t.test", "t2", true).await.unwrap();

        let now = Utc::now();
        let stale = now - chrono::Duration::hours(3) - chrono::Duration::minutes(1);
        db.insert_message(&message(open.id, stale)).await.unwrap();
        db.insert_message(&message(open.id, stale)).await.unwrap();
        db.insert_message(&message(vip.id, stale)).await.unwrap();
        db.insert_message(&message(open.id, now - chrono::Duration::hours(2)))
            .await
            .unwrap();

        let summary = sweep(&db, now, DEFAULT_MAX_AGE).await.unwrap();
        assert_eq!(summary.deleted_messages, 2);
        assert_eq!(summary.protected_addresses, 1);
        assert_eq!(db.count_messages().await.unwrap(), 2);

        let again = sweep(&db, now, DEFAULT_MAX_AGE).await.unwrap();
        assert_eq!(again.deleted_messages, 0);
    }

    #[tokio::test]
    async fn summary_serializes_snake_case_fields() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let summary = sweep(&db, Utc::now(), DEFAULT_MAX_AGE).await.unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["deleted_messages"], 0);
        assert_eq!(json["protected_addresses"], 0);
        assert!(json["cleaned_at"].is_string());
    }

    #[tokio::test]
    async fn background_task_sweeps() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mb = db.create_mailbox("a@t.test", "t", false).await.unwrap();
        db.insert_message(&message(mb.id, Utc::now() - chrono::Duration::hours(5)))
            .await
            .unwrap();

        let handle = spawn_retention_task(db.clone(), Duration::from_millis(20), DEFAULT_MAX_AGE);
        for _ in 0..50 {
            if db.count_messages().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert_eq!(db.count_messages().await.unwrap(), 0);
    }
}
