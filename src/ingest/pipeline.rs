//! Delivery pipeline: normalize, deduplicate, resolve recipient, persist, fan out.
//!
//! Persistence is the success contract. Fan-out runs on its own task after
//! the insert and cannot change the outcome.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{DatabaseError, IngestError};
use crate::store::{Database, NewMessage};

use super::fanout::{DEFAULT_BODY_LIMIT, FanOutReport, NewEmailEvent, WebhookFanOut};
use super::normalize::normalize;
use super::types::{DEFAULT_SUBJECT, Delivery, DeliveryOutcome, DeliveryState, Envelope};

/// Ingestion entry point shared by the HTTP layer.
#[derive(Clone)]
pub struct DeliveryPipeline {
    db: Arc<dyn Database>,
    fanout: WebhookFanOut,
    body_limit: usize,
}

impl DeliveryPipeline {
    pub fn new(db: Arc<dyn Database>, fanout: WebhookFanOut) -> Self {
        Self {
            db,
            fanout,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Cap on body characters sent to webhooks.
    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    /// Deliver a raw upstream payload.
    pub async fn deliver(&self, payload: &Value) -> Result<Delivery, IngestError> {
        transition(DeliveryState::Received, None);

        let envelope = match normalize(payload) {
            Ok(env) => env,
            Err(e) => {
                warn!(state = %DeliveryState::Rejected, error = %e, "Delivery rejected");
                return Err(e);
            }
        };
        self.deliver_envelope(envelope).await
    }

    /// Deliver an already-normalized envelope.
    pub async fn deliver_envelope(&self, envelope: Envelope) -> Result<Delivery, IngestError> {
        let recipient = envelope.to.trim().to_lowercase();
        transition(DeliveryState::Normalized, Some(&recipient));

        if let Some(message_id) = envelope.message_id.as_deref()
            && self.db.get_message_by_message_id(message_id).await?.is_some()
        {
            return Ok(duplicate(message_id));
        }

        let Some(mailbox) = self.db.get_mailbox_by_address(&recipient).await? else {
            warn!(
                state = %DeliveryState::Rejected,
                to = %recipient,
                "Recipient email not found"
            );
            return Err(IngestError::RecipientNotFound { address: recipient });
        };

        let subject = if envelope.subject.is_empty() {
            DEFAULT_SUBJECT.to_string()
        } else {
            envelope.subject
        };

        let new_message = NewMessage {
            mailbox_id: mailbox.id,
            from_address: envelope.from,
            from_name: envelope.from_name,
            subject,
            body_text: envelope.body_text,
            body_html: envelope.body_html,
            attachments: envelope.attachments,
            message_id: envelope.message_id,
            received_at: Utc::now(),
        };

        let stored = match self.db.insert_message(&new_message).await {
            Ok(stored) => stored,
            // Lost a race against a concurrent delivery of the same message.
            Err(DatabaseError::Constraint(_)) if new_message.message_id.is_some() => {
                return Ok(duplicate(new_message.message_id.as_deref().unwrap_or_default()));
            }
            Err(e) => return Err(IngestError::Store(e)),
        };
        info!(
            state = %DeliveryState::Persisted,
            email_id = %stored.id,
            to = %recipient,
            "Email saved"
        );

        let event = NewEmailEvent::new(
            &recipient,
            &stored.from_address,
            stored.from_name.as_deref(),
            &stored.subject,
            stored.body_text.as_deref(),
            stored.received_at,
            self.body_limit,
        );
        let fan_out = tokio::spawn(fan_out(self.db.clone(), self.fanout.clone(), event));

        transition(DeliveryState::Done, Some(&recipient));
        Ok(Delivery {
            outcome: DeliveryOutcome::Stored { email_id: stored.id },
            fan_out: Some(fan_out),
        })
    }
}

async fn fan_out(db: Arc<dyn Database>, fanout: WebhookFanOut, event: NewEmailEvent) -> FanOutReport {
    let subs = match db.list_active_webhooks().await {
        Ok(subs) => subs,
        Err(e) => {
            warn!(error = %e, "Webhook dispatch error (non-fatal)");
            return FanOutReport::default();
        }
    };

    let report = fanout.dispatch(&subs, &event).await;
    transition(DeliveryState::FannedOut, Some(&event.to));
    report
}

fn duplicate(message_id: &str) -> Delivery {
    info!(
        state = %DeliveryState::Deduplicated,
        message_id = %message_id,
        "Duplicate email detected, skipping"
    );
    Delivery {
        outcome: DeliveryOutcome::Duplicate {
            message_id: message_id.to_string(),
        },
        fan_out: None,
    }
}

fn transition(state: DeliveryState, to: Option<&str>) {
    debug!(state = %state, to = to.unwrap_or_default(), "Delivery state");
}
