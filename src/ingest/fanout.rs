//! Best-effort "new email" notification to registered webhooks.
//!
//! Every matching subscription gets one POST, all in flight at once, each
//! under its own timeout. Failures are logged and counted, never returned.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::WebhookError;
use crate::store::WebhookSubscription;

/// Default per-call timeout.
pub const DEFAULT_FANOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on `body_text` characters in the payload.
pub const DEFAULT_BODY_LIMIT: usize = 500;

/// Payload POSTed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewEmailEvent {
    pub event: &'static str,
    pub to: String,
    pub from: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub body_text: String,
    pub received_at: String,
}

impl NewEmailEvent {
    /// Build the event, lower-casing the recipient and truncating the body
    /// to `body_limit` characters.
    pub fn new(
        to: &str,
        from: &str,
        from_name: Option<&str>,
        subject: &str,
        body_text: Option<&str>,
        received_at: DateTime<Utc>,
        body_limit: usize,
    ) -> Self {
        Self {
            event: "new_email",
            to: to.to_lowercase(),
            from: from.to_string(),
            from_name: from_name.map(str::to_string),
            subject: subject.to_string(),
            body_text: body_text
                .unwrap_or_default()
                .chars()
                .take(body_limit)
                .collect(),
            received_at: received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// What happened to one fan-out round.
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Subscriptions that matched the recipient.
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<(Uuid, WebhookError)>,
}

/// Whether a subscription wants mail for `recipient`.
pub fn subscription_matches(sub: &WebhookSubscription, recipient: &str) -> bool {
    sub.is_active
        && sub
            .email_filter
            .as_deref()
            .is_none_or(|filter| filter.trim().eq_ignore_ascii_case(recipient.trim()))
}

/// Concurrent webhook dispatcher.
#[derive(Clone)]
pub struct WebhookFanOut {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookFanOut {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// POST `event` to every active subscription matching its recipient.
    pub async fn dispatch(
        &self,
        subs: &[WebhookSubscription],
        event: &NewEmailEvent,
    ) -> FanOutReport {
        let targets: Vec<&WebhookSubscription> = subs
            .iter()
            .filter(|s| subscription_matches(s, &event.to))
            .collect();

        let mut report = FanOutReport {
            attempted: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            debug!(to = %event.to, "No matching webhooks");
            return report;
        }

        let results = join_all(targets.iter().map(|sub| self.post_one(sub, event))).await;

        for (sub, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(webhook_id = %sub.id, error = %e, "Webhook delivery failed");
                    report.failures.push((sub.id, e));
                }
            }
        }

        info!(
            to = %event.to,
            attempted = report.attempted,
            delivered = report.delivered,
            "Fired webhooks"
        );
        report
    }

    async fn post_one(
        &self,
        sub: &WebhookSubscription,
        event: &NewEmailEvent,
    ) -> Result<(), WebhookError> {
        let request = self.client.post(&sub.url).json(event).send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| WebhookError::Timeout {
                url: sub.url.clone(),
                timeout: self.timeout,
            })?
            .map_err(|e| WebhookError::Request {
                url: sub.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status {
                url: sub.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

impl Default for WebhookFanOut {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT_TIMEOUT)
    }
}
