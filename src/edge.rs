//! Mail-edge forwarder: raw RFC-822 message in, JSON envelope POSTed out.
//!
//! Runs behind the MTA. Once the MTA has handed a message over, nothing here
//! may cause a bounce: downstream failures are logged and reported, and the
//! caller still acknowledges the message.

use mail_parser::{MessageParser, MimeHeaders, PartType};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::EdgeConfig;
use crate::error::ForwardError;
use crate::ingest::types::{AttachmentMeta, DEFAULT_SUBJECT};

/// JSON body sent to the ingestion webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeEnvelope {
    pub to: String,
    pub from: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    #[serde(rename = "messageId")]
    pub message_id: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
}

/// Parse a raw message into an envelope.
///
/// `smtp_to` is the recipient, falling back to the first `To` header address
/// when empty. `smtp_from` is used only when the message has no parsable
/// `From` address. Unparsable input still yields an envelope with the SMTP
/// addresses and no body.
pub fn build_envelope(raw: &[u8], smtp_to: &str, smtp_from: &str) -> EdgeEnvelope {
    let Some(message) = MessageParser::default().parse(raw) else {
        warn!(len = raw.len(), "Could not parse raw message, forwarding envelope only");
        return EdgeEnvelope {
            to: smtp_to.to_string(),
            from: smtp_from.to_string(),
            from_name: None,
            subject: DEFAULT_SUBJECT.to_string(),
            body_text: None,
            body_html: None,
            message_id: None,
            attachments: Vec::new(),
        };
    };

    let sender = message.from().and_then(|addr| addr.first());

    // mail-parser synthesises text from HTML and vice versa; only keep
    // bodies that were actually sent.
    let body_text = message.text_part(0).and_then(|part| match &part.body {
        PartType::Text(text) if !text.is_empty() => Some(text.to_string()),
        _ => None,
    });
    let body_html = message.html_part(0).and_then(|part| match &part.body {
        PartType::Html(html) if !html.is_empty() => Some(html.to_string()),
        _ => None,
    });

    let attachments = message
        .attachments()
        .map(|att| AttachmentMeta {
            filename: att
                .attachment_name()
                .filter(|n| !n.is_empty())
                .unwrap_or("attachment")
                .to_string(),
            mime_type: att.content_type().map_or_else(
                || "application/octet-stream".to_string(),
                |ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                },
            ),
            size: att.len() as u64,
        })
        .collect();

    let to = if smtp_to.trim().is_empty() {
        message
            .to()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .unwrap_or_default()
            .to_string()
    } else {
        smtp_to.trim().to_string()
    };

    EdgeEnvelope {
        to,
        from: sender
            .and_then(|a| a.address())
            .filter(|a| !a.is_empty())
            .unwrap_or(smtp_from)
            .to_string(),
        from_name: sender
            .and_then(|a| a.name())
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        subject: message
            .subject()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string(),
        body_text,
        body_html,
        message_id: message.message_id().map(str::to_string),
        attachments,
    }
}

/// Outcome of one forward, for logging and the exit path.
#[derive(Debug, Default)]
pub struct ForwardReport {
    /// POSTs made: 1, or 2 when a 5xx was retried.
    pub attempts: u8,
    /// Status of the last response, if any arrived.
    pub status: Option<u16>,
    pub delivered: bool,
    pub error: Option<ForwardError>,
}

/// POSTs envelopes to the ingestion webhook.
pub struct EdgeForwarder {
    client: reqwest::Client,
    config: EdgeConfig,
}

impl EdgeForwarder {
    pub fn new(config: EdgeConfig) -> Result<Self, ForwardError> {
        if config.webhook_url.trim().is_empty() {
            return Err(ForwardError::MissingWebhookUrl);
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ForwardError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Parse and forward one message. Never fails; see the report.
    pub async fn forward(&self, raw: &[u8], smtp_to: &str, smtp_from: &str) -> ForwardReport {
        info!(from = smtp_from, to = smtp_to, "Incoming email");
        let envelope = build_envelope(raw, smtp_to, smtp_from);
        self.send(&envelope).await
    }

    /// POST an envelope, retrying exactly once on a 5xx response.
    pub async fn send(&self, envelope: &EdgeEnvelope) -> ForwardReport {
        let mut report = ForwardReport::default();

        let first = self.post(envelope).await;
        report.attempts = 1;
        let outcome = match first {
            Err(ForwardError::Status { status, body }) if is_server_error(status) => {
                warn!(status, body = %body, "Webhook failed, retrying");
                report.attempts = 2;
                self.post(envelope).await
            }
            other => other,
        };

        match outcome {
            Ok(status) => {
                info!(status, attempts = report.attempts, "Email forwarded");
                report.status = Some(status);
                report.delivered = true;
            }
            Err(e) => {
                error!(error = %e, attempts = report.attempts, "Email forward failed");
                if let ForwardError::Status { status, .. } = &e {
                    report.status = Some(*status);
                }
                report.error = Some(e);
            }
        }
        report
    }

    async fn post(&self, envelope: &EdgeEnvelope) -> Result<u16, ForwardError> {
        let mut request = self.client.post(&self.config.webhook_url).json(envelope);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(secret) = &self.config.webhook_secret {
            request = request.header("x-webhook-secret", secret.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ForwardError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ForwardError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn is_server_error(status: u16) -> bool {
    StatusCode::from_u16(status).is_ok_and(|s| s.is_server_error())
}
