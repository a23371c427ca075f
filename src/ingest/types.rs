//! Envelope, attachment metadata and delivery outcome types.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::fanout::FanOutReport;

/// Subject stored when a message arrives without one.
pub const DEFAULT_SUBJECT: &str = "(No Subject)";

/// Attachment metadata. Attachment bodies are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    #[serde(rename = "mimeType", alias = "contentType")]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
}

/// One inbound message after normalization, before persistence.
///
/// `to` and `from` are non-empty whenever an `Envelope` comes out of
/// [`normalize`](super::normalize::normalize).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub to: String,
    pub from: String,
    pub from_name: Option<String>,
    /// May be empty; the default subject is applied when persisting.
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
    /// Upstream Message-ID, the idempotency key.
    pub message_id: Option<String>,
}

/// Where a delivery is in its lifecycle. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Normalized,
    Deduplicated,
    Rejected,
    Persisted,
    FannedOut,
    Done,
}

impl DeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Normalized => "normalized",
            Self::Deduplicated => "deduplicated",
            Self::Rejected => "rejected",
            Self::Persisted => "persisted",
            Self::FannedOut => "fanned_out",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful result of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A new message was persisted.
    Stored { email_id: Uuid },
    /// A message with this Message-ID already exists. Nothing was written.
    Duplicate { message_id: String },
}

/// A completed delivery plus the handle of its background fan-out, if any.
#[derive(Debug)]
pub struct Delivery {
    pub outcome: DeliveryOutcome,
    pub fan_out: Option<JoinHandle<FanOutReport>>,
}

impl Delivery {
    pub fn is_duplicate(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Duplicate { .. })
    }
}
