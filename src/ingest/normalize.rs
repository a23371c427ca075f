//! Upstream payload normalization.
//!
//! Two payload families reach the webhook: the mail-edge forwarder's flat
//! shape (`to`, `from`, `from_name`, `body_text`, `body_html`) and
//! forwarding services that send `to`/`from` as address objects or lists and
//! bodies as `text`/`html`. Both collapse into one [`Envelope`] by trying
//! field names in priority order.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::IngestError;
use crate::mime::{decode_quoted_printable, looks_like_raw_email, parse_raw_email};

use super::types::{AttachmentMeta, DEFAULT_SUBJECT, Envelope};

const MESSAGE_ID_KEYS: [&str; 4] = ["messageId", "message-id", "Message-ID", "message_id"];

const DEFAULT_ATTACHMENT_NAME: &str = "attachment";
const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

/// Normalize an upstream payload into an [`Envelope`].
///
/// The only failure is a missing recipient or sender. Everything else is
/// best-effort.
pub fn normalize(payload: &Value) -> Result<Envelope, IngestError> {
    let empty = Map::new();
    let obj = payload.as_object().unwrap_or(&empty);

    let to = obj.get("to").map(resolve_address).unwrap_or_default();

    let mut from_name = non_empty_str(obj.get("from_name"));
    let from = match obj.get("from") {
        Some(Value::Array(items)) => {
            from_name = items.first().and_then(|s| non_empty_str(s.get("name")));
            items.first().map(resolve_single).unwrap_or_default()
        }
        Some(v @ Value::Object(sender)) => {
            from_name = non_empty_str(sender.get("name"));
            resolve_single(v)
        }
        Some(v) => resolve_single(v),
        None => String::new(),
    };

    if to.is_empty() || from.is_empty() {
        debug!(to = %to, from = %from, "Payload missing recipient or sender");
        let mut received: Vec<String> = obj.keys().cloned().collect();
        received.sort();
        return Err(IngestError::MissingRecipientOrSender { received });
    }

    let mut envelope = Envelope {
        to,
        from,
        from_name,
        subject: obj
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
        body_text: non_empty_str(obj.get("body_text")).or_else(|| non_empty_str(obj.get("text"))),
        body_html: non_empty_str(obj.get("body_html")).or_else(|| non_empty_str(obj.get("html"))),
        attachments: obj.get("attachments").map(parse_attachments).unwrap_or_default(),
        message_id: MESSAGE_ID_KEYS
            .iter()
            .find_map(|key| non_empty_str(obj.get(*key)))
            .map(|id| id.trim().to_string()),
    };

    rescue_raw_email(&mut envelope);
    redecode_residual_qp(&mut envelope);

    Ok(envelope)
}

/// Resolve `to`: first list element, or an object's `address`/`text`, or the string.
fn resolve_address(value: &Value) -> String {
    match value {
        Value::Array(items) => items.first().map(resolve_single).unwrap_or_default(),
        other => resolve_single(other),
    }
}

fn resolve_single(value: &Value) -> String {
    let found = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("address")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| map.get("text").and_then(Value::as_str)),
        _ => None,
    };
    found.map(str::trim).unwrap_or_default().to_string()
}

/// A string field, with empty strings treated as absent.
fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn parse_attachments(value: &Value) -> Vec<AttachmentMeta> {
    let Value::Array(items) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let entry = item.as_object()?;
            Some(AttachmentMeta {
                filename: non_empty_str(entry.get("filename"))
                    .unwrap_or_else(|| DEFAULT_ATTACHMENT_NAME.to_string()),
                mime_type: non_empty_str(entry.get("mimeType"))
                    .or_else(|| non_empty_str(entry.get("contentType")))
                    .unwrap_or_else(|| DEFAULT_ATTACHMENT_TYPE.to_string()),
                size: entry.get("size").and_then(Value::as_u64).unwrap_or(0),
            })
        })
        .collect()
}

/// Some providers put the whole raw message in the text field.
fn rescue_raw_email(envelope: &mut Envelope) {
    let Some(text) = envelope.body_text.as_deref() else {
        return;
    };
    if !looks_like_raw_email(text) {
        return;
    }

    debug!(len = text.len(), "Body text looks like a raw message, re-parsing");
    let parsed = parse_raw_email(text);

    if !parsed.body_text.is_empty() {
        envelope.body_text = Some(parsed.body_text);
    }
    if !parsed.body_html.is_empty() {
        envelope.body_html = Some(parsed.body_html);
    }
    if !parsed.from_name.is_empty() && envelope.from_name.is_none() {
        envelope.from_name = Some(parsed.from_name);
    }
    if !parsed.from_address.is_empty() {
        envelope.from = parsed.from_address;
    }
    if !parsed.subject.is_empty()
        && (envelope.subject.is_empty() || envelope.subject == DEFAULT_SUBJECT)
    {
        envelope.subject = parsed.subject;
    }
}

/// Decode quoted-printable left over from providers that pre-split bodies
/// without decoding them.
fn redecode_residual_qp(envelope: &mut Envelope) {
    if let Some(html) = envelope.body_html.as_mut()
        && (html.contains("=3D") || html.contains("=\n") || html.contains("=\r\n"))
    {
        *html = decode_quoted_printable(html);
    }
    if let Some(text) = envelope.body_text.as_mut()
        && (text.contains("=3D") || text.contains("=\n"))
    {
        *text = decode_quoted_printable(text);
    }
}
