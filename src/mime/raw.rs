//! Raw RFC-822 message parser: From/Subject extraction plus body dispatch.

use std::sync::LazyLock;

use regex::Regex;

use super::decode::TransferEncoding;
use super::multipart::{find_boundary, parse_multipart};
use super::{header_value, normalize_line_endings, split_headers};

static FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^From:\s*(.+)$").expect("from regex"));

static SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^Subject:\s*(.+)$").expect("subject regex"));

static NAME_ADDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^["']?(.+?)["']?\s*<(.+?)>$"#).expect("name-addr regex")
});

/// Header tokens that give away a raw message pasted into a text field.
const RAW_EMAIL_MARKERS: [&str; 3] = ["Received:", "DKIM-Signature:", "Content-Type:"];

/// Fields recovered from a raw message. Empty strings mean "not found".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    pub body_text: String,
    pub body_html: String,
    pub from_name: String,
    pub from_address: String,
    pub subject: String,
}

/// Heuristic: does this text look like a whole raw message rather than a body?
pub fn looks_like_raw_email(text: &str) -> bool {
    RAW_EMAIL_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Split a `From` value into (name, address).
///
/// `"Name" <addr>` and `Name <addr>` yield both parts; anything else is taken
/// whole as the address.
pub fn parse_from_value(value: &str) -> (String, String) {
    let value = value.trim();
    match NAME_ADDR_RE.captures(value) {
        Some(caps) => (caps[1].trim().to_string(), caps[2].trim().to_string()),
        None => (String::new(), value.to_string()),
    }
}

/// Parse a complete raw message.
///
/// Encoded words (`=?UTF-8?B?...?=`) in From/Subject are not decoded.
pub fn parse_raw_email(raw: &str) -> ParsedEmail {
    let normalized = normalize_line_endings(raw);
    let (headers, body) = split_headers(&normalized);
    let mut parsed = ParsedEmail::default();

    if let Some(caps) = FROM_RE.captures(headers) {
        let (name, address) = parse_from_value(&caps[1]);
        parsed.from_name = name;
        parsed.from_address = address;
    }

    if let Some(caps) = SUBJECT_RE.captures(headers) {
        parsed.subject = caps[1].trim().to_string();
    }

    if find_boundary(headers).is_some() {
        let parts = parse_multipart(&normalized);
        parsed.body_text = parts.text;
        parsed.body_html = parts.html;
    } else {
        let encoding = header_value(headers, "Content-Transfer-Encoding")
            .and_then(|v| v.split_whitespace().next())
            .map(TransferEncoding::from_header)
            .unwrap_or(TransferEncoding::Other);
        parsed.body_text = encoding.decode(body.trim());
    }

    if parsed.body_text.is_empty() && parsed.body_html.is_empty() && !body.is_empty() {
        parsed.body_text = body.trim().to_string();
    }

    parsed
}
