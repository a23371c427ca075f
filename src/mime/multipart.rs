//! Recursive multipart walker.
//!
//! Finds the best `text/plain` and `text/html` bodies in an arbitrarily
//! nested MIME tree (alternative inside mixed inside related, ...).

use std::sync::LazyLock;

use regex::Regex;

use super::decode::TransferEncoding;
use super::{header_value, normalize_line_endings, split_headers};

/// Nesting levels walked before giving up on a branch.
pub const MAX_MIME_DEPTH: usize = 10;

static BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)boundary=["']?([^"'\s;]+)["']?"#).expect("boundary regex")
});

static TRAILING_DASHES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-+$").expect("trailing dash regex"));

/// Plain-text and HTML bodies extracted from a multipart tree.
/// Either may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyParts {
    pub text: String,
    pub html: String,
}

impl BodyParts {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.html.is_empty()
    }

    /// Fill still-empty slots from `other`.
    fn adopt(&mut self, other: BodyParts) {
        if self.text.is_empty() && !other.text.is_empty() {
            self.text = other.text;
        }
        if self.html.is_empty() && !other.html.is_empty() {
            self.html = other.html;
        }
    }
}

/// Locate the `boundary=` parameter in a header block.
pub fn find_boundary(headers: &str) -> Option<&str> {
    BOUNDARY_RE
        .captures(headers)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Walk a multipart entity (headers + body) and extract its text bodies.
///
/// Content without a `boundary=` parameter is a leaf and yields an empty
/// result; callers handle single-part bodies themselves. At each level the
/// first matching part wins, later duplicates are ignored.
pub fn parse_multipart(content: &str) -> BodyParts {
    let normalized = normalize_line_endings(content);
    walk(&normalized, 0)
}

fn walk(content: &str, depth: usize) -> BodyParts {
    let mut found = BodyParts::default();
    if depth >= MAX_MIME_DEPTH {
        tracing::debug!(depth, "MIME nesting limit reached, skipping branch");
        return found;
    }

    let (headers, _) = split_headers(content.trim_start());
    let Some(boundary) = find_boundary(headers) else {
        return found;
    };
    let delimiter = format!("--{boundary}");

    // The first chunk is the entity's own headers plus preamble.
    for chunk in content.split(delimiter.as_str()).skip(1) {
        let part = chunk.trim();
        if part.is_empty() || part.starts_with("--") {
            continue;
        }

        let (part_headers, part_body) = split_headers(part);
        let content_type = header_value(part_headers, "Content-Type")
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        if content_type.contains("multipart/") {
            found.adopt(walk(part, depth + 1));
            continue;
        }

        let encoding = header_value(part_headers, "Content-Transfer-Encoding")
            .and_then(|v| v.split_whitespace().next())
            .map(TransferEncoding::from_header)
            .unwrap_or(TransferEncoding::Other);

        let body = TRAILING_DASHES_RE.replace(part_body.trim(), "");
        let decoded = encoding.decode(body.trim());

        if content_type.contains("text/plain") {
            if found.text.is_empty() {
                found.text = decoded;
            }
        } else if content_type.contains("text/html") && found.html.is_empty() {
            found.html = decoded;
        }
    }

    found
}
