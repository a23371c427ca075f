//! MIME decoding: transfer decoders, recursive multipart walker, raw message parser.
//!
//! Deliberately lenient: nothing here returns an error. Malformed input
//! yields whatever text could be recovered.

pub mod decode;
pub mod multipart;
pub mod raw;

pub use decode::{
    TransferEncoding, decode_base64, decode_quoted_printable, fix_mojibake, has_mojibake,
};
pub use multipart::{BodyParts, MAX_MIME_DEPTH, parse_multipart};
pub use raw::{ParsedEmail, looks_like_raw_email, parse_raw_email};

/// Convert CRLF and lone CR line endings to LF.
pub fn normalize_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split a message or part at the first blank line into (headers, body).
///
/// Without a blank line the whole input is treated as headers.
pub fn split_headers(content: &str) -> (&str, &str) {
    match content.split_once("\n\n") {
        Some((headers, body)) => (headers, body),
        None => (content, ""),
    }
}

/// First occurrence of a header in a header block, case-insensitive.
///
/// Returns the unfolded first line of the value, trimmed.
pub fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}
