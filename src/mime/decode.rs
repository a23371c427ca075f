//! Byte-level transcoders: quoted-printable, base64, mojibake repair.
//!
//! None of these fail outward. A decode problem degrades to the best
//! readable text available, usually the input itself.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// A part's `Content-Transfer-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    QuotedPrintable,
    Base64,
    /// 7bit, 8bit, binary, or anything unrecognised: passed through.
    Other,
}

impl TransferEncoding {
    /// Parse a header value (`quoted-printable`, `BASE64`, ...).
    pub fn from_header(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("quoted-printable") {
            Self::QuotedPrintable
        } else if value.eq_ignore_ascii_case("base64") {
            Self::Base64
        } else {
            Self::Other
        }
    }

    /// Decode `content` according to this encoding.
    pub fn decode(self, content: &str) -> String {
        match self {
            Self::QuotedPrintable => decode_quoted_printable(content),
            Self::Base64 => decode_base64(content),
            Self::Other => content.to_string(),
        }
    }
}

/// Decode quoted-printable text.
///
/// Soft line breaks are joined first, then `=XX` escapes become raw bytes and
/// everything else passes through byte-for-byte. The byte buffer is decoded as
/// UTF-8 at the end, so a character split over several escapes
/// (`=C3=A9`) comes out whole. Invalid sequences become U+FFFD.
pub fn decode_quoted_printable(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let joined = input.replace("=\r\n", "").replace("=\n", "");
    let src = joined.as_bytes();
    let mut bytes = Vec::with_capacity(src.len());

    let mut i = 0;
    while i < src.len() {
        if src[i] == b'='
            && i + 2 < src.len()
            && let (Some(hi), Some(lo)) = (hex_value(src[i + 1]), hex_value(src[i + 2]))
        {
            bytes.push(hi << 4 | lo);
            i += 3;
            continue;
        }
        bytes.push(src[i]);
        i += 1;
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode base64 text to UTF-8. Returns the input unchanged when the payload
/// is not valid base64 or the decoded bytes are not valid UTF-8.
pub fn decode_base64(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let cleaned: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let Ok(bytes) = STANDARD.decode(cleaned.as_bytes()) else {
        return input.to_string();
    };

    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => input.to_string(),
    }
}

/// True when a Latin-1 supplement letter (U+00C0..U+00FF) is directly
/// followed by a C1/continuation-range char (U+0080..U+00BF), the signature
/// of UTF-8 bytes read as Latin-1.
pub fn has_mojibake(input: &str) -> bool {
    let mut prev: Option<char> = None;
    for c in input.chars() {
        if let Some(p) = prev
            && ('\u{C0}'..='\u{FF}').contains(&p)
            && ('\u{80}'..='\u{BF}').contains(&c)
        {
            return true;
        }
        prev = Some(c);
    }
    false
}

/// Repair UTF-8 text that was mis-decoded as Latin-1.
///
/// Each char's low byte is reinterpreted and the result strictly re-decoded.
/// All or nothing: on any decode failure the input is returned unchanged.
pub fn fix_mojibake(input: &str) -> String {
    if !has_mojibake(input) {
        return input.to_string();
    }

    let bytes: Vec<u8> = input.chars().map(|c| (c as u32 & 0xFF) as u8).collect();
    match String::from_utf8(bytes) {
        Ok(fixed) => fixed,
        Err(_) => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── quoted-printable ────────────────────────────────────────

    #[test]
    fn qp_multibyte_split_across_escapes() {
        assert_eq!(decode_quoted_printable("Caf=C3=A9"), "Café");
    }

    #[test]
    fn qp_three_byte_sequence() {
        // U+20AC EURO SIGN
        assert_eq!(decode_quoted_printable("=E2=82=AC 5"), "€ 5");
    }

    #[test]
    fn qp_soft_line_breaks_joined() {
        assert_eq!(decode_quoted_printable("Hello =\nWorld"), "Hello World");
        assert_eq!(decode_quoted_printable("Hello =\r\nWorld"), "Hello World");
    }

    #[test]
    fn qp_soft_break_inside_escape_run() {
        assert_eq!(decode_quoted_printable("Caf=C3=\n=A9"), "Café");
    }

    #[test]
    fn qp_equals_sign_escape() {
        assert_eq!(
            decode_quoted_printable(r#"<a href=3D"https://x.test">"#),
            r#"<a href="https://x.test">"#
        );
    }

    #[test]
    fn qp_non_hex_sequence_is_literal() {
        assert_eq!(decode_quoted_printable("a=ZZb"), "a=ZZb");
        assert_eq!(decode_quoted_printable("50% =G1"), "50% =G1");
    }

    #[test]
    fn qp_trailing_equals_is_literal() {
        assert_eq!(decode_quoted_printable("end="), "end=");
        assert_eq!(decode_quoted_printable("end=4"), "end=4");
    }

    #[test]
    fn qp_lowercase_hex_accepted() {
        assert_eq!(decode_quoted_printable("caf=c3=a9"), "café");
    }

    #[test]
    fn qp_passes_through_existing_unicode() {
        assert_eq!(decode_quoted_printable("déjà vu"), "déjà vu");
    }

    #[test]
    fn qp_stable_on_decoded_text() {
        let samples = [
            "plain ascii text",
            "Café au lait, déjà vu",
            "line one\nline two\n",
            "a = b; c == d",
            "",
        ];
        for s in samples {
            let once = decode_quoted_printable(s);
            assert_eq!(once, s);
            assert_eq!(decode_quoted_printable(&once), once);
        }
    }

    #[test]
    fn qp_invalid_utf8_replaced() {
        assert_eq!(decode_quoted_printable("bad=FFbyte"), "bad\u{FFFD}byte");
    }

    // ── base64 ──────────────────────────────────────────────────

    #[test]
    fn base64_decodes_utf8() {
        // "Café ☕"
        assert_eq!(decode_base64("Q2Fmw6kg4piV"), "Café ☕");
    }

    #[test]
    fn base64_ignores_line_breaks() {
        assert_eq!(decode_base64("SGVsbG8s\r\nIFdvcmxk\nIQ=="), "Hello, World!");
    }

    #[test]
    fn base64_invalid_returns_input() {
        assert_eq!(decode_base64("not base64 !!"), "not base64 !!");
    }

    #[test]
    fn base64_non_utf8_returns_input() {
        // 0xFF 0xFE 0xFD
        assert_eq!(decode_base64("//79"), "//79");
    }

    #[test]
    fn base64_empty() {
        assert_eq!(decode_base64(""), "");
    }

    // ── transfer encoding ───────────────────────────────────────

    #[test]
    fn transfer_encoding_from_header() {
        assert_eq!(
            TransferEncoding::from_header("Quoted-Printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::from_header(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(TransferEncoding::from_header("7bit"), TransferEncoding::Other);
        assert_eq!(TransferEncoding::from_header("8bit"), TransferEncoding::Other);
        assert_eq!(TransferEncoding::from_header(""), TransferEncoding::Other);
    }

    #[test]
    fn transfer_encoding_other_passes_through() {
        assert_eq!(TransferEncoding::Other.decode("=C3=A9"), "=C3=A9");
    }

    // ── mojibake ────────────────────────────────────────────────

    #[test]
    fn mojibake_repaired() {
        // "Café" UTF-8 bytes read as Latin-1
        assert_eq!(fix_mojibake("CafÃ©"), "Café");
        assert_eq!(fix_mojibake("â\u{80}\u{99}"), "\u{2019}");
    }

    #[test]
    fn mojibake_fast_path_no_op() {
        let samples = ["hello", "Café", "naïve résumé", "日本語", "", "Ã alone"];
        for s in samples {
            assert!(!has_mojibake(s));
            assert_eq!(fix_mojibake(s), s);
        }
    }

    #[test]
    fn mojibake_invalid_repair_returns_input() {
        // Pattern present but the full byte sequence is not valid UTF-8
        let input = "Ã© and ÿ";
        assert!(has_mojibake(input));
        assert_eq!(fix_mojibake(input), input);
    }

    #[test]
    fn mojibake_never_partial() {
        // First pair repairable, trailing lone continuation breaks it
        let input = "Ã©\u{A9}";
        assert_eq!(fix_mojibake(input), input);
    }
}
