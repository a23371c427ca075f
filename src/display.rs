//! Read-time formatting: inbox previews and cleaned HTML bodies.

use std::sync::LazyLock;

use regex::Regex;

use crate::mime::fix_mojibake;

/// Maximum preview length in characters.
pub const PREVIEW_LIMIT: usize = 100;

/// Returned when a message has neither usable text nor HTML.
pub const NO_PREVIEW: &str = "No preview available";

static INVISIBLES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{200B}-\u{200D}\u{2060}\u{034F}\u{FEFF}\u{00AD}]").expect("invisibles regex")
});

static QP_REMNANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=[0-9A-Fa-f]{2}").expect("qp remnant regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("multi space regex"));

static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("style regex"));

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script regex"));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));

static INTER_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("inter tag regex"));

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("blank lines regex"));

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

fn strip_noise(s: &str) -> String {
    let s = QP_REMNANT_RE.replace_all(s, "");
    let s = INVISIBLES_RE.replace_all(&s, "");
    WHITESPACE_RE.replace_all(&s, " ").trim().to_string()
}

/// One-line plain-text preview of at most [`PREVIEW_LIMIT`] characters.
///
/// Plain text wins when present and free of markup. Otherwise the HTML has
/// its style/script blocks and tags removed.
pub fn extract_text_preview(html: Option<&str>, text: Option<&str>) -> String {
    if let Some(text) = text.filter(|t| !t.is_empty() && !t.contains('<')) {
        return truncate_chars(&strip_noise(&fix_mojibake(text)), PREVIEW_LIMIT);
    }

    if let Some(html) = html.filter(|h| !h.is_empty()) {
        let stripped = STYLE_RE.replace_all(html, "");
        let stripped = SCRIPT_RE.replace_all(&stripped, "");
        let stripped = TAG_RE.replace_all(&stripped, " ");
        let stripped = stripped.replace("&nbsp;", " ");
        return truncate_chars(&strip_noise(&stripped), PREVIEW_LIMIT);
    }

    NO_PREVIEW.to_string()
}

/// Tidy HTML for sandboxed rendering without changing what is visible.
pub fn clean_html_body(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let cleaned = fix_mojibake(html);
    let cleaned = INTER_TAG_RE.replace_all(&cleaned, "><");
    let cleaned = BLANK_LINES_RE.replace_all(&cleaned, "\n");
    let cleaned = INVISIBLES_RE.replace_all(&cleaned, "");
    MULTI_SPACE_RE.replace_all(&cleaned, " ").trim().to_string()
}

/// Body to render: cleaned HTML if any, else repaired plain text.
pub fn display_body(html: Option<&str>, text: Option<&str>) -> String {
    let cleaned = html.map(clean_html_body).unwrap_or_default();
    if !cleaned.is_empty() {
        return cleaned;
    }
    fix_mojibake(text.unwrap_or_default())
}

/// `Name <address>`, or just the address when there is no name.
pub fn display_sender(name: Option<&str>, address: &str) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{name} <{address}>"),
        None => address.to_string(),
    }
}
