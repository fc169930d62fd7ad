//! Plain text and markdown.

/// Decode as UTF-8, replacing invalid sequences instead of failing.
pub(super) fn extract_plain_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
