//! Key Encoding Module
//!
//! Maps arbitrary byte-string keys to filesystem-safe filename components.
//! The same percent-encoding is reused by the value codec for path segments
//! and leaf values.

// == Encode ==
/// Percent-encodes every byte outside `[A-Za-z0-9-_.~]` as `%xx` (lowercase hex).
///
/// Total over all byte sequences; non-ASCII bytes are escaped octet by octet.
/// Written out here because `urlencoding::encode` emits uppercase hex, and
/// record file names are lowercase.
pub fn encode(input: impl AsRef<[u8]>) -> String {
    let bytes = input.as_ref();
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&format!("{:02x}", byte));
        }
    }
    out
}

// == Decode ==
/// Reverses [`encode`], accepting upper- or lowercase hex digits.
///
/// Malformed escapes (a `%` not followed by two hex digits) pass through
/// unchanged, so decoding never fails.
pub fn decode(input: &str) -> Vec<u8> {
    urlencoding::decode_binary(input.as_bytes()).into_owned()
}

/// Decodes into a `String`, replacing invalid UTF-8 sequences.
pub fn decode_lossy(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}
