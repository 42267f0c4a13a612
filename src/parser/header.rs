//! RFC 5322 header blocks: splitting, encoded-words (RFC 2047) and charsets.

use base64::Engine;
use tracing::warn;

use crate::model::mime::Headers;

/// Split a raw header block into a [`Headers`] list.
///
/// Values keep their folding (continuation lines stay attached with their
/// original line breaks), so an untouched header serializes unchanged.
/// Lines that are neither a `name: value` field nor a continuation are
/// skipped.
pub fn parse_header_block(raw: &[u8]) -> Headers {
    let text = decode_header_bytes(raw);
    let mut entries: Vec<(String, String)> = Vec::new();

    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\r', '\n']);
        if content.is_empty() {
            // End of the header block.
            break;
        }
        if content.starts_with(' ') || content.starts_with('\t') {
            if let Some(last) = entries.last_mut() {
                last.1.push_str("\r\n");
                last.1.push_str(content);
            }
        } else if let Some(colon_pos) = content.find(':') {
            let name = content[..colon_pos].trim();
            if name.is_empty() || name.contains(' ') {
                continue;
            }
            let value = content[colon_pos + 1..].trim_start().to_string();
            entries.push((name.to_string(), value));
        }
    }

    entries.into_iter().collect()
}

/// Header bytes as text: UTF-8 when valid, otherwise Windows-1252, which
/// maps every byte.
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// `=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=` becomes `Hola mundo`.
/// Malformed words are kept as they are.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !(after_word && before.trim().is_empty()) {
            out.push_str(before);
        }
        match decode_word(&candidate[2..]) {
            Some((text, used)) => {
                out.push_str(&text);
                rest = &candidate[2 + used..];
                after_word = true;
            }
            None => {
                out.push_str("=?");
                rest = &candidate[2..];
                after_word = false;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode `charset?enc?text?=` (the leading `=?` already consumed).
/// Returns the text and the number of bytes used.
fn decode_word(s: &str) -> Option<(String, usize)> {
    let mut fields = s.splitn(3, '?');
    let charset = fields.next()?;
    let encoding = fields.next()?;
    let tail = fields.next()?;
    let end = tail.find("?=")?;
    let payload = &tail[..end];
    let used = s.len() - tail.len() + end + 2;
    // Language suffix (RFC 2231): charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = if encoding.eq_ignore_ascii_case("b") {
        base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?
    } else if encoding.eq_ignore_ascii_case("q") {
        decode_q(payload)
    } else {
        return None;
    };

    Some((decode_charset(charset, &bytes), used))
}

/// RFC 2047 Q encoding: `_` is a space, `=XX` a hex byte.
fn decode_q(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = bytes
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match (bytes[i], hex) {
            (b'=', Some(byte)) => {
                out.push(byte);
                i += 3;
            }
            (b'_', _) => {
                out.push(b' ');
                i += 1;
            }
            (b, _) => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Decode `bytes` in the named charset. Unknown charsets decode as lossy
/// UTF-8.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match encoding_rs::Encoding::for_label(charset.trim().as_bytes()) {
        Some(encoding) if encoding != encoding_rs::UTF_8 => encoding.decode(bytes).0.into_owned(),
        Some(_) => String::from_utf8_lossy(bytes).into_owned(),
        None => {
            warn!(charset, "Unknown charset, decoding as UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
