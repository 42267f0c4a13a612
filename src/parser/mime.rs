//! MIME parsing: raw bytes into a [`Message`] tree, transfer decoding, HTML-to-text.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{MessageParser, PartType};
use tracing::debug;

use crate::error::{MimeError, Result};
use crate::model::mime::{BodyPart, Headers, LeafContent, Message, MimeNode, Multipart};
use crate::parser::header::parse_header_block;
use crate::visitor::DEFAULT_MAX_DEPTH;

/// Lenient base64 used for bodies: accepts missing padding and trailing bits.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Parse a complete raw message (headers + body) into a [`Message`] tree.
///
/// `mail-parser` supplies the structure; headers and bodies are taken
/// verbatim from the offsets it reports, so every node keeps its original
/// encoding until something changes it. Nesting is capped at
/// [`DEFAULT_MAX_DEPTH`]; see [`parse_message_with_depth`].
pub fn parse_message(raw: &[u8]) -> Result<Message> {
    parse_message_with_depth(raw, DEFAULT_MAX_DEPTH)
}

/// Parse with an explicit nesting cap.
///
/// Depth is counted the way the visitor counts it. Multiparts and embedded
/// messages at or beyond `max_depth` are kept as opaque leaves holding their
/// raw body, so the serialized output is unchanged and the tree never gets
/// deeper than a traversal could reach.
pub fn parse_message_with_depth(raw: &[u8], max_depth: usize) -> Result<Message> {
    let parser = MessageParser::default();
    let parsed = parser
        .parse(raw)
        .ok_or_else(|| MimeError::Parse("input is not an RFC 822 message".into()))?;
    let builder = TreeBuilder { max_depth };
    Ok(builder.message(&parsed, 0)?.with_raw(raw.to_vec()))
}

struct TreeBuilder {
    max_depth: usize,
}

impl TreeBuilder {
    /// Build from a message `mail-parser` has already parsed. Part offsets
    /// are relative to that message's own `raw_message`.
    fn message(&self, msg: &mail_parser::Message<'_>, depth: usize) -> Result<Message> {
        let raw: &[u8] = &msg.raw_message;
        let root = msg
            .parts
            .first()
            .ok_or_else(|| MimeError::Parse("message has no root part".into()))?;

        let headers = parse_header_block(slice(
            raw,
            root.raw_header_offset(),
            root.raw_body_offset(),
        ));
        let (message_headers, content_headers) = headers.split_content();
        let content = self.node(msg, 0, content_headers, depth)?;

        Ok(Message::new(message_headers, content))
    }

    fn node(
        &self,
        msg: &mail_parser::Message<'_>,
        part_id: usize,
        headers: Headers,
        depth: usize,
    ) -> Result<MimeNode> {
        let raw: &[u8] = &msg.raw_message;
        let part = msg
            .parts
            .get(part_id)
            .ok_or_else(|| MimeError::Parse(format!("dangling part reference {part_id}")))?;
        let body = slice(raw, part.raw_body_offset(), part.raw_end_offset());

        match &part.body {
            PartType::Multipart(_) if depth >= self.max_depth => {
                debug!(depth, "Maximum MIME nesting reached, keeping multipart opaque");
                Ok(opaque(headers, body))
            }
            PartType::Multipart(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for &child_id in children {
                    let Some(child) = msg.parts.get(child_id) else {
                        debug!(child_id, "Skipping dangling multipart child");
                        continue;
                    };
                    let child_headers = parse_header_block(slice(
                        raw,
                        child.raw_header_offset(),
                        child.raw_body_offset(),
                    ));
                    parts.push(self.node(msg, child_id, child_headers, depth + 1)?);
                }
                let mut multipart = Multipart::from_parsed(headers, parts, body.to_vec());
                if !has_closing_delimiter(&multipart) {
                    // Regenerate from the children rather than write a truncated body.
                    multipart.refresh();
                }
                Ok(MimeNode::Multipart(multipart))
            }
            PartType::Message(inner) => {
                let cte = headers.get("Content-Transfer-Encoding");
                let decoded = transfer_decode(cte.as_deref(), body);
                let content = if depth + 1 >= self.max_depth {
                    debug!(depth, "Maximum MIME nesting reached, keeping message opaque");
                    LeafContent::Bytes(decoded)
                } else {
                    match self.message(inner, depth + 1) {
                        Ok(embedded) => LeafContent::Message(Box::new(embedded.with_raw(decoded))),
                        Err(e) => {
                            debug!(error = %e, "Embedded message unparseable, keeping bytes");
                            LeafContent::Bytes(decoded)
                        }
                    }
                };
                Ok(MimeNode::Leaf(BodyPart::from_parsed(
                    headers,
                    content,
                    body.to_vec(),
                )))
            }
            PartType::Text(_)
            | PartType::Html(_)
            | PartType::Binary(_)
            | PartType::InlineBinary(_) => {
                let cte = headers.get("Content-Transfer-Encoding");
                let decoded = transfer_decode(cte.as_deref(), body);
                Ok(MimeNode::Leaf(BodyPart::from_parsed(
                    headers,
                    LeafContent::Bytes(decoded),
                    body.to_vec(),
                )))
            }
        }
    }
}

/// A subtree kept as undecoded bytes under its original headers.
fn opaque(headers: Headers, body: &[u8]) -> MimeNode {
    MimeNode::Leaf(BodyPart::from_parsed(
        headers,
        LeafContent::Bytes(body.to_vec()),
        body.to_vec(),
    ))
}

/// Whether the cached body of `mp` ends with its `--boundary--` line.
fn has_closing_delimiter(mp: &Multipart) -> bool {
    let (Some(raw), Some(boundary)) = (mp.raw(), mp.boundary()) else {
        return false;
    };
    let closing = format!("--{boundary}--");
    let trimmed = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(&raw[..0], |end| &raw[..=end]);
    trimmed.ends_with(closing.as_bytes())
}

/// Bounds-checked sub-slice; inverted or out-of-range offsets yield an empty slice.
fn slice(raw: &[u8], start: usize, end: usize) -> &[u8] {
    let end = end.min(raw.len());
    let start = start.min(end);
    &raw[start..end]
}

/// Undo a `Content-Transfer-Encoding`.
///
/// An undecodable body is passed through unchanged rather than failing the
/// whole message.
pub fn transfer_decode(encoding: Option<&str>, body: &[u8]) -> Vec<u8> {
    match encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
        Some("base64") => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            match LENIENT_BASE64.decode(&compact) {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!(error = %e, "Invalid base64 body, keeping raw bytes");
                    body.to_vec()
                }
            }
        }
        Some("quoted-printable") => quoted_printable_decode(body).unwrap_or_else(|| {
            debug!("Invalid quoted-printable body, keeping raw bytes");
            body.to_vec()
        }),
        _ => body.to_vec(),
    }
}

/// Convert HTML to plain text for indexing.
///
/// - Preserves line breaks from `<br>`, `<p>`, `<div>`
/// - Removes scripts and styles
/// - Decodes common HTML entities
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();

    // Remove script and style blocks
    text = remove_tag_block(&text, "script");
    text = remove_tag_block(&text, "style");

    // Convert block elements to newlines
    for tag in &["br", "BR", "br/", "br /"] {
        text = text.replace(&format!("<{tag}>"), "\n");
    }
    for tag in &["p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6"] {
        text = text.replace(&format!("<{tag}>"), "\n");
        text = text.replace(&format!("<{tag} "), "\n<");
        let upper = tag.to_uppercase();
        text = text.replace(&format!("<{upper}>"), "\n");
        text = text.replace(&format!("</{tag}>"), "\n");
        text = text.replace(&format!("</{upper}>"), "\n");
    }

    // Strip all remaining HTML tags
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    // Decode HTML entities
    result = result.replace("&amp;", "&");
    result = result.replace("&lt;", "<");
    result = result.replace("&gt;", ">");
    result = result.replace("&quot;", "\"");
    result = result.replace("&#39;", "'");
    result = result.replace("&apos;", "'");
    result = result.replace("&nbsp;", " ");
    result = result.replace("&#160;", " ");

    // Collapse multiple blank lines into at most two
    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(result.len());
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`).
fn remove_tag_block(html: &str, tag: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    while let Some(start) = remaining.to_ascii_lowercase().find(&open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        if let Some(end) = after.to_ascii_lowercase().find(&close) {
            remaining = &after[end + close.len()..];
        } else {
            // No closing tag, drop the rest
            remaining = "";
            break;
        }
    }
    result.push_str(remaining);
    result
}
