//! Extraction of uuencoded attachments from plain-text bodies.
//!
//! Older clients inline attachments as `begin 644 name` ... `end` blocks.
//! A text part holding such blocks is replaced by a `multipart/mixed` with
//! the surrounding text first and one attachment per decoded block.

use tracing::debug;

use crate::error::Result;
use crate::model::mime::{
    BodyPart, ContentType, LeafContent, Message, MimeNode, Multipart,
    CT_TEXT_PLAIN, DISPOSITION_ATTACHMENT,
};
use crate::visitor::{ConversionContext, MimeVisitor, VisitPhase, VisitorFactory, VisitorSettings};

/// Registry name of the uuencode converter.
pub const NAME: &str = "uuencode";

/// One decoded `begin` ... `end` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuBlock {
    pub filename: String,
    pub data: Vec<u8>,
}

pub struct UuencodeConverter {
    settings: VisitorSettings,
}

impl UuencodeConverter {
    pub fn new(settings: VisitorSettings) -> Self {
        Self { settings }
    }

    /// The replacement for `part`, or `None` if it holds no valid block.
    fn split(&self, part: &BodyPart) -> Option<Multipart> {
        if !matches!(part.content, LeafContent::Bytes(_))
            || part.content_type().essence() != CT_TEXT_PLAIN
            || part.disposition().as_deref() == Some(DISPOSITION_ATTACHMENT)
        {
            return None;
        }

        // Split on raw bytes so the surrounding text keeps its charset.
        let (remaining, blocks) = extract_blocks(part.bytes());
        if blocks.is_empty() {
            return None;
        }
        debug!(blocks = blocks.len(), "Found uuencoded attachments");

        let mut mixed = Multipart::new("mixed");
        if !remaining.iter().all(u8::is_ascii_whitespace) {
            let mut ctype = ContentType::new(CT_TEXT_PLAIN);
            if let Some(charset) = part.content_type().param("charset") {
                ctype.set_param("charset", charset);
            }
            mixed.add_part(MimeNode::Leaf(BodyPart::new(&ctype.to_string(), remaining)));
        }
        for block in blocks {
            mixed.add_part(MimeNode::Leaf(BodyPart::attachment(&block.filename, block.data)));
        }
        Some(mixed)
    }
}

impl MimeVisitor for UuencodeConverter {
    fn settings(&self) -> &VisitorSettings {
        &self.settings
    }

    fn visit_message(&mut self, message: &mut Message, phase: VisitPhase) -> Result<bool> {
        if phase != VisitPhase::End {
            return Ok(false);
        }
        let MimeNode::Leaf(part) = message.content.as_ref() else {
            return Ok(false);
        };
        let Some(mixed) = self.split(part) else {
            return Ok(false);
        };
        if !self.settings.check_modification() {
            return Ok(false);
        }
        message.set_content(MimeNode::Multipart(mixed));
        Ok(true)
    }

    fn visit_multipart(&mut self, multipart: &mut Multipart, phase: VisitPhase) -> Result<bool> {
        if phase != VisitPhase::End {
            return Ok(false);
        }
        let mut replaced = false;
        for index in 0..multipart.parts.len() {
            let MimeNode::Leaf(part) = &multipart.parts[index] else {
                continue;
            };
            let Some(mixed) = self.split(part) else {
                continue;
            };
            if !self.settings.check_modification() {
                continue;
            }
            multipart.remove_part(index);
            multipart.insert_part(index, MimeNode::Multipart(mixed));
            replaced = true;
        }
        Ok(replaced)
    }
}

/// Split `body` into the lines outside valid blocks and the decoded blocks.
///
/// A block without an `end` line or with an undecodable line is left in
/// the text. Lines outside blocks are copied byte for byte.
pub fn extract_blocks(body: &[u8]) -> (Vec<u8>, Vec<UuBlock>) {
    let lines: Vec<&[u8]> = body.split_inclusive(|&b| b == b'\n').collect();
    let mut remaining = Vec::with_capacity(body.len());
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(filename) = parse_begin(lines[i]) else {
            remaining.extend_from_slice(lines[i]);
            i += 1;
            continue;
        };
        match decode_block(&lines[i + 1..]) {
            Some((data, consumed)) => {
                blocks.push(UuBlock { filename, data });
                i += 1 + consumed;
            }
            None => {
                remaining.extend_from_slice(lines[i]);
                i += 1;
            }
        }
    }
    (remaining, blocks)
}

/// `begin <octal mode> <filename>`
fn parse_begin(line: &[u8]) -> Option<String> {
    let rest = line.trim_ascii_end().strip_prefix(b"begin ")?;
    let space = rest.iter().position(|&b| b == b' ')?;
    let (mode, name) = (&rest[..space], &rest[space + 1..]);
    if mode.len() < 3 || mode.len() > 4 || !mode.iter().all(|b| (b'0'..=b'7').contains(b)) {
        return None;
    }
    let name = String::from_utf8_lossy(name.trim_ascii());
    (!name.is_empty()).then(|| name.into_owned())
}

/// Decode body lines up to and including `end`. Returns the data and the
/// number of lines consumed.
fn decode_block(lines: &[&[u8]]) -> Option<(Vec<u8>, usize)> {
    let mut data = Vec::new();
    for (n, line) in lines.iter().enumerate() {
        if line.trim_ascii_end() == b"end" {
            return Some((data, n + 1));
        }
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        data.extend(decode_line(line)?);
    }
    None
}

fn decode_line(bytes: &[u8]) -> Option<Vec<u8>> {
    let Some(&first) = bytes.first() else {
        return Some(Vec::new());
    };
    if !(b' '..=b'`').contains(&first) {
        return None;
    }
    let len = usize::from((first - b' ') & 0x3F);
    if len == 0 {
        return Some(Vec::new());
    }

    let needed = len.div_ceil(3) * 4;
    let mut chars: Vec<u8> = bytes[1..].iter().take(needed).copied().collect();
    // Encoders commonly strip trailing spaces.
    chars.resize(needed, b' ');
    if chars.iter().any(|c| !(b' '..=b'`').contains(c)) {
        return None;
    }

    let mut out = Vec::with_capacity(needed / 4 * 3);
    for quad in chars.chunks(4) {
        let v: Vec<u8> = quad.iter().map(|c| (c - b' ') & 0x3F).collect();
        out.push((v[0] << 2) | (v[1] >> 4));
        out.push((v[1] << 4) | (v[2] >> 2));
        out.push((v[2] << 6) | v[3]);
    }
    out.truncate(len);
    Some(out)
}

/// Builds [`UuencodeConverter`] passes.
pub struct UuencodeConverterFactory {
    max_depth: usize,
}

impl UuencodeConverterFactory {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl VisitorFactory for UuencodeConverterFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn create(&self, ctx: &ConversionContext) -> Box<dyn MimeVisitor + Send> {
        Box::new(UuencodeConverter::new(ctx.settings(self.max_depth)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mime::Headers;

    // "Cat" uuencoded
    const BODY: &[u8] = b"See attached.\r\n\
begin 644 cat.txt\r\n\
#0V%T\r\n\
`\r\n\
end\r\n\
Bye\r\n";

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"#0V%T").unwrap(), b"Cat");
        assert_eq!(decode_line(b"`").unwrap(), Vec::<u8>::new());
        assert!(decode_line(b"\x7fabc").is_none());
    }

    #[test]
    fn test_extract_blocks() {
        let (remaining, blocks) = extract_blocks(BODY);
        assert_eq!(remaining, b"See attached.\r\nBye\r\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].filename, "cat.txt");
        assert_eq!(blocks[0].data, b"Cat");
    }

    #[test]
    fn test_unterminated_block_stays_in_text() {
        let text = b"begin 644 x.bin\n#0V%T\n";
        let (remaining, blocks) = extract_blocks(text);
        assert!(blocks.is_empty());
        assert_eq!(remaining, text);
    }

    #[test]
    fn test_begin_line_validation() {
        assert_eq!(parse_begin(b"begin 644 a b.txt\r\n").as_deref(), Some("a b.txt"));
        assert!(parse_begin(b"begin 9z9 file").is_none());
        assert!(parse_begin(b"beginning of the story").is_none());
    }

    #[test]
    fn test_message_body_is_split() {
        let msg = Message::new(
            Headers::new(),
            MimeNode::Leaf(BodyPart::new("text/plain; charset=us-ascii", BODY.to_vec())),
        );
        let mut conv = UuencodeConverter::new(VisitorSettings::default());
        let visited = conv.accept(msg).unwrap();
        assert!(visited.modified);
        let mixed = visited.message.content.as_multipart().unwrap();
        assert_eq!(mixed.parts.len(), 2);
        let text = mixed.parts[0].as_leaf().unwrap();
        assert_eq!(text.content_type().param("charset"), Some("us-ascii"));
        let cat = mixed.parts[1].as_leaf().unwrap();
        assert_eq!(cat.filename().as_deref(), Some("cat.txt"));
        assert_eq!(cat.bytes(), b"Cat");
    }

    #[test]
    fn test_attachment_text_is_left_alone() {
        let mut part = BodyPart::new("text/plain", BODY.to_vec());
        part.set_disposition("attachment; filename=notes.txt");
        let msg = Message::new(Headers::new(), MimeNode::Leaf(part));
        let visited = UuencodeConverter::new(VisitorSettings::default())
            .accept(msg)
            .unwrap();
        assert!(!visited.modified);
    }

    #[test]
    fn test_latin1_text_keeps_its_bytes() {
        let body = b"Caf\xE9 attached.\r\nbegin 644 cat.txt\r\n#0V%T\r\n`\r\nend\r\n".to_vec();
        let msg = Message::new(
            Headers::new(),
            MimeNode::Leaf(BodyPart::new("text/plain; charset=iso-8859-1", body)),
        );
        let visited = UuencodeConverter::new(VisitorSettings::default())
            .accept(msg)
            .unwrap();
        assert!(visited.modified);
        let mixed = visited.message.content.as_multipart().unwrap();
        let text = mixed.parts[0].as_leaf().unwrap();
        assert_eq!(text.bytes(), b"Caf\xE9 attached.\r\n");
        assert_eq!(text.content_type().param("charset"), Some("iso-8859-1"));
        assert_eq!(mixed.parts[1].as_leaf().unwrap().bytes(), b"Cat");
    }
}
