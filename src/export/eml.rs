//! Serialize [`Message`] trees back to RFC 5322 bytes and `.eml` files.
//!
//! Nodes that still carry their parsed encoding are written verbatim.
//! Everything else is regenerated: multiparts from their children, leaves
//! from their decoded bytes (7bit when safe, base64 otherwise).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::model::mime::{BodyPart, Headers, LeafContent, Message, MimeNode};

/// Line length used when base64-encoding bodies.
const BASE64_LINE: usize = 76;

/// Longest line allowed in a 7bit body (RFC 5322 §2.1.1).
const MAX_7BIT_LINE: usize = 998;

/// Serialize a message into a byte vector.
pub fn to_bytes(message: &Message) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail
    let _ = write_message(message, &mut out);
    out
}

/// Write a message to `out`.
pub fn write_message<W: Write>(message: &Message, out: &mut W) -> io::Result<()> {
    if let Some(raw) = message.raw() {
        return out.write_all(raw);
    }
    write_headers(&message.headers, out)?;
    write_node(&message.content, out)
}

/// Export a message as an `.eml` file. Returns the path written.
pub fn export_eml(message: &Message, path: &Path) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, to_bytes(message))?;
    Ok(path.to_path_buf())
}

/// Write a content node: its headers, the blank separator line, its body.
fn write_node<W: Write>(node: &MimeNode, out: &mut W) -> io::Result<()> {
    match node {
        MimeNode::Multipart(mp) => {
            let mut ctype = mp.content_type();
            let boundary = match ctype.param("boundary") {
                Some(b) => b.to_string(),
                None => {
                    let b = crate::model::mime::generate_boundary();
                    ctype.set_param("boundary", b.clone());
                    b
                }
            };
            let mut headers = mp.headers.clone();
            headers.set("Content-Type", ctype.to_string());
            write_headers(&headers, out)?;
            out.write_all(b"\r\n")?;

            if let Some(raw) = mp.raw() {
                return out.write_all(raw);
            }

            // The CRLF before each delimiter belongs to the delimiter, so a
            // body's own trailing line break needs one more.
            for part in &mp.parts {
                write!(out, "--{boundary}\r\n")?;
                write_node(part, out)?;
                out.write_all(b"\r\n")?;
            }
            write!(out, "--{boundary}--\r\n")
        }
        MimeNode::Leaf(bp) => write_leaf(bp, out),
    }
}

fn write_leaf<W: Write>(bp: &BodyPart, out: &mut W) -> io::Result<()> {
    if let Some(raw) = bp.raw_body() {
        write_headers(&bp.headers, out)?;
        out.write_all(b"\r\n")?;
        return out.write_all(raw);
    }

    match &bp.content {
        LeafContent::Bytes(bytes) => {
            let mut headers = bp.headers.clone();
            if is_7bit_safe(bytes) {
                headers.set("Content-Transfer-Encoding", "7bit");
                write_headers(&headers, out)?;
                out.write_all(b"\r\n")?;
                out.write_all(bytes)
            } else {
                headers.set("Content-Transfer-Encoding", "base64");
                write_headers(&headers, out)?;
                out.write_all(b"\r\n")?;
                write_base64(bytes, out)
            }
        }
        LeafContent::Message(embedded) => {
            let mut headers = bp.headers.clone();
            headers.remove("Content-Transfer-Encoding");
            write_headers(&headers, out)?;
            out.write_all(b"\r\n")?;
            write_message(embedded, out)
        }
    }
}

fn write_headers<W: Write>(headers: &Headers, out: &mut W) -> io::Result<()> {
    for (name, value) in headers.iter() {
        write!(out, "{name}: {value}\r\n")?;
    }
    Ok(())
}

fn write_base64<W: Write>(bytes: &[u8], out: &mut W) -> io::Result<()> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    for line in encoded.as_bytes().chunks(BASE64_LINE) {
        out.write_all(line)?;
        out.write_all(b"\r\n")?;
    }
    Ok(())
}

/// Whether `bytes` can travel unencoded: ASCII text with CRLF/LF line
/// endings and no over-long lines.
fn is_7bit_safe(bytes: &[u8]) -> bool {
    let printable = bytes
        .iter()
        .all(|&b| b == b'\r' || b == b'\n' || b == b'\t' || (0x20..0x7f).contains(&b));
    printable
        && bytes
            .split(|&b| b == b'\n')
            .all(|line| line.len() <= MAX_7BIT_LINE)
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_len`.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mime::Multipart;
    use crate::parser::mime::parse_message;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename_part("hello world", 20), "hello world");
        assert_eq!(
            sanitize_filename_part("user@example.com", 30),
            "user@example.com"
        );
        assert_eq!(sanitize_filename_part("a/b\\c:d*e", 20), "a_b_c_d_e");
        assert_eq!(sanitize_filename_part("", 20), "unknown");
    }

    #[test]
    fn test_untouched_message_round_trips() {
        let raw = b"Subject: x\r\nContent-Type: text/plain\r\n\r\nbody\r\n";
        let msg = parse_message(raw).unwrap();
        assert_eq!(to_bytes(&msg), raw.to_vec());
    }

    #[test]
    fn test_generated_multipart_reparses() {
        let mut mp = Multipart::new("mixed");
        mp.add_part(MimeNode::Leaf(BodyPart::new("text/plain", b"hello".to_vec())));
        mp.add_part(MimeNode::Leaf(BodyPart::new(
            "application/octet-stream",
            vec![0, 159, 146, 150],
        )));
        let mut headers = Headers::new();
        headers.set("Subject", "generated");
        let msg = Message::new(headers, MimeNode::Multipart(mp));

        let bytes = to_bytes(&msg);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Content-Transfer-Encoding: base64"));
        assert!(text.contains("Content-Transfer-Encoding: 7bit"));

        let reparsed = parse_message(&bytes).unwrap();
        let parts = &reparsed.content.as_multipart().unwrap().parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].as_leaf().unwrap().bytes(), &[0, 159, 146, 150]);
    }

    #[test]
    fn test_trailing_line_break_survives_reparse() {
        let mut mp = Multipart::new("mixed");
        mp.add_part(MimeNode::Leaf(BodyPart::new(
            "text/plain",
            b"line one\r\nline two\r\n".to_vec(),
        )));
        mp.add_part(MimeNode::Leaf(BodyPart::new("text/plain", b"no break".to_vec())));
        let msg = Message::new(Headers::new(), MimeNode::Multipart(mp));

        let reparsed = parse_message(&to_bytes(&msg)).unwrap();
        let parts = &reparsed.content.as_multipart().unwrap().parts;
        assert_eq!(parts[0].as_leaf().unwrap().bytes(), b"line one\r\nline two\r\n");
        assert_eq!(parts[1].as_leaf().unwrap().bytes(), b"no break");
    }

    #[test]
    fn test_is_7bit_safe() {
        assert!(is_7bit_safe(b"plain text\r\nline two"));
        assert!(!is_7bit_safe("café".as_bytes()));
        assert!(!is_7bit_safe(&[0u8, 1, 2]));
    }
}
