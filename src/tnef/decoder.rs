//! TNEF stream reader.
//!
//! A stream is the signature, a legacy key and then a flat sequence of
//! attribute records:
//!
//! ```text
//! level: u8 | id: u32 LE | len: u32 LE | data: [u8; len] | checksum: u16 LE
//! ```
//!
//! The checksum is the sum of the data bytes modulo 65536. An attachment
//! begins at each `ATTACH_REND_DATA` record; later attachment-level records
//! belong to it.

use std::io::{ErrorKind, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use encoding_rs::Encoding;
use tracing::debug;

use super::{attr, TnefError, LEVEL_ATTACHMENT, TNEF_SIGNATURE};
use crate::model::mime::{BodyPart, Headers, Message, MimeNode, Multipart};

/// Default ceiling on a single attribute's declared length (64 MiB).
pub const DEFAULT_MAX_ATTRIBUTE_LEN: u64 = 64 * 1024 * 1024;

/// Decodes a TNEF byte stream into a standard MIME message.
pub trait TnefDecoder: Send + Sync {
    fn decode(&self, input: &mut dyn Read) -> Result<Message, TnefError>;
}

/// One attachment carried inside a TNEF stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TnefAttachment {
    pub title: Option<String>,
    pub data: Vec<u8>,
}

/// The attributes of a TNEF stream this crate understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TnefContents {
    pub message_class: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub codepage: Option<u32>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub attachments: Vec<TnefAttachment>,
}

/// Built-in decoder for the attribute-level TNEF encoding.
#[derive(Debug, Clone)]
pub struct BasicTnefDecoder {
    max_attribute_len: u64,
}

impl Default for BasicTnefDecoder {
    fn default() -> Self {
        Self {
            max_attribute_len: DEFAULT_MAX_ATTRIBUTE_LEN,
        }
    }
}

impl BasicTnefDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject attributes declaring more than `limit` bytes before allocating.
    pub fn with_max_attribute_len(mut self, limit: u64) -> Self {
        self.max_attribute_len = limit;
        self
    }

    /// Read the whole stream into [`TnefContents`].
    pub fn read_contents(&self, input: &mut dyn Read) -> Result<TnefContents, TnefError> {
        let signature = read_u32(input, "signature")?;
        if signature != TNEF_SIGNATURE {
            return Err(TnefError::BadSignature(signature));
        }
        let _legacy_key = read_u16(input, "legacy key")?;

        let mut contents = TnefContents::default();
        // Strings are kept raw until the codepage attribute has been seen.
        let mut raw_subject: Option<Vec<u8>> = None;
        let mut raw_class: Option<Vec<u8>> = None;
        let mut raw_body: Option<Vec<u8>> = None;
        let mut raw_titles: Vec<Option<Vec<u8>>> = Vec::new();

        while let Some(level) = read_level(input)? {
            let id = read_u32(input, "attribute id")?;
            let len = u64::from(read_u32(input, "attribute length")?);
            if len > self.max_attribute_len {
                return Err(TnefError::Oversized {
                    id,
                    len,
                    limit: self.max_attribute_len,
                });
            }
            let mut data = vec![0u8; len as usize];
            input.read_exact(&mut data).map_err(|e| eof("attribute data", e))?;
            let expected = read_u16(input, "checksum")?;
            let actual = checksum(&data);
            if expected != actual {
                return Err(TnefError::Checksum {
                    id,
                    expected,
                    actual,
                });
            }

            match (level, id) {
                (_, attr::SUBJECT) => raw_subject = Some(data),
                (_, attr::MESSAGE_CLASS) => raw_class = Some(data),
                (_, attr::BODY) => raw_body = Some(data),
                (_, attr::OEM_CODEPAGE) if data.len() >= 4 => {
                    contents.codepage =
                        Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
                }
                (_, attr::DATE_START) => contents.start = decode_date(&data),
                (_, attr::DATE_END) => contents.end = decode_date(&data),
                (LEVEL_ATTACHMENT, attr::ATTACH_REND_DATA) => {
                    contents.attachments.push(TnefAttachment::default());
                    raw_titles.push(None);
                }
                (LEVEL_ATTACHMENT, attr::ATTACH_TITLE) => {
                    if let Some(slot) = raw_titles.last_mut() {
                        *slot = Some(data);
                    }
                }
                (LEVEL_ATTACHMENT, attr::ATTACH_DATA) => {
                    if let Some(att) = contents.attachments.last_mut() {
                        att.data = data;
                    }
                }
                _ => debug!(level, id = format_args!("0x{id:08X}"), len, "Skipping TNEF attribute"),
            }
        }

        let encoding = codepage_encoding(contents.codepage);
        contents.subject = raw_subject.map(|d| decode_string(encoding, &d));
        contents.message_class = raw_class.map(|d| decode_string(encoding, &d));
        contents.body = raw_body.map(|d| decode_string(encoding, &d));
        for (att, title) in contents.attachments.iter_mut().zip(raw_titles) {
            att.title = title.map(|d| decode_string(encoding, &d));
        }
        Ok(contents)
    }
}

impl TnefDecoder for BasicTnefDecoder {
    fn decode(&self, input: &mut dyn Read) -> Result<Message, TnefError> {
        let contents = self.read_contents(input)?;
        Ok(contents_to_message(&contents))
    }
}

/// Build a `multipart/mixed` message from decoded attributes: the body
/// text first, then one part per attachment.
fn contents_to_message(contents: &TnefContents) -> Message {
    let mut mixed = Multipart::new("mixed");

    if let Some(body) = contents.body.as_deref().filter(|b| !b.trim().is_empty()) {
        mixed.add_part(MimeNode::Leaf(BodyPart::new(
            "text/plain; charset=utf-8",
            body.as_bytes().to_vec(),
        )));
    }

    for (i, att) in contents.attachments.iter().enumerate() {
        let filename = att
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("attachment-{}.bin", i + 1));
        mixed.add_part(MimeNode::Leaf(BodyPart::attachment(&filename, att.data.clone())));
    }

    let mut headers = Headers::new();
    if let Some(subject) = &contents.subject {
        headers.set("Subject", subject.clone());
    }
    headers.set("MIME-Version", "1.0");
    Message::new(headers, MimeNode::Multipart(mixed))
}

fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Next record level, or `None` at a clean end of stream.
fn read_level(input: &mut dyn Read) -> Result<Option<u8>, TnefError> {
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TnefError::Io(e)),
        }
    }
}

fn read_u32(input: &mut dyn Read, what: &'static str) -> Result<u32, TnefError> {
    input.read_u32::<LittleEndian>().map_err(|e| eof(what, e))
}

fn read_u16(input: &mut dyn Read, what: &'static str) -> Result<u16, TnefError> {
    input.read_u16::<LittleEndian>().map_err(|e| eof(what, e))
}

fn eof(what: &'static str, e: std::io::Error) -> TnefError {
    if e.kind() == ErrorKind::UnexpectedEof {
        TnefError::Truncated(what)
    } else {
        TnefError::Io(e)
    }
}

fn decode_date(data: &[u8]) -> Option<NaiveDateTime> {
    if data.len() < 12 {
        return None;
    }
    let word = |i: usize| u32::from(u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]));
    NaiveDate::from_ymd_opt(word(0) as i32, word(1), word(2))
        .and_then(|d| d.and_hms_opt(word(3), word(4), word(5)))
}

/// Encoding for a Windows codepage number; Windows-1252 when unknown.
fn codepage_encoding(codepage: Option<u32>) -> &'static Encoding {
    let label = match codepage {
        Some(65001) => "utf-8".to_string(),
        Some(932) => "shift_jis".to_string(),
        Some(936) => "gbk".to_string(),
        Some(949) => "euc-kr".to_string(),
        Some(950) => "big5".to_string(),
        Some(20866) => "koi8-r".to_string(),
        Some(cp @ (874 | 1250..=1258)) => format!("windows-{cp}"),
        Some(cp @ 28591..=28605) => format!("iso-8859-{}", cp - 28590),
        _ => "windows-1252".to_string(),
    };
    Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::WINDOWS_1252)
}

/// Decode a NUL-terminated string attribute.
fn decode_string(encoding: &'static Encoding, data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let (decoded, _, _) = encoding.decode(&data[..end]);
    decoded.into_owned()
}
