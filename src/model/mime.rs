//! In-memory MIME tree: messages, multiparts and leaf body parts.
//!
//! Every node remembers the encoded bytes it was parsed from. Serialization
//! reuses those bytes until the node is invalidated, so untouched subtrees
//! come back out byte-for-byte.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::parser::header::decode_encoded_words;

pub const CT_DEFAULT: &str = "text/plain";
pub const CT_TEXT_PLAIN: &str = "text/plain";
pub const CT_TEXT_HTML: &str = "text/html";
pub const CT_TEXT_CALENDAR: &str = "text/calendar";
pub const CT_MESSAGE_RFC822: &str = "message/rfc822";
pub const CT_MULTIPART_PREFIX: &str = "multipart/";
pub const CT_MULTIPART_ALTERNATIVE: &str = "multipart/alternative";
pub const CT_MULTIPART_MIXED: &str = "multipart/mixed";
pub const CT_APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

pub const DISPOSITION_ATTACHMENT: &str = "attachment";

// ── Headers ─────────────────────────────────────────────────────

/// Ordered header list with case-insensitive lookup.
///
/// Values are stored exactly as they appeared after the colon (folding
/// included), so an untouched header is written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, trimmed and unfolded.
    pub fn get(&self, name: &str) -> Option<String> {
        self.get_raw(name).map(unfold)
    }

    /// First value for `name` exactly as stored.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_raw(name).is_some()
    }

    /// Replace the first occurrence of `name` and drop any others.
    /// Appends when the header is absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(pos) => {
                self.entries[pos].1 = value;
                let mut idx = 0;
                self.entries.retain(|(k, _)| {
                    let keep = idx <= pos || !k.eq_ignore_ascii_case(name);
                    idx += 1;
                    keep
                });
            }
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Remove every occurrence of `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split into `(message headers, content headers)`.
    ///
    /// `Content-*` headers describe the body and travel with the content
    /// node; everything else belongs to the enclosing message.
    pub fn split_content(self) -> (Headers, Headers) {
        let (content, other): (Vec<_>, Vec<_>) = self
            .entries
            .into_iter()
            .partition(|(k, _)| is_content_header(k));
        (Headers { entries: other }, Headers { entries: content })
    }

    /// Parsed `Content-Type`, defaulting to `text/plain`.
    pub fn content_type(&self) -> ContentType {
        self.get("Content-Type")
            .map(|v| ContentType::parse(&v))
            .unwrap_or_else(|| ContentType::new(CT_DEFAULT))
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn is_content_header(name: &str) -> bool {
    name.len() > 8
        && name
            .get(..8)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("content-"))
}

/// Collapse folded whitespace into single spaces.
fn unfold(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Content-Type ────────────────────────────────────────────────

/// A parsed `Content-Type` (or `Content-Disposition`) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    essence: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    pub fn new(essence: &str) -> Self {
        Self {
            essence: essence.trim().to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// Parse `type/subtype; name=value; ...`.
    ///
    /// A missing or malformed essence falls back to `text/plain`; parameter
    /// names are lowercased, quoted values are unquoted.
    pub fn parse(value: &str) -> Self {
        let mut parsed = Self::parse_raw(value);
        if !is_valid_essence(&parsed.essence) {
            parsed.essence = CT_DEFAULT.to_string();
        }
        parsed
    }

    /// Parse a disposition value, which has no `/` in its essence.
    pub fn parse_disposition(value: &str) -> Self {
        Self::parse_raw(value)
    }

    fn parse_raw(value: &str) -> Self {
        let mut pieces = split_params(value).into_iter();
        let essence = pieces
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();

        let params = pieces
            .filter_map(|p| {
                let (k, v) = p.split_once('=')?;
                let k = k.trim().to_ascii_lowercase();
                if k.is_empty() {
                    return None;
                }
                Some((k, unquote(v.trim())))
            })
            .collect();

        Self { essence, params }
    }

    /// Lowercase `type/subtype`.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    pub fn primary(&self) -> &str {
        self.essence.split('/').next().unwrap_or("")
    }

    pub fn subtype(&self) -> &str {
        self.essence.split('/').nth(1).unwrap_or("")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .params
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.params.push((name.to_ascii_lowercase(), value)),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_param(name, value);
        self
    }

    pub fn is_multipart(&self) -> bool {
        self.essence.starts_with(CT_MULTIPART_PREFIX)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.essence)?;
        for (k, v) in &self.params {
            if needs_quoting(v) {
                write!(f, "; {k}=\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))?;
            } else {
                write!(f, "; {k}={v}")?;
            }
        }
        Ok(())
    }
}

fn is_valid_essence(s: &str) -> bool {
    match s.split_once('/') {
        Some((a, b)) => !a.is_empty() && !b.is_empty() && !b.contains('/'),
        None => false,
    }
}

/// Split on `;` outside of quoted strings.
fn split_params(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for ch in value.chars() {
        match ch {
            _ if escaped => {
                current.push(ch);
                escaped = false;
            }
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => out.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn unquote(s: &str) -> String {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let inner = &s[1..s.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        s.to_string()
    }
}

fn needs_quoting(v: &str) -> bool {
    v.is_empty()
        || v.chars().any(|c| {
            c.is_ascii_whitespace() || c.is_ascii_control() || "()<>@,;:\\\"/[]?=".contains(c)
        })
}

/// Generate a boundary that will not collide with other generated parts.
///
/// The trailing `_` keeps one boundary from being a prefix of another.
pub fn generate_boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("=_mimeconv_{nanos:x}_{seq:x}_")
}

/// Content type for a filename, from its extension.
pub fn guess_content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "htm" | "html" => "text/html",
        "csv" => "text/csv",
        "ics" => "text/calendar",
        "vcf" => "text/vcard",
        "eml" => "message/rfc822",
        "pdf" => "application/pdf",
        "rtf" => "application/rtf",
        "zip" => "application/zip",
        "xml" => "application/xml",
        "json" => "application/json",
        "doc" => "application/msword",
        "xls" => "application/vnd.ms-excel",
        "ppt" => "application/vnd.ms-powerpoint",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => CT_APPLICATION_OCTET_STREAM,
    }
}

// ── Tree nodes ──────────────────────────────────────────────────

/// Content of a message or of a multipart child.
#[derive(Debug, Clone, PartialEq)]
pub enum MimeNode {
    Multipart(Multipart),
    Leaf(BodyPart),
}

impl MimeNode {
    pub fn headers(&self) -> &Headers {
        match self {
            Self::Multipart(mp) => &mp.headers,
            Self::Leaf(bp) => &bp.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Self::Multipart(mp) => &mut mp.headers,
            Self::Leaf(bp) => &mut bp.headers,
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.headers().content_type()
    }

    pub fn as_leaf(&self) -> Option<&BodyPart> {
        match self {
            Self::Leaf(bp) => Some(bp),
            Self::Multipart(_) => None,
        }
    }

    pub fn as_multipart(&self) -> Option<&Multipart> {
        match self {
            Self::Multipart(mp) => Some(mp),
            Self::Leaf(_) => None,
        }
    }
}

/// A top-level or embedded RFC 822 message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Every header except `Content-*`.
    pub headers: Headers,
    pub content: Box<MimeNode>,
    raw: Option<Vec<u8>>,
}

impl Message {
    pub fn new(headers: Headers, content: MimeNode) -> Self {
        Self {
            headers,
            content: Box::new(content),
            raw: None,
        }
    }

    pub(crate) fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn content_type(&self) -> ContentType {
        self.content.content_type()
    }

    /// Replace the content node, returning the previous one.
    pub fn set_content(&mut self, content: MimeNode) -> MimeNode {
        self.raw = None;
        std::mem::replace(&mut *self.content, content)
    }

    /// Commit structural changes: drop the cached encoding and make sure
    /// the message declares itself as MIME.
    pub fn save_changes(&mut self) {
        self.raw = None;
        if !self.headers.contains("MIME-Version") {
            self.headers.set("MIME-Version", "1.0");
        }
    }
}

/// A `multipart/*` container.
#[derive(Debug, Clone, PartialEq)]
pub struct Multipart {
    /// Content headers, including the `Content-Type` carrying the boundary.
    pub headers: Headers,
    pub parts: Vec<MimeNode>,
    raw: Option<Vec<u8>>,
}

impl Multipart {
    /// An empty `multipart/<subtype>` with a fresh boundary.
    pub fn new(subtype: &str) -> Self {
        let ctype = ContentType::new(&format!("{CT_MULTIPART_PREFIX}{subtype}"))
            .with_param("boundary", generate_boundary());
        let mut headers = Headers::new();
        headers.set("Content-Type", ctype.to_string());
        Self {
            headers,
            parts: Vec::new(),
            raw: None,
        }
    }

    pub(crate) fn from_parsed(headers: Headers, parts: Vec<MimeNode>, raw: Vec<u8>) -> Self {
        Self {
            headers,
            parts,
            raw: Some(raw),
        }
    }

    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn content_type(&self) -> ContentType {
        self.headers.content_type()
    }

    pub fn set_content_type(&mut self, ctype: &ContentType) {
        self.headers.set("Content-Type", ctype.to_string());
        self.raw = None;
    }

    pub fn boundary(&self) -> Option<String> {
        self.content_type().param("boundary").map(str::to_string)
    }

    pub fn add_part(&mut self, part: MimeNode) {
        self.parts.push(part);
        self.raw = None;
    }

    pub fn insert_part(&mut self, index: usize, part: MimeNode) {
        self.parts.insert(index.min(self.parts.len()), part);
        self.raw = None;
    }

    pub fn remove_part(&mut self, index: usize) -> MimeNode {
        self.raw = None;
        self.parts.remove(index)
    }

    /// Rebuild from children on next serialization, assigning a boundary
    /// if the content type lacks one.
    pub fn refresh(&mut self) {
        self.raw = None;
        if self.boundary().is_none() {
            let ctype = self
                .content_type()
                .with_param("boundary", generate_boundary());
            self.headers.set("Content-Type", ctype.to_string());
        }
    }
}

/// Payload of a leaf part.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafContent {
    /// Transfer-decoded bytes.
    Bytes(Vec<u8>),
    /// A `message/rfc822` attachment.
    Message(Box<Message>),
}

/// A single non-multipart body part.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyPart {
    pub headers: Headers,
    pub content: LeafContent,
    raw_body: Option<Vec<u8>>,
}

impl BodyPart {
    /// A new part with the given content type and decoded bytes.
    pub fn new(content_type: &str, bytes: Vec<u8>) -> Self {
        let mut headers = Headers::new();
        headers.set("Content-Type", content_type);
        Self {
            headers,
            content: LeafContent::Bytes(bytes),
            raw_body: None,
        }
    }

    /// An attachment named `filename`, typed from its extension.
    pub fn attachment(filename: &str, bytes: Vec<u8>) -> Self {
        let ctype = ContentType::new(guess_content_type(filename)).with_param("name", filename);
        let disposition = ContentType::new(DISPOSITION_ATTACHMENT).with_param("filename", filename);
        let mut part = Self::new(&ctype.to_string(), bytes);
        part.set_disposition(&disposition.to_string());
        part
    }

    /// A `message/rfc822` part wrapping `message`.
    pub fn with_message(message: Message) -> Self {
        let mut headers = Headers::new();
        headers.set("Content-Type", CT_MESSAGE_RFC822);
        Self {
            headers,
            content: LeafContent::Message(Box::new(message)),
            raw_body: None,
        }
    }

    pub(crate) fn from_parsed(headers: Headers, content: LeafContent, raw_body: Vec<u8>) -> Self {
        Self {
            headers,
            content,
            raw_body: Some(raw_body),
        }
    }

    pub fn raw_body(&self) -> Option<&[u8]> {
        self.raw_body.as_deref()
    }

    pub fn content_type(&self) -> ContentType {
        self.headers.content_type()
    }

    /// Disposition type (`attachment`, `inline`), lowercased.
    pub fn disposition(&self) -> Option<String> {
        self.headers
            .get("Content-Disposition")
            .map(|v| ContentType::parse_disposition(&v).essence().to_string())
    }

    pub fn set_disposition(&mut self, disposition: &str) {
        self.headers.set("Content-Disposition", disposition);
    }

    /// Filename from the disposition, falling back to the content-type
    /// `name`. RFC 2047 encoded-words are decoded.
    pub fn filename(&self) -> Option<String> {
        self.headers
            .get("Content-Disposition")
            .and_then(|v| {
                ContentType::parse_disposition(&v)
                    .param("filename")
                    .map(str::to_string)
            })
            .or_else(|| self.content_type().param("name").map(str::to_string))
            .map(|name| decode_encoded_words(&name))
    }

    /// Decoded bytes; empty for embedded messages.
    pub fn bytes(&self) -> &[u8] {
        match &self.content {
            LeafContent::Bytes(b) => b,
            LeafContent::Message(_) => &[],
        }
    }

    /// Replace the payload. The part is re-encoded on output.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.content = LeafContent::Bytes(bytes);
        self.invalidate();
    }

    /// Forget the original encoding so the content is written afresh.
    pub fn invalidate(&mut self) {
        self.raw_body = None;
    }
}
