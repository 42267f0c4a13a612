//! Reader for individual `.eml` files.

use std::path::Path;

use tracing::debug;

use crate::error::{MimeError, Result};
use crate::model::mime::Message;
use crate::parser::mime::parse_message_with_depth;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Read and parse a single `.eml` file.
///
/// A leading UTF-8 BOM and an mbox `From ` separator line, both common in
/// files saved by desktop clients, are skipped. Nesting deeper than
/// `max_depth` is kept opaque.
pub fn read_eml(path: impl AsRef<Path>, max_depth: usize) -> Result<Message> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| MimeError::io(path, e))?;
    let body = strip_framing(&data);
    debug!(path = %path.display(), bytes = body.len(), "Read EML file");
    parse_message_with_depth(body, max_depth)
}

/// The message bytes without BOM or mbox separator.
pub fn strip_framing(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    if data.starts_with(b"From ") {
        match data.iter().position(|&b| b == b'\n') {
            Some(end) => &data[end + 1..],
            None => &[],
        }
    } else {
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::DEFAULT_MAX_DEPTH;
    use std::io::Write;

    #[test]
    fn test_strip_framing() {
        let data = b"\xEF\xBB\xBFFrom alice@example.com Mon Jan  1 00:00:00 2024\nSubject: x\n\nbody";
        assert_eq!(strip_framing(data), b"Subject: x\n\nbody");
        assert_eq!(strip_framing(b"Subject: y\n\n"), b"Subject: y\n\n");
        // A "From:" header is not an mbox separator
        assert_eq!(strip_framing(b"From: a@b\n\n"), b"From: a@b\n\n");
    }

    #[test]
    fn test_read_eml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"From x@y Tue Feb  6 10:00:00 2024\r\nSubject: Hi\r\nContent-Type: text/plain\r\n\r\nHello\r\n")
            .unwrap();
        let msg = read_eml(file.path(), DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(msg.headers.get("Subject").as_deref(), Some("Hi"));
        let body = String::from_utf8_lossy(msg.content.as_leaf().unwrap().bytes()).to_string();
        assert_eq!(body.trim(), "Hello");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = read_eml("/nonexistent/dir/mail.eml", DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(err.to_string().contains("mail.eml"));
    }
}
