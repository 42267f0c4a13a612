//! TNEF stream writer.

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{Datelike, NaiveDateTime, Timelike};

use super::{attr, LEVEL_ATTACHMENT, LEVEL_MESSAGE, TNEF_SIGNATURE};

/// Assembles a TNEF stream record by record.
///
/// ```
/// use mimeconv::tnef::TnefBuilder;
///
/// let bytes = TnefBuilder::new()
///     .subject("Quarterly report")
///     .body("See attached.")
///     .attachment("report.txt", b"numbers")
///     .build();
/// assert_eq!(&bytes[..4], &[0x78, 0x9F, 0x3E, 0x22]);
/// ```
#[derive(Debug, Clone)]
pub struct TnefBuilder {
    buf: Vec<u8>,
}

impl Default for TnefBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TnefBuilder {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&TNEF_SIGNATURE.to_le_bytes());
        // Legacy key, unused by readers
        buf.extend_from_slice(&0x0001u16.to_le_bytes());
        Self { buf }
    }

    /// Append one raw attribute record with a correct checksum.
    pub fn attribute(mut self, level: u8, id: u32, data: &[u8]) -> Self {
        let checksum = data
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
        self.buf.push(level);
        // Writes into a Vec are infallible
        let _ = self.buf.write_u32::<LittleEndian>(id);
        let _ = self.buf.write_u32::<LittleEndian>(data.len() as u32);
        self.buf.extend_from_slice(data);
        let _ = self.buf.write_u16::<LittleEndian>(checksum);
        self
    }

    pub fn message_class(self, class: &str) -> Self {
        self.attribute(LEVEL_MESSAGE, attr::MESSAGE_CLASS, &nul_terminated(class))
    }

    pub fn subject(self, subject: &str) -> Self {
        self.attribute(LEVEL_MESSAGE, attr::SUBJECT, &nul_terminated(subject))
    }

    pub fn body(self, body: &str) -> Self {
        self.attribute(LEVEL_MESSAGE, attr::BODY, body.as_bytes())
    }

    pub fn codepage(self, codepage: u32) -> Self {
        let mut data = codepage.to_le_bytes().to_vec();
        data.extend_from_slice(&0u32.to_le_bytes());
        self.attribute(LEVEL_MESSAGE, attr::OEM_CODEPAGE, &data)
    }

    pub fn start(self, when: NaiveDateTime) -> Self {
        self.attribute(LEVEL_MESSAGE, attr::DATE_START, &encode_date(when))
    }

    pub fn end(self, when: NaiveDateTime) -> Self {
        self.attribute(LEVEL_MESSAGE, attr::DATE_END, &encode_date(when))
    }

    /// Append an attachment: render data, title, then contents.
    pub fn attachment(self, title: &str, data: &[u8]) -> Self {
        self.attribute(LEVEL_ATTACHMENT, attr::ATTACH_REND_DATA, &[0u8; 14])
            .attribute(LEVEL_ATTACHMENT, attr::ATTACH_TITLE, &nul_terminated(title))
            .attribute(LEVEL_ATTACHMENT, attr::ATTACH_DATA, data)
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

fn nul_terminated(s: &str) -> Vec<u8> {
    let mut data = s.as_bytes().to_vec();
    data.push(0);
    data
}

/// Seven little-endian u16 words: year, month, day, hour, minute, second, weekday.
fn encode_date(when: NaiveDateTime) -> Vec<u8> {
    [
        when.year() as u16,
        when.month() as u16,
        when.day() as u16,
        when.hour() as u16,
        when.minute() as u16,
        when.second() as u16,
        when.weekday().num_days_from_sunday() as u16,
    ]
    .iter()
    .flat_map(|w| w.to_le_bytes())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_record_layout() {
        let bytes = TnefBuilder::new()
            .attribute(LEVEL_MESSAGE, 0x0001_0002, &[1, 2, 255])
            .build();
        // signature(4) + key(2) + level(1) + id(4) + len(4) + data(3) + checksum(2)
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[6], LEVEL_MESSAGE);
        assert_eq!(&bytes[11..15], &3u32.to_le_bytes());
        assert_eq!(&bytes[18..20], &258u16.to_le_bytes());
    }
}
