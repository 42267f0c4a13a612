//! iCalendar objects derived from TNEF scheduling messages.

use std::fmt;
use std::io::Read;

use chrono::{NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

use super::decoder::{BasicTnefDecoder, TnefContents};
use crate::error::{MimeError, Result};
use crate::visitor::ConversionContext;

const PRODID: &str = "-//mimeconv//TNEF Conversion//EN";

/// A property list plus nested components, e.g. a `VEVENT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VComponent {
    pub name: String,
    pub properties: Vec<(String, String)>,
}

impl VComponent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            properties: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn add_property(&mut self, name: &str, value: impl Into<String>) {
        self.properties
            .push((name.to_ascii_uppercase(), value.into()));
    }
}

/// A `VCALENDAR` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VCalendar {
    pub properties: Vec<(String, String)>,
    pub components: Vec<VComponent>,
}

impl Default for VCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl VCalendar {
    pub fn new() -> Self {
        Self {
            properties: vec![
                ("PRODID".to_string(), PRODID.to_string()),
                ("VERSION".to_string(), "2.0".to_string()),
            ],
            components: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .properties
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self
                .properties
                .push((name.to_ascii_uppercase(), value)),
        }
    }

    /// The `METHOD` property (`REQUEST`, `REPLY`, ...).
    pub fn method(&self) -> Option<&str> {
        self.property("METHOD")
    }

    pub fn add_component(&mut self, component: VComponent) {
        self.components.push(component);
    }

    /// RFC 5545 text with CRLF line endings and folded long lines.
    pub fn to_ics(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, "BEGIN:VCALENDAR")?;
        for (k, v) in &self.properties {
            write_line(f, &format!("{k}:{v}"))?;
        }
        for comp in &self.components {
            write_line(f, &format!("BEGIN:{}", comp.name))?;
            for (k, v) in &comp.properties {
                write_line(f, &format!("{k}:{v}"))?;
            }
            write_line(f, &format!("END:{}", comp.name))?;
        }
        write_line(f, "END:VCALENDAR")
    }
}

/// Write one content line, folded at 75 octets on char boundaries.
fn write_line(f: &mut fmt::Formatter<'_>, line: &str) -> fmt::Result {
    let mut width = 0;
    for ch in line.chars() {
        let len = ch.len_utf8();
        if width + len > 75 {
            f.write_str("\r\n ")?;
            width = 1;
        }
        write!(f, "{ch}")?;
        width += len;
    }
    f.write_str("\r\n")
}

/// Escape a TEXT value (RFC 5545 §3.3.11).
fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
}

/// Receives calendar objects produced by an adapter.
pub trait CalendarSink {
    fn add(&mut self, calendar: VCalendar);
}

/// Sink that keeps every calendar in order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub calendars: Vec<VCalendar>,
}

impl CalendarSink for CollectingSink {
    fn add(&mut self, calendar: VCalendar) {
        self.calendars.push(calendar);
    }
}

/// Derives calendar data from a TNEF stream.
///
/// Returns `Ok(true)` when at least one calendar was emitted and `Ok(false)`
/// when the stream carries no scheduling content.
pub trait TnefCalendarAdapter: Send + Sync {
    fn convert(
        &self,
        ctx: &ConversionContext,
        input: &mut dyn Read,
        sink: &mut dyn CalendarSink,
    ) -> Result<bool>;
}

/// Built-in adapter for meeting requests, replies and cancellations.
#[derive(Debug, Clone, Default)]
pub struct BasicTnefCalendar {
    decoder: BasicTnefDecoder,
}

impl BasicTnefCalendar {
    pub fn new(decoder: BasicTnefDecoder) -> Self {
        Self { decoder }
    }
}

/// iTIP method for a scheduling message class.
fn scheduling_method(message_class: &str) -> Option<&'static str> {
    let class = message_class.trim();
    const REQUESTS: [&str; 2] = ["IPM.Microsoft Schedule.MtgReq", "IPM.Schedule.Meeting.Request"];
    const REPLIES: [&str; 4] = [
        "IPM.Microsoft Schedule.MtgRespP",
        "IPM.Microsoft Schedule.MtgRespN",
        "IPM.Microsoft Schedule.MtgRespA",
        "IPM.Schedule.Meeting.Resp",
    ];
    const CANCELS: [&str; 2] = ["IPM.Microsoft Schedule.MtgCncl", "IPM.Schedule.Meeting.Canceled"];

    let matches = |prefixes: &[&str]| {
        prefixes
            .iter()
            .any(|p| class.get(..p.len()).is_some_and(|head| head.eq_ignore_ascii_case(p)))
    };
    if matches(&REPLIES) {
        Some("REPLY")
    } else if matches(&CANCELS) {
        Some("CANCEL")
    } else if matches(&REQUESTS) {
        Some("REQUEST")
    } else {
        None
    }
}

fn ical_utc(when: NaiveDateTime) -> String {
    when.format("%Y%m%dT%H%M%SZ").to_string()
}

fn event_uid(contents: &TnefContents) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents.subject.as_deref().unwrap_or("").as_bytes());
    if let Some(start) = contents.start {
        hasher.update(ical_utc(start).as_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
    format!("{hex}@mimeconv")
}

impl TnefCalendarAdapter for BasicTnefCalendar {
    fn convert(
        &self,
        ctx: &ConversionContext,
        input: &mut dyn Read,
        sink: &mut dyn CalendarSink,
    ) -> Result<bool> {
        let contents = self
            .decoder
            .read_contents(input)
            .map_err(|e| MimeError::Calendar(e.to_string()))?;

        let Some(method) = contents.message_class.as_deref().and_then(scheduling_method) else {
            return Ok(false);
        };
        let start = contents.start.ok_or_else(|| {
            MimeError::Calendar(format!(
                "{method} without a start date (message {})",
                ctx.identity().unwrap_or("<unknown>")
            ))
        })?;

        let mut event = VComponent::new("VEVENT");
        event.add_property("UID", event_uid(&contents));
        event.add_property("DTSTAMP", ical_utc(Utc::now().naive_utc()));
        event.add_property("DTSTART", ical_utc(start));
        if let Some(end) = contents.end {
            event.add_property("DTEND", ical_utc(end));
        }
        if let Some(subject) = &contents.subject {
            event.add_property("SUMMARY", escape_text(subject));
        }
        if let Some(body) = contents.body.as_deref().filter(|b| !b.trim().is_empty()) {
            event.add_property("DESCRIPTION", escape_text(body.trim()));
        }
        if method == "CANCEL" {
            event.add_property("STATUS", "CANCELLED");
        }

        let mut calendar = VCalendar::new();
        calendar.set_property("METHOD", method);
        calendar.add_component(event);
        sink.add(calendar);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tnef::TnefBuilder;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_meeting_request_becomes_vevent() {
        let bytes = TnefBuilder::new()
            .message_class("IPM.Microsoft Schedule.MtgReq")
            .subject("Planning, round 2")
            .start(at(10))
            .end(at(11))
            .build();
        let mut sink = CollectingSink::default();
        let converted = BasicTnefCalendar::default()
            .convert(&ConversionContext::default(), &mut bytes.as_slice(), &mut sink)
            .unwrap();
        assert!(converted);
        assert_eq!(sink.calendars.len(), 1);
        let cal = &sink.calendars[0];
        assert_eq!(cal.method(), Some("REQUEST"));
        let event = &cal.components[0];
        assert_eq!(event.property("DTSTART"), Some("20240502T100000Z"));
        assert_eq!(event.property("SUMMARY"), Some("Planning\\, round 2"));
        let ics = cal.to_ics();
        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
    }

    #[test]
    fn test_reply_and_cancel_methods() {
        assert_eq!(scheduling_method("IPM.Microsoft Schedule.MtgRespA"), Some("REPLY"));
        assert_eq!(scheduling_method("IPM.Microsoft Schedule.MtgCncl"), Some("CANCEL"));
        assert_eq!(scheduling_method("IPM.Note"), None);
    }

    #[test]
    fn test_plain_note_is_not_calendar() {
        let bytes = TnefBuilder::new().message_class("IPM.Note").build();
        let mut sink = CollectingSink::default();
        let converted = BasicTnefCalendar::default()
            .convert(&ConversionContext::default(), &mut bytes.as_slice(), &mut sink)
            .unwrap();
        assert!(!converted);
        assert!(sink.calendars.is_empty());
    }

    #[test]
    fn test_request_without_dates_fails() {
        let bytes = TnefBuilder::new()
            .message_class("IPM.Microsoft Schedule.MtgReq")
            .build();
        let mut sink = CollectingSink::default();
        let err = BasicTnefCalendar::default()
            .convert(&ConversionContext::default(), &mut bytes.as_slice(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, MimeError::Calendar(_)));
    }

    #[test]
    fn test_long_lines_are_folded() {
        let mut cal = VCalendar::new();
        let mut event = VComponent::new("vevent");
        event.add_property("SUMMARY", "x".repeat(200));
        cal.add_component(event);
        for line in cal.to_ics().split("\r\n") {
            assert!(line.len() <= 75, "line too long: {}", line.len());
        }
    }
}
