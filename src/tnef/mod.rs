//! Transport Neutral Encapsulation Format (`winmail.dat`) support.
//!
//! - [`decoder`]: reads a TNEF stream into its attributes and a MIME tree
//! - [`builder`]: writes TNEF streams
//! - [`calendar`]: derives iCalendar objects from scheduling messages

pub mod builder;
pub mod calendar;
pub mod decoder;

use thiserror::Error;

pub use builder::TnefBuilder;
pub use calendar::{
    BasicTnefCalendar, CalendarSink, CollectingSink, TnefCalendarAdapter, VCalendar, VComponent,
};
pub use decoder::{BasicTnefDecoder, TnefAttachment, TnefContents, TnefDecoder};

/// Magic number opening every TNEF stream.
pub const TNEF_SIGNATURE: u32 = 0x223E_9F78;

/// Attribute level of message-wide records.
pub const LEVEL_MESSAGE: u8 = 0x01;
/// Attribute level of per-attachment records.
pub const LEVEL_ATTACHMENT: u8 = 0x02;

/// Attribute identifiers (type in the high word, id in the low word).
pub mod attr {
    pub const SUBJECT: u32 = 0x0001_8004;
    pub const MESSAGE_CLASS: u32 = 0x0007_8008;
    pub const BODY: u32 = 0x0002_800C;
    pub const DATE_START: u32 = 0x0003_0006;
    pub const DATE_END: u32 = 0x0003_0007;
    pub const OEM_CODEPAGE: u32 = 0x0006_9007;
    pub const ATTACH_REND_DATA: u32 = 0x0006_9002;
    pub const ATTACH_TITLE: u32 = 0x0001_8010;
    pub const ATTACH_DATA: u32 = 0x0006_800F;
}

/// Errors raised while reading a TNEF stream.
#[derive(Error, Debug)]
pub enum TnefError {
    #[error("bad TNEF signature 0x{0:08X}")]
    BadSignature(u32),

    #[error("TNEF stream truncated while reading {0}")]
    Truncated(&'static str),

    #[error("checksum mismatch on attribute 0x{id:08X}: expected 0x{expected:04X}, got 0x{actual:04X}")]
    Checksum { id: u32, expected: u16, actual: u16 },

    #[error("attribute 0x{id:08X} declares {len} bytes, limit is {limit}")]
    Oversized { id: u32, len: u64, limit: u64 },

    #[error("TNEF read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `essence` names a TNEF attachment.
pub fn is_tnef_type(essence: &str) -> bool {
    essence.eq_ignore_ascii_case("application/ms-tnef")
        || essence.eq_ignore_ascii_case("application/vnd.ms-tnef")
}
