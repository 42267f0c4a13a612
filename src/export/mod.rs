//! Serialization of MIME trees back to RFC 5322 bytes.

pub mod eml;
