//! Message parsing: header decoding, MIME structure and `.eml` files.

pub mod eml;
pub mod header;
pub mod mime;
