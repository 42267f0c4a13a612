//! Built-in converter passes.
//!
//! - [`tnef`]: expands `winmail.dat` attachments into standard MIME
//! - [`uuencode`]: splits uuencoded blocks out of plain-text bodies

pub mod tnef;
pub mod uuencode;

pub use tnef::{TnefConverter, TnefConverterFactory};
pub use uuencode::{UuencodeConverter, UuencodeConverterFactory};
