//! Centralized error types for mimeconv.

use std::path::PathBuf;
use thiserror::Error;

use crate::tnef::TnefError;

/// All errors produced by the mimeconv library.
#[derive(Error, Debug)]
pub enum MimeError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The bytes could not be parsed as a MIME entity.
    #[error("MIME parse error: {0}")]
    Parse(String),

    /// A part could not be encoded or decoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The legacy TNEF container could not be decoded.
    #[error("TNEF decoding error: {0}")]
    Tnef(#[from] TnefError),

    /// Calendar data was found but could not be converted.
    ///
    /// Unlike every other conversion failure this one is reported for the
    /// whole message instead of being logged and skipped.
    #[error("TNEF to iCalendar conversion failure: {0}")]
    Calendar(String),

    /// The decode cache could not record or remove an artifact.
    #[error("Decode cache error: {0}")]
    Cache(String),

    /// The configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, MimeError>`.
pub type Result<T> = std::result::Result<T, MimeError>;

impl MimeError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must escape a traversal instead of being logged.
    pub fn is_message_fatal(&self) -> bool {
        matches!(self, Self::Calendar(_))
    }
}

/// Allow `?` on `std::io::Error` when no path context is available.
impl From<std::io::Error> for MimeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<stream>"),
            source,
        }
    }
}

/// Failure reported by a content extraction handler.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A conversion dependency is unavailable; extraction may succeed later.
    #[error("temporary extraction failure: {0}")]
    Temporary(String),

    /// The content cannot be extracted.
    #[error("extraction failed: {0}")]
    Failed(String),

    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    /// Whether retrying later could succeed.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}
