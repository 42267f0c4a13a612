//! Document extraction: turns stored blobs into index documents.
//!
//! [`ParsedDocument`] drives a [`MimeHandler`] chosen by the
//! [`HandlerRegistry`], then assembles the preview fragment and the
//! [`IndexDocument`](crate::model::document::IndexDocument).

pub mod document;
pub mod fragment;
pub mod handler;
pub mod tokens;

pub use document::{DocumentMeta, ParsedDocument};
pub use handler::{HandlerRegistry, MimeHandler};
