//! Core data model: the MIME tree, addresses and index documents.

pub mod address;
pub mod document;
pub mod mime;
