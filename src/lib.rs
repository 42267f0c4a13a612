//! `mimeconv`: MIME transformation and document extraction pipeline.
//!
//! This crate provides a depth-first visitor engine over MIME trees, the
//! converter passes built on it (TNEF and uuencode expansion), a
//! content-addressed decode cache, and a lazy front end that turns stored
//! blobs into indexable documents.

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod export;
pub mod extract;
pub mod model;
pub mod parser;
pub mod store;
pub mod tnef;
pub mod visitor;
