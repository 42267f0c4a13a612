//! Blob storage and the data-source adapter handed to extraction handlers.

pub mod blob;
pub mod source;

pub use blob::{Blob, BlobStore, FileBlobStore};
pub use source::{BlobDataSource, DataSource};
