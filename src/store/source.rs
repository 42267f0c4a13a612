//! Byte-stream views over stored content, for extraction handlers.

use std::io::Read;
use std::sync::Arc;

use crate::error::Result;
use crate::store::blob::{Blob, BlobStore};

/// A named, typed source of bytes that can be opened repeatedly.
pub trait DataSource: Send + Sync {
    fn content_type(&self) -> &str;
    fn name(&self) -> Option<&str>;
    fn open(&self) -> Result<Box<dyn Read + Send>>;
}

/// Exposes a [`Blob`] through [`DataSource`].
pub struct BlobDataSource {
    blob: Blob,
    content_type: String,
    store: Arc<dyn BlobStore>,
}

impl BlobDataSource {
    pub fn new(blob: Blob, content_type: impl Into<String>, store: Arc<dyn BlobStore>) -> Self {
        Self {
            blob,
            content_type: content_type.into(),
            store,
        }
    }
}

impl DataSource for BlobDataSource {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn name(&self) -> Option<&str> {
        Some(&self.blob.digest)
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        self.store.open(&self.blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::blob::FileBlobStore;

    #[test]
    fn test_blob_data_source_reads_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn BlobStore> = Arc::new(FileBlobStore::open(dir.path()).unwrap());
        let blob = store.store(&mut &b"<p>hi</p>"[..]).unwrap();
        let source = BlobDataSource::new(blob.clone(), "text/html", Arc::clone(&store));
        assert_eq!(source.content_type(), "text/html");
        assert_eq!(source.name(), Some(blob.digest.as_str()));

        // Opening twice yields the full content each time.
        for _ in 0..2 {
            let mut buf = Vec::new();
            source.open().unwrap().read_to_end(&mut buf).unwrap();
            assert_eq!(buf, b"<p>hi</p>");
        }
    }
}
