//! Content-addressed blob storage on the local filesystem.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{MimeError, Result};

/// Read buffer size when streaming into the store.
const COPY_BUFFER: usize = 64 * 1024;

/// An immutable stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the contents.
    pub digest: String,
    pub size: u64,
}

/// Stores byte streams as blobs and opens them again.
pub trait BlobStore: Send + Sync {
    fn store(&self, input: &mut dyn Read) -> Result<Blob>;
    fn open(&self, blob: &Blob) -> Result<Box<dyn Read + Send>>;
}

/// Blobs as files named by digest under one directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| MimeError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for FileBlobStore {
    /// Stream `input` to a temporary file while hashing it, then move it
    /// into place. Identical content is stored once.
    fn store(&self, input: &mut dyn Read) -> Result<Blob> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| MimeError::io(&self.root, e))?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; COPY_BUFFER];
        loop {
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])
                .map_err(|e| MimeError::io(tmp.path(), e))?;
            size += n as u64;
        }

        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let path = self.root.join(&digest);
        if path.exists() {
            debug!(digest = %digest, "Blob already stored");
        } else {
            tmp.persist(&path).map_err(|e| {
                MimeError::Cache(format!("cannot persist blob {}: {}", path.display(), e.error))
            })?;
            debug!(digest = %digest, size, "Stored blob");
        }
        Ok(Blob { path, digest, size })
    }

    fn open(&self, blob: &Blob) -> Result<Box<dyn Read + Send>> {
        let file = File::open(&blob.path).map_err(|e| MimeError::io(&blob.path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        let blob = store.store(&mut &b"hello blob"[..]).unwrap();
        assert_eq!(blob.size, 10);
        assert_eq!(blob.digest.len(), 64);
        assert_eq!(blob.path, dir.path().join(&blob.digest));

        let mut out = String::new();
        store.open(&blob).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello blob");
    }

    #[test]
    fn test_identical_content_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        let a = store.store(&mut &b"same"[..]).unwrap();
        let b = store.store(&mut &b"same"[..]).unwrap();
        assert_eq!(a, b);
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }
}
