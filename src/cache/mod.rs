//! Content-addressed cache of decoded attachment payloads.
//!
//! Payloads are written once per SHA-256 digest under a flat root
//! directory. The cache also records which message identities reference
//! which digests; purging an identity deletes every file no remaining
//! identity points at.
//!
//! The root is wiped when the cache is opened and removed on shutdown, so
//! nothing is reused across runs. All operations share one lock.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{MimeError, Result};
use crate::model::mime::BodyPart;

/// A payload materialized on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub digest: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    files: HashMap<String, CachedFile>,
    refs: HashMap<String, HashSet<String>>,
}

#[derive(Debug)]
pub struct DecodeCache {
    root: PathBuf,
    state: Mutex<CacheState>,
    removed: bool,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl DecodeCache {
    /// Open a cache at `root`, deleting anything already there.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.exists() {
            std::fs::remove_dir_all(&root).map_err(|e| MimeError::io(&root, e))?;
        }
        std::fs::create_dir_all(&root).map_err(|e| MimeError::io(&root, e))?;
        info!(root = %root.display(), "Decode cache ready");
        Ok(Self {
            root,
            state: Mutex::new(CacheState::default()),
            removed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Materialize the decoded content of `part` on behalf of `identity`.
    pub fn materialize(&self, identity: &str, part: &BodyPart) -> Result<CachedFile> {
        self.materialize_bytes(identity, part.bytes())
    }

    /// Record that `identity` uses `bytes` and return the file holding them,
    /// writing it first if this digest has not been seen. The reference is
    /// recorded only once the file exists.
    pub fn materialize_bytes(&self, identity: &str, bytes: &[u8]) -> Result<CachedFile> {
        let digest = content_digest(bytes);
        let mut state = self.lock();

        let cached = state.files.get(&digest).cloned();
        let file = match cached {
            Some(existing) => {
                debug!(digest = %digest, identity, "Decode cache hit");
                existing
            }
            None => {
                let file = self.write_file(&digest, bytes)?;
                debug!(digest = %digest, identity, size = file.size, "Decode cache stored");
                state.files.insert(digest.clone(), file.clone());
                file
            }
        };

        state
            .refs
            .entry(identity.to_string())
            .or_default()
            .insert(digest);
        Ok(file)
    }

    fn write_file(&self, digest: &str, bytes: &[u8]) -> Result<CachedFile> {
        let path = self.root.join(digest);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| MimeError::io(&self.root, e))?;
        tmp.write_all(bytes).map_err(|e| MimeError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| MimeError::Cache(format!("cannot persist {}: {}", path.display(), e.error)))?;
        Ok(CachedFile {
            digest: digest.to_string(),
            path,
            size: bytes.len() as u64,
        })
    }

    /// Drop every reference held by `identity` and delete files that are no
    /// longer referenced. Returns how many files were deleted.
    ///
    /// A file that cannot be deleted is logged and stays tracked, so a later
    /// purge tries again.
    pub fn purge(&self, identity: &str) -> usize {
        let mut state = self.lock();
        if state.refs.remove(identity).is_none() {
            return 0;
        }

        let live: HashSet<&String> = state.refs.values().flatten().collect();
        let dead: Vec<String> = state
            .files
            .keys()
            .filter(|digest| !live.contains(digest))
            .cloned()
            .collect();

        let mut deleted = 0;
        for digest in dead {
            let Some(file) = state.files.get(&digest) else {
                continue;
            };
            match std::fs::remove_file(&file.path) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(digest = %digest, "Cached file already gone");
                }
                Err(e) => {
                    warn!(digest = %digest, path = %file.path.display(), error = %e,
                        "Could not delete cached file");
                    continue;
                }
            }
            state.files.remove(&digest);
        }
        debug!(identity, deleted, "Decode cache purged");
        deleted
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.lock().files.contains_key(digest)
    }

    /// Digests referenced by `identity`, sorted.
    pub fn digests_for(&self, identity: &str) -> Vec<String> {
        let mut digests: Vec<String> = self
            .lock()
            .refs
            .get(identity)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        digests.sort();
        digests
    }

    /// Number of files on disk.
    pub fn num_files(&self) -> usize {
        self.lock().files.len()
    }

    /// Number of identities holding references.
    pub fn num_keys(&self) -> usize {
        self.lock().refs.len()
    }

    /// Remove the cache root and everything in it.
    pub fn shutdown(mut self) -> Result<()> {
        self.removed = true;
        remove_root(&self.root)
    }
}

fn remove_root(root: &Path) -> Result<()> {
    match std::fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MimeError::io(root, e)),
    }
}

impl Drop for DecodeCache {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = remove_root(&self.root) {
                warn!(error = %e, "Could not remove decode cache root");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, DecodeCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DecodeCache::open(dir.path().join("decode")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_open_wipes_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("decode");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("stale"), b"old").unwrap();
        let cache = DecodeCache::open(&root).unwrap();
        assert!(!root.join("stale").exists());
        assert!(root.is_dir());
        assert_eq!(cache.num_files(), 0);
    }

    #[test]
    fn test_materialize_names_file_by_digest() {
        let (_dir, cache) = cache();
        let file = cache.materialize_bytes("msg-1", b"payload").unwrap();
        assert_eq!(file.digest, content_digest(b"payload"));
        assert_eq!(file.digest.len(), 64);
        assert_eq!(file.path, cache.root().join(&file.digest));
        assert_eq!(std::fs::read(&file.path).unwrap(), b"payload");
        assert_eq!(file.size, 7);
    }

    #[test]
    fn test_shared_payload_survives_first_purge() {
        let (_dir, cache) = cache();
        let a = cache.materialize_bytes("msg-a", b"same").unwrap();
        let b = cache.materialize_bytes("msg-b", b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.num_files(), 1);
        assert_eq!(cache.num_keys(), 2);

        assert_eq!(cache.purge("msg-a"), 0);
        assert!(a.path.exists());
        assert!(cache.contains(&a.digest));

        assert_eq!(cache.purge("msg-b"), 1);
        assert!(!a.path.exists());
        assert_eq!(cache.num_files(), 0);
        assert_eq!(cache.num_keys(), 0);
    }

    #[test]
    fn test_purge_unknown_identity_is_noop() {
        let (_dir, cache) = cache();
        cache.materialize_bytes("msg-a", b"x").unwrap();
        assert_eq!(cache.purge("nobody"), 0);
        assert_eq!(cache.num_files(), 1);
    }

    #[test]
    fn test_failed_write_records_no_reference() {
        let (_dir, cache) = cache();
        std::fs::remove_dir_all(cache.root()).unwrap();
        assert!(cache.materialize_bytes("msg-a", b"lost").is_err());
        assert!(cache.digests_for("msg-a").is_empty());
        assert_eq!(cache.num_keys(), 0);
        assert_eq!(cache.num_files(), 0);
    }

    #[test]
    fn test_purge_continues_past_undeletable_file() {
        let (_dir, cache) = cache();
        let stuck = cache.materialize_bytes("msg-a", b"stuck").unwrap();
        let gone = cache.materialize_bytes("msg-a", b"gone").unwrap();
        // A non-empty directory in place of the file cannot be unlinked
        std::fs::remove_file(&stuck.path).unwrap();
        std::fs::create_dir(&stuck.path).unwrap();
        std::fs::write(stuck.path.join("inner"), b"x").unwrap();

        assert_eq!(cache.purge("msg-a"), 1);
        assert!(!gone.path.exists());
        assert!(!cache.contains(&gone.digest));
        assert!(cache.contains(&stuck.digest), "kept for a later purge");
        assert_eq!(cache.num_keys(), 0);
    }

    #[test]
    fn test_digests_for_identity() {
        let (_dir, cache) = cache();
        cache.materialize_bytes("m", b"one").unwrap();
        cache.materialize_bytes("m", b"two").unwrap();
        cache.materialize_bytes("m", b"one").unwrap();
        assert_eq!(cache.digests_for("m").len(), 2);
        assert!(cache.digests_for("other").is_empty());
    }

    #[test]
    fn test_shutdown_removes_root() {
        let (_dir, cache) = cache();
        let root = cache.root().to_path_buf();
        cache.materialize_bytes("m", b"data").unwrap();
        cache.shutdown().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_drop_removes_root() {
        let (_dir, cache) = cache();
        let root = cache.root().to_path_buf();
        drop(cache);
        assert!(!root.exists());
    }
}
