//! Content-addressed blob tree
//!
//! Blobs live at `<root>/blobs/<hh>/<hashhex>` where `hashhex` is the keyed
//! hash of the file id (suffixed `-thumb` for thumbnails) and `hh` its first
//! two characters — a fanout hint for the filesystem, not a security
//! property. The tree needs no locks: path uniqueness plus rename atomicity
//! means a blob exists iff its full content was renamed into place.

use std::path::PathBuf;

use crate::fsutil;
use crate::{Store, StoreResult};

/// Subdirectory of the storage root holding the blob tree.
pub const BLOBS_DIR: &str = "blobs";

impl Store {
    /// Where the blob for `file_id` (or its thumbnail) lives on disk.
    pub fn blob_path(&self, file_id: &str, thumb: bool) -> PathBuf {
        let hash = if thumb {
            self.hash_string(&format!("{file_id}-thumb"))
        } else {
            self.hash_string(file_id)
        };
        self.dir().join(BLOBS_DIR).join(&hash[..2]).join(&hash)
    }

    /// A single stat; a hit means present and complete.
    pub fn has_blob(&self, file_id: &str, thumb: bool) -> bool {
        self.blob_path(file_id, thumb).is_file()
    }

    /// Atomically place blob content: write a temp sibling under
    /// `O_EXCL|O_SYNC`, then rename into the blob path.
    pub fn write_blob(&self, file_id: &str, thumb: bool, data: &[u8]) -> StoreResult<PathBuf> {
        let path = self.blob_path(file_id, thumb);
        fsutil::create_parent(&path)?;
        let tmp = fsutil::blob_tmp(&path);
        let mut file = fsutil::open_excl_sync(&tmp)?;
        std::io::Write::write_all(&mut file, data)?;
        drop(file);
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Delete a local blob. Returns whether one existed.
    pub fn remove_blob(&self, file_id: &str, thumb: bool) -> StoreResult<bool> {
        match std::fs::remove_file(self.blob_path(file_id, thumb)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkroom_crypto::EncryptionKey;

    fn test_store(dir: &std::path::Path) -> Store {
        Store::new(dir, EncryptionKey::from_bytes([9u8; 32])).unwrap()
    }

    #[test]
    fn test_blob_path_fanout() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());

        let path = store.blob_path("file-123", false);
        let hash = store.hash_string("file-123");
        assert_eq!(path, dir.path().join("blobs").join(&hash[..2]).join(&hash));
    }

    #[test]
    fn test_thumb_path_differs() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        assert_ne!(
            store.blob_path("file-123", false),
            store.blob_path("file-123", true)
        );
    }

    #[test]
    fn test_paths_differ_across_keys() {
        let dir = tempfile::tempdir().unwrap();
        let a = Store::new(dir.path().join("a"), EncryptionKey::from_bytes([1u8; 32])).unwrap();
        let b = Store::new(dir.path().join("b"), EncryptionKey::from_bytes([2u8; 32])).unwrap();
        assert_ne!(
            a.blob_path("same-id", false).file_name(),
            b.blob_path("same-id", false).file_name(),
            "same logical name must hash differently per account"
        );
    }

    #[test]
    fn test_write_blob_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());

        assert!(!store.has_blob("f1", false));
        let path = store.write_blob("f1", false, b"encrypted bytes").unwrap();
        assert!(store.has_blob("f1", false));
        assert_eq!(std::fs::read(path).unwrap(), b"encrypted bytes");

        assert!(store.remove_blob("f1", false).unwrap());
        assert!(!store.has_blob("f1", false));
        assert!(!store.remove_blob("f1", false).unwrap());
    }
}
