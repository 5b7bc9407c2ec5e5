// SPDX-License-Identifier: Apache-2.0

//! Stable file identity based on device + inode.
//!
//! The identity survives renames, which is what lets the scanner recognize a
//! rotated file and resume it at its previous offset instead of re-reading
//! it from scratch. Only POSIX systems are supported.

#[cfg(not(unix))]
compile_error!("taild file identity requires a POSIX platform");

use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// A unique identifier for a file, independent of its path.
///
/// Two identities are equal iff both the device ID and the inode number
/// match. Serialized under the registry's `FileStateOS` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    pub inode: u64,
    pub device: u64,
}

impl FileId {
    /// Create a FileId from raw device and inode values.
    /// Used for loading persisted state.
    pub fn new(device: u64, inode: u64) -> Self {
        Self { inode, device }
    }

    /// Derive the identity from file metadata.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            inode: metadata.ino(),
            device: metadata.dev(),
        }
    }

    /// Derive the identity from an open file handle.
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    /// Derive the identity by stat-ing a path (follows symlinks).
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.inode, self.device)
    }
}

/// Check whether `path` still refers to the same file as `id`.
///
/// Returns false when the path no longer exists; for the rename check the
/// caller only cares that the name stopped pointing at the tracked inode.
pub fn is_same_file(path: impl AsRef<Path>, id: FileId) -> bool {
    match FileId::from_path(path) {
        Ok(current) => current == id,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_id_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let id = FileId::from_path(file.path()).unwrap();
        assert!(id.device > 0 || id.inode > 0);
    }

    #[test]
    fn test_file_id_stable_across_reopen() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let path = file.path().to_path_buf();
        let id1 = FileId::from_path(&path).unwrap();

        {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            f.write_all(b" more content").unwrap();
        }

        let id2 = FileId::from_path(&path).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_file_id_survives_rename() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("a.log");
        let new = dir.path().join("a.log.1");
        std::fs::write(&old, b"content").unwrap();

        let id1 = FileId::from_path(&old).unwrap();
        std::fs::rename(&old, &new).unwrap();
        let id2 = FileId::from_path(&new).unwrap();

        assert_eq!(id1, id2);
        assert!(!is_same_file(&old, id1));
        assert!(is_same_file(&new, id1));
    }

    #[test]
    fn test_file_id_different_files() {
        let file1 = NamedTempFile::new().unwrap();
        let file2 = NamedTempFile::new().unwrap();

        let id1 = FileId::from_path(file1.path()).unwrap();
        let id2 = FileId::from_path(file2.path()).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn test_file_id_serde_field_names() {
        let id = FileId::new(7, 42);
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json["inode"], 42);
        assert_eq!(json["device"], 7);

        let loaded: FileId = serde_json::from_value(json).unwrap();
        assert_eq!(loaded, id);
    }
}
