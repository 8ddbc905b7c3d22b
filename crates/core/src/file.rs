//! File references stored in binary cells
//!
//! A binary cell never carries file content inline once uploaded. It holds a
//! [`FileRef`]: either a local source still pending upload, or a remote
//! object key. Content is opened on demand through an [`ObjectStorage`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;

/// Object storage collaborator.
///
/// `put` stores content and returns the key later rows reference;
/// `open` streams the content for a key.
pub trait ObjectStorage: Send + Sync {
    /// Store `content`, returning its object key.
    fn put(&self, content: &[u8]) -> Result<String>;

    /// Open the object stored under `key`.
    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>>;
}

/// Local file content not yet uploaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocalFile {
    /// A file on the local filesystem, read at upload time
    Path(PathBuf),
    /// In-memory content
    Bytes(Vec<u8>),
}

impl LocalFile {
    /// Read the full content.
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            LocalFile::Path(path) => std::fs::read(path).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to read '{}': {}", path.display(), e),
                ))
            }),
            LocalFile::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Upload the content and return the remote reference.
    pub fn upload(&self, storage: &dyn ObjectStorage) -> Result<RemoteFile> {
        let content = self.read()?;
        let key = storage.put(&content)?;
        Ok(RemoteFile {
            key,
            size: content.len() as u64,
            checksum: checksum(&content),
            extra: BTreeMap::new(),
        })
    }
}

/// Reference to an object already in remote storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Object key
    pub key: String,
    /// Content size in bytes
    pub size: u64,
    /// Hex SHA-256 of the content
    pub checksum: String,
    /// Format-specific metadata (image dimensions, audio duration, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A binary cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileRef {
    /// Pending upload
    Local(LocalFile),
    /// Already uploaded
    Remote(RemoteFile),
}

impl FileRef {
    /// Reference a local path.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        FileRef::Local(LocalFile::Path(path.into()))
    }

    /// Wrap in-memory content.
    pub fn bytes(content: impl Into<Vec<u8>>) -> Self {
        FileRef::Local(LocalFile::Bytes(content.into()))
    }

    /// Reference a remote object.
    pub fn remote(key: impl Into<String>, size: u64, checksum: impl Into<String>) -> Self {
        FileRef::Remote(RemoteFile {
            key: key.into(),
            size,
            checksum: checksum.into(),
            extra: BTreeMap::new(),
        })
    }

    /// True while the content still lives locally.
    pub fn is_local(&self) -> bool {
        matches!(self, FileRef::Local(_))
    }

    /// Remote object key, if uploaded.
    pub fn key(&self) -> Option<&str> {
        match self {
            FileRef::Remote(remote) => Some(&remote.key),
            FileRef::Local(_) => None,
        }
    }

    /// Open the content. Remote references are streamed from `storage`.
    pub fn open(&self, storage: &dyn ObjectStorage) -> Result<Box<dyn Read + Send>> {
        match self {
            FileRef::Local(local) => Ok(Box::new(Cursor::new(local.read()?))),
            FileRef::Remote(remote) => storage.open(&remote.key),
        }
    }
}

/// Hex-encoded SHA-256 of `content`.
pub fn checksum(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    // Manual hex encoding to avoid adding hex crate
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Write;

    #[derive(Default)]
    struct MapStorage {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl ObjectStorage for MapStorage {
        fn put(&self, content: &[u8]) -> Result<String> {
            let key = format!("obj/{}", checksum(content));
            self.objects.lock().insert(key.clone(), content.to_vec());
            Ok(key)
        }

        fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
            let objects = self.objects.lock();
            let content = objects
                .get(key)
                .cloned()
                .ok_or_else(|| Error::not_found("object", key))?;
            Ok(Box::new(Cursor::new(content)))
        }
    }

    fn read_all(mut reader: Box<dyn Read + Send>) -> Vec<u8> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_upload_then_open_remote() {
        let storage = MapStorage::default();
        let local = LocalFile::Bytes(b"pixels".to_vec());
        let remote = local.upload(&storage).unwrap();
        assert_eq!(remote.size, 6);
        assert_eq!(remote.checksum, checksum(b"pixels"));

        let file = FileRef::Remote(remote);
        assert!(!file.is_local());
        assert_eq!(read_all(file.open(&storage).unwrap()), b"pixels");
    }

    #[test]
    fn test_local_path_read() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"from disk").unwrap();
        let file = FileRef::path(tmp.path());
        let storage = MapStorage::default();
        assert_eq!(read_all(file.open(&storage).unwrap()), b"from disk");
    }

    #[test]
    fn test_missing_local_path_is_io_error() {
        let local = LocalFile::Path(PathBuf::from("/definitely/not/here.bin"));
        assert!(matches!(local.read(), Err(Error::Io(_))));
    }
}
