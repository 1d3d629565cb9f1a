//! Content-addressed blob storage for catalog images.
//!
//! A blob lives at `<root>/<first two hex chars>/<hash>.jpg`; the two-char
//! shard keeps any single directory small.

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const EXTENSION: &str = "jpg";

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

/// Location of a stored blob, relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub file_name: String,
    pub relative_path: String,
    /// False when an identical blob was already on disk.
    pub written: bool,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn digest(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    pub fn file_name(hash: &str) -> String {
        format!("{hash}.{EXTENSION}")
    }

    pub fn relative_path(hash: &str) -> String {
        format!("{}/{}", shard(hash), Self::file_name(hash))
    }

    pub fn absolute_path(&self, hash: &str) -> PathBuf {
        self.root.join(shard(hash)).join(Self::file_name(hash))
    }

    /// Writes `bytes` under `hash` unless the blob is already present.
    pub async fn put(&self, hash: &str, bytes: &[u8]) -> std::io::Result<StoredBlob> {
        let dir = self.root.join(shard(hash));
        fs::create_dir_all(&dir).await?;

        let target = self.absolute_path(hash);
        let written = if fs::try_exists(&target).await? {
            false
        } else {
            // rename keeps concurrent writers of the same hash from exposing a partial file
            let tmp = dir.join(format!(".{}.{}.tmp", Self::file_name(hash), Uuid::new_v4().simple()));
            fs::write(&tmp, bytes).await?;
            fs::rename(&tmp, &target).await?;
            true
        };
        debug!(target = "catalog.content", hash, written, "blob stored");

        Ok(StoredBlob {
            file_name: Self::file_name(hash),
            relative_path: Self::relative_path(hash),
            written,
        })
    }

    /// Number of blob files on disk; temporary files are not counted.
    #[cfg(test)]
    pub async fn blob_count(&self) -> std::io::Result<usize> {
        let mut count = 0;
        let mut shards = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name();
                let name = name.to_string_lossy();
                if !name.starts_with('.') && name.ends_with(EXTENSION) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

fn shard(hash: &str) -> &str {
    hash.get(..2).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_sha256_hex() {
        assert_eq!(
            ContentStore::digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn relative_path_uses_two_char_shard() {
        assert_eq!(ContentStore::relative_path("ba7816bf"), "ba/ba7816bf.jpg");
    }

    #[tokio::test]
    async fn put_writes_once_per_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContentStore::new(dir.path());
        let hash = ContentStore::digest(b"image-bytes");

        let first = store.put(&hash, b"image-bytes").await.expect("first put");
        let second = store.put(&hash, b"image-bytes").await.expect("second put");

        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.relative_path, second.relative_path);
        assert_eq!(store.blob_count().await.unwrap(), 1);
        let on_disk = tokio::fs::read(store.absolute_path(&hash)).await.unwrap();
        assert_eq!(on_disk, b"image-bytes");
    }

    #[tokio::test]
    async fn blob_count_of_missing_root_is_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ContentStore::new(dir.path().join("absent"));
        assert_eq!(store.blob_count().await.unwrap(), 0);
    }
}
