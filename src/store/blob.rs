//! Blob stores: one on the local filesystem, one in memory for tests.

use super::memory::write_atomic;
use super::BlobStore;
use crate::error::StoreError;
use crate::reference::BlobPath;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Read size when streaming a blob back out.
const CHUNK_SIZE: usize = 64 * 1024;

/// A stream of blob chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send>>;

/// An opened blob: its length and a stream over its bytes.
pub struct BlobReader {
    pub length: u64,
    pub stream: ByteStream,
}

impl BlobReader {
    /// Drain the stream into memory.
    pub async fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.length as usize);
        while let Some(chunk) = self.stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Blobs stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &BlobPath) -> Result<PathBuf, StoreError> {
        path.resolve_under(&self.root)
            .map_err(|e| StoreError::Internal(e.to_string()))
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &BlobPath, bytes: &[u8]) -> Result<(), StoreError> {
        let full = self.full_path(path)?;
        write_atomic(&full, bytes).await?;
        debug!("Stored blob {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    async fn open(&self, path: &BlobPath) -> Result<BlobReader, StoreError> {
        let full = self.full_path(path)?;
        let file = match tokio::fs::File::open(&full).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("blob {path}")))
            }
            Err(e) => return Err(io_error(&full)(e)),
        };
        let length = file.metadata().await.map_err(io_error(&full))?.len();

        let stream = stream::unfold(Some(file), |state| async move {
            let mut file: tokio::fs::File = match state {
                Some(f) => f,
                None => return None,
            };
            let mut buf = vec![0u8; CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(file)))
                }
                Err(e) => Some((Err(e), None)),
            }
        });

        Ok(BlobReader {
            length,
            stream: Box::pin(stream),
        })
    }

    async fn delete(&self, path: &BlobPath) -> Result<bool, StoreError> {
        let full = self.full_path(path)?;
        let existed = match tokio::fs::remove_file(&full).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(io_error(&full)(e)),
        };

        // Drop the extraction directory once its last page is gone.
        if let Some(dir) = path.dir() {
            let dir_path = self.root.join(dir);
            if let Ok(mut entries) = tokio::fs::read_dir(&dir_path).await {
                if matches!(entries.next_entry().await, Ok(None)) {
                    if let Err(e) = tokio::fs::remove_dir(&dir_path).await {
                        warn!("Could not remove empty directory {}: {}", dir_path.display(), e);
                    } else {
                        debug!("Removed empty extraction directory {}", dir);
                    }
                }
            }
        }
        Ok(existed)
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool, StoreError> {
        let full = self.full_path(path)?;
        tokio::fs::try_exists(&full).await.map_err(io_error(&full))
    }
}

/// Blobs held in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobPath, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn paths(&self) -> Vec<BlobPath> {
        self.blobs.read().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &BlobPath, bytes: &[u8]) -> Result<(), StoreError> {
        self.blobs.write().insert(path.clone(), bytes.to_vec());
        Ok(())
    }

    async fn open(&self, path: &BlobPath) -> Result<BlobReader, StoreError> {
        let bytes = self
            .blobs
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {path}")))?;
        let length = bytes.len() as u64;
        let chunks: Vec<io::Result<Vec<u8>>> =
            bytes.chunks(CHUNK_SIZE).map(|c| Ok(c.to_vec())).collect();
        Ok(BlobReader {
            length,
            stream: Box::pin(stream::iter(chunks)),
        })
    }

    async fn delete(&self, path: &BlobPath) -> Result<bool, StoreError> {
        Ok(self.blobs.write().remove(path).is_some())
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool, StoreError> {
        Ok(self.blobs.read().contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_put_open_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let path = BlobPath::new_upload("png");
        let payload = vec![7u8; CHUNK_SIZE * 2 + 10];

        store.put(&path, &payload).await.unwrap();
        assert!(store.exists(&path).await.unwrap());

        let reader = store.open(&path).await.unwrap();
        assert_eq!(reader.length, payload.len() as u64);
        assert_eq!(reader.read_all().await.unwrap(), payload);

        assert!(store.delete(&path).await.unwrap());
        assert!(!store.delete(&path).await.unwrap());
        assert!(matches!(
            store.open(&path).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn fs_delete_removes_emptied_extraction_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let pdf_dir = BlobPath::new_extraction_dir();
        let first = BlobPath::extracted(&pdf_dir, 1, "jpg");
        let second = BlobPath::extracted(&pdf_dir, 2, "jpg");
        store.put(&first, b"a").await.unwrap();
        store.put(&second, b"b").await.unwrap();

        store.delete(&first).await.unwrap();
        assert!(dir.path().join(&pdf_dir).is_dir());
        store.delete(&second).await.unwrap();
        assert!(!dir.path().join(&pdf_dir).exists());
    }

    #[tokio::test]
    async fn memory_store_streams_in_chunks() {
        let store = MemoryBlobStore::new();
        let path = BlobPath::new_upload("jpg");
        store.put(&path, &vec![1u8; CHUNK_SIZE + 1]).await.unwrap();
        let mut reader = store.open(&path).await.unwrap();
        let mut chunks = 0;
        while let Some(chunk) = reader.stream.next().await {
            chunk.unwrap();
            chunks += 1;
        }
        assert_eq!(chunks, 2);
    }
}
