//! Storage backend contract for upload payloads plus the local filesystem
//! implementation. Objects are addressed only by upload id; the backend knows
//! nothing about offsets being valid, that is the coordinator's job.
//! On disk, objects are sharded beneath `base_path/{shard}/{shard}/{id}`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A lazily produced sequence of byte buffers.
///
/// Consumers pull one buffer at a time, which gives natural backpressure
/// against the producer (typically the request body).
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage object for upload `{0}` not found")]
    NotFound(i64),
    #[error("storage object for upload `{0}` already exists")]
    AlreadyExists(i64),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Byte-level operations on the object backing an upload.
///
/// Implementations must not keep handles open between calls: every write
/// opens the object, writes, and releases it before returning.
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    /// Allocate a new, empty object for `id`.
    async fn create_file(&self, id: i64) -> StorageResult<()>;

    /// Write `parts` in order starting at `offset`; returns the number of bytes written.
    async fn write_chunk(&self, id: i64, parts: ByteStream, offset: u64) -> StorageResult<u64>;

    /// Concatenate the full contents of `source_ids`, in order, into `id` starting at `offset`.
    async fn merge_chunk(&self, id: i64, source_ids: &[i64], offset: u64) -> StorageResult<u64>;

    /// Stream the current contents of the object.
    async fn read_file(&self, id: i64) -> StorageResult<ByteStream>;

    /// Remove the object. Removing an object that does not exist succeeds.
    async fn delete_file(&self, id: i64) -> StorageResult<()>;

    /// Lightweight probe used by the readiness endpoint.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Short backend identifier for logs.
    fn backend_name(&self) -> &'static str;
}

/// Stores each upload as a plain file on the local disk.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    /// Base directory on disk where upload payloads are stored.
    base_path: PathBuf,
}

impl LocalFileStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Generate two-level shard identifiers for an upload id.
    ///
    /// Uses MD5 of the decimal id and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn shards(id: i64) -> (String, String) {
        let digest = md5::compute(id.to_string());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Full path of the object for `id`. Parent directories may not exist yet.
    pub fn object_path(&self, id: i64) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.to_string());
        path
    }

    async fn open_for_read(&self, id: i64) -> StorageResult<File> {
        File::open(self.object_path(id))
            .await
            .map_err(|err| not_found_or_io(err, id))
    }

    /// Recursively remove empty shard directories up to the base path.
    ///
    /// Stops when the directory is not empty, is missing, or on other I/O errors.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn create_file(&self, id: i64) -> StorageResult<()> {
        let path = self.object_path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => StorageError::AlreadyExists(id),
                _ => StorageError::Io(err),
            })?;
        file.sync_all().await?;
        debug!("created storage object {}", path.display());
        Ok(())
    }

    #[instrument(skip(self, parts), fields(backend = "local"))]
    async fn write_chunk(&self, id: i64, parts: ByteStream, offset: u64) -> StorageResult<u64> {
        let path = self.object_path(id);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|err| not_found_or_io(err, id))?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut written: u64 = 0;
        let mut parts = parts;
        while let Some(part) = parts.next().await {
            let part = part?;
            file.write_all(&part).await?;
            written += part.len() as u64;
            // `part` is dropped here, so each buffer is released as soon as it is handed off.
        }
        file.flush().await?;
        file.sync_data().await?;

        debug!("wrote {} bytes at offset {} to {}", written, offset, path.display());
        Ok(written)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn merge_chunk(&self, id: i64, source_ids: &[i64], offset: u64) -> StorageResult<u64> {
        // Open every source up front so a missing fragment fails before anything is written.
        let mut sources = Vec::with_capacity(source_ids.len());
        for source_id in source_ids {
            sources.push(self.open_for_read(*source_id).await?);
        }

        let parts = stream::iter(sources)
            .map(|file| Ok::<_, io::Error>(ReaderStream::new(file)))
            .try_flatten();
        self.write_chunk(id, Box::pin(parts), offset).await
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn read_file(&self, id: i64) -> StorageResult<ByteStream> {
        let file = self.open_for_read(id).await?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete_file(&self, id: i64) -> StorageResult<()> {
        let path = self.object_path(id);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed storage object {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("storage object {} already missing", path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Write/read/delete a probe file under the base path.
    async fn health_check(&self) -> StorageResult<()> {
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::other("probe content mismatch")));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

fn not_found_or_io(err: io::Error, id: i64) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(id)
    } else {
        StorageError::Io(err)
    }
}

/// Collect a stream into a single contiguous buffer.
pub async fn collect_bytes(parts: ByteStream) -> io::Result<Bytes> {
    let buffers: Vec<Bytes> = parts.try_collect().await?;
    if buffers.len() == 1 {
        return Ok(buffers.into_iter().next().unwrap_or_default());
    }
    Ok(Bytes::from(buffers.concat()))
}

/// Wrap a single buffer as a [`ByteStream`].
pub fn single_buffer(bytes: Bytes) -> ByteStream {
    Box::pin(stream::once(async move { Ok(bytes) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        let items: Vec<io::Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Box::pin(stream::iter(items))
    }

    async fn read_all(storage: &LocalFileStorage, id: i64) -> Vec<u8> {
        collect_bytes(storage.read_file(id).await.unwrap())
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn create_allocates_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());

        storage.create_file(1).await.unwrap();
        assert!(storage.object_path(1).exists());
        assert!(read_all(&storage, 1).await.is_empty());
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());

        storage.create_file(1).await.unwrap();
        let err = storage.create_file(1).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(1)));
    }

    #[tokio::test]
    async fn chunks_written_at_offsets_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        storage.create_file(9).await.unwrap();

        let first = storage.write_chunk(9, chunks(&[b"hello ", b"wor"]), 0).await.unwrap();
        assert_eq!(first, 9);
        let second = storage.write_chunk(9, chunks(&[b"ld"]), 9).await.unwrap();
        assert_eq!(second, 2);

        assert_eq!(read_all(&storage, 9).await, b"hello world");
    }

    #[tokio::test]
    async fn rewrite_at_same_offset_overwrites_region() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        storage.create_file(2).await.unwrap();

        storage.write_chunk(2, chunks(&[b"aaaa"]), 0).await.unwrap();
        storage.write_chunk(2, chunks(&[b"bb"]), 0).await.unwrap();
        assert_eq!(read_all(&storage, 2).await, b"bbaa");
    }

    #[tokio::test]
    async fn write_to_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());

        let err = storage.write_chunk(5, chunks(&[b"x"]), 0).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(5)));
    }

    #[tokio::test]
    async fn stream_error_aborts_write() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        storage.create_file(3).await.unwrap();

        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ];
        let err = storage
            .write_chunk(3, Box::pin(stream::iter(items)), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[tokio::test]
    async fn merge_concatenates_sources_in_given_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        for id in [10, 11, 12] {
            storage.create_file(id).await.unwrap();
        }
        storage.write_chunk(10, chunks(&[b"first-"]), 0).await.unwrap();
        storage.write_chunk(11, chunks(&[b"second"]), 0).await.unwrap();

        let written = storage.merge_chunk(12, &[11, 10], 0).await.unwrap();
        assert_eq!(written, 12);
        assert_eq!(read_all(&storage, 12).await, b"secondfirst-");
    }

    #[tokio::test]
    async fn merge_with_missing_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        storage.create_file(20).await.unwrap();
        storage.create_file(21).await.unwrap();
        storage.write_chunk(20, chunks(&[b"data"]), 0).await.unwrap();

        let err = storage.merge_chunk(21, &[20, 99], 0).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(99)));
        assert!(read_all(&storage, 21).await.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_object_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        storage.create_file(4).await.unwrap();

        storage.delete_file(4).await.unwrap();
        assert!(!storage.object_path(4).exists());
        storage.delete_file(4).await.unwrap();

        let err = storage.read_file(4).await.err().unwrap();
        assert!(matches!(err, StorageError::NotFound(4)));
    }

    #[tokio::test]
    async fn health_check_passes_on_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        storage.health_check().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
