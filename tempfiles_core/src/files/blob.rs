//! Filesystem blob storage.
//!
//! Committed blobs live at `<root>/<id>`. Writes go to
//! `<root>/.partial/<id>.part` first and are linked into place once complete,
//! so a reader either sees the whole file or nothing. The partial directory is
//! inside the root to keep the link on one volume.

use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use futures_util::{pin_mut, Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::error::{AppError, Result};
use super::identity::is_valid_file_id;

const PARTIAL_DIR: &str = ".partial";
const PARTIAL_EXTENSION: &str = "part";

#[derive(Clone)]
pub struct BlobStore {
    root: Arc<PathBuf>,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(self.partial_dir()).await.map_err(|e| {
            AppError::Storage(format!(
                "failed to create {}: {}",
                self.partial_dir().display(),
                e
            ))
        })
    }

    /// Streams `stream` into the blob for `id`, failing with `TooLarge` as
    /// soon as more than `max_bytes` have arrived.
    pub async fn write<S, E>(&self, id: &str, stream: S, max_bytes: u64) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let final_path = self.blob_path(id)?;
        let partial = PartialBlob::new(self.partial_path(id));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial.path)
            .await
            .map_err(|e| {
                warn!(path = %partial.path.display(), error = %e, "blob_store: create partial failed");
                AppError::Storage(format!("failed to create partial blob: {}", e))
            })?;

        pin_mut!(stream);
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                debug!(id = %id, error = %e, "blob_store: upload stream failed");
                AppError::BadRequest(format!("Upload interrupted: {}", e))
            })?;

            if written + chunk.len() as u64 > max_bytes {
                debug!(id = %id, written, max_bytes, "blob_store: size cap exceeded");
                return Err(AppError::TooLarge { max_size: max_bytes });
            }

            file.write_all(&chunk).await.map_err(|e| {
                warn!(id = %id, error = %e, "blob_store: write failed");
                AppError::Storage(format!("failed to write blob: {}", e))
            })?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await.map_err(|e| {
            AppError::Storage(format!("failed to sync blob: {}", e))
        })?;
        drop(file);

        // A hard link never replaces an existing blob; the partial name is
        // unlinked when `partial` drops.
        fs::hard_link(&partial.path, &final_path).await.map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => {
                error!(id = %id, "blob_store: refusing to overwrite existing blob");
                AppError::Conflict(format!("Blob {} already exists", id))
            }
            _ => {
                warn!(from = %partial.path.display(), to = %final_path.display(), error = %e, "blob_store: commit failed");
                AppError::Storage(format!("failed to commit blob: {}", e))
            }
        })?;
        drop(partial);

        debug!(id = %id, size = written, "blob_store: blob committed");
        Ok(written)
    }

    pub async fn read(&self, id: &str) -> Result<(fs::File, u64)> {
        let path = self.blob_path(id)?;
        let file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AppError::NotFound(format!("Blob {} not found", id)),
            _ => AppError::Storage(format!("failed to open blob {}: {}", id, e)),
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.blob_path(id)?;
        fs::remove_file(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AppError::NotFound(format!("Blob {} not found", id)),
            _ => AppError::Storage(format!("failed to delete blob {}: {}", id, e)),
        })
    }

    pub async fn exists(&self, id: &str) -> bool {
        match self.blob_path(id) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Ids of every committed blob. Anything that is not a file id is ignored.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.root.as_path()).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_valid_file_id(name) {
                    ids.push(name.to_string());
                }
            }
        }

        Ok(ids)
    }

    /// Removes partial blobs left behind by an interrupted process.
    pub async fn purge_partials(&self) -> Result<u64> {
        let partial_dir = self.partial_dir();
        if !fs::try_exists(&partial_dir).await? {
            return Ok(0);
        }

        let mut removed = 0;
        let mut entries = fs::read_dir(&partial_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PARTIAL_EXTENSION) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "blob_store: failed to purge partial"),
            }
        }

        Ok(removed)
    }

    fn blob_path(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_file_id(id) {
            return Err(AppError::NotFound(format!("Invalid file id: {}", id)));
        }
        Ok(self.root.join(id))
    }

    fn partial_dir(&self) -> PathBuf {
        self.root.join(PARTIAL_DIR)
    }

    fn partial_path(&self, id: &str) -> PathBuf {
        self.partial_dir().join(format!("{}.{}", id, PARTIAL_EXTENSION))
    }
}

/// Removes the partial file on drop. Covers early returns, a write future
/// dropped mid-stream (client disconnect) and the leftover name after commit.
struct PartialBlob {
    path: PathBuf,
}

impl PartialBlob {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for PartialBlob {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "blob_store: failed to discard partial blob");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::identity::generate_file_id;
    use futures_util::stream;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    type Chunk = std::result::Result<Bytes, std::io::Error>;

    async fn create_store() -> (BlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path());
        store.initialize().await.unwrap();
        (store, temp_dir)
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Chunk> {
        let parts: Vec<Chunk> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(parts)
    }

    fn partial_count(store: &BlobStore) -> usize {
        std::fs::read_dir(store.partial_dir()).unwrap().count()
    }

    #[tokio::test]
    async fn test_write_and_read_blob() {
        let (store, _temp_dir) = create_store().await;
        let id = generate_file_id();

        let size = store.write(&id, chunks(&[b"hello", b"world"]), 100).await.unwrap();
        assert_eq!(size, 10);
        assert!(store.exists(&id).await);

        let (mut file, len) = store.read(&id).await.unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(len, 10);
        assert_eq!(content, b"helloworld");
        assert_eq!(partial_count(&store), 0);
    }

    #[tokio::test]
    async fn test_write_exactly_at_cap_succeeds() {
        let (store, _temp_dir) = create_store().await;
        let id = generate_file_id();

        let size = store.write(&id, chunks(&[b"12345"]), 5).await.unwrap();
        assert_eq!(size, 5);
    }

    #[tokio::test]
    async fn test_oversized_write_leaves_nothing_behind() {
        let (store, _temp_dir) = create_store().await;
        let id = generate_file_id();

        let result = store.write(&id, chunks(&[b"12345", b"6"]), 5).await;
        assert!(matches!(result, Err(AppError::TooLarge { max_size: 5 })));
        assert!(!store.exists(&id).await);
        assert_eq!(partial_count(&store), 0);
    }

    #[tokio::test]
    async fn test_stream_error_discards_partial() {
        let (store, _temp_dir) = create_store().await;
        let id = generate_file_id();

        let parts: Vec<Chunk> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ];
        let result = store.write(&id, stream::iter(parts), 100).await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(!store.exists(&id).await);
        assert_eq!(partial_count(&store), 0);
    }

    #[tokio::test]
    async fn test_dropped_write_discards_partial() {
        let (store, _temp_dir) = create_store().await;
        let id = generate_file_id();

        let endless = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"data"))])
            .chain(stream::pending());
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.write(&id, endless, 100),
        )
        .await;

        assert!(result.is_err());
        assert!(!store.exists(&id).await);
        assert_eq!(partial_count(&store), 0);
    }

    #[tokio::test]
    async fn test_second_write_to_same_id_is_refused() {
        let (store, _temp_dir) = create_store().await;
        let id = generate_file_id();
        store.write(&id, chunks(&[b"ORIGINAL"]), 100).await.unwrap();

        let second = store.write(&id, chunks(&[b"IMPOSTER"]), 100).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));

        let (mut file, len) = store.read(&id).await.unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(len, 8);
        assert_eq!(content, b"ORIGINAL");
        assert_eq!(partial_count(&store), 0);
    }

    #[tokio::test]
    async fn test_delete_reports_missing_blob() {
        let (store, _temp_dir) = create_store().await;
        let id = generate_file_id();
        store.write(&id, chunks(&[b"bye"]), 100).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(!store.exists(&id).await);

        let second = store.delete(&id).await;
        assert!(matches!(second, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_missing_and_invalid_ids() {
        let (store, _temp_dir) = create_store().await;

        assert!(matches!(store.read(&generate_file_id()).await, Err(AppError::NotFound(_))));
        assert!(matches!(store.read("../secret").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_ids_skips_partials_and_foreign_files() {
        let (store, temp_dir) = create_store().await;
        let id = generate_file_id();
        store.write(&id, chunks(&[b"x"]), 100).await.unwrap();

        std::fs::write(temp_dir.path().join("README"), b"not a blob").unwrap();
        std::fs::write(store.partial_path(&generate_file_id()), b"half").unwrap();

        let ids = store.list_ids().await.unwrap();
        assert_eq!(ids, vec![id]);
    }

    #[tokio::test]
    async fn test_purge_partials() {
        let (store, _temp_dir) = create_store().await;
        std::fs::write(store.partial_path(&generate_file_id()), b"half").unwrap();
        std::fs::write(store.partial_path(&generate_file_id()), b"half").unwrap();

        assert_eq!(store.purge_partials().await.unwrap(), 2);
        assert_eq!(partial_count(&store), 0);
    }
}
