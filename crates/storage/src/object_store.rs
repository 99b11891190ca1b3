//! Object storage interface over any `object_store` backend.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use object_store::{path::Path, ObjectMeta, ObjectStore};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};

/// Handle to one store root, e.g. `s3://noaa-nwm-retrospective-2-1-pds`.
///
/// Cheap to clone; clones share the underlying client.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    root: String,
    ordered_listing: bool,
}

impl fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("root", &self.root)
            .field("ordered_listing", &self.ordered_listing)
            .finish()
    }
}

impl ObjectStorage {
    pub fn new(root: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            root: root.into(),
            ordered_listing: true,
        }
    }

    /// Mark the backend as listing in no particular order (local
    /// filesystems, WebDAV).
    pub fn with_unordered_listing(mut self) -> Self {
        self.ordered_listing = false;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Whether [`ObjectStorage::list`] yields keys in lexicographic order.
    pub fn ordered_listing(&self) -> bool {
        self.ordered_listing
    }

    /// Full URL of a path inside this store.
    pub fn url(&self, path: &Path) -> String {
        format!("{}/{}", self.root.trim_end_matches('/'), path)
    }

    /// Write bytes to a path.
    #[instrument(skip(self, data), fields(root = %self.root, path = %path))]
    pub async fn put(&self, path: &Path, data: Bytes) -> StorageResult<()> {
        debug!(size = data.len(), "Writing object");

        self.store
            .put(path, data.into())
            .await
            .map_err(|e| StorageError::from_store(format!("Failed to write {}", path), e))?;

        Ok(())
    }

    /// Read a whole object.
    #[instrument(skip(self), fields(root = %self.root, path = %path))]
    pub async fn get(&self, path: &Path) -> StorageResult<Bytes> {
        let result = self
            .store
            .get(path)
            .await
            .map_err(|e| StorageError::from_store(format!("Failed to read {}", path), e))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::from_store(format!("Failed to read bytes of {}", path), e))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// Read the half-open byte range `range`.
    #[instrument(skip(self), fields(root = %self.root, path = %path))]
    pub async fn get_range(&self, path: &Path, range: Range<usize>) -> StorageResult<Bytes> {
        let expected = range.len();
        let bytes = self
            .store
            .get_range(path, range)
            .await
            .map_err(|e| StorageError::from_store(format!("Failed to read range of {}", path), e))?;

        if bytes.len() != expected {
            return Err(StorageError::Backend(format!(
                "Short read from {}: expected {} bytes, got {}",
                path,
                expected,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    pub async fn exists(&self, path: &Path) -> StorageResult<bool> {
        match self.store.head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::from_store(format!("Failed to check {}", path), e)),
        }
    }

    /// Stream every object under `prefix` in the store's listing order.
    ///
    /// Nothing is buffered; callers may stop consuming at any point.
    pub fn list(&self, prefix: &Path) -> BoxStream<'_, StorageResult<ObjectMeta>> {
        let context = self.url(prefix);
        self.store
            .list(Some(prefix))
            .map_err(move |e| StorageError::from_store(format!("List of {} failed", context), e))
            .boxed()
    }

    /// Collect every location under `prefix`.
    pub async fn list_paths(&self, prefix: &Path) -> StorageResult<Vec<Path>> {
        self.list(prefix).map_ok(|meta| meta.location).try_collect().await
    }

    #[instrument(skip(self), fields(root = %self.root, path = %path))]
    pub async fn delete(&self, path: &Path) -> StorageResult<()> {
        self.store
            .delete(path)
            .await
            .map_err(|e| StorageError::from_store(format!("Failed to delete {}", path), e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn memory() -> ObjectStorage {
        ObjectStorage::new("memory://test", Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn test_put_get_range() {
        let storage = memory();
        let path = Path::from("2020/2020010100.json");
        storage.put(&path, Bytes::from_static(b"0123456789")).await.unwrap();

        assert_eq!(storage.get(&path).await.unwrap(), Bytes::from_static(b"0123456789"));
        assert_eq!(storage.get_range(&path, 2..5).await.unwrap(), Bytes::from_static(b"234"));
        assert!(storage.exists(&path).await.unwrap());
        assert_eq!(storage.url(&path), "memory://test/2020/2020010100.json");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let storage = memory();
        let err = storage.get(&Path::from("nope")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!storage.exists(&Path::from("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_prefix() {
        let storage = memory();
        for key in ["2019/a.json", "2020/b.json", "2020/c.json", "20201/d.json"] {
            storage.put(&Path::from(key), Bytes::from_static(b"{}")).await.unwrap();
        }
        let mut listed = storage.list_paths(&Path::from("2020")).await.unwrap();
        listed.sort();
        assert_eq!(listed, vec![Path::from("2020/b.json"), Path::from("2020/c.json")]);
    }
}
