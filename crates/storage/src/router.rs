//! URL based store routing.
//!
//! Reference descriptors point at chunks in arbitrary buckets and hosts, so
//! stores are created lazily per root and cached. Roots registered up front
//! (tests use `memory://` stores) take precedence.

use object_store::{
    aws::AmazonS3Builder, http::HttpBuilder, local::LocalFileSystem, path::Path, ObjectStore,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::object_store::ObjectStorage;

/// Options for S3 stores created on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Options {
    pub region: String,
    /// Custom endpoint (MinIO, LocalStack)
    pub endpoint: Option<String>,
    /// Skip request signing; public buckets such as the NOAA open data ones.
    pub anonymous: bool,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            anonymous: true,
            allow_http: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Resolves URLs to `(store, path)` pairs.
#[derive(Debug, Default)]
pub struct StoreRouter {
    s3: S3Options,
    stores: RwLock<HashMap<String, ObjectStorage>>,
}

impl StoreRouter {
    pub fn new(s3: S3Options) -> Self {
        Self {
            s3,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Serve every URL under `root` (e.g. `memory://catalog`) from `store`.
    pub fn register(&self, root: &str, store: Arc<dyn ObjectStore>) -> StorageResult<()> {
        let root = root.trim_end_matches('/').to_string();
        let mut stores = self
            .stores
            .write()
            .map_err(|_| StorageError::Backend("store registry lock poisoned".to_string()))?;
        stores.insert(root.clone(), ObjectStorage::new(root, store));
        Ok(())
    }

    /// Register a prepared storage handle under its own root.
    pub fn register_storage(&self, storage: ObjectStorage) -> StorageResult<()> {
        let mut stores = self
            .stores
            .write()
            .map_err(|_| StorageError::Backend("store registry lock poisoned".to_string()))?;
        stores.insert(storage.root().trim_end_matches('/').to_string(), storage);
        Ok(())
    }

    /// Split a URL into the store serving it and the path inside that store.
    ///
    /// Bare paths are treated as local files.
    pub fn resolve(&self, url: &str) -> StorageResult<(ObjectStorage, Path)> {
        let (root, key) = split_url(url)?;

        if let Some(storage) = self.cached(&root)? {
            return Ok((storage, Path::from(key)));
        }

        let storage = self.build(&root)?;
        debug!(root = %root, "Created object store");
        let mut stores = self
            .stores
            .write()
            .map_err(|_| StorageError::Backend("store registry lock poisoned".to_string()))?;
        let storage = stores.entry(root).or_insert(storage).clone();
        Ok((storage, Path::from(key)))
    }

    fn cached(&self, root: &str) -> StorageResult<Option<ObjectStorage>> {
        let stores = self
            .stores
            .read()
            .map_err(|_| StorageError::Backend("store registry lock poisoned".to_string()))?;
        Ok(stores.get(root).cloned())
    }

    fn build(&self, root: &str) -> StorageResult<ObjectStorage> {
        let mut ordered = true;
        let store: Arc<dyn ObjectStore> = if let Some(bucket) = root.strip_prefix("s3://") {
            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(bucket)
                .with_region(&self.s3.region);
            if let Some(endpoint) = &self.s3.endpoint {
                builder = builder.with_endpoint(endpoint);
            }
            if self.s3.allow_http {
                builder = builder.with_allow_http(true);
            }
            match (&self.s3.access_key_id, &self.s3.secret_access_key) {
                (Some(id), Some(secret)) if !self.s3.anonymous => {
                    builder = builder
                        .with_access_key_id(id)
                        .with_secret_access_key(secret);
                }
                _ => {
                    builder = builder.with_skip_signature(self.s3.anonymous);
                }
            }
            Arc::new(builder.build().map_err(|e| {
                StorageError::Backend(format!("Failed to create S3 client for {}: {}", root, e))
            })?)
        } else if root.starts_with("http://") || root.starts_with("https://") {
            ordered = false;
            Arc::new(HttpBuilder::new().with_url(root).build().map_err(|e| {
                StorageError::Backend(format!("Failed to create HTTP client for {}: {}", root, e))
            })?)
        } else if root == "file://" {
            ordered = false;
            Arc::new(LocalFileSystem::new())
        } else {
            return Err(StorageError::InvalidUrl(format!(
                "no store registered for {}",
                root
            )));
        };

        let storage = ObjectStorage::new(root, store);
        Ok(if ordered {
            storage
        } else {
            storage.with_unordered_listing()
        })
    }
}

/// `s3://bucket/a/b` -> (`s3://bucket`, `a/b`); `/tmp/x` -> (`file://`, `tmp/x`).
fn split_url(url: &str) -> StorageResult<(String, String)> {
    match url.split_once("://") {
        Some(("file", rest)) => Ok(("file://".to_string(), rest.trim_start_matches('/').to_string())),
        Some((scheme, rest)) => {
            let (authority, key) = rest.split_once('/').unwrap_or((rest, ""));
            if scheme.is_empty() || authority.is_empty() {
                return Err(StorageError::InvalidUrl(url.to_string()));
            }
            Ok((format!("{}://{}", scheme, authority), key.to_string()))
        }
        None if url.is_empty() => Err(StorageError::InvalidUrl(url.to_string())),
        None => Ok(("file://".to_string(), url.trim_start_matches('/').to_string())),
    }
}
