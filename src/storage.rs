//! Durable blob storage seam.
//!
//! The replica tier only needs get/put by name; whatever the deployment
//! actually uses (object store, database, disk) hides behind [`BlobStorage`].
//! A filesystem implementation is provided for single-node deployments and
//! an in-memory one for tests and embedders.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Async get/put-by-name key-value storage for opaque byte blobs.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Fetches a blob, or `None` if no blob with that name exists.
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Stores a blob, overwriting any previous blob with the same name.
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Blob storage backed by files under a root directory.
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStorage { root: root.into() }
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read blob {:?}", path)),
        }
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create blob root {:?}", self.root))?;
        let path = self.blob_path(name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write blob {:?}", path))?;
        Ok(())
    }
}

/// In-memory blob storage.
///
/// `fail_put_after` lets tests inject a single write failure at a chosen
/// point, e.g. to verify the replica's database-before-metadata write
/// ordering survives a crash between the two writes.
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    /// Successful puts remaining before one injected failure.
    fail_after: Mutex<Option<u32>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `put` fail with an injected error.
    pub fn fail_next_put(&self) {
        self.fail_put_after(0);
    }

    /// Lets `successes` more puts succeed, then fails the one after.
    pub fn fail_put_after(&self, successes: u32) {
        *self.fail_after.lock().expect("storage lock poisoned") = Some(successes);
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .expect("storage lock poisoned")
            .get(name)
            .cloned())
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        {
            let mut fail = self.fail_after.lock().expect("storage lock poisoned");
            match *fail {
                Some(0) => {
                    *fail = None;
                    anyhow::bail!("injected storage failure writing {}", name);
                }
                Some(n) => *fail = Some(n - 1),
                None => {}
            }
        }

        self.blobs
            .lock()
            .expect("storage lock poisoned")
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}
