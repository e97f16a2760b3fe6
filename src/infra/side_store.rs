//! Snapshot side stores: a bounded in-memory LRU and a directory of JSON files.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use tokio::fs;
use tracing::debug;

use crate::application::repos::{SideStore, SideStoreError};
use crate::domain::entities::SnapshotRecord;

/// Process-local side store. Evicts least recently used records beyond its
/// capacity.
pub struct MemorySideStore {
    records: Mutex<LruCache<String, SnapshotRecord>>,
}

impl MemorySideStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, SnapshotRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl SideStore for MemorySideStore {
    async fn read(&self, id: &str) -> Result<Option<SnapshotRecord>, SideStoreError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn write(&self, id: &str, record: SnapshotRecord) -> Result<(), SideStoreError> {
        self.lock().put(id.to_string(), record);
        Ok(())
    }

    async fn clear(&self) -> Result<(), SideStoreError> {
        self.lock().clear();
        Ok(())
    }
}

/// Durable side store keeping one JSON file per profile.
///
/// File names are the hex-encoded profile id, so any id maps to a safe name.
/// Writes go to a temporary file first and are renamed into place.
#[derive(Debug)]
pub struct FileSideStore {
    root: PathBuf,
}

const SNAPSHOT_EXTENSION: &str = "json";

impl FileSideStore {
    /// Open a store rooted at `root`, creating the directory if necessary.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root
            .join(format!("{}.{SNAPSHOT_EXTENSION}", hex::encode(id.as_bytes())))
    }
}

#[async_trait]
impl SideStore for FileSideStore {
    async fn read(&self, id: &str) -> Result<Option<SnapshotRecord>, SideStoreError> {
        let bytes = match fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write(&self, id: &str, record: SnapshotRecord) -> Result<(), SideStoreError> {
        let payload = serde_json::to_vec(&record)?;
        let target = self.path_for(id);
        let staging = target.with_extension("tmp");

        fs::create_dir_all(&self.root).await?;
        fs::write(&staging, payload).await?;
        if let Err(err) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), SideStoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == SNAPSHOT_EXTENSION || ext == "tmp");
            if !is_snapshot {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        debug!(root = %self.root.display(), removed, "Snapshot directory cleared");
        Ok(())
    }
}
