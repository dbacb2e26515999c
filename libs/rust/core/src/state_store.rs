//! File-backed state documents.
//!
//! Each key is one pretty-printed JSON document under the state directory. Writes land in a
//! sibling temp file that is renamed over the target, so a reader sees either the old or the
//! new document, never a torn one. A document that fails to parse reads as absent.

use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Status,
    History,
    GlobalModel,
    Config,
    AuditLog,
}

impl StoreKey {
    pub const ALL: [StoreKey; 5] = [StoreKey::Status, StoreKey::History, StoreKey::GlobalModel, StoreKey::Config, StoreKey::AuditLog];

    pub fn file_name(self) -> &'static str {
        match self {
            StoreKey::Status => "status.json",
            StoreKey::History => "history.json",
            StoreKey::GlobalModel => "global_model.json",
            StoreKey::Config => "config.json",
            StoreKey::AuditLog => "audit_log.json",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state directory {path} is not writable: {source}")]
    Unavailable { path: PathBuf, #[source] source: io::Error },
    #[error("failed to {op} {key:?}: {source}")]
    Io { op: &'static str, key: StoreKey, #[source] source: io::Error },
    #[error("failed to encode {key:?}: {source}")]
    Encode { key: StoreKey, #[source] source: serde_json::Error },
}

/// Single writer (the coordinator), many readers. The lock makes multi-file operations
/// such as [`StateStore::reset`] appear atomic to readers.
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl StateStore {
    /// Opens (creating if needed) the state directory and proves it is writable.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let unavailable = |source| StoreError::Unavailable { path: root.clone(), source };
        fs::create_dir_all(&root).await.map_err(unavailable)?;
        let probe = root.join(".write-probe");
        fs::write(&probe, b"ok").await.map_err(unavailable)?;
        fs::remove_file(&probe).await.map_err(unavailable)?;
        debug!(path = %root.display(), "state_store_opened");
        Ok(Self { root, lock: RwLock::new(()) })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn path(&self, key: StoreKey) -> PathBuf { self.root.join(key.file_name()) }

    pub async fn read<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>, StoreError> {
        let _guard = self.lock.read().await;
        self.read_unlocked(key).await
    }

    /// Reads an append-only log; absent or corrupt logs read as empty.
    pub async fn read_log<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Vec<T>, StoreError> {
        Ok(self.read(key).await?.unwrap_or_default())
    }

    pub async fn write<T: Serialize>(&self, key: StoreKey, value: &T) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.write_unlocked(key, value).await
    }

    /// Appends to a log document and returns its new length.
    pub async fn append<T: Serialize + DeserializeOwned>(&self, key: StoreKey, entry: T) -> Result<usize, StoreError> {
        let _guard = self.lock.write().await;
        let mut log: Vec<T> = self.read_unlocked(key).await?.unwrap_or_default();
        log.push(entry);
        self.write_unlocked(key, &log).await?;
        Ok(log.len())
    }

    pub async fn reset(&self, keys: &[StoreKey]) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        for key in keys {
            match fs::remove_file(self.path(*key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::Io { op: "remove", key: *key, source }),
            }
        }
        Ok(())
    }

    async fn read_unlocked<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>, StoreError> {
        let bytes = match fs::read(self.path(key)).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { op: "read", key, source }),
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(?key, error = %e, "state_document_corrupt");
                Ok(None)
            }
        }
    }

    async fn write_unlocked<T: Serialize + ?Sized>(&self, key: StoreKey, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode { key, source })?;
        let target = self.path(key);
        let tmp = self.root.join(format!("{}.tmp", key.file_name()));
        let io_err = |op: &'static str| move |source: io::Error| StoreError::Io { op, key, source };
        let mut file = fs::File::create(&tmp).await.map_err(io_err("create"))?;
        file.write_all(&bytes).await.map_err(io_err("write"))?;
        // contents must be on disk before the rename makes them visible
        file.sync_all().await.map_err(io_err("sync"))?;
        drop(file);
        fs::rename(&tmp, &target).await.map_err(io_err("replace"))?;
        #[cfg(unix)]
        fs::File::open(&self.root).await.map_err(io_err("sync"))?.sync_all().await.map_err(io_err("sync"))?;
        Ok(())
    }
}
