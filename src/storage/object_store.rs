use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{debug, warn};

use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StorageFailure(err.to_string())
    }
}

/// Single-writer-per-file JSON persistence under a root path computed once
/// at startup. Writes go through a temp file and rename so readers observe
/// either the pre- or post-write snapshot, never a partial document.
pub struct ObjectStore {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::Io {
            path: root.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    async fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read a JSON document. Missing, empty, or corrupt files parse to
    /// `Value::Null` so startup tolerates partial writes from prior crashes.
    pub async fn read(&self, rel: &str) -> Value {
        let path = self.abs(rel);
        match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Value::Null,
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("corrupt document {}: {}", path.display(), e);
                Value::Null
            }),
            Err(_) => Value::Null,
        }
    }

    /// Typed read; `None` when the document is missing, corrupt, or does not
    /// match `T`.
    pub async fn read_as<T: DeserializeOwned>(&self, rel: &str) -> Option<T> {
        let value = self.read(rel).await;
        if value.is_null() {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// Atomic write: serialize to `<path>.tmp`, then rename over the target.
    /// Transient I/O failures are retried with exponential backoff before
    /// surfacing as a storage failure.
    pub async fn write<T: Serialize>(&self, rel: &str, value: &T) -> Result<(), StoreError> {
        let path = self.abs(rel);
        let lock = self.file_lock(&path).await;
        let _guard = lock.lock().await;

        let bytes = serde_json::to_vec_pretty(value)?;
        let strategy = ExponentialBackoff::from_millis(20).take(2);
        Retry::spawn(strategy, || async {
            write_atomic(&path, &bytes).map_err(|e| {
                debug!("write retrying for {}: {}", path.display(), e);
                e
            })
        })
        .await
        .map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// File names (not paths) directly under a directory.
    pub async fn list(&self, rel_dir: &str) -> Vec<String> {
        let dir = self.abs(rel_dir);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .filter(|n| !n.ends_with(".tmp"))
            .collect();
        names.sort();
        names
    }

    pub async fn remove(&self, rel: &str) -> Result<(), StoreError> {
        let path = self.abs(rel);
        let lock = self.file_lock(&path).await;
        let _guard = lock.lock().await;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    pub async fn remove_tree(&self, rel: &str) -> Result<(), StoreError> {
        let path = self.abs(rel);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
