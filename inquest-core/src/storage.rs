//! Artifact sinks for finished reports.
//!
//! The local sink uses the atomic write pattern (write to `.tmp`, then rename)
//! so a crash never leaves a half-written report under its final key.

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::sync::PoisonError;
use tracing::info;

/// Destination for rendered reports.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist `content` under `key`.
    async fn store(&self, content: &str, key: &str, content_type: &str)
    -> Result<(), StorageError>;
}

/// Sidecar written next to every stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub key: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub stored_at: DateTime<Utc>,
}

/// Check that `key` is a relative path that stays inside the sink root.
pub fn validate_key(key: &str) -> Result<PathBuf, StorageError> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.trim().is_empty() {
        return Err(invalid("key is empty"));
    }
    let path = Path::new(key);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("key must not contain '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("key must be relative"));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(invalid("key names no file"));
    }
    Ok(relative)
}

/// Writes artifacts as files under a root directory.
pub struct LocalArtifactSink {
    root: PathBuf,
}

impl LocalArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `key` would be stored.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(validate_key(key)?))
    }
}

async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl ArtifactSink for LocalArtifactSink {
    async fn store(
        &self,
        content: &str,
        key: &str,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let write_err = |source| StorageError::Write {
            key: key.to_string(),
            source,
        };

        atomic_write(&path, content.as_bytes())
            .await
            .map_err(write_err)?;

        let meta = ArtifactMeta {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size_bytes: content.len(),
            stored_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| StorageError::Rejected {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let mut meta_path = path.as_os_str().to_owned();
        meta_path.push(".meta.json");
        atomic_write(Path::new(&meta_path), &json)
            .await
            .map_err(write_err)?;

        info!(key, path = %path.display(), bytes = content.len(), "Stored artifact");
        Ok(())
    }
}

/// Keeps artifacts in memory, for tests.
#[derive(Default)]
pub struct MemoryArtifactSink {
    artifacts: Mutex<HashMap<String, (String, String)>>,
    reject: bool,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that refuses every write.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    /// Content and content type stored under `key`.
    pub fn get(&self, key: &str) -> Option<(String, String)> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn store(
        &self,
        content: &str,
        key: &str,
        content_type: &str,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        if self.reject {
            return Err(StorageError::Rejected {
                key: key.to_string(),
                message: "sink is read-only".to_string(),
            });
        }
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                (content.to_string(), content_type.to_string()),
            );
        Ok(())
    }
}
