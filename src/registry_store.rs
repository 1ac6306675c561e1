//! Durable storage for the tracked-flight registry.
//!
//! The whole registry is written as one JSON document. Saves go to a sibling
//! `.tmp` file which is fsynced and then renamed over the live file, so a
//! crash at any point leaves either the previous or the new snapshot on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::flights::TrackedFlight;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt registry file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("registry file {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Backend the registry persists its full state to
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load every persisted entry; an absent store yields an empty list
    async fn load(&self) -> Result<Vec<TrackedFlight>, StoreError>;

    /// Durably replace the stored state with `flights`
    async fn save(&self, flights: &[TrackedFlight]) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistrySnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    flights: Vec<TrackedFlight>,
}

/// Single JSON file, rewritten atomically on every save
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Read the current snapshot without any cleanup. Safe to call while
    /// another process owns the file.
    pub async fn read(&self) -> Result<Vec<TrackedFlight>, StoreError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let snapshot: RegistrySnapshot =
            serde_json::from_slice(&contents).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.clone(),
                version: snapshot.version,
            });
        }

        debug!(
            "Loaded {} tracked flights from {} (saved at {})",
            snapshot.flights.len(),
            self.path.display(),
            snapshot.saved_at
        );
        Ok(snapshot.flights)
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<TrackedFlight>, StoreError> {
        // Leftover from a save interrupted before the rename; the live file is authoritative
        let tmp_path = self.tmp_path();
        if tokio::fs::try_exists(&tmp_path).await.unwrap_or(false) {
            warn!(
                "Removing incomplete registry write at {}",
                tmp_path.display()
            );
            if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
                warn!("Failed to remove {}: {}", tmp_path.display(), e);
            }
        }

        self.read().await
    }

    async fn save(&self, flights: &[TrackedFlight]) -> Result<(), StoreError> {
        let snapshot = RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            flights: flights.to_vec(),
        };
        let contents = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let tmp_path = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        file.write_all(&contents)
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        // Make the rename itself durable
        #[cfg(unix)]
        {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
                && let Ok(dir) = tokio::fs::File::open(parent).await
            {
                let _ = dir.sync_all().await;
            }
        }

        debug!(
            "Persisted {} tracked flights to {}",
            flights.len(),
            self.path.display()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
