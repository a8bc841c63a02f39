//! Statistics ingestion: move a transient artifact into the metadata store.
//!
//! The transient copy is deleted only after the store confirmed the write.
//! A failed write therefore always leaves the artifact in place for a retry,
//! and a failed delete after a successful write is logged and ignored.

use std::{fmt, path::Path};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use snafu::prelude::*;

use crate::{
    resource_store::{ResourcePath, ResourceStore, StoreError},
    storage::{self, StorageError, StorageLocation, StorageResult},
};

/// Errors raised while ingesting a statistics artifact.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IngestError {
    /// Nothing exists at the transient path.
    #[snafu(display("File {path} does not exist"))]
    MissingArtifact {
        /// Transient artifact path.
        path: String,
    },

    /// The transient artifact could not be probed or read.
    #[snafu(display("Cannot read statistics artifact {path}: {source}"))]
    ReadArtifact {
        /// Transient artifact path.
        path: String,
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// The metadata store rejected the write.
    #[snafu(display("Cannot store statistics under {key}: {source}"))]
    WriteResource {
        /// Destination key.
        key: String,
        /// Underlying store error.
        #[snafu(backtrace)]
        source: StoreError,
    },
}

/// Storage area holding artifacts produced by the sampling phase.
#[async_trait]
pub trait TransientStorage: Send + Sync + fmt::Debug {
    /// Whether anything exists at `path`.
    async fn exists(&self, path: &Path) -> StorageResult<bool>;

    /// Read the whole file at `path`.
    async fn read_all(&self, path: &Path) -> StorageResult<Bytes>;

    /// Remove `path`; directories only when `recursive` is set.
    async fn delete(&self, path: &Path, recursive: bool) -> StorageResult<()>;
}

/// [`TransientStorage`] on the local filesystem.
///
/// Relative paths resolve against the root; absolute paths are used as is.
#[derive(Clone, Debug)]
pub struct LocalTransientStorage {
    location: StorageLocation,
}

impl LocalTransientStorage {
    /// Create transient storage rooted at `location`.
    pub fn new(location: StorageLocation) -> Self {
        Self { location }
    }
}

#[async_trait]
impl TransientStorage for LocalTransientStorage {
    async fn exists(&self, path: &Path) -> StorageResult<bool> {
        Ok(storage::probe(&self.location, path).await?.is_some())
    }

    async fn read_all(&self, path: &Path) -> StorageResult<Bytes> {
        storage::read_all_bytes(&self.location, path)
            .await
            .map(Bytes::from)
    }

    async fn delete(&self, path: &Path, recursive: bool) -> StorageResult<()> {
        storage::remove(&self.location, path, recursive).await
    }
}

/// Outcome of a successful ingest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReport {
    /// Key the statistics were stored under.
    pub key: ResourcePath,
    /// Number of bytes moved.
    pub bytes: u64,
    /// Write timestamp passed to the store.
    pub timestamp: DateTime<Utc>,
    /// The ingested content, for callers that need to decode it.
    pub content: Bytes,
    /// Whether the transient copy was removed.
    pub transient_deleted: bool,
}

/// Moves statistics artifacts from transient storage into a [`ResourceStore`].
#[derive(Debug)]
pub struct StatisticsIngestor<'a> {
    transient: &'a dyn TransientStorage,
}

impl<'a> StatisticsIngestor<'a> {
    /// Create an ingestor reading from `transient`.
    pub fn new(transient: &'a dyn TransientStorage) -> Self {
        Self { transient }
    }

    /// Copy the artifact at `transient_path` under `key` in `store`, then
    /// delete the transient copy (recursively).
    pub async fn ingest(
        &self,
        transient_path: &Path,
        key: &ResourcePath,
        store: &dyn ResourceStore,
    ) -> Result<IngestReport, IngestError> {
        let path = transient_path.display().to_string();

        let present = self
            .transient
            .exists(transient_path)
            .await
            .context(ReadArtifactSnafu { path: path.clone() })?;
        ensure!(present, MissingArtifactSnafu { path: path.clone() });

        let content = self
            .transient
            .read_all(transient_path)
            .await
            .context(ReadArtifactSnafu { path: path.clone() })?;

        let timestamp = Utc::now();
        store
            .put_resource(key, content.clone(), timestamp)
            .await
            .context(WriteResourceSnafu { key: key.as_str() })?;
        info!("stored {} bytes of statistics from {path} under {key}", content.len());

        let transient_deleted = match self.transient.delete(transient_path, true).await {
            Ok(()) => {
                debug!("deleted transient statistics artifact {path}");
                true
            }
            Err(e) => {
                warn!("statistics stored under {key} but transient artifact {path} was not deleted: {e}");
                false
            }
        };

        Ok(IngestReport {
            key: key.clone(),
            bytes: content.len() as u64,
            timestamp,
            content,
            transient_deleted,
        })
    }
}
