//! Durable metadata store.
//!
//! The build step persists two kinds of resources: ingested segment
//! statistics and job records. Both go through the [`ResourceStore`] trait so
//! the step can be wired to any backend; [`LocalResourceStore`] keeps them
//! under a local directory.
//!
//! ## On-disk layout (local backend)
//!
//! ```text
//! metadata_root/
//!   cube/sales.json
//!   cube_statistics/sales/<segment_id>.json        # resource content
//!   cube_statistics/sales/<segment_id>.json.meta   # {"timestamp": ..., "len": ...}
//!   execute/<job_id>.json
//! ```
//!
//! The `.meta` sidecar is written first and the content second, both
//! atomically, so the content rename is the only point where a write becomes
//! visible. A sidecar whose `len` disagrees with the content is stale and is
//! ignored. A resource whose sidecar is missing or stale is still readable;
//! its timestamp then falls back to the content file's modification time.

use std::{fmt, path::Path};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::storage::{self, StorageError, StorageLocation};

/// Suffix of the sidecar that stores per-resource metadata.
pub const META_SUFFIX: &str = ".meta";

/// Result alias for metadata store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`ResourceStore`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The resource key is not a well-formed relative path.
    #[snafu(display("Invalid resource path {path:?}: {reason}"))]
    InvalidResourcePath {
        /// The rejected key.
        path: String,
        /// Why the key was rejected.
        reason: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Backend failure while reading or writing a resource.
    #[snafu(display("Storage error on resource {key}: {source}"))]
    Storage {
        /// The resource key being accessed.
        key: String,
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// A stored resource or its sidecar could not be decoded.
    #[snafu(display("Corrupt resource {key}: {msg}"))]
    CorruptResource {
        /// The resource key.
        key: String,
        /// Description of the problem.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

/// Validated key of a resource in the metadata store.
///
/// Keys are `/`-separated relative paths. A single leading `/` is accepted and
/// dropped; empty, `.` and `..` components are rejected, as are keys ending in
/// [`META_SUFFIX`] (reserved for sidecars).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Validate and normalize a resource key.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let key = raw.strip_prefix('/').unwrap_or(raw);

        ensure!(
            !key.is_empty(),
            InvalidResourcePathSnafu {
                path: raw,
                reason: "key is empty",
            }
        );
        ensure!(
            !key.contains('\\'),
            InvalidResourcePathSnafu {
                path: raw,
                reason: "key must use '/' separators",
            }
        );
        ensure!(
            key.split('/').all(|c| !c.is_empty() && c != "." && c != ".."),
            InvalidResourcePathSnafu {
                path: raw,
                reason: "key has an empty, '.' or '..' component",
            }
        );
        ensure!(
            !key.ends_with(META_SUFFIX),
            InvalidResourcePathSnafu {
                path: raw,
                reason: "keys ending in '.meta' are reserved",
            }
        );

        Ok(ResourcePath(key.to_string()))
    }

    /// The normalized key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn rel_path(&self) -> &Path {
        Path::new(&self.0)
    }

    fn meta_rel_path(&self) -> String {
        format!("{}{META_SUFFIX}", self.0)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A resource read back from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    /// Raw content.
    pub content: Bytes,
    /// Write timestamp recorded by `put_resource`.
    pub timestamp: DateTime<Utc>,
}

/// Sidecar metadata persisted next to each resource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceMeta {
    /// Write timestamp supplied by the writer.
    pub timestamp: DateTime<Utc>,
    /// Content length in bytes.
    pub len: u64,
}

/// Key/value store holding durable build metadata.
///
/// Implementations must make `put_resource` all-or-nothing from the point of
/// view of readers: an `Err` means no new content is visible.
#[async_trait]
pub trait ResourceStore: Send + Sync + fmt::Debug {
    /// Store `content` under `key`, replacing any previous value.
    async fn put_resource(
        &self,
        key: &ResourcePath,
        content: Bytes,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Fetch the resource under `key`, or `None` when absent.
    async fn get_resource(&self, key: &ResourcePath) -> StoreResult<Option<Resource>>;

    /// Whether a resource exists under `key`.
    async fn exists(&self, key: &ResourcePath) -> StoreResult<bool>;
}

/// [`ResourceStore`] backed by a local directory.
#[derive(Clone, Debug)]
pub struct LocalResourceStore {
    location: StorageLocation,
}

impl LocalResourceStore {
    /// Create a store rooted at `location`.
    pub fn new(location: StorageLocation) -> Self {
        Self { location }
    }

    async fn fallback_timestamp(&self, key: &ResourcePath) -> StoreResult<DateTime<Utc>> {
        let abs = self.location.resolve(key.rel_path());
        let modified = tokio::fs::metadata(&abs)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| {
                CorruptResourceSnafu {
                    key: key.as_str(),
                    msg: format!("missing sidecar and no modification time: {e}"),
                }
                .build()
            })?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

#[async_trait]
impl ResourceStore for LocalResourceStore {
    async fn put_resource(
        &self,
        key: &ResourcePath,
        content: Bytes,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let meta = ResourceMeta {
            timestamp,
            len: content.len() as u64,
        };
        let json = serde_json::to_vec(&meta).map_err(|e| {
            CorruptResourceSnafu {
                key: key.as_str(),
                msg: format!("failed to encode sidecar: {e}"),
            }
            .build()
        })?;

        let meta_path = key.meta_rel_path();
        storage::write_atomic(&self.location, Path::new(&meta_path), &json)
            .await
            .context(StorageSnafu { key: key.as_str() })?;

        if let Err(source) = storage::write_atomic(&self.location, key.rel_path(), &content).await {
            if let Err(e) = storage::remove(&self.location, Path::new(&meta_path), false).await {
                warn!("failed to roll back sidecar {meta_path} after a failed write: {e}");
            }
            return Err(StoreError::Storage {
                key: key.to_string(),
                source,
            });
        }

        Ok(())
    }

    async fn get_resource(&self, key: &ResourcePath) -> StoreResult<Option<Resource>> {
        let content = match storage::read_all_bytes(&self.location, key.rel_path()).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(source) => {
                return Err(StoreError::Storage {
                    key: key.to_string(),
                    source,
                });
            }
        };

        let timestamp =
            match storage::read_to_string(&self.location, Path::new(&key.meta_rel_path())).await {
                Ok(json) => {
                    let meta: ResourceMeta = serde_json::from_str(&json).map_err(|e| {
                        CorruptResourceSnafu {
                            key: key.as_str(),
                            msg: format!("failed to parse sidecar: {e}"),
                        }
                        .build()
                    })?;
                    if meta.len == content.len() as u64 {
                        meta.timestamp
                    } else {
                        debug!("ignoring stale sidecar for {key}");
                        self.fallback_timestamp(key).await?
                    }
                }
                Err(StorageError::NotFound { .. }) => self.fallback_timestamp(key).await?,
                Err(source) => {
                    return Err(StoreError::Storage {
                        key: key.to_string(),
                        source,
                    });
                }
            };

        Ok(Some(Resource { content, timestamp }))
    }

    async fn exists(&self, key: &ResourcePath) -> StoreResult<bool> {
        let kind = storage::probe(&self.location, key.rel_path())
            .await
            .context(StorageSnafu { key: key.as_str() })?;
        Ok(matches!(kind, Some(storage::PathKind::File { .. })))
    }
}
