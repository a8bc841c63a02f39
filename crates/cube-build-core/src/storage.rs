//! Storage backend helpers.
//!
//! This module centralizes all filesystem access for `cube-build-core`. Both
//! the durable metadata store and the transient statistics area are expressed
//! as a [`StorageLocation`] root plus relative paths, so higher layers never
//! concatenate strings or touch `tokio::fs` directly.
//!
//! Provided operations:
//!
//! - Atomic write-then-rename ([`write_atomic`]) with a temp-file guard that
//!   cleans up on every error path.
//! - Whole-file reads ([`read_all_bytes`], [`read_to_string`]) that classify a
//!   missing file as [`StorageError::NotFound`].
//! - Existence probing ([`probe`]), recursive removal ([`remove`]) and
//!   directory listing ([`list_dir`]).
//!
//! Only the local filesystem is supported; other backends can be added as new
//! [`StorageLocation`] variants without changing callers.

use snafu::{Backtrace, prelude::*};
use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root of a storage backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
    // Future:
    // Hdfs { namenode: String, prefix: String },
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }

    /// Parse a user-facing location string.
    ///
    /// Only plain local paths (optionally prefixed with `file://`) are supported.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(BackendError::Local(io::Error::new(
                io::ErrorKind::InvalidInput,
                "storage location is empty",
            )))
            .context(OtherIoSnafu {
                path: "<empty location>".to_string(),
            });
        }

        let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        Ok(StorageLocation::local(path))
    }

    /// Resolve `rel` against this location into an absolute local path.
    ///
    /// An absolute `rel` replaces the root, following [`Path::join`].
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        join_local(self, rel)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local(root) => write!(f, "{}", root.display()),
        }
    }
}

/// Errors produced by the storage backend implementation.
///
/// Backend-specific I/O errors are wrapped in this enum so higher layers can
/// map them into [`StorageError`] variants with additional context.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error occurred on the local filesystem.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying backend I/O error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

impl StorageError {
    /// The path the failed operation was working on.
    pub fn path(&self) -> &str {
        match self {
            StorageError::NotFound { path, .. } | StorageError::OtherIo { path, .. } => path,
        }
    }
}

/// What a probed path turned out to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    /// A regular file with the given length in bytes.
    File {
        /// File length in bytes.
        len: u64,
    },
    /// A directory.
    Directory,
}

fn join_local(location: &StorageLocation, rel: &Path) -> PathBuf {
    match location {
        StorageLocation::Local(root) => root.join(rel),
    }
}

fn classify(e: io::Error, path: String) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        }
    } else {
        StorageError::OtherIo {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        }
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Call after a successful rename.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort; the caller is already returning the original error.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn tmp_path_for(abs: &Path) -> PathBuf {
    let mut name = abs
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    abs.with_file_name(name)
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// The payload is written to a temporary sibling file, synced, and renamed
/// into place. Parent directories are created as needed. Readers never observe
/// a partially written file.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);

            create_parent_dir(&abs).await?;

            let tmp_path = tmp_path_for(&abs);
            let mut guard = TempFileGuard::new(tmp_path.clone());

            {
                let mut file = fs::File::create(&tmp_path)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;

                file.write_all(contents)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;

                file.sync_all()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;
            }

            fs::rename(&tmp_path, &abs)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: abs.display().to_string(),
                })?;

            guard.disarm();

            Ok(())
        }
    }
}

/// Read the full contents of the file at `rel_path` within `location`.
///
/// A missing file yields [`StorageError::NotFound`]; any other failure is
/// reported as [`StorageError::OtherIo`].
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            fs::read(&abs)
                .await
                .map_err(|e| classify(e, abs.display().to_string()))
        }
    }
}

/// Read the file at `rel_path` within `location` as UTF-8 text.
pub async fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            fs::read_to_string(&abs)
                .await
                .map_err(|e| classify(e, abs.display().to_string()))
        }
    }
}

/// Inspect `rel_path` without opening it.
///
/// Returns `Ok(None)` when nothing exists at the path.
pub async fn probe(location: &StorageLocation, rel_path: &Path) -> StorageResult<Option<PathKind>> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            match fs::metadata(&abs).await {
                Ok(meta) if meta.is_dir() => Ok(Some(PathKind::Directory)),
                Ok(meta) => Ok(Some(PathKind::File { len: meta.len() })),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu {
                    path: abs.display().to_string(),
                }),
            }
        }
    }
}

/// Remove the file or directory at `rel_path`.
///
/// Directories are only removed when `recursive` is set; a non-recursive
/// removal of a non-empty directory fails with [`StorageError::OtherIo`].
pub async fn remove(location: &StorageLocation, rel_path: &Path, recursive: bool) -> StorageResult<()> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            let path_str = abs.display().to_string();

            let meta = fs::symlink_metadata(&abs)
                .await
                .map_err(|e| classify(e, path_str.clone()))?;

            let result = if meta.is_dir() {
                if recursive {
                    fs::remove_dir_all(&abs).await
                } else {
                    fs::remove_dir(&abs).await
                }
            } else {
                fs::remove_file(&abs).await
            };

            result.map_err(|e| classify(e, path_str))
        }
    }
}

/// List the names of regular files directly under `rel_dir`, sorted.
///
/// A missing directory lists as empty.
pub async fn list_dir(location: &StorageLocation, rel_dir: &Path) -> StorageResult<Vec<String>> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_dir);
            let path_str = abs.display().to_string();

            let mut entries = match fs::read_dir(&abs).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str });
                }
            };

            let mut names = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: path_str.clone(),
                })?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: entry.path().display().to_string(),
                    })?;
                if file_type.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }

            names.sort();
            Ok(names)
        }
    }
}
