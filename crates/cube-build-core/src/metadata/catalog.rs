//! Cube catalog: resolves `(cube name, segment id)` to a [`SegmentHandle`].
//!
//! The catalog is read-only from the build step's point of view. Lookups are
//! synchronous; [`LocalCubeCatalog::load`] does the IO up front by reading
//! every `cube/*.json` descriptor under a metadata root.

use std::{collections::BTreeMap, fmt, path::Path, sync::Arc};

use log::{info, warn};
use snafu::{Backtrace, prelude::*};

use crate::{
    layout::{JSON_EXT, cube_descriptor_path, cube_rel_dir},
    metadata::cube::{CubeInstance, SegmentHandle},
    storage::{self, StorageError, StorageLocation},
};

/// Segment resolution failures. Both are integrity problems, not transient.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ResolveError {
    /// No cube with the requested name.
    #[snafu(display("Cube {cube} not found (known cubes: [{}])", known.join(",")))]
    UnknownCube {
        /// Requested cube name.
        cube: String,
        /// Names of the cubes the catalog does know.
        known: Vec<String>,
    },

    /// The cube exists but has no segment with the requested id.
    #[snafu(display(
        "Segment {segment} not found in cube {cube} (known segments: [{}])",
        known.join(",")
    ))]
    UnknownSegment {
        /// Cube that was searched.
        cube: String,
        /// Requested segment id.
        segment: String,
        /// Ids of the cube's segments.
        known: Vec<String>,
    },
}

/// Errors raised while loading a catalog from storage.
#[derive(Debug, Snafu)]
pub enum CatalogError {
    /// Listing or reading descriptor files failed.
    #[snafu(display("Storage error while loading cube catalog: {source}"))]
    CatalogStorage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// A descriptor file is not a valid cube JSON document.
    #[snafu(display("Invalid cube descriptor {file}: {source}"))]
    InvalidDescriptor {
        /// Descriptor file name.
        file: String,
        /// JSON decoding error.
        source: serde_json::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Two descriptor files declare the same cube name.
    #[snafu(display("Cube {cube} is declared by both {first} and {second}"))]
    DuplicateCube {
        /// The duplicated cube name.
        cube: String,
        /// Descriptor file loaded first.
        first: String,
        /// Descriptor file that collided with it.
        second: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

/// Read surface over cube descriptors.
pub trait CubeCatalog: Send + Sync + fmt::Debug {
    /// Look up a cube by name.
    fn cube(&self, name: &str) -> Option<Arc<CubeInstance>>;

    /// Names of all known cubes, sorted.
    fn cube_names(&self) -> Vec<String>;

    /// Resolve the build target.
    ///
    /// Failures log the candidates that were available so operators can spot
    /// typos or stale job parameters.
    fn resolve_segment(&self, cube_name: &str, segment_id: &str) -> Result<SegmentHandle, ResolveError> {
        let Some(cube) = self.cube(cube_name) else {
            let known = self.cube_names();
            info!("target cube name: {cube_name}, cube list: {}", known.join(","));
            return UnknownCubeSnafu {
                cube: cube_name,
                known,
            }
            .fail();
        };

        let Some(segment) = cube.segment_by_id(segment_id).cloned() else {
            let known: Vec<String> = cube.segments.iter().map(|s| s.uuid.clone()).collect();
            info!("target segment id: {segment_id}, segment list: {}", known.join(","));
            return UnknownSegmentSnafu {
                cube: cube_name,
                segment: segment_id,
                known,
            }
            .fail();
        };

        Ok(SegmentHandle { cube, segment })
    }
}

/// Catalog held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCubeCatalog {
    cubes: BTreeMap<String, Arc<CubeInstance>>,
}

impl InMemoryCubeCatalog {
    /// Build a catalog from descriptors; later duplicates replace earlier ones.
    pub fn new(cubes: impl IntoIterator<Item = CubeInstance>) -> Self {
        let mut catalog = Self::default();
        for cube in cubes {
            catalog.insert(cube);
        }
        catalog
    }

    /// Add or replace a cube.
    pub fn insert(&mut self, cube: CubeInstance) {
        self.cubes.insert(cube.name.clone(), Arc::new(cube));
    }
}

impl CubeCatalog for InMemoryCubeCatalog {
    fn cube(&self, name: &str) -> Option<Arc<CubeInstance>> {
        self.cubes.get(name).cloned()
    }

    fn cube_names(&self) -> Vec<String> {
        self.cubes.keys().cloned().collect()
    }
}

/// Catalog loaded from `cube/*.json` under a metadata root.
#[derive(Clone, Debug)]
pub struct LocalCubeCatalog {
    inner: InMemoryCubeCatalog,
}

impl LocalCubeCatalog {
    /// Read every cube descriptor under `location`.
    ///
    /// A missing `cube/` directory yields an empty catalog. Two descriptors
    /// declaring the same cube name are rejected as [`CatalogError::DuplicateCube`].
    pub async fn load(location: StorageLocation) -> Result<Self, CatalogError> {
        let dir = cube_rel_dir();
        let names = storage::list_dir(&location, &dir)
            .await
            .context(CatalogStorageSnafu)?;

        let mut inner = InMemoryCubeCatalog::default();
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for file in names {
            if !file.ends_with(&format!(".{JSON_EXT}")) {
                continue;
            }

            let json = storage::read_to_string(&location, &dir.join(Path::new(&file)))
                .await
                .context(CatalogStorageSnafu)?;
            let cube: CubeInstance =
                serde_json::from_str(&json).context(InvalidDescriptorSnafu { file: file.clone() })?;

            let canonical = cube_descriptor_path(&cube.name)
                .is_ok_and(|key| key.rel_path() == dir.join(&file));
            if !canonical {
                warn!("cube descriptor {file} declares name {}; indexing by declared name", cube.name);
            }
            if let Some(first) = seen.insert(cube.name.clone(), file.clone()) {
                return DuplicateCubeSnafu {
                    cube: cube.name,
                    first,
                    second: file,
                }
                .fail();
            }
            inner.insert(cube);
        }

        Ok(Self { inner })
    }
}

impl CubeCatalog for LocalCubeCatalog {
    fn cube(&self, name: &str) -> Option<Arc<CubeInstance>> {
        self.inner.cube(name)
    }

    fn cube_names(&self) -> Vec<String> {
        self.inner.cube_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::cube::{CubeSegment, SegmentStatus};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sales_cube() -> CubeInstance {
        CubeInstance {
            name: "sales".to_string(),
            measures: vec![],
            segments: vec![CubeSegment {
                uuid: "seg-1".to_string(),
                name: "20240101_20240201".to_string(),
                status: SegmentStatus::New,
            }],
        }
    }

    #[test]
    fn resolve_segment_finds_target() {
        let catalog = InMemoryCubeCatalog::new([sales_cube()]);

        let handle = catalog.resolve_segment("sales", "seg-1").expect("resolves");
        assert_eq!(handle.cube_name(), "sales");
        assert_eq!(handle.id(), "seg-1");
    }

    #[test]
    fn unknown_cube_reports_known_cubes() {
        let catalog = InMemoryCubeCatalog::new([sales_cube()]);

        let err = catalog.resolve_segment("orders", "seg-1").expect_err("unknown cube");
        match &err {
            ResolveError::UnknownCube { cube, known } => {
                assert_eq!(cube, "orders");
                assert_eq!(known, &vec!["sales".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("known cubes: [sales]"));
    }

    #[test]
    fn unknown_segment_reports_known_segments() {
        let catalog = InMemoryCubeCatalog::new([sales_cube()]);

        let err = catalog.resolve_segment("sales", "seg-9").expect_err("unknown segment");
        assert!(matches!(
            &err,
            ResolveError::UnknownSegment { segment, known, .. }
                if segment == "seg-9" && known == &vec!["seg-1".to_string()]
        ));
    }

    #[tokio::test]
    async fn local_catalog_loads_descriptors() -> TestResult {
        let tmp = TempDir::new()?;
        let cube_dir = tmp.path().join("cube");
        tokio::fs::create_dir_all(&cube_dir).await?;
        tokio::fs::write(cube_dir.join("sales.json"), serde_json::to_vec(&sales_cube())?).await?;
        tokio::fs::write(cube_dir.join("sales.json.meta"), b"{}").await?;
        tokio::fs::write(cube_dir.join("README"), b"ignored").await?;

        let catalog = LocalCubeCatalog::load(StorageLocation::local(tmp.path())).await?;

        assert_eq!(catalog.cube_names(), vec!["sales".to_string()]);
        assert!(catalog.resolve_segment("sales", "seg-1").is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn local_catalog_rejects_invalid_descriptor() -> TestResult {
        let tmp = TempDir::new()?;
        let cube_dir = tmp.path().join("cube");
        tokio::fs::create_dir_all(&cube_dir).await?;
        tokio::fs::write(cube_dir.join("broken.json"), b"{ not json").await?;

        let err = LocalCubeCatalog::load(StorageLocation::local(tmp.path()))
            .await
            .expect_err("invalid descriptor");
        assert!(matches!(err, CatalogError::InvalidDescriptor { ref file, .. } if file == "broken.json"));
        Ok(())
    }

    #[tokio::test]
    async fn local_catalog_rejects_two_descriptors_for_one_cube() -> TestResult {
        let tmp = TempDir::new()?;
        let cube_dir = tmp.path().join("cube");
        tokio::fs::create_dir_all(&cube_dir).await?;
        let json = serde_json::to_vec(&sales_cube())?;
        tokio::fs::write(cube_dir.join("sales.json"), &json).await?;
        tokio::fs::write(cube_dir.join("sales_copy.json"), &json).await?;

        let err = LocalCubeCatalog::load(StorageLocation::local(tmp.path()))
            .await
            .expect_err("duplicate cube");
        assert!(matches!(
            err,
            CatalogError::DuplicateCube { ref cube, ref first, ref second, .. }
                if cube == "sales" && first == "sales.json" && second == "sales_copy.json"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn local_catalog_without_cube_dir_is_empty() -> TestResult {
        let tmp = TempDir::new()?;

        let catalog = LocalCubeCatalog::load(StorageLocation::local(tmp.path())).await?;

        assert!(catalog.cube_names().is_empty());
        Ok(())
    }
}
