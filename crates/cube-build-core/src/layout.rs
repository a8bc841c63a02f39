//! Resource key conventions for the metadata store.
//!
//! This module centralizes every *relative* key used by the build step:
//! - cube descriptors (`cube/<cube>.json`)
//! - ingested segment statistics (`cube_statistics/<cube>/<segment_id>.json`)
//! - job records (`execute/<job_id>.json`)
//! - the transient artifact name produced by the sampling phase
//!
//! Keys are returned as [`ResourcePath`] values; the storage layer joins
//! them with a store root before doing IO.

use std::path::{Path, PathBuf};

use snafu::prelude::*;

use crate::resource_store::{InvalidResourcePathSnafu, ResourcePath, StoreResult};

/// Directory holding one JSON descriptor per cube.
pub const CUBE_DIR_NAME: &str = "cube";

/// Directory holding ingested statistics, one subdirectory per cube.
pub const CUBE_STATISTICS_DIR_NAME: &str = "cube_statistics";

/// Directory holding one JSON record per cubing job.
pub const EXECUTE_DIR_NAME: &str = "execute";

/// Extension used for every JSON resource.
pub const JSON_EXT: &str = "json";

/// File name of the statistics artifact inside the transient statistics directory.
pub const CUBOID_STATISTICS_FILE_NAME: &str = "cuboid_statistics.json";

/// Reject identifiers that would not map to exactly one key component.
fn identifier(id: &str) -> StoreResult<&str> {
    ensure!(
        !id.is_empty() && id != "." && id != ".." && !id.contains(|c| c == '/' || c == '\\'),
        InvalidResourcePathSnafu {
            path: id.to_string(),
            reason: "identifier must be a single non-empty path component",
        }
    );
    Ok(id)
}

/// Relative directory: `cube/`
pub fn cube_rel_dir() -> PathBuf {
    PathBuf::from(CUBE_DIR_NAME)
}

/// Key: `cube/<cube>.json`
pub fn cube_descriptor_path(cube_name: &str) -> StoreResult<ResourcePath> {
    let cube_name = identifier(cube_name)?;
    ResourcePath::parse(&format!("{CUBE_DIR_NAME}/{cube_name}.{JSON_EXT}"))
}

/// Key: `cube_statistics/<cube>/<segment_id>.json`
pub fn statistics_resource_path(cube_name: &str, segment_id: &str) -> StoreResult<ResourcePath> {
    let cube_name = identifier(cube_name)?;
    let segment_id = identifier(segment_id)?;
    ResourcePath::parse(&format!(
        "{CUBE_STATISTICS_DIR_NAME}/{cube_name}/{segment_id}.{JSON_EXT}"
    ))
}

/// Key: `execute/<job_id>.json`
pub fn job_record_path(job_id: &str) -> StoreResult<ResourcePath> {
    let job_id = identifier(job_id)?;
    ResourcePath::parse(&format!("{EXECUTE_DIR_NAME}/{job_id}.{JSON_EXT}"))
}

/// Path of the statistics artifact under a transient statistics directory.
pub fn transient_artifact_path(statistics_dir: &Path) -> PathBuf {
    statistics_dir.join(CUBOID_STATISTICS_FILE_NAME)
}
