#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn metadata_root(tmp: &TempDir) -> PathBuf {
    tmp.path().join("meta")
}

pub fn stats_dir(tmp: &TempDir) -> PathBuf {
    tmp.path().join("stats")
}

/// Write `cube/<name>.json` with one segment `seg-1` and the given
/// `(measure, expression, return_type)` triples.
pub fn write_cube(meta: &Path, name: &str, measures: &[(&str, &str, &str)]) -> TestResult {
    let cube_dir = meta.join("cube");
    std::fs::create_dir_all(&cube_dir)?;

    let measures: Vec<_> = measures
        .iter()
        .map(|(measure, expression, return_type)| {
            json!({
                "name": measure,
                "function": { "expression": expression, "return_type": return_type }
            })
        })
        .collect();
    let descriptor = json!({
        "name": name,
        "measures": measures,
        "segments": [ { "uuid": "seg-1", "name": "20240101_20240201", "status": "NEW" } ]
    });

    std::fs::write(cube_dir.join(format!("{name}.json")), serde_json::to_vec_pretty(&descriptor)?)?;
    Ok(())
}

/// Write `cuboid_statistics.json` into `dir` with the given overlap ratio.
pub fn write_stats(dir: &Path, mapper_overlap_ratio: f64) -> TestResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("cuboid_statistics.json");
    let stats = json!({
        "sampling_percentage": 100,
        "mapper_count": 2,
        "mapper_overlap_ratio": mapper_overlap_ratio,
        "cuboid_row_estimates": { "3": 1200, "1": 40 }
    });
    std::fs::write(&path, serde_json::to_vec(&stats)?)?;
    Ok(path)
}
