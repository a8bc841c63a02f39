//! Integration tests for `cubebuild save-stats`.

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

mod common;

use common::{TestResult, metadata_root, stats_dir, write_cube, write_stats};

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("cubebuild"))
}

fn save_stats_args(tmp: &TempDir, cube: &str, segment: &str) -> Vec<String> {
    vec![
        "save-stats".to_string(),
        "--metadata".to_string(),
        metadata_root(tmp).to_string_lossy().into_owned(),
        "--cube".to_string(),
        cube.to_string(),
        "--segment".to_string(),
        segment.to_string(),
        "--stats-path".to_string(),
        stats_dir(tmp).to_string_lossy().into_owned(),
        "--job".to_string(),
        "job-1".to_string(),
    ]
}

fn recorded_algorithm(tmp: &TempDir) -> TestResult<Option<String>> {
    let record = std::fs::read(metadata_root(tmp).join("execute/job-1.json"))?;
    let record: serde_json::Value = serde_json::from_slice(&record)?;
    Ok(record["algorithm"].as_str().map(str::to_string))
}

#[test]
fn save_stats_ingests_and_records_in_memory_below_threshold() -> TestResult {
    let tmp = TempDir::new()?;
    write_cube(&metadata_root(&tmp), "sales", &[("GMV", "SUM", "decimal(19,4)")])?;
    let artifact = write_stats(&stats_dir(&tmp), 1.5)?;

    cli()
        .args(save_stats_args(&tmp, "sales", "seg-1"))
        .assert()
        .success()
        .stdout(contains("cube algorithm IN_MEMORY recorded on job job-1"));

    assert!(!artifact.exists());
    assert!(metadata_root(&tmp).join("cube_statistics/sales/seg-1.json").exists());
    assert!(metadata_root(&tmp).join("cube_statistics/sales/seg-1.json.meta").exists());
    assert_eq!(recorded_algorithm(&tmp)?.as_deref(), Some("IN_MEMORY"));
    Ok(())
}

#[test]
fn save_stats_honors_config_threshold_and_override() -> TestResult {
    let tmp = TempDir::new()?;
    write_cube(&metadata_root(&tmp), "sales", &[("GMV", "SUM", "decimal(19,4)")])?;
    write_stats(&stats_dir(&tmp), 1.5)?;
    let config = tmp.path().join("build.toml");
    std::fs::write(&config, "[cube]\nalgorithm_auto_threshold = 1.0\n")?;

    let mut args = save_stats_args(&tmp, "sales", "seg-1");
    args.extend(["--config".to_string(), config.to_string_lossy().into_owned()]);
    cli().args(&args).assert().success().stdout(contains("LAYERED"));
    assert_eq!(recorded_algorithm(&tmp)?.as_deref(), Some("LAYERED"));

    write_stats(&stats_dir(&tmp), 1.5)?;
    std::fs::write(&config, "[cube]\nalgorithm = \"InMem\"\nalgorithm_auto_threshold = 1.0\n")?;
    cli().args(&args).assert().success().stdout(contains("IN_MEMORY"));
    assert_eq!(recorded_algorithm(&tmp)?.as_deref(), Some("IN_MEMORY"));
    Ok(())
}

#[test]
fn save_stats_missing_artifact_fails_with_does_not_exist() -> TestResult {
    let tmp = TempDir::new()?;
    write_cube(&metadata_root(&tmp), "sales", &[("GMV", "SUM", "decimal(19,4)")])?;

    cli()
        .args(save_stats_args(&tmp, "sales", "seg-1"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("does not exist"))
        .stderr(contains("retryable"));

    assert!(!metadata_root(&tmp).join("cube_statistics").exists());
    Ok(())
}

#[test]
fn save_stats_unknown_cube_lists_known_cubes() -> TestResult {
    let tmp = TempDir::new()?;
    write_cube(&metadata_root(&tmp), "sales", &[("GMV", "SUM", "decimal(19,4)")])?;
    let artifact = write_stats(&stats_dir(&tmp), 1.5)?;

    cli()
        .args(save_stats_args(&tmp, "orders", "seg-1"))
        .assert()
        .failure()
        .stderr(contains("known cubes: [sales]"))
        .stderr(contains("not retryable"));

    assert!(artifact.exists());
    Ok(())
}

#[test]
fn save_stats_logs_decision_at_info_level() -> TestResult {
    let tmp = TempDir::new()?;
    write_cube(
        &metadata_root(&tmp),
        "buyers",
        &[("UV", "COUNT_DISTINCT", "bitmap")],
    )?;
    write_stats(&stats_dir(&tmp), 0.0)?;

    let mut args = vec!["--log-level".to_string(), "info".to_string()];
    args.extend(save_stats_args(&tmp, "buyers", "seg-1"));

    cli()
        .args(&args)
        .assert()
        .success()
        .stdout(contains("LAYERED"))
        .stderr(contains("memory-hungry measure UV"));
    Ok(())
}

#[test]
fn save_stats_rejects_invalid_config() -> TestResult {
    let tmp = TempDir::new()?;
    let config = tmp.path().join("build.toml");
    std::fs::write(&config, "[cube]\nalgorithm_auto_threshold = -2.0\n")?;

    let mut args = save_stats_args(&tmp, "sales", "seg-1");
    args.extend(["--config".to_string(), config.to_string_lossy().into_owned()]);

    cli()
        .args(&args)
        .assert()
        .failure()
        .stderr(contains("algorithm_auto_threshold"));
    Ok(())
}
