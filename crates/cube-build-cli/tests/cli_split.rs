//! Integration tests for `cubebuild split`.

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

mod common;

use common::TestResult;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("cubebuild"))
}

#[test]
fn split_detects_del_separator_and_keeps_empty_fields() -> TestResult {
    let tmp = TempDir::new()?;
    let input = tmp.path().join("rows.txt");
    std::fs::write(
        &input,
        b"2013-02-17\x7fCollectibles\n2013-02-17\x7f\x7fCollectibles\n",
    )?;

    cli()
        .args(["split", "--file", input.to_string_lossy().as_ref()])
        .assert()
        .success()
        .stdout(contains("2\t2013-02-17,Collectibles\n"))
        .stdout(contains("3\t2013-02-17,,Collectibles\n"));
    Ok(())
}

#[test]
fn split_seals_long_fields_at_capacity() -> TestResult {
    let tmp = TempDir::new()?;
    let input = tmp.path().join("rows.txt");
    std::fs::write(&input, "2013-02-17Collectibles\n")?;

    cli()
        .args([
            "split",
            "--file",
            input.to_string_lossy().as_ref(),
            "--separator",
            "0x7f",
            "--field-capacity",
            "10",
        ])
        .assert()
        .success()
        .stdout(predicate::eq("3\t2013-02-17,Collectibl,es\n"));
    Ok(())
}

#[test]
fn split_with_explicit_separator() -> TestResult {
    let tmp = TempDir::new()?;
    let input = tmp.path().join("rows.txt");
    std::fs::write(&input, "a|b,c|\r\n")?;

    cli()
        .args([
            "split",
            "--file",
            input.to_string_lossy().as_ref(),
            "--separator",
            "|",
        ])
        .assert()
        .success()
        .stdout(predicate::eq("3\ta,b,c,\n"));
    Ok(())
}

#[test]
fn split_fails_on_too_many_fields_unless_skipping() -> TestResult {
    let tmp = TempDir::new()?;
    let input = tmp.path().join("rows.txt");
    std::fs::write(&input, "a,b,c,d\nx,y\n")?;
    let path = input.to_string_lossy().into_owned();

    cli()
        .args(["split", "--file", &path, "--max-fields", "3"])
        .assert()
        .failure()
        .stderr(contains("Line 1"));

    cli()
        .args(["split", "--file", &path, "--max-fields", "3", "--skip-oversized"])
        .assert()
        .success()
        .stdout(predicate::eq("2\tx,y\n"));
    Ok(())
}

#[test]
fn split_rejects_bad_separator_and_limits() -> TestResult {
    let tmp = TempDir::new()?;
    let input = tmp.path().join("rows.txt");
    std::fs::write(&input, "a,b\n")?;
    let path = input.to_string_lossy().into_owned();

    cli()
        .args(["split", "--file", &path, "--separator", "ab"])
        .assert()
        .failure()
        .stderr(contains("Invalid --separator 'ab'"));

    cli()
        .args(["split", "--file", &path, "--field-capacity", "0"])
        .assert()
        .failure()
        .stderr(contains("Invalid splitter limits"));

    let huge = usize::MAX.to_string();
    cli()
        .args(["split", "--file", &path, "--field-capacity", &huge])
        .assert()
        .failure()
        .stderr(contains("Invalid splitter limits"));
    Ok(())
}
