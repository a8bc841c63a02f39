//! Command-line runner for the cube segment statistics step.

mod error;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use cube_build_core::{
    config::{BuildConfig, SplitterConfig},
    ingest::LocalTransientStorage,
    job::ResourceJobStore,
    metadata::LocalCubeCatalog,
    resource_store::LocalResourceStore,
    splitter::{COMMON_DELIMITERS, RowFieldSplitter, SplitError, detect_delimiter},
    step::{ExecutableContext, ExecuteResult, RetryClass, SaveStatisticsStep, StepParams},
    storage::StorageLocation,
};
use log::warn;
use snafu::ResultExt;
use tracing_subscriber::filter::LevelFilter;

use crate::error::{
    CliResult, InvalidSeparatorSnafu, LoadCatalogSnafu, LoadConfigSnafu, MetadataLocationSnafu,
    ReadInputSnafu, SplitLineSnafu, SplitterConfigSnafu, StepFailedSnafu,
};

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a segment's sampled statistics and decide its cubing algorithm
    SaveStats {
        /// Metadata root holding cube/, cube_statistics/ and execute/
        #[arg(long)]
        metadata: PathBuf,

        #[arg(long)]
        cube: String,

        /// Segment uuid
        #[arg(long)]
        segment: String,

        /// Transient directory containing cuboid_statistics.json
        #[arg(long = "stats-path")]
        stats_path: PathBuf,

        /// Cubing job that receives the decision
        #[arg(long)]
        job: String,

        /// Optional TOML build configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Split each line of a file into fields and print them
    Split {
        #[arg(long)]
        file: PathBuf,

        /// Single character, 0xNN, or \t (default: detected per line)
        #[arg(long)]
        separator: Option<String>,

        #[arg(long = "field-capacity")]
        field_capacity: Option<usize>,

        #[arg(long = "max-fields")]
        max_fields: Option<usize>,

        /// Warn about and skip lines with too many fields instead of failing
        #[arg(long = "skip-oversized", default_value_t = false)]
        skip_oversized: bool,
    },
}

#[derive(Debug, Parser)]
#[command(name = "cubebuild", version)]
struct Cli {
    /// Log verbosity (off, error, warn, info, debug, trace)
    #[arg(long = "log-level", global = true, default_value = "warn")]
    log_level: LevelFilter,

    #[command(subcommand)]
    cmd: Command,
}

struct SplitArgs {
    file: PathBuf,
    separator: Option<String>,
    field_capacity: Option<usize>,
    max_fields: Option<usize>,
    skip_oversized: bool,
}

async fn load_config(path: Option<&Path>) -> CliResult<BuildConfig> {
    match path {
        Some(path) => BuildConfig::load(path).await.context(LoadConfigSnafu {
            path: path.display().to_string(),
        }),
        None => Ok(BuildConfig::default()),
    }
}

async fn cmd_save_stats(
    metadata: &Path,
    params: StepParams,
    config: Option<&Path>,
) -> CliResult<()> {
    let config = load_config(config).await?;
    let location = StorageLocation::parse(metadata.to_string_lossy().as_ref()).context(
        MetadataLocationSnafu {
            path: metadata.display().to_string(),
        },
    )?;

    let catalog = LocalCubeCatalog::load(location.clone())
        .await
        .context(LoadCatalogSnafu {
            path: metadata.display().to_string(),
        })?;
    let store = Arc::new(LocalResourceStore::new(location));
    let jobs = Arc::new(ResourceJobStore::new(store.clone()));
    let transient = Arc::new(LocalTransientStorage::new(StorageLocation::local(".")));

    let ctx = ExecutableContext::new(Arc::new(catalog), store, transient, jobs, config);
    let job_id = params.cubing_job_id.clone();
    let mut step = SaveStatisticsStep::new(params);

    match step.execute(&ctx).await {
        ExecuteResult::Succeed { output, algorithm } => {
            println!("{output}: cube algorithm {algorithm} recorded on job {job_id}");
            Ok(())
        }
        ExecuteResult::Error { output, retry } => {
            let retry = match retry {
                RetryClass::Retryable => "retryable",
                RetryClass::NonRetryable => "not retryable",
            };
            StepFailedSnafu {
                message: output,
                retry,
            }
            .fail()
        }
    }
}

fn parse_separator(spec: &str) -> CliResult<u8> {
    let parsed = match spec {
        "\\t" | "tab" => Some(b'\t'),
        _ => {
            if let Some(hex) = spec
                .strip_prefix("0x")
                .or_else(|| spec.strip_prefix("0X"))
            {
                u8::from_str_radix(hex, 16).ok()
            } else {
                match spec.as_bytes() {
                    [byte] => Some(*byte),
                    _ => None,
                }
            }
        }
    };

    parsed.ok_or_else(|| {
        InvalidSeparatorSnafu {
            spec: spec.to_string(),
        }
        .build()
    })
}

async fn cmd_split(args: SplitArgs) -> CliResult<()> {
    let defaults = SplitterConfig::default();
    let config = SplitterConfig {
        field_capacity: args.field_capacity.unwrap_or(defaults.field_capacity),
        max_fields: args.max_fields.unwrap_or(defaults.max_fields),
    };
    let mut splitter = RowFieldSplitter::from_config(&config).context(SplitterConfigSnafu)?;

    let separator = args.separator.as_deref().map(parse_separator).transpose()?;

    let path = args.file.display().to_string();
    let bytes = tokio::fs::read(&args.file)
        .await
        .context(ReadInputSnafu { path: path.clone() })?;

    let mut lines: Vec<&[u8]> = bytes.split(|b| *b == b'\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    for (idx, line) in lines.into_iter().enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let sep = separator
            .or_else(|| detect_delimiter(line))
            .unwrap_or(COMMON_DELIMITERS[0]);

        match splitter.split(line, line.len(), sep) {
            Ok(count) => println!("{count}\t{splitter}"),
            Err(e @ SplitError::CapacityExceeded { .. }) if args.skip_oversized => {
                warn!("skipping line {} of {path}: {e}", idx + 1);
            }
            Err(e) => {
                return Err(e).context(SplitLineSnafu {
                    path: path.clone(),
                    line: idx + 1,
                });
            }
        }
    }

    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::SaveStats {
            metadata,
            cube,
            segment,
            stats_path,
            job,
            config,
        } => {
            let params = StepParams {
                cube_name: cube,
                segment_id: segment,
                statistics_path: stats_path,
                cubing_job_id: job,
            };
            cmd_save_stats(&metadata, params, config.as_deref()).await
        }

        Command::Split {
            file,
            separator,
            field_capacity,
            max_fields,
            skip_oversized,
        } => {
            cmd_split(SplitArgs {
                file,
                separator,
                field_capacity,
                max_fields,
                skip_oversized,
            })
            .await
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
