use cube_build_core::{
    config::ConfigError, metadata::catalog::CatalogError, splitter::SplitError,
    storage::StorageError,
};

use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to load config {path}: {source}"))]
    LoadConfig { path: String, source: ConfigError },

    #[snafu(display("Invalid metadata location {path}: {source}"))]
    MetadataLocation { path: String, source: StorageError },

    #[snafu(display(
        "Failed to load cube descriptors from {path}: {source}. \
         Ensure it contains a cube/ directory of JSON descriptors."
    ))]
    LoadCatalog {
        path: String,
        #[snafu(source(from(CatalogError, Box::new)))]
        source: Box<CatalogError>,
    },

    #[snafu(display("save-stats failed ({retry}): {message}"))]
    StepFailed { message: String, retry: String },

    #[snafu(display(
        "Invalid --separator '{spec}'. \
         Use a single character, a 0xNN hex byte, or \\t."
    ))]
    InvalidSeparator { spec: String },

    #[snafu(display("Failed to read input file: {path}"))]
    ReadInput {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Invalid splitter limits: {source}"))]
    SplitterConfig { source: SplitError },

    #[snafu(display("Line {line} of {path} cannot be split: {source}"))]
    SplitLine {
        path: String,
        line: usize,
        source: SplitError,
    },
}
