//! Build configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! usable configuration:
//!
//! ```toml
//! [cube]
//! algorithm = "auto"              # inmem | layer | random | auto
//! algorithm_auto_threshold = 7.0
//! # random_seed = 42
//!
//! [splitter]
//! field_capacity = 4096
//! max_fields = 200
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::{
    algorithm::{AlgorithmPreference, AlgorithmSelector},
    splitter::{self, MAX_SPLITTER_BYTES},
};

/// Default overlap-ratio threshold of the cost-based selection path.
pub const DEFAULT_ALGORITHM_AUTO_THRESHOLD: f64 = 7.0;
/// Default per-field byte capacity of the row splitter.
pub const DEFAULT_FIELD_CAPACITY: usize = 4096;
/// Default maximum number of fields per row.
pub const DEFAULT_MAX_FIELDS: usize = 200;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("Cannot read config file {}: {source}", path.display()))]
    ReadConfig {
        /// Path that was read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The file is not valid TOML for [`BuildConfig`].
    #[snafu(display("Cannot parse config {origin}: {source}"))]
    ParseConfig {
        /// File path, or `<inline>` for string input.
        origin: String,
        /// TOML decoding error.
        source: toml::de::Error,
    },

    /// The auto threshold is negative, NaN or infinite.
    #[snafu(display(
        "Invalid cube.algorithm_auto_threshold {threshold} (must be finite and >= 0)"
    ))]
    InvalidThreshold {
        /// The offending value.
        threshold: f64,
    },

    /// A splitter limit is zero, or the limits together allocate too much.
    #[snafu(display(
        "Invalid splitter limits: field_capacity={field_capacity}, max_fields={max_fields} \
         (both must be >= 1 and their product at most {MAX_SPLITTER_BYTES} bytes)"
    ))]
    InvalidSplitter {
        /// Configured field capacity.
        field_capacity: usize,
        /// Configured field limit.
        max_fields: usize,
    },
}

fn default_threshold() -> f64 {
    DEFAULT_ALGORITHM_AUTO_THRESHOLD
}

fn default_field_capacity() -> usize {
    DEFAULT_FIELD_CAPACITY
}

fn default_max_fields() -> usize {
    DEFAULT_MAX_FIELDS
}

/// `[cube]` section: algorithm decision policy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CubeConfig {
    /// Algorithm preference, mapped from its name at load time.
    #[serde(default)]
    pub algorithm: AlgorithmPreference,
    /// Overlap ratio at or above which the layered algorithm is chosen.
    #[serde(default = "default_threshold")]
    pub algorithm_auto_threshold: f64,
    /// Seed for the testing-mode RNG; entropy seeded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmPreference::Auto,
            algorithm_auto_threshold: DEFAULT_ALGORITHM_AUTO_THRESHOLD,
            random_seed: None,
        }
    }
}

impl CubeConfig {
    /// Selector for this policy.
    pub fn selector(&self) -> AlgorithmSelector {
        AlgorithmSelector::new(self.algorithm, self.algorithm_auto_threshold)
    }
}

/// `[splitter]` section: row splitter limits.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitterConfig {
    /// Bytes per field before a capacity seal.
    #[serde(default = "default_field_capacity")]
    pub field_capacity: usize,
    /// Fields per row before the split fails.
    #[serde(default = "default_max_fields")]
    pub max_fields: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            field_capacity: DEFAULT_FIELD_CAPACITY,
            max_fields: DEFAULT_MAX_FIELDS,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    /// Algorithm decision policy.
    #[serde(default)]
    pub cube: CubeConfig,
    /// Row splitter limits.
    #[serde(default)]
    pub splitter: SplitterConfig,
}

impl BuildConfig {
    /// Read and validate a TOML configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .context(ReadConfigSnafu { path })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: BuildConfig = toml::from_str(text).context(ParseConfigSnafu { origin })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.cube.algorithm_auto_threshold;
        ensure!(
            threshold.is_finite() && threshold >= 0.0,
            InvalidThresholdSnafu { threshold }
        );

        let SplitterConfig {
            field_capacity,
            max_fields,
        } = self.splitter;
        ensure!(
            splitter::limits_are_valid(field_capacity, max_fields),
            InvalidSplitterSnafu {
                field_capacity,
                max_fields
            }
        );
        Ok(())
    }
}
