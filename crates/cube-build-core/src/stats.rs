//! Segment statistics produced by the sampling phase.
//!
//! The statistics artifact is written by an external aggregator that runs
//! over split sample rows. This crate never computes the numbers; it moves the
//! artifact into the metadata store and reads back the one value the
//! algorithm selector needs, the *mapper overlap ratio*.
//!
//! Artifact JSON layout:
//!
//! ```json
//! {
//!   "sampling_percentage": 100,
//!   "mapper_count": 4,
//!   "mapper_overlap_ratio": 1.8,
//!   "cuboid_row_estimates": { "255": 120000, "127": 80000 }
//! }
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

/// Errors raised while reading segment statistics.
#[derive(Debug, Snafu)]
pub enum StatsError {
    /// The artifact is not valid statistics JSON.
    #[snafu(display("Failed to decode segment statistics: {source}"))]
    Decode {
        /// JSON decoding error.
        source: serde_json::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Statistics could not be serialized.
    #[snafu(display("Failed to encode segment statistics: {source}"))]
    Encode {
        /// JSON encoding error.
        source: serde_json::Error,
    },

    /// The overlap ratio is negative, NaN or infinite.
    #[snafu(display("Invalid mapper overlap ratio {ratio} (must be finite and >= 0)"))]
    InvalidOverlapRatio {
        /// The offending value.
        ratio: f64,
    },
}

/// Aggregated sampling statistics for one segment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentStats {
    /// Percentage of source rows that were sampled.
    pub sampling_percentage: u32,
    /// Number of sampling tasks that contributed.
    pub mapper_count: u32,
    /// Estimated redundant work across parallel build tasks (0.0 and up).
    pub mapper_overlap_ratio: f64,
    /// Estimated row count per cuboid id.
    #[serde(default)]
    pub cuboid_row_estimates: BTreeMap<u64, u64>,
}

impl SegmentStats {
    /// Decode statistics from artifact bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, StatsError> {
        serde_json::from_slice(bytes).context(DecodeSnafu)
    }

    /// Encode statistics as artifact bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, StatsError> {
        serde_json::to_vec(self).context(EncodeSnafu)
    }
}

/// Source of the cost signal used for algorithm selection.
pub trait CostSignal {
    /// The segment's mapper overlap ratio.
    fn mapper_overlap_ratio(&self) -> Result<f64, StatsError>;
}

fn validated(ratio: f64) -> Result<f64, StatsError> {
    ensure!(
        ratio.is_finite() && ratio >= 0.0,
        InvalidOverlapRatioSnafu { ratio }
    );
    Ok(ratio)
}

impl CostSignal for SegmentStats {
    fn mapper_overlap_ratio(&self) -> Result<f64, StatsError> {
        validated(self.mapper_overlap_ratio)
    }
}

/// Statistics still in their encoded form; decoded only when asked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedStats(Bytes);

impl EncodedStats {
    /// Wrap artifact bytes.
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Decode the wrapped bytes.
    pub fn decode(&self) -> Result<SegmentStats, StatsError> {
        SegmentStats::from_json(&self.0)
    }
}

impl CostSignal for EncodedStats {
    fn mapper_overlap_ratio(&self) -> Result<f64, StatsError> {
        self.decode()?.mapper_overlap_ratio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(ratio: f64) -> SegmentStats {
        SegmentStats {
            sampling_percentage: 100,
            mapper_count: 4,
            mapper_overlap_ratio: ratio,
            cuboid_row_estimates: BTreeMap::from([(255, 120_000), (127, 80_000)]),
        }
    }

    #[test]
    fn encoded_stats_decode_lazily() {
        let encoded = EncodedStats::new(Bytes::from(stats(1.8).to_json().expect("encode")));

        assert_eq!(encoded.mapper_overlap_ratio().expect("valid ratio"), 1.8);
        assert_eq!(encoded.decode().expect("decode"), stats(1.8));
    }

    #[test]
    fn cuboid_estimates_default_to_empty() {
        let json = br#"{"sampling_percentage":10,"mapper_count":1,"mapper_overlap_ratio":0.3}"#;

        let decoded = SegmentStats::from_json(json).expect("decode");

        assert!(decoded.cuboid_row_estimates.is_empty());
        assert_eq!(decoded.mapper_overlap_ratio, 0.3);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let encoded = EncodedStats::new(Bytes::from_static(b"SEQ\x06binary"));

        assert!(matches!(
            encoded.mapper_overlap_ratio(),
            Err(StatsError::Decode { .. })
        ));
    }

    #[test]
    fn negative_and_non_finite_ratios_are_rejected() {
        for ratio in [-0.1, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                stats(ratio).mapper_overlap_ratio(),
                Err(StatsError::InvalidOverlapRatio { .. })
            ));
        }
        assert_eq!(stats(0.0).mapper_overlap_ratio().expect("zero is valid"), 0.0);
    }
}
