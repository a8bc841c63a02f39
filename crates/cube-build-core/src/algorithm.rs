//! Cubing algorithm selection.
//!
//! A segment is built either with the in-memory algorithm (each task cubes its
//! whole input split in memory) or the layered algorithm (one pass per cuboid
//! layer). [`AlgorithmSelector::select`] applies the decision policy in
//! strict priority order:
//!
//! 1. an explicit configured algorithm always wins;
//! 2. any memory-hungry measure forces [`CubingAlgorithm::Layered`];
//! 3. the `random` testing preference picks uniformly from the injected RNG;
//! 4. otherwise the mapper overlap ratio is compared with the configured
//!    threshold: below → [`CubingAlgorithm::InMemory`], at or above → [`CubingAlgorithm::Layered`].
//!
//! Selection is pure apart from logging and the RNG: the same segment, cost
//! signal and configuration always give the same answer outside testing mode.

use std::{convert::Infallible, fmt, str::FromStr};

use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    metadata::cube::SegmentHandle,
    stats::{CostSignal, StatsError},
};

/// Build strategy for a segment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CubingAlgorithm {
    /// In-memory cubing (`IN_MEMORY`).
    InMemory,
    /// Layer-by-layer cubing (`LAYERED`).
    Layered,
}

impl CubingAlgorithm {
    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            CubingAlgorithm::InMemory => "IN_MEMORY",
            CubingAlgorithm::Layered => "LAYERED",
        }
    }
}

impl fmt::Display for CubingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured algorithm preference, closed over the names the selector knows.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum AlgorithmPreference {
    /// Operator override.
    Explicit(CubingAlgorithm),
    /// Pick at random; only for exercising both build paths in tests.
    Random,
    /// Decide from measures and the cost signal.
    #[default]
    Auto,
}

impl AlgorithmPreference {
    /// Map a configuration string to a preference.
    ///
    /// Matching is case-insensitive. Unknown names fall back to [`Auto`](Self::Auto)
    /// with a warning; an empty string or `auto` falls back silently.
    pub fn parse(raw: &str) -> Self {
        let name = raw.trim().to_ascii_lowercase();
        match name.as_str() {
            "inmem" | "in_memory" => AlgorithmPreference::Explicit(CubingAlgorithm::InMemory),
            "layer" | "layered" => AlgorithmPreference::Explicit(CubingAlgorithm::Layered),
            "random" => AlgorithmPreference::Random,
            "" | "auto" => AlgorithmPreference::Auto,
            _ => {
                warn!("unknown cube algorithm preference {raw:?}; using auto");
                AlgorithmPreference::Auto
            }
        }
    }
}

impl FromStr for AlgorithmPreference {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for AlgorithmPreference {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<AlgorithmPreference> for String {
    fn from(pref: AlgorithmPreference) -> Self {
        match pref {
            AlgorithmPreference::Explicit(CubingAlgorithm::InMemory) => "inmem".to_string(),
            AlgorithmPreference::Explicit(CubingAlgorithm::Layered) => "layer".to_string(),
            AlgorithmPreference::Random => "random".to_string(),
            AlgorithmPreference::Auto => "auto".to_string(),
        }
    }
}

/// Which branch of the policy produced a decision.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionReason {
    /// Operator override.
    Explicit,
    /// The cube has this many memory-hungry measures.
    MemoryHungryMeasures {
        /// Number of memory-hungry measures found.
        count: usize,
    },
    /// Testing mode coin flip.
    Random,
    /// Cost signal compared with the threshold.
    CostThreshold {
        /// Mapper overlap ratio of the segment.
        ratio: f64,
        /// Configured threshold.
        threshold: f64,
    },
}

/// A decision and the branch that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// The chosen algorithm.
    pub algorithm: CubingAlgorithm,
    /// Why it was chosen.
    pub reason: SelectionReason,
}

/// Errors raised while selecting an algorithm.
#[derive(Debug, Snafu)]
pub enum SelectError {
    /// The cost signal could not be read.
    #[snafu(display("Cannot read mapper overlap ratio for {segment}: {source}"))]
    CostSignal {
        /// Segment being decided.
        segment: String,
        /// Underlying statistics error.
        #[snafu(source(from(StatsError, Box::new)))]
        source: Box<StatsError>,
    },
}

/// Applies the cubing algorithm decision policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlgorithmSelector {
    preference: AlgorithmPreference,
    threshold: f64,
}

impl AlgorithmSelector {
    /// Create a selector for `preference`, using `threshold` on the default path.
    pub fn new(preference: AlgorithmPreference, threshold: f64) -> Self {
        Self {
            preference,
            threshold,
        }
    }

    /// The configured auto threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decide how `segment` should be built.
    ///
    /// `cost` is consulted only on the default path, and `rng` only in
    /// testing mode.
    pub fn select<R: Rng + ?Sized>(
        &self,
        segment: &SegmentHandle,
        cost: &dyn CostSignal,
        rng: &mut R,
    ) -> Result<Selection, SelectError> {
        let selection = match self.preference {
            AlgorithmPreference::Explicit(algorithm) => {
                info!("cube algorithm for {segment} is configured explicitly as {algorithm}");
                Selection {
                    algorithm,
                    reason: SelectionReason::Explicit,
                }
            }
            AlgorithmPreference::Random | AlgorithmPreference::Auto => {
                self.select_by_policy(segment, cost, rng)?
            }
        };

        info!("The cube algorithm for {segment} is {}", selection.algorithm);
        Ok(selection)
    }

    fn select_by_policy<R: Rng + ?Sized>(
        &self,
        segment: &SegmentHandle,
        cost: &dyn CostSignal,
        rng: &mut R,
    ) -> Result<Selection, SelectError> {
        let mut memory_hungry = 0usize;
        for measure in segment.cube.memory_hungry_measures() {
            info!(
                "This cube has memory-hungry measure {} ({})",
                measure.name, measure.function
            );
            memory_hungry += 1;
        }

        if memory_hungry > 0 {
            return Ok(Selection {
                algorithm: CubingAlgorithm::Layered,
                reason: SelectionReason::MemoryHungryMeasures {
                    count: memory_hungry,
                },
            });
        }

        if self.preference == AlgorithmPreference::Random {
            let algorithm = if rng.gen_bool(0.5) {
                CubingAlgorithm::InMemory
            } else {
                CubingAlgorithm::Layered
            };
            info!("random cube algorithm for {segment} (testing mode): {algorithm}");
            return Ok(Selection {
                algorithm,
                reason: SelectionReason::Random,
            });
        }

        let ratio = cost.mapper_overlap_ratio().context(CostSignalSnafu {
            segment: segment.to_string(),
        })?;
        let threshold = self.threshold;
        info!("mapper overlap ratio for {segment} is {ratio}, threshold is {threshold}");

        let algorithm = if ratio < threshold {
            CubingAlgorithm::InMemory
        } else {
            CubingAlgorithm::Layered
        };

        Ok(Selection {
            algorithm,
            reason: SelectionReason::CostThreshold { ratio, threshold },
        })
    }
}
