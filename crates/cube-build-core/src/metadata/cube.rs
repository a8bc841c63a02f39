//! Cube, segment and measure descriptors.
//!
//! These are **pure** data types deserialized from `cube/<name>.json`; nothing
//! here touches storage. The only behavior they carry is what the algorithm
//! selector needs: classifying measures as memory-hungry and resolving a
//! segment by id.
//!
//! JSON layout example:
//!
//! ```json
//! {
//!   "name": "sales",
//!   "measures": [
//!     { "name": "GMV", "function": { "expression": "SUM", "return_type": "decimal(19,4)" } },
//!     { "name": "BUYERS", "function": { "expression": "COUNT_DISTINCT", "return_type": "bitmap" } }
//!   ],
//!   "segments": [
//!     { "uuid": "5f3a...", "name": "20240101_20240201", "status": "NEW" }
//!   ]
//! }
//! ```

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Aggregation function of a measure, as written in the cube descriptor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDesc {
    /// Function name, for example `SUM` or `COUNT_DISTINCT`.
    pub expression: String,
    /// Declared return type, for example `bigint`, `hllc(12)` or `bitmap`.
    #[serde(default)]
    pub return_type: String,
}

/// Classified measure type, derived from a [`FunctionDesc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeasureType {
    /// `SUM`, `MIN`, `MAX`, `COUNT`.
    Basic,
    /// Approximate distinct count (HyperLogLog counters).
    ApproxCountDistinct,
    /// Precise distinct count backed by bitmaps.
    PreciseCountDistinct,
    /// Top-N with per-key counters.
    TopN,
    /// Raw values retained per cell.
    Raw,
    /// Percentile sketches.
    Percentile,
    /// Any function not recognized above.
    Other,
}

impl MeasureType {
    /// Whether cells of this measure can grow large enough to make the
    /// in-memory cubing algorithm unsafe.
    pub fn is_memory_hungry(self) -> bool {
        matches!(
            self,
            MeasureType::PreciseCountDistinct | MeasureType::TopN | MeasureType::Raw
        )
    }
}

impl FunctionDesc {
    /// Classify this function.
    pub fn measure_type(&self) -> MeasureType {
        let expression = self.expression.trim().to_ascii_uppercase();
        let return_type = self.return_type.trim().to_ascii_lowercase();

        match expression.as_str() {
            "SUM" | "MIN" | "MAX" | "COUNT" => MeasureType::Basic,
            "COUNT_DISTINCT" if return_type.starts_with("bitmap") => {
                MeasureType::PreciseCountDistinct
            }
            "COUNT_DISTINCT" => MeasureType::ApproxCountDistinct,
            "TOP_N" => MeasureType::TopN,
            "RAW" => MeasureType::Raw,
            "PERCENTILE" | "PERCENTILE_APPROX" => MeasureType::Percentile,
            _ => MeasureType::Other,
        }
    }
}

impl fmt::Display for FunctionDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.return_type.is_empty() {
            write!(f, "{}", self.expression)
        } else {
            write!(f, "{}({})", self.expression, self.return_type)
        }
    }
}

/// A named measure of a cube.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeasureDesc {
    /// Measure name.
    pub name: String,
    /// Aggregation function.
    pub function: FunctionDesc,
}

/// Lifecycle status of a segment.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentStatus {
    /// Being built.
    #[default]
    New,
    /// Built and queryable.
    Ready,
}

/// A time- or partition-bounded slice of a cube.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CubeSegment {
    /// Unique segment id.
    pub uuid: String,
    /// Human-readable segment name (usually the covered range).
    pub name: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: SegmentStatus,
}

/// A cube descriptor with its measures and segments.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CubeInstance {
    /// Cube name.
    pub name: String,
    /// Measures defined on the cube.
    #[serde(default)]
    pub measures: Vec<MeasureDesc>,
    /// Segments of the cube, in creation order.
    #[serde(default)]
    pub segments: Vec<CubeSegment>,
}

impl CubeInstance {
    /// Look up a segment by its uuid.
    pub fn segment_by_id(&self, segment_id: &str) -> Option<&CubeSegment> {
        self.segments.iter().find(|s| s.uuid == segment_id)
    }

    /// Measures whose function is memory-hungry.
    pub fn memory_hungry_measures(&self) -> impl Iterator<Item = &MeasureDesc> {
        self.measures
            .iter()
            .filter(|m| m.function.measure_type().is_memory_hungry())
    }
}

/// A resolved segment together with the cube that owns it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentHandle {
    /// Owning cube.
    pub cube: Arc<CubeInstance>,
    /// The target segment.
    pub segment: CubeSegment,
}

impl SegmentHandle {
    /// Segment uuid.
    pub fn id(&self) -> &str {
        &self.segment.uuid
    }

    /// Owning cube name.
    pub fn cube_name(&self) -> &str {
        &self.cube.name
    }
}

impl fmt::Display for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.cube.name, self.segment.name)
    }
}
