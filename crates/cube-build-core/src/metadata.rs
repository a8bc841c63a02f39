//! Cube metadata layer.
//!
//! This module groups the pure cube/segment/measure model (`cube`) and the
//! catalog used to resolve a build step's target segment (`catalog`).

pub mod catalog;
pub mod cube;

pub use catalog::{CubeCatalog, InMemoryCubeCatalog, LocalCubeCatalog};
pub use cube::{
    CubeInstance, CubeSegment, FunctionDesc, MeasureDesc, MeasureType, SegmentHandle,
    SegmentStatus,
};
