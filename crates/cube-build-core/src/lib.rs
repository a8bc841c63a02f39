//! Core of the cube segment statistics step.
//!
//! Before a cube segment is built, a sampling phase splits raw source rows
//! into column values and aggregates them into per-segment statistics. This
//! crate provides:
//!
//! - A reusable fixed-capacity row field splitter used by sampling
//!   (`splitter` module).
//! - Ingestion of the transient statistics artifact into a durable metadata
//!   store, deleting the transient copy only after a confirmed write
//!   (`ingest`, `resource_store` and `storage` modules).
//! - The cubing algorithm decision policy: explicit override, memory-hungry
//!   measures, testing-mode randomness, then a cost threshold
//!   (`algorithm` module).
//! - The save-statistics build step that ties these together and records
//!   the decision on the parent job (`step` and `job` modules).
//!
//! Cube descriptors are read through the `metadata` module, statistics are
//! decoded by `stats`, and `config` loads the TOML build configuration.
#![deny(missing_docs)]
pub mod algorithm;
pub mod config;
pub mod ingest;
pub mod job;
pub mod layout;
pub mod metadata;
pub mod resource_store;
pub mod splitter;
pub mod stats;
pub mod step;
pub mod storage;
