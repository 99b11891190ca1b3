//! Zonal forcing collection pipeline.
//!
//! Resolves a remote catalog into a virtual array index, harmonizes it with
//! a zone set, then reads, aggregates and writes the time axis one
//! partition at a time on a bounded worker pool:
//!
//! ```text
//! Orchestrator::run
//!   resolve ─ load zones ─ harmonize ─ rasterize        (fatal on error)
//!   for each TimePartition, on the pool:
//!       read_slice ─ aggregate ─ write fragment        -> PartitionOutcome
//!   assemble fragments ─ fill gaps ─ run_summary.json   -> RunSummary
//! ```
//!
//! A failed partition is recorded and reported; it never stops its
//! siblings.

pub mod config;
pub mod error;
pub mod materializer;
pub mod orchestrator;
pub mod outcome;
pub mod output;
pub mod pool;

pub use config::{default_columns, parse_memory, ColumnSpec, OutputLayout, PipelineConfig};
pub use error::{ForcingError, Result};
pub use materializer::{assemble, run_partition, step_footprint, Assembly, PartitionContext};
pub use orchestrator::Orchestrator;
pub use outcome::{OutcomeSlots, PartitionFailureReport, PartitionOutcome, PartitionStatus, RunSummary};
pub use output::{check_zone_files, OutputPaths, TIME_FORMAT};
pub use pool::WorkerPool;
