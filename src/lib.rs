//! tsreduce — statistical reduction of performance-metric archives.
//!
//! Reads a recorded time-series archive of performance metrics and writes a
//! new archive resampled at a coarser fixed interval, preserving counter
//! continuity across wraps and instance-domain membership semantics.
//!
//! Modules:
//! - `model` — snapshot and value types shared by every stage
//! - `catalog` — metric descriptor resolution and instance-domain table
//! - `scan` — per-tick wrap / gap / disappearance detection (carry state)
//! - `rewrite` — output snapshot production (widening, wrap offsets)
//! - `indom` — incremental instance-domain metadata emission
//! - `archive` — three-stream binary archive writer and reader
//! - `source` — snapshot source abstraction (recorded archive, in-memory)
//! - `run` — the sequential reduction driver
//! - `util` — CLI time parsing helpers

pub mod archive;
pub mod catalog;
pub mod indom;
pub mod model;
pub mod rewrite;
pub mod run;
pub mod scan;
pub mod source;
pub mod util;
