//! Snapshot source abstraction.
//!
//! A source supplies metric identifiers and descriptors at setup time, then a
//! lazy, finite, non-restartable sequence of timestamped snapshots already
//! interpolated onto the requested sampling grid. End of the requested window
//! is a clean terminal (`Ok(None)`), distinct from a hard error.

pub mod archive;
pub mod recorded;

use crate::catalog::MetricDesc;
use crate::model::{DomainId, RawSnapshot};

pub use archive::ArchiveSource;
pub use recorded::RecordedSource;

/// Failure in the fetch source.
#[derive(Debug)]
pub enum SourceError {
    /// I/O error reading the recorded archive.
    Io(String),
    /// The recorded archive is malformed.
    Corrupt(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io(msg) => write!(f, "source I/O error: {}", msg),
            SourceError::Corrupt(msg) => write!(f, "source archive corrupt: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e.to_string())
    }
}

/// Identity and time bounds of the metric source.
#[derive(Clone, Debug)]
pub struct SourceLabel {
    pub hostname: String,
    pub timezone: String,
    /// First recorded timestamp.
    pub start: i64,
    /// Last recorded timestamp.
    pub end: i64,
}

/// Supplier of metric descriptors and interpolated snapshots.
pub trait SnapshotSource {
    /// Source identity; drives the output archive label.
    fn label(&self) -> &SourceLabel;

    /// All metric names the source can resolve, in a stable order.
    fn metric_names(&self) -> Vec<String>;

    /// Resolves one name to its identifier and input descriptor.
    fn lookup(&self, name: &str) -> Option<MetricDesc>;

    /// External name of an instance within a domain, if known.
    fn instance_name(&self, domain: DomainId, instance: u32) -> Option<String>;

    /// The next interpolated snapshot, or `Ok(None)` once the requested
    /// window is exhausted. The sequence is not restartable.
    fn next(&mut self) -> Result<Option<RawSnapshot>, SourceError>;
}
