//! Snapshot and value types shared by every pipeline stage.
//!
//! A snapshot is one timestamped set of metric values, possibly spanning
//! multiple instances per metric. Input snapshots come from a
//! [`crate::source::SnapshotSource`]; output snapshots are produced by the
//! rewrite stage and serialized into the data stream of the output archive.

use serde::{Deserialize, Serialize};

/// Stable numeric metric identifier, assigned by the metric source.
pub type MetricId = u32;

/// Instance-domain identifier.
pub type DomainId = u32;

/// A single metric value as stored in an archive.
///
/// The variant must agree with the metric descriptor's storage type; the
/// rewrite stage is the only place where a value changes width.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

/// One (instance, value) pair within a value set.
///
/// `instance` is `None` for singular metrics (no instance domain).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceValue {
    pub instance: Option<u32>,
    pub value: Value,
}

/// All values reported for one metric at one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueSet {
    pub metric: MetricId,
    pub values: Vec<InstanceValue>,
}

/// A raw snapshot as delivered by the fetch source.
///
/// When `mark` is set the snapshot denotes a recording gap: `sets` is empty
/// and the values must not be interpreted as data.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSnapshot {
    pub timestamp: i64,
    pub mark: bool,
    pub sets: Vec<ValueSet>,
}

impl RawSnapshot {
    /// A gap record at the given tick.
    pub fn mark(timestamp: i64) -> Self {
        Self {
            timestamp,
            mark: true,
            sets: Vec::new(),
        }
    }

    /// Finds the value set for a metric, if the source reported one.
    pub fn set_for(&self, metric: MetricId) -> Option<&ValueSet> {
        self.sets.iter().find(|s| s.metric == metric)
    }
}

/// An output snapshot, consumed immediately by the archive writer.
///
/// Also the payload of a data record; a snapshot with zero value sets
/// is the wire representation of a mark.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub sets: Vec<ValueSet>,
}

impl Snapshot {
    pub fn set_for(&self, metric: MetricId) -> Option<&ValueSet> {
        self.sets.iter().find(|s| s.metric == metric)
    }
}
