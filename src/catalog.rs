//! Metric catalog: descriptor resolution and the instance-domain table.
//!
//! Built once per run, before any output file exists. Failure to resolve any
//! requested metric is fatal — partial metadata is unsafe to consume, so the
//! whole run aborts instead.
//!
//! Metrics are kept in a single ordered `Vec` (insertion order drives the
//! deterministic order of descriptor metadata in the output archive), with a
//! side `HashMap` for id lookups. Instance domains live in one table keyed by
//! domain id; every metric declaring the same domain id shares the one entry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{DomainId, MetricId};
use crate::source::SnapshotSource;

/// Storage width and signedness of a metric value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

/// Semantic class of a metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Semantics {
    /// Monotonically non-decreasing until it wraps at the type maximum.
    Counter,
    /// Free-running instantaneous value.
    Instant,
    /// Rarely-changing configuration value.
    Discrete,
}

/// Unit and scale information, carried opaquely into the output descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Units {
    pub dim_space: i8,
    pub dim_time: i8,
    pub dim_count: i8,
    pub scale_space: u8,
    pub scale_time: u8,
    pub scale_count: i8,
}

/// A metric descriptor as recorded in an archive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricDesc {
    pub id: MetricId,
    pub storage: StorageType,
    pub semantics: Semantics,
    pub units: Units,
    pub domain: Option<DomainId>,
}

/// One catalog entry: the immutable input → output descriptor mapping.
#[derive(Clone, Debug)]
pub struct Metric {
    pub name: String,
    pub input: MetricDesc,
    pub output: MetricDesc,
    /// Set when output values must be widened from the 32-bit input storage.
    pub rewrite: bool,
}

/// Lifecycle of an instance domain within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainState {
    /// Allocated, no membership metadata flushed yet.
    Init,
    /// Membership metadata flushed at least once.
    Loaded,
}

/// Known membership of one instance domain.
///
/// Membership only grows: once an instance id is recorded it is never
/// removed, only absent from individual snapshots.
#[derive(Clone, Debug)]
pub struct InstanceDomain {
    pub id: DomainId,
    pub instances: Vec<(u32, String)>,
    pub state: DomainState,
}

impl InstanceDomain {
    fn new(id: DomainId) -> Self {
        Self {
            id,
            instances: Vec::new(),
            state: DomainState::Init,
        }
    }

    pub fn contains(&self, instance: u32) -> bool {
        self.instances.iter().any(|(id, _)| *id == instance)
    }

    /// Appends a new member. Caller must have checked `contains` first.
    pub fn append(&mut self, instance: u32, name: String) {
        debug_assert!(!self.contains(instance));
        self.instances.push((instance, name));
    }
}

/// All instance domains of a run, keyed by domain id.
#[derive(Debug, Default)]
pub struct DomainTable {
    domains: HashMap<DomainId, InstanceDomain>,
}

impl DomainTable {
    /// Returns the domain for `id`, allocating an empty one on first sighting.
    pub fn ensure(&mut self, id: DomainId) -> &mut InstanceDomain {
        self.domains.entry(id).or_insert_with(|| {
            debug!(domain = id, "new instance domain");
            InstanceDomain::new(id)
        })
    }

    pub fn get(&self, id: DomainId) -> Option<&InstanceDomain> {
        self.domains.get(&id)
    }

    pub fn get_mut(&mut self, id: DomainId) -> Option<&mut InstanceDomain> {
        self.domains.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Error resolving the requested metrics at setup time.
#[derive(Debug)]
pub enum SetupError {
    /// The source could not resolve a requested metric name.
    UnknownMetric(String),
    /// Two requested names resolved to the same metric id.
    DuplicateId(String, MetricId),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupError::UnknownMetric(name) => {
                write!(f, "cannot resolve metric \"{}\"", name)
            }
            SetupError::DuplicateId(name, id) => {
                write!(f, "metric \"{}\" resolves to duplicate id {}", name, id)
            }
        }
    }
}

impl std::error::Error for SetupError {}

/// The resolved metrics of a run plus their shared instance domains.
///
/// Effectively immutable after [`MetricCatalog::build`]; only the domain
/// table grows afterwards (through the instance-domain tracker).
#[derive(Debug, Default)]
pub struct MetricCatalog {
    metrics: Vec<Metric>,
    by_id: HashMap<MetricId, usize>,
    pub domains: DomainTable,
}

impl MetricCatalog {
    /// Resolves every requested name against the source.
    ///
    /// Output-descriptor policy: a COUNTER with 32-bit storage is widened to
    /// the 64-bit storage of matching signedness and flagged for rewrite;
    /// every other declaration copies the input descriptor unchanged.
    pub fn build(names: &[String], source: &dyn SnapshotSource) -> Result<Self, SetupError> {
        let mut catalog = MetricCatalog::default();

        for name in names {
            let input = source
                .lookup(name)
                .ok_or_else(|| SetupError::UnknownMetric(name.clone()))?;

            let mut output = input;
            let mut rewrite = false;
            if input.semantics == Semantics::Counter {
                match input.storage {
                    StorageType::I32 => {
                        output.storage = StorageType::I64;
                        rewrite = true;
                    }
                    StorageType::U32 => {
                        output.storage = StorageType::U64;
                        rewrite = true;
                    }
                    _ => {}
                }
            }

            if catalog.by_id.contains_key(&input.id) {
                return Err(SetupError::DuplicateId(name.clone(), input.id));
            }

            if let Some(domain) = input.domain {
                catalog.domains.ensure(domain);
            }

            debug!(
                metric = %name,
                id = input.id,
                rewrite,
                "catalog entry resolved"
            );

            catalog.by_id.insert(input.id, catalog.metrics.len());
            catalog.metrics.push(Metric {
                name: name.clone(),
                input,
                output,
                rewrite,
            });
        }

        Ok(catalog)
    }

    /// Metrics in resolution (= metadata emission) order.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn metric_by_id(&self, id: MetricId) -> Option<&Metric> {
        self.by_id.get(&id).map(|&i| &self.metrics[i])
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
