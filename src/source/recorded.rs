//! In-memory scripted source, the test double for the reduction pipeline.
//!
//! Descriptors, instance names, and the snapshot sequence are all declared up
//! front, which makes wrap, gap, and instance-churn scenarios easy to script.

use std::collections::{HashMap, VecDeque};

use crate::catalog::MetricDesc;
use crate::model::{DomainId, RawSnapshot};

use super::{SnapshotSource, SourceError, SourceLabel};

pub struct RecordedSource {
    label: SourceLabel,
    metrics: Vec<(String, MetricDesc)>,
    instance_names: HashMap<(DomainId, u32), String>,
    queue: VecDeque<RawSnapshot>,
    /// When set, `next` fails with this error once the queue drains.
    fail_at_end: Option<String>,
}

impl RecordedSource {
    pub fn new(hostname: &str, timezone: &str, start: i64, end: i64) -> Self {
        Self {
            label: SourceLabel {
                hostname: hostname.to_string(),
                timezone: timezone.to_string(),
                start,
                end,
            },
            metrics: Vec::new(),
            instance_names: HashMap::new(),
            queue: VecDeque::new(),
            fail_at_end: None,
        }
    }

    pub fn define_metric(&mut self, name: &str, desc: MetricDesc) {
        self.metrics.push((name.to_string(), desc));
    }

    pub fn define_instance(&mut self, domain: DomainId, instance: u32, name: &str) {
        self.instance_names
            .insert((domain, instance), name.to_string());
    }

    pub fn push(&mut self, snapshot: RawSnapshot) {
        self.queue.push_back(snapshot);
    }

    /// Makes the source fail hard after delivering its scripted snapshots.
    pub fn fail_after_queue(&mut self, message: &str) {
        self.fail_at_end = Some(message.to_string());
    }
}

impl SnapshotSource for RecordedSource {
    fn label(&self) -> &SourceLabel {
        &self.label
    }

    fn metric_names(&self) -> Vec<String> {
        self.metrics.iter().map(|(n, _)| n.clone()).collect()
    }

    fn lookup(&self, name: &str) -> Option<MetricDesc> {
        self.metrics
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
    }

    fn instance_name(&self, domain: DomainId, instance: u32) -> Option<String> {
        self.instance_names.get(&(domain, instance)).cloned()
    }

    fn next(&mut self) -> Result<Option<RawSnapshot>, SourceError> {
        match self.queue.pop_front() {
            Some(s) => Ok(Some(s)),
            None => match self.fail_at_end.take() {
                Some(msg) => Err(SourceError::Io(msg)),
                None => Ok(None),
            },
        }
    }
}
