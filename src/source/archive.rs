//! Archive-backed snapshot source.
//!
//! Opens a recorded archive file set and resamples its data records onto a
//! fixed-interval grid inside the requested time window. Interpolation is
//! last-observation-carried-forward: each grid tick reports, per instance,
//! the newest recorded value at or before the tick. A mark record in the
//! input invalidates everything observed before it; the first grid tick at
//! or after the mark is delivered as a mark snapshot, and ticks stay marks
//! until a post-gap record supplies fresh values.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::archive::{ArchiveReader, DescRecord};
use crate::catalog::MetricDesc;
use crate::model::{DomainId, InstanceValue, MetricId, RawSnapshot, Value, ValueSet};

use super::{SnapshotSource, SourceError, SourceLabel};

pub struct ArchiveSource {
    label: SourceLabel,
    descs: Vec<DescRecord>,
    instance_names: HashMap<(DomainId, u32), String>,
    records: Vec<crate::model::Snapshot>,
    cursor: usize,
    /// Newest value per (metric, instance) at or before the current tick.
    latest: HashMap<(MetricId, Option<u32>), Value>,
    /// A mark was consumed and not yet surfaced on the grid.
    pending_mark: bool,
    interval: i64,
    tick: i64,
    end: i64,
}

impl ArchiveSource {
    /// Opens `base` and prepares a grid of `interval`-second ticks clamped
    /// to the archive's recorded range and the optional window.
    pub fn open(
        base: &Path,
        interval: u64,
        window_start: Option<i64>,
        window_end: Option<i64>,
    ) -> Result<Self, SourceError> {
        if interval == 0 {
            return Err(SourceError::Corrupt("sampling interval must be non-zero".into()));
        }

        let reader = ArchiveReader::open(base).map_err(|e| SourceError::Io(e.to_string()))?;

        let records: Vec<crate::model::Snapshot> = reader.snapshots().to_vec();
        if records.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
            return Err(SourceError::Corrupt(
                "input data records are not in timestamp order".into(),
            ));
        }

        let rec_start = records.first().map_or(reader.label().start, |s| s.timestamp);
        let rec_end = records.last().map_or(reader.label().start, |s| s.timestamp);

        let start = window_start.map_or(rec_start, |w| w.max(rec_start));
        let end = window_end.map_or(rec_end, |w| w.min(rec_end));

        let instance_names = reader
            .indoms()
            .flat_map(|r| {
                r.instances
                    .iter()
                    .map(|(id, name)| ((r.domain, *id), name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let label = SourceLabel {
            hostname: reader.label().hostname.clone(),
            timezone: reader.label().timezone.clone(),
            start,
            end,
        };

        info!(
            base = %base.display(),
            records = records.len(),
            start,
            end,
            interval,
            "input archive opened"
        );

        Ok(Self {
            label,
            descs: reader.descriptors().cloned().collect(),
            instance_names,
            records,
            cursor: 0,
            latest: HashMap::new(),
            pending_mark: false,
            interval: interval as i64,
            tick: start,
            end,
        })
    }

    /// Narrows the grid to an explicit window, clamped to the recorded
    /// range. Callers resolving window arguments against the recorded
    /// bounds open first, then narrow. Must precede the first `next`.
    pub fn with_window(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        debug_assert_eq!(self.cursor, 0, "window must be set before iteration");
        if let Some(s) = start {
            self.label.start = s.max(self.label.start);
            self.tick = self.label.start;
        }
        if let Some(e) = end {
            self.end = e.min(self.end);
            self.label.end = self.end;
        }
        self
    }

    /// Consumes input records up to and including the current tick.
    fn advance(&mut self) {
        while self.cursor < self.records.len()
            && self.records[self.cursor].timestamp <= self.tick
        {
            let record = &self.records[self.cursor];
            if record.sets.is_empty() {
                // Mark: values on the far side of the gap are not continuous.
                self.latest.clear();
                self.pending_mark = true;
                debug!(timestamp = record.timestamp, "gap record in input");
            } else {
                for set in &record.sets {
                    // A record reporting a metric replaces that metric's
                    // whole instance set; instances it omits are no longer
                    // current and must not be carried forward.
                    self.latest.retain(|(metric, _), _| *metric != set.metric);
                    for iv in &set.values {
                        self.latest.insert((set.metric, iv.instance), iv.value);
                    }
                }
            }
            self.cursor += 1;
        }
    }

    /// Builds the grid snapshot for the current tick, value sets in
    /// descriptor order with instances sorted by id.
    fn snapshot_at_tick(&self) -> RawSnapshot {
        let mut sets = Vec::new();
        for desc in &self.descs {
            let mut values: Vec<InstanceValue> = self
                .latest
                .iter()
                .filter(|((metric, _), _)| *metric == desc.id)
                .map(|((_, instance), value)| InstanceValue {
                    instance: *instance,
                    value: *value,
                })
                .collect();
            if values.is_empty() {
                continue;
            }
            values.sort_by_key(|iv| iv.instance);
            sets.push(ValueSet {
                metric: desc.id,
                values,
            });
        }
        RawSnapshot {
            timestamp: self.tick,
            mark: false,
            sets,
        }
    }
}

impl SnapshotSource for ArchiveSource {
    fn label(&self) -> &SourceLabel {
        &self.label
    }

    fn metric_names(&self) -> Vec<String> {
        self.descs.iter().map(|d| d.name.clone()).collect()
    }

    fn lookup(&self, name: &str) -> Option<MetricDesc> {
        self.descs.iter().find(|d| d.name == name).map(|d| d.desc)
    }

    fn instance_name(&self, domain: DomainId, instance: u32) -> Option<String> {
        self.instance_names.get(&(domain, instance)).cloned()
    }

    fn next(&mut self) -> Result<Option<RawSnapshot>, SourceError> {
        if self.tick > self.end {
            return Ok(None);
        }
        self.advance();

        // A consumed mark invalidates everything recorded before it, even
        // when post-gap records were consumed in the same step: this tick
        // reports the gap, the next tick reports the fresh data. An empty
        // value table means the gap is still open, so the tick stays a mark.
        let snapshot = if self.pending_mark || self.latest.is_empty() {
            RawSnapshot::mark(self.tick)
        } else {
            self.snapshot_at_tick()
        };
        self.pending_mark = false;
        self.tick += self.interval;
        Ok(Some(snapshot))
    }
}
