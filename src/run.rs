//! The sequential reduction driver.
//!
//! One tick is processed end-to-end — fetch, scan, rewrite, instance diff,
//! write — before the next fetch begins, so no stage ever sees concurrent
//! mutation. Every failure is fatal: a reduced archive is valid only when it
//! is complete, so any error aborts the run and deletes the partial output.

use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::archive::{ArchiveLabel, ArchiveWriter, DescRecord, FORMAT_VERSION, writer};
use crate::catalog::{MetricCatalog, SetupError};
use crate::indom;
use crate::rewrite::{RewriteError, rewrite};
use crate::scan::{CarryState, scan};
use crate::source::{SnapshotSource, SourceError};

/// Fatal conditions of a reduction run.
#[derive(Debug)]
pub enum ReduceError {
    /// Archive-open, label, or metric-resolution failure before the loop.
    Setup(String),
    /// Failure to grow internal tables or snapshot buffers.
    Allocation(String),
    /// Failure to serialize or append a metadata or data record.
    Encoding(String),
    /// Hard failure in the fetch source (end-of-window is not an error).
    Source(String),
}

impl std::fmt::Display for ReduceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceError::Setup(msg) => write!(f, "setup failed: {}", msg),
            ReduceError::Allocation(msg) => write!(f, "allocation failed: {}", msg),
            ReduceError::Encoding(msg) => write!(f, "archive write failed: {}", msg),
            ReduceError::Source(msg) => write!(f, "fetch source failed: {}", msg),
        }
    }
}

impl std::error::Error for ReduceError {}

impl From<SetupError> for ReduceError {
    fn from(e: SetupError) -> Self {
        ReduceError::Setup(e.to_string())
    }
}

impl From<RewriteError> for ReduceError {
    fn from(e: RewriteError) -> Self {
        match e {
            RewriteError::Allocation(msg) => ReduceError::Allocation(msg),
        }
    }
}

impl From<SourceError> for ReduceError {
    fn from(e: SourceError) -> Self {
        ReduceError::Source(e.to_string())
    }
}

/// Driving parameters, owned by the CLI layer but honored here.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Output sampling interval in seconds. The fetch source delivers
    /// snapshots already interpolated to this grid.
    pub interval: u64,
    /// Stop after this many output records.
    pub sample_limit: Option<u64>,
    /// Override for the label start timestamp (window start).
    pub start: Option<i64>,
    /// Timezone recorded in the output label instead of the source's.
    pub timezone: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            interval: 3600,
            sample_limit: None,
            start: None,
            timezone: None,
        }
    }
}

/// Outcome of a successful run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub records_written: u64,
    pub metrics: usize,
    pub indom_records: u64,
}

/// Per-run mutable state threaded through the stages. No globals.
struct RunContext {
    catalog: MetricCatalog,
    carry: CarryState,
    indom_records: u64,
}

/// Runs one complete reduction: resolve metrics, open the output archive,
/// process ticks until the source is exhausted or the sample limit is hit,
/// then close. On any fatal condition the partial archive is deleted and
/// the error returned.
pub fn run_reduction(
    config: &RunConfig,
    source: &mut dyn SnapshotSource,
    out_base: &Path,
) -> Result<RunReport, ReduceError> {
    // Resolve everything before any output file exists; partial metadata is
    // unsafe to consume, so resolution failure must not leave files behind.
    let names = source.metric_names();
    let catalog = MetricCatalog::build(&names, source)?;
    info!(
        metrics = catalog.len(),
        domains = catalog.domains.len(),
        interval = config.interval,
        "catalog built"
    );

    let src_label = source.label();
    let label = ArchiveLabel {
        version: FORMAT_VERSION,
        start: config.start.unwrap_or(src_label.start),
        hostname: src_label.hostname.clone(),
        timezone: config
            .timezone
            .clone()
            .unwrap_or_else(|| src_label.timezone.clone()),
    };

    let mut archive =
        ArchiveWriter::open(out_base, &label).map_err(|e| ReduceError::Setup(e.to_string()))?;

    let mut ctx = RunContext {
        catalog,
        carry: CarryState::new(),
        indom_records: 0,
    };

    match drive(config, source, &mut ctx, &mut archive) {
        Ok(records_written) => {
            if let Err(e) = archive.close() {
                writer::remove_streams(out_base);
                return Err(ReduceError::Encoding(e.to_string()));
            }
            Ok(RunReport {
                records_written,
                metrics: ctx.catalog.len(),
                indom_records: ctx.indom_records,
            })
        }
        Err(e) => {
            archive.abort();
            Err(e)
        }
    }
}

/// The main loop. Returns the number of data records written; any error
/// propagates to the caller, which owns abort cleanup.
fn drive(
    config: &RunConfig,
    source: &mut dyn SnapshotSource,
    ctx: &mut RunContext,
    archive: &mut ArchiveWriter,
) -> Result<u64, ReduceError> {
    for metric in ctx.catalog.metrics() {
        archive
            .put_desc(&DescRecord {
                id: metric.output.id,
                name: metric.name.clone(),
                desc: metric.output,
            })
            .map_err(encoding)?;
    }

    loop {
        if let Some(limit) = config.sample_limit
            && archive.records_written() >= limit
        {
            info!(limit, "sample limit reached");
            break;
        }

        // The single suspension point: end-of-window is a clean terminal.
        let Some(raw) = source.next()? else {
            debug!("fetch source exhausted");
            break;
        };

        scan(&raw, &ctx.catalog, &mut ctx.carry);
        if raw.mark {
            // Gap ticks reset continuity but contribute no output record.
            continue;
        }

        let output = rewrite(&raw, &ctx.catalog, &ctx.carry)?;
        let updates = indom::diff(&output, &mut ctx.catalog, |domain, inst| {
            source.instance_name(domain, inst)
        });
        ctx.indom_records += updates.len() as u64;

        archive.commit_tick(&updates, &output).map_err(encoding)?;
    }

    Ok(archive.records_written())
}

fn encoding(e: io::Error) -> ReduceError {
    ReduceError::Encoding(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveReader, MetaRecord, stream_path};
    use crate::catalog::{MetricDesc, Semantics, StorageType, Units};
    use crate::model::{InstanceValue, RawSnapshot, Value, ValueSet};
    use crate::source::recorded::RecordedSource;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn desc(
        id: u32,
        storage: StorageType,
        semantics: Semantics,
        domain: Option<u32>,
    ) -> MetricDesc {
        MetricDesc {
            id,
            storage,
            semantics,
            units: Units::default(),
            domain,
        }
    }

    fn snap(ts: i64, values: &[(u32, Option<u32>, Value)]) -> RawSnapshot {
        let mut sets: Vec<ValueSet> = Vec::new();
        for (metric, instance, value) in values {
            match sets.iter_mut().find(|s| s.metric == *metric) {
                Some(set) => set.values.push(InstanceValue {
                    instance: *instance,
                    value: *value,
                }),
                None => sets.push(ValueSet {
                    metric: *metric,
                    values: vec![InstanceValue {
                        instance: *instance,
                        value: *value,
                    }],
                }),
            }
        }
        RawSnapshot {
            timestamp: ts,
            mark: false,
            sets,
        }
    }

    /// The 3600-second window at 600-second resolution scenario: one 32-bit
    /// counter and one 32-bit instant metric sharing a single-instance domain.
    fn scenario_source() -> RecordedSource {
        let mut src = RecordedSource::new("dbhost", "UTC", 600, 4200);
        src.define_metric("disk.reads", desc(1, StorageType::U32, Semantics::Counter, Some(2)));
        src.define_metric("disk.queue", desc(2, StorageType::U32, Semantics::Instant, Some(2)));
        src.define_instance(2, 0, "sda");
        for i in 0..6i64 {
            let ts = 600 + i * 600;
            src.push(snap(
                ts,
                &[
                    (1, Some(0), Value::U32(100 * i as u32)),
                    (2, Some(0), Value::U32(7)),
                ],
            ));
        }
        src
    }

    #[test]
    fn end_to_end_scenario() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");
        let mut src = scenario_source();
        let config = RunConfig {
            interval: 600,
            ..RunConfig::default()
        };

        let report = run_reduction(&config, &mut src, &base).unwrap();
        assert_eq!(report.records_written, 6);
        assert_eq!(report.metrics, 2);
        assert_eq!(report.indom_records, 1);

        let reader = ArchiveReader::open(&base).unwrap();
        assert_eq!(reader.label().hostname, "dbhost");
        assert_eq!(reader.label().start, 600);

        // Exactly 6 data records, strictly increasing, 600 seconds apart.
        let stamps: Vec<i64> = reader.snapshots().iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![600, 1200, 1800, 2400, 3000, 3600]);

        // One descriptor per metric; counter widened, instant untouched.
        let descs: Vec<_> = reader.descriptors().collect();
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].name, "disk.reads");
        assert_eq!(descs[0].desc.storage, StorageType::U64);
        assert_eq!(descs[1].desc.storage, StorageType::U32);

        // Exactly one instance-domain record for the stable membership.
        let indoms: Vec<_> = reader.indoms().collect();
        assert_eq!(indoms.len(), 1);
        assert_eq!(indoms[0].domain, 2);
        assert_eq!(indoms[0].instances, vec![(0, "sda".to_string())]);
    }

    #[test]
    fn metadata_precedes_data_for_every_instance() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");
        let mut src = scenario_source();
        // A new disk appears mid-run.
        src.define_instance(2, 1, "sdb");
        src.push(snap(
            4200,
            &[
                (1, Some(0), Value::U32(600)),
                (1, Some(1), Value::U32(5)),
                (2, Some(1), Value::U32(1)),
            ],
        ));
        let config = RunConfig {
            interval: 600,
            ..RunConfig::default()
        };
        run_reduction(&config, &mut src, &base).unwrap();

        let reader = ArchiveReader::open(&base).unwrap();
        // Membership grew, so there are two indom records, in growth order.
        let indoms: Vec<_> = reader.indoms().collect();
        assert_eq!(indoms.len(), 2);
        assert_eq!(indoms[0].instances.len(), 1);
        assert_eq!(indoms[1].instances.len(), 2);
        assert_eq!(indoms[1].instances[1], (1, "sdb".to_string()));

        // Every instance referenced by any data record has metadata.
        let mut known: HashSet<(u32, u32)> = HashSet::new();
        for m in reader.metadata() {
            if let MetaRecord::Indom(r) = m {
                for (id, _) in &r.instances {
                    known.insert((r.domain, *id));
                }
            }
        }
        for s in reader.snapshots() {
            for set in &s.sets {
                for iv in &set.values {
                    if let Some(inst) = iv.instance {
                        assert!(known.contains(&(2, inst)), "instance {} unannounced", inst);
                    }
                }
            }
        }
    }

    #[test]
    fn wrap_correction_survives_to_the_archive() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");
        let mut src = RecordedSource::new("h", "UTC", 0, 30);
        src.define_metric("c", desc(1, StorageType::U32, Semantics::Counter, None));
        for (i, v) in [100u32, 250, 30, 80].iter().enumerate() {
            src.push(snap(i as i64 * 10, &[(1, None, Value::U32(*v))]));
        }
        let config = RunConfig {
            interval: 10,
            ..RunConfig::default()
        };
        run_reduction(&config, &mut src, &base).unwrap();

        let reader = ArchiveReader::open(&base).unwrap();
        let values: Vec<u64> = reader
            .snapshots()
            .iter()
            .map(|s| match s.sets[0].values[0].value {
                Value::U64(v) => v,
                other => panic!("expected widened U64, got {:?}", other),
            })
            .collect();
        assert_eq!(values[0], 100);
        assert_eq!(values[1], 250);
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
    }

    #[test]
    fn sample_limit_bounds_the_run() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");
        let mut src = scenario_source();
        let config = RunConfig {
            interval: 600,
            sample_limit: Some(2),
            ..RunConfig::default()
        };
        let report = run_reduction(&config, &mut src, &base).unwrap();
        assert_eq!(report.records_written, 2);

        let reader = ArchiveReader::open(&base).unwrap();
        assert_eq!(reader.snapshots().len(), 2);
    }

    #[test]
    fn source_failure_mid_run_removes_all_files() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");
        let mut src = scenario_source();
        src.fail_after_queue("connection reset");
        let config = RunConfig {
            interval: 600,
            ..RunConfig::default()
        };

        let err = run_reduction(&config, &mut src, &base).unwrap_err();
        assert!(matches!(err, ReduceError::Source(_)));
        for suffix in ["data", "meta", "index"] {
            assert!(
                !stream_path(&base, suffix).exists(),
                "{} left behind after abort",
                suffix
            );
        }
    }

    #[test]
    fn unresolved_metric_fails_before_any_file_exists() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");

        struct BrokenLookup(RecordedSource);
        impl SnapshotSource for BrokenLookup {
            fn label(&self) -> &crate::source::SourceLabel {
                self.0.label()
            }
            fn metric_names(&self) -> Vec<String> {
                vec!["ghost.metric".to_string()]
            }
            fn lookup(&self, _name: &str) -> Option<MetricDesc> {
                None
            }
            fn instance_name(&self, _d: u32, _i: u32) -> Option<String> {
                None
            }
            fn next(&mut self) -> Result<Option<RawSnapshot>, SourceError> {
                self.0.next()
            }
        }

        let mut src = BrokenLookup(RecordedSource::new("h", "UTC", 0, 0));
        let err = run_reduction(&RunConfig::default(), &mut src, &base).unwrap_err();
        assert!(matches!(err, ReduceError::Setup(_)));
        for suffix in ["data", "meta", "index"] {
            assert!(!stream_path(&base, suffix).exists());
        }
    }

    #[test]
    fn mark_ticks_produce_no_output_record() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");
        let mut src = RecordedSource::new("h", "UTC", 0, 40);
        src.define_metric("c", desc(1, StorageType::U32, Semantics::Counter, None));
        src.push(snap(0, &[(1, None, Value::U32(500))]));
        src.push(RawSnapshot::mark(10));
        src.push(snap(20, &[(1, None, Value::U32(40))]));
        let config = RunConfig {
            interval: 10,
            ..RunConfig::default()
        };
        let report = run_reduction(&config, &mut src, &base).unwrap();
        assert_eq!(report.records_written, 2);

        let reader = ArchiveReader::open(&base).unwrap();
        let stamps: Vec<i64> = reader.snapshots().iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![0, 20]);
        // Post-gap 40 < pre-gap 500 is a fresh baseline, not a wrap.
        assert_eq!(
            reader.snapshots()[1].sets[0].values[0].value,
            Value::U64(40)
        );
    }

    #[test]
    fn input_gap_resets_counter_baseline_through_the_pipeline() {
        use crate::source::ArchiveSource;

        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let label = ArchiveLabel {
            version: FORMAT_VERSION,
            start: 0,
            hostname: "h".to_string(),
            timezone: "UTC".to_string(),
        };
        let rec = |ts: i64, v: u32| crate::model::Snapshot {
            timestamp: ts,
            sets: vec![ValueSet {
                metric: 1,
                values: vec![InstanceValue {
                    instance: None,
                    value: Value::U32(v),
                }],
            }],
        };
        let mut writer = ArchiveWriter::open(&input, &label).unwrap();
        writer
            .put_desc(&DescRecord {
                id: 1,
                name: "c".to_string(),
                desc: desc(1, StorageType::U32, Semantics::Counter, None),
            })
            .unwrap();
        writer.commit_tick(&[], &rec(0, 500)).unwrap();
        // Recording gap, then the counter restarts from a low value.
        writer
            .commit_tick(
                &[],
                &crate::model::Snapshot {
                    timestamp: 5,
                    sets: Vec::new(),
                },
            )
            .unwrap();
        writer.commit_tick(&[], &rec(8, 3)).unwrap();
        writer.commit_tick(&[], &rec(18, 7)).unwrap();
        writer.commit_tick(&[], &rec(28, 9)).unwrap();
        writer.close().unwrap();

        let mut source = ArchiveSource::open(&input, 10, None, None).unwrap();
        let out = dir.path().join("out");
        let config = RunConfig {
            interval: 10,
            ..RunConfig::default()
        };
        run_reduction(&config, &mut source, &out).unwrap();

        let reader = ArchiveReader::open(&out).unwrap();
        // The gap tick writes no record, and the post-gap restart is a
        // fresh baseline, not a wrap.
        let got: Vec<(i64, Value)> = reader
            .snapshots()
            .iter()
            .map(|s| (s.timestamp, s.sets[0].values[0].value))
            .collect();
        assert_eq!(got, vec![(0, Value::U64(500)), (20, Value::U64(7))]);
        assert!(reader.snapshots().iter().all(|s| !s.sets.is_empty()));
    }

    #[test]
    fn label_overrides_from_config() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");
        let mut src = scenario_source();
        let config = RunConfig {
            interval: 600,
            start: Some(900),
            timezone: Some("Europe/Berlin".to_string()),
            ..RunConfig::default()
        };
        run_reduction(&config, &mut src, &base).unwrap();

        let reader = ArchiveReader::open(&base).unwrap();
        assert_eq!(reader.label().start, 900);
        assert_eq!(reader.label().timezone, "Europe/Berlin");
    }
}
