//! Per-tick scan: counter-wrap detection, gap handling, and instance
//! disappearance tracking.
//!
//! The scan stage owns the carry state and runs once per tick, before the
//! rewrite stage. It never produces output itself; it only updates the
//! bookkeeping the rewrite stage reads.

use std::collections::HashMap;

use tracing::debug;

use crate::catalog::{MetricCatalog, Semantics, StorageType};
use crate::model::{MetricId, RawSnapshot, Value};

/// Carry for one (metric, instance) pair.
#[derive(Clone, Copy, Debug)]
struct InstanceCarry {
    last_raw: Value,
    /// Accumulated wrap correction, in raw input-type units.
    wrap_offset: u64,
    /// Instance reported a value in the most recent non-mark tick.
    present: bool,
}

/// Per-metric counter / continuity bookkeeping.
///
/// Created with the catalog, updated every tick, reset only by an explicit
/// gap (mark) record.
#[derive(Debug, Default)]
pub struct CarryState {
    metrics: HashMap<MetricId, HashMap<Option<u32>, InstanceCarry>>,
}

impl CarryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all continuity state. Future values start a fresh baseline
    /// instead of being diffed against pre-gap values.
    pub fn clear_continuity(&mut self) {
        self.metrics.clear();
    }

    /// Accumulated wrap offset for one (metric, instance), zero if none.
    pub fn offset(&self, metric: MetricId, instance: Option<u32>) -> u64 {
        self.metrics
            .get(&metric)
            .and_then(|m| m.get(&instance))
            .map_or(0, |c| c.wrap_offset)
    }

    /// Whether the instance reported a value in the most recent scan.
    pub fn was_present(&self, metric: MetricId, instance: Option<u32>) -> bool {
        self.metrics
            .get(&metric)
            .and_then(|m| m.get(&instance))
            .is_some_and(|c| c.present)
    }
}

/// Width of one full wrap of the input storage type, in raw units.
fn wrap_span(storage: StorageType) -> u64 {
    match storage {
        StorageType::I32 => i32::MAX as u64,
        StorageType::U32 => u32::MAX as u64,
        StorageType::I64 => i64::MAX as u64,
        StorageType::U64 => u64::MAX,
        // Float counters cannot wrap at a type boundary.
        StorageType::F32 | StorageType::F64 => 0,
    }
}

/// True when `next` is numerically below `prev` for an integer storage type.
/// Counters forbid real decreases, so any decrease is a wrap.
fn decreased(prev: Value, next: Value) -> bool {
    match (prev, next) {
        (Value::I32(p), Value::I32(n)) => n < p,
        (Value::U32(p), Value::U32(n)) => n < p,
        (Value::I64(p), Value::I64(n)) => n < p,
        (Value::U64(p), Value::U64(n)) => n < p,
        // Type drift or floats: no wrap interpretation.
        _ => false,
    }
}

/// Inspects one raw snapshot, updating the carry state.
///
/// Mark records clear all continuity and are otherwise ignored. For every
/// counter value that decreased since the last tick the wrap span of the
/// *input* storage type is added to the accumulated offset, keeping future
/// rewritten values continuous with prior output.
pub fn scan(snapshot: &RawSnapshot, catalog: &MetricCatalog, carry: &mut CarryState) {
    if snapshot.mark {
        debug!(timestamp = snapshot.timestamp, "mark record, clearing continuity");
        carry.clear_continuity();
        return;
    }

    for metric in catalog.metrics() {
        let per_inst = carry.metrics.entry(metric.input.id).or_default();

        // Everything starts absent for this tick; values below re-assert presence.
        for c in per_inst.values_mut() {
            c.present = false;
        }

        let Some(set) = snapshot.set_for(metric.input.id) else {
            continue;
        };

        for iv in &set.values {
            match per_inst.get_mut(&iv.instance) {
                Some(c) => {
                    if metric.input.semantics == Semantics::Counter
                        && decreased(c.last_raw, iv.value)
                    {
                        let span = wrap_span(metric.input.storage);
                        c.wrap_offset = c.wrap_offset.wrapping_add(span);
                        debug!(
                            metric = %metric.name,
                            instance = ?iv.instance,
                            offset = c.wrap_offset,
                            "counter wrap detected"
                        );
                    }
                    c.last_raw = iv.value;
                    c.present = true;
                }
                None => {
                    per_inst.insert(
                        iv.instance,
                        InstanceCarry {
                            last_raw: iv.value,
                            wrap_offset: 0,
                            present: true,
                        },
                    );
                }
            }
        }
    }
}
