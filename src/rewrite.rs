//! Rewrite stage: produces the output snapshot from a raw snapshot, the
//! catalog, and the carry state.
//!
//! Width conversion happens here and nowhere else: metrics flagged for
//! rewrite get their 32-bit counter values cast to the widened 64-bit output
//! storage, and every counter value has its accumulated wrap offset added so
//! the output stays continuous across wrap boundaries.

use tracing::warn;

use crate::catalog::{Metric, MetricCatalog, Semantics};
use crate::model::{InstanceValue, RawSnapshot, Snapshot, Value, ValueSet};
use crate::scan::CarryState;

/// Fatal failure while building the output snapshot.
#[derive(Debug)]
pub enum RewriteError {
    /// Could not grow the output snapshot buffers.
    Allocation(String),
}

impl std::fmt::Display for RewriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteError::Allocation(msg) => write!(f, "allocation failed: {}", msg),
        }
    }
}

impl std::error::Error for RewriteError {}

/// Applies width conversion and wrap offset to one raw value.
///
/// Returns `None` when the value's variant disagrees with the metric's
/// declared storage, which would corrupt the output stream if written.
fn convert(value: Value, metric: &Metric, offset: u64) -> Option<Value> {
    let counter = metric.input.semantics == Semantics::Counter;
    if metric.rewrite {
        // 32-bit counter widened to 64 bits, preserving signedness.
        return match value {
            Value::I32(v) => Some(Value::I64((v as i64).wrapping_add(offset as i64))),
            Value::U32(v) => Some(Value::U64((v as u64).wrapping_add(offset))),
            _ => None,
        };
    }
    if counter && offset != 0 {
        return match value {
            Value::I64(v) => Some(Value::I64(v.wrapping_add(offset as i64))),
            Value::U64(v) => Some(Value::U64(v.wrapping_add(offset))),
            _ => None,
        };
    }
    Some(value)
}

/// Builds the output snapshot for one tick.
///
/// The timestamp is copied unchanged. Value sets are emitted in catalog
/// order; metrics the source did not report this tick are simply absent.
pub fn rewrite(
    snapshot: &RawSnapshot,
    catalog: &MetricCatalog,
    carry: &CarryState,
) -> Result<Snapshot, RewriteError> {
    let mut sets = Vec::new();
    sets.try_reserve_exact(snapshot.sets.len())
        .map_err(|e| RewriteError::Allocation(e.to_string()))?;

    for metric in catalog.metrics() {
        let Some(raw) = snapshot.set_for(metric.input.id) else {
            continue;
        };

        let mut values = Vec::new();
        values
            .try_reserve_exact(raw.values.len())
            .map_err(|e| RewriteError::Allocation(e.to_string()))?;

        for iv in &raw.values {
            let offset = carry.offset(metric.input.id, iv.instance);
            match convert(iv.value, metric, offset) {
                Some(value) => values.push(InstanceValue {
                    instance: iv.instance,
                    value,
                }),
                None => {
                    warn!(
                        metric = %metric.name,
                        instance = ?iv.instance,
                        value = ?iv.value,
                        "value type disagrees with descriptor, dropped"
                    );
                }
            }
        }

        sets.push(ValueSet {
            metric: metric.output.id,
            values,
        });
    }

    Ok(Snapshot {
        timestamp: snapshot.timestamp,
        sets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MetricCatalog, MetricDesc, Semantics, StorageType, Units};
    use crate::model::{RawSnapshot, ValueSet};
    use crate::scan::{CarryState, scan};
    use crate::source::recorded::RecordedSource;

    fn catalog_of(metrics: &[(&str, MetricDesc)]) -> MetricCatalog {
        let mut src = RecordedSource::new("h", "UTC", 0, 0);
        for (name, d) in metrics {
            src.define_metric(name, *d);
        }
        let names: Vec<String> = metrics.iter().map(|(n, _)| n.to_string()).collect();
        MetricCatalog::build(&names, &src).unwrap()
    }

    fn u32_counter(id: u32) -> MetricDesc {
        MetricDesc {
            id,
            storage: StorageType::U32,
            semantics: Semantics::Counter,
            units: Units::default(),
            domain: None,
        }
    }

    fn snap(ts: i64, id: u32, v: Value) -> RawSnapshot {
        RawSnapshot {
            timestamp: ts,
            mark: false,
            sets: vec![ValueSet {
                metric: id,
                values: vec![InstanceValue {
                    instance: None,
                    value: v,
                }],
            }],
        }
    }

    fn single_value(out: &Snapshot, id: u32) -> Value {
        out.set_for(id).unwrap().values[0].value
    }

    #[test]
    fn widened_counter_is_cast_to_u64() {
        let catalog = catalog_of(&[("c", u32_counter(1))]);
        let carry = CarryState::new();
        let out = rewrite(&snap(100, 1, Value::U32(42)), &catalog, &carry).unwrap();
        assert_eq!(out.timestamp, 100);
        assert_eq!(single_value(&out, 1), Value::U64(42));
    }

    #[test]
    fn wrap_offset_keeps_output_non_decreasing() {
        let catalog = catalog_of(&[("c", u32_counter(1))]);
        let mut carry = CarryState::new();

        let raws = [100u32, 250, 30, 80];
        let mut outputs = Vec::new();
        for (i, v) in raws.iter().enumerate() {
            let s = snap(i as i64 * 10, 1, Value::U32(*v));
            scan(&s, &catalog, &mut carry);
            let out = rewrite(&s, &catalog, &carry).unwrap();
            match single_value(&out, 1) {
                Value::U64(v) => outputs.push(v),
                other => panic!("expected U64, got {:?}", other),
            }
        }

        assert_eq!(outputs[0], 100);
        assert_eq!(outputs[1], 250);
        assert_eq!(outputs[2], 30 + u32::MAX as u64);
        assert_eq!(outputs[3], 80 + u32::MAX as u64);
        assert!(outputs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn signed_counter_widens_to_i64() {
        let catalog = catalog_of(&[(
            "c",
            MetricDesc {
                id: 1,
                storage: StorageType::I32,
                semantics: Semantics::Counter,
                units: Units::default(),
                domain: None,
            },
        )]);
        let mut carry = CarryState::new();

        let s1 = snap(0, 1, Value::I32(i32::MAX - 5));
        scan(&s1, &catalog, &mut carry);
        let s2 = snap(10, 1, Value::I32(3));
        scan(&s2, &catalog, &mut carry);

        let out = rewrite(&s2, &catalog, &carry).unwrap();
        assert_eq!(single_value(&out, 1), Value::I64(3 + i32::MAX as i64));
    }

    #[test]
    fn instant_value_passes_through() {
        let catalog = catalog_of(&[(
            "g",
            MetricDesc {
                id: 1,
                storage: StorageType::F64,
                semantics: Semantics::Instant,
                units: Units::default(),
                domain: None,
            },
        )]);
        let carry = CarryState::new();
        let out = rewrite(&snap(5, 1, Value::F64(1.5)), &catalog, &carry).unwrap();
        assert_eq!(single_value(&out, 1), Value::F64(1.5));
    }

    #[test]
    fn mismatched_value_type_is_dropped() {
        let catalog = catalog_of(&[("c", u32_counter(1))]);
        let carry = CarryState::new();
        // Descriptor says U32, value claims F64.
        let out = rewrite(&snap(5, 1, Value::F64(9.0)), &catalog, &carry).unwrap();
        assert!(out.set_for(1).unwrap().values.is_empty());
    }

    #[test]
    fn unknown_metric_set_excluded_from_output() {
        let catalog = catalog_of(&[("c", u32_counter(1))]);
        let carry = CarryState::new();
        let mut s = snap(5, 1, Value::U32(1));
        s.sets.push(ValueSet {
            metric: 99,
            values: Vec::new(),
        });
        let out = rewrite(&s, &catalog, &carry).unwrap();
        assert_eq!(out.sets.len(), 1);
        assert!(out.set_for(99).is_none());
    }
}
