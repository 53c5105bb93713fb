//! Instance-domain tracker: diffs the membership seen in an output snapshot
//! against each domain's recorded membership and emits incremental metadata.
//!
//! Membership is append-only. A record is emitted only when a domain gained
//! members this tick; ticks where every instance is already known emit
//! nothing, so metadata is never written redundantly.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::archive::IndomRecord;
use crate::catalog::{DomainState, MetricCatalog};
use crate::model::{DomainId, Snapshot};

/// Compares the snapshot's instance membership against the domain table,
/// appending unseen instances and returning the metadata records to flush
/// before the snapshot itself.
///
/// `name_of` resolves an instance's external name; unresolvable instances
/// fall back to their numeric id.
pub fn diff<F>(
    snapshot: &Snapshot,
    catalog: &mut MetricCatalog,
    mut name_of: F,
) -> Vec<IndomRecord>
where
    F: FnMut(DomainId, u32) -> Option<String>,
{
    // Union of instances per touched domain; ordered for deterministic
    // metadata emission.
    let mut touched: BTreeMap<DomainId, BTreeSet<u32>> = BTreeMap::new();
    for set in &snapshot.sets {
        let Some(domain) = catalog
            .metric_by_id(set.metric)
            .and_then(|m| m.input.domain)
        else {
            continue;
        };
        let seen = touched.entry(domain).or_default();
        for iv in &set.values {
            if let Some(inst) = iv.instance {
                seen.insert(inst);
            }
        }
    }

    let mut records = Vec::new();
    for (domain_id, instances) in touched {
        let Some(domain) = catalog.domains.get_mut(domain_id) else {
            // Catalog build allocates a domain for every metric that
            // declares one, so a miss here is a stage-ordering bug.
            debug_assert!(false, "untracked domain {}", domain_id);
            continue;
        };

        let mut grew = false;
        for inst in instances {
            if !domain.contains(inst) {
                let name = name_of(domain_id, inst).unwrap_or_else(|| inst.to_string());
                domain.append(inst, name);
                grew = true;
            }
        }

        if grew {
            domain.state = DomainState::Loaded;
            debug!(
                domain = domain_id,
                members = domain.instances.len(),
                "instance domain grew"
            );
            records.push(IndomRecord {
                domain: domain_id,
                instances: domain.instances.clone(),
            });
        }
    }

    records
}
