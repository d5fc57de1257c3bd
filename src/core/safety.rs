//! Banker's safety test over vector allocations.
//!
//! A state is safe when some ordering of the registered processes lets each one
//! obtain its full remaining need from the units freed by those finishing before it.
//! The checker is pure: it never mutates records and performs no I/O.
//!
//! When several processes are eligible in the same pass the smallest pid wins, and
//! the scan restarts from the smallest pid after every finish, so the reported
//! finishing order is deterministic.

use crate::core::ledger::{ProcessId, ProcessRecord};
use crate::core::resource::ResourceVector;

/// Returns true when `records` can all finish starting from `available`.
pub fn is_safe<'a, I>(available: ResourceVector, records: I) -> bool
where
    I: IntoIterator<Item = &'a ProcessRecord>,
{
    let records = sorted(records);
    finishing_order(available, &records).is_some()
}

/// Returns a finishing order (pids) proving the state safe, or `None` if unsafe.
pub fn safe_sequence<'a, I>(available: ResourceVector, records: I) -> Option<Vec<ProcessId>>
where
    I: IntoIterator<Item = &'a ProcessRecord>,
{
    let records = sorted(records);
    finishing_order(available, &records)
        .map(|order| order.into_iter().map(|i| records[i].pid.clone()).collect())
}

fn sorted<'a, I>(records: I) -> Vec<&'a ProcessRecord>
where
    I: IntoIterator<Item = &'a ProcessRecord>,
{
    let mut records: Vec<&ProcessRecord> = records.into_iter().collect();
    records.sort_by(|a, b| a.pid.cmp(&b.pid));
    records
}

/// Indices into `records` in finishing order. `records` must be sorted by pid.
fn finishing_order(available: ResourceVector, records: &[&ProcessRecord]) -> Option<Vec<usize>> {
    let mut work = available;
    let mut finished = vec![false; records.len()];
    let mut order = Vec::with_capacity(records.len());

    while order.len() < records.len() {
        let next = records
            .iter()
            .enumerate()
            .find(|(i, record)| !finished[*i] && record.need().fits_within(work))
            .map(|(i, _)| i)?;
        work += records[next].allocation;
        finished[next] = true;
        order.push(next);
    }
    Some(order)
}
