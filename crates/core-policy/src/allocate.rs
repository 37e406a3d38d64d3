//! Proportional split of a class budget among due entities

use drlogic_core_registry::{Bandwidth, EntityId};
use std::cmp::Ordering;

/// A due entity competing for bandwidth
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entity_id: EntityId,
    pub urgency: f64,
}

/// Outcome of one class split
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    /// Granted flows, highest priority first
    pub granted: Vec<(EntityId, Bandwidth)>,
    /// Entities pushed to the next cycle, highest priority first
    pub deferred: Vec<EntityId>,
}

/// Urgency descending, then entity id ascending
pub fn priority_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.urgency
        .partial_cmp(&a.urgency)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

/// Split weight of each candidate (same order as `candidates`)
///
/// Never-protected entities carry infinite urgency; they split as
/// `max(2.0, highest finite urgency)` so they lead without starving others.
fn weights(candidates: &[Candidate]) -> Vec<f64> {
    let top_finite = candidates
        .iter()
        .map(|c| c.urgency)
        .filter(|u| u.is_finite())
        .fold(0.0_f64, f64::max);
    let infinite_weight = top_finite.max(2.0);

    candidates
        .iter()
        .map(|c| {
            if c.urgency.is_finite() {
                c.urgency.max(0.0)
            } else {
                infinite_weight
            }
        })
        .collect()
}

/// Floor shares of `budget` proportional to `weights`
fn floor_shares(budget: u64, weights: &[f64]) -> Vec<u64> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        let even = budget / weights.len().max(1) as u64;
        return vec![even; weights.len()];
    }
    weights
        .iter()
        .map(|w| ((budget as f64) * w / total).floor() as u64)
        .collect()
}

/// Split `budget` among `candidates`
///
/// While the smallest share is below `min_flow`, the lowest-priority
/// candidate is deferred and the split is recomputed. The rounding
/// remainder goes to the highest-priority flows, one unit each, so granted
/// bandwidth always sums to exactly `budget` when anything is granted.
pub fn split(mut candidates: Vec<Candidate>, budget: Bandwidth, min_flow: Bandwidth) -> Allocation {
    candidates.sort_by(priority_order);
    let mut deferred = Vec::new();

    // Weights are non-increasing along priority order, so the smallest share
    // always belongs to the last candidate.
    let shares = loop {
        if candidates.is_empty() {
            break Vec::new();
        }
        let shares = floor_shares(budget.units(), &weights(&candidates));
        let smallest = shares.iter().copied().min().unwrap_or(0);
        if smallest >= min_flow.units() && smallest > 0 {
            break shares;
        }
        if let Some(last) = candidates.pop() {
            deferred.push(last.entity_id);
        }
    };
    deferred.reverse();

    let mut shares = shares;
    let granted_total: u64 = shares.iter().sum();
    let mut remainder = budget.units().saturating_sub(granted_total);
    for share in shares.iter_mut() {
        if remainder == 0 {
            break;
        }
        *share += 1;
        remainder -= 1;
    }

    Allocation {
        granted: candidates
            .into_iter()
            .zip(shares)
            .map(|(c, share)| (c.entity_id, Bandwidth(share)))
            .collect(),
        deferred,
    }
}
