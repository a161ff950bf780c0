//! Load-balancing arithmetic.
//!
//! Pure functions over worker ids and counts. The engine gathers the inputs
//! from the store, calls in here, and persists the outcome.

use std::collections::HashMap;

use crowdreview_core::{TaskId, UserId};

/// Per-worker open-task counts, in pool order.
///
/// Counters are local to one call. Assigning through the snapshot bumps the
/// chosen worker so a batch of assignments spreads out without re-reading
/// the store between tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSnapshot {
    entries: Vec<(UserId, usize)>,
}

impl LoadSnapshot {
    pub fn new(entries: Vec<(UserId, usize)>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(UserId, usize)] {
        &self.entries
    }

    pub fn load_of(&self, worker: UserId) -> Option<usize> {
        self.entries
            .iter()
            .find(|(id, _)| *id == worker)
            .map(|(_, load)| *load)
    }

    /// The worker with the strictly smallest load. Ties go to the worker
    /// that comes first in pool order.
    pub fn least_loaded(&self) -> Option<UserId> {
        self.entries
            .iter()
            .min_by_key(|(_, load)| *load)
            .map(|(id, _)| *id)
    }

    /// Count one more task against `worker`.
    pub fn record_assignment(&mut self, worker: UserId) {
        if let Some((_, load)) = self.entries.iter_mut().find(|(id, _)| *id == worker) {
            *load += 1;
        }
    }

    /// Pick the least-loaded worker and count the task against them.
    pub fn assign_next(&mut self) -> Option<UserId> {
        let worker = self.least_loaded()?;
        self.record_assignment(worker);
        Some(worker)
    }

    /// Difference between the busiest and the idlest worker.
    pub fn spread(&self) -> usize {
        let loads = self.entries.iter().map(|(_, load)| *load);
        match (loads.clone().max(), loads.min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        }
    }
}

/// Split `tasks` across `workers`: everyone gets `tasks / workers`, and the
/// first `tasks % workers` workers take one extra.
pub fn quotas(tasks: usize, workers: usize) -> Vec<usize> {
    if workers == 0 {
        return Vec::new();
    }
    let base = tasks / workers;
    let remainder = tasks % workers;
    (0..workers)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Assign every task to a worker by quota.
///
/// `tasks` must be oldest first and `workers` in pool order. The first
/// worker receives the oldest tasks up to their quota, then the next worker,
/// and so on. The result is a pure function of the two orderings, so
/// planning again over the same inputs yields the same bindings.
pub fn plan_redistribution(tasks: &[TaskId], workers: &[UserId]) -> Vec<(TaskId, UserId)> {
    let quotas = quotas(tasks.len(), workers.len());
    let mut remaining = tasks.iter();
    let mut plan = Vec::with_capacity(tasks.len());
    for (worker, quota) in workers.iter().zip(quotas) {
        for task in remaining.by_ref().take(quota) {
            plan.push((*task, *worker));
        }
    }
    plan
}

/// Number of tasks each worker holds under `plan`.
pub fn plan_loads(plan: &[(TaskId, UserId)]) -> HashMap<UserId, usize> {
    let mut loads = HashMap::new();
    for (_, worker) in plan {
        *loads.entry(*worker).or_insert(0) += 1;
    }
    loads
}
