//! Loop Metrics
//!
//! Per-iteration statistics for the control loop and the cleanup loop.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Statistics from a single protection cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    /// Entities in the registry snapshot
    pub entities: usize,

    /// Entities whose urgency reached the due threshold
    pub due: usize,

    /// Replications issued to the driver
    pub issued: usize,

    pub succeeded: usize,

    pub failed: usize,

    /// Due entities pushed to a later cycle for lack of bandwidth
    pub deferred: usize,

    /// Due entities skipped because a replication was still running
    pub missed: usize,

    /// Entities that crossed the retry ceiling during this cycle
    pub attention: usize,

    /// Flows found in an impossible state
    pub invariant_violations: usize,

    pub duration: Option<Duration>,
}

impl CycleStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of issued replications that succeeded (1.0 if none issued)
    pub fn success_rate(&self) -> f64 {
        if self.issued == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.issued as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Cycle: {} entities | {} due | {}/{} replicated ({:.1}%) | {} failed | \
             {} deferred | {} missed",
            self.entities,
            self.due,
            self.succeeded,
            self.issued,
            self.success_rate() * 100.0,
            self.failed,
            self.deferred,
            self.missed
        )
    }
}

/// Accumulates cycle stats while a cycle runs
#[derive(Debug, Clone)]
pub struct CycleStatsBuilder {
    stats: CycleStats,
    start_time: Instant,
}

impl CycleStatsBuilder {
    pub fn new() -> Self {
        Self {
            stats: CycleStats::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record_entity(&mut self, due: bool) {
        self.stats.entities += 1;
        if due {
            self.stats.due += 1;
        }
    }

    pub fn record_issued(&mut self) {
        self.stats.issued += 1;
    }

    pub fn record_success(&mut self) {
        self.stats.succeeded += 1;
    }

    pub fn record_failure(&mut self, attention_raised: bool) {
        self.stats.failed += 1;
        if attention_raised {
            self.stats.attention += 1;
        }
    }

    pub fn record_deferred(&mut self) {
        self.stats.deferred += 1;
    }

    pub fn record_missed(&mut self) {
        self.stats.missed += 1;
    }

    pub fn record_invariant_violation(&mut self) {
        self.stats.invariant_violations += 1;
    }

    pub fn finish(mut self) -> CycleStats {
        self.stats.duration = Some(self.start_time.elapsed());
        self.stats
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }
}

impl Default for CycleStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from a single cleanup sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Entities examined
    pub scanned: usize,

    /// Entities skipped because a replication was running
    pub skipped: usize,

    /// Artifacts deleted (including ones already gone)
    pub deleted: usize,

    /// Artifacts kept
    pub retained: usize,

    /// Entities past the staleness SLA
    pub stale: usize,

    /// Driver or registry errors (the sweep continues past them)
    pub errors: usize,

    pub duration: Option<Duration>,
}

impl CleanupStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> String {
        format!(
            "Cleanup: {} scanned | {} skipped | {} deleted | {} retained | {} stale | {} errors",
            self.scanned, self.skipped, self.deleted, self.retained, self.stale, self.errors
        )
    }
}
