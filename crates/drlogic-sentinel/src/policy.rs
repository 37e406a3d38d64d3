//! Loop Policy
//!
//! Periods, protection interval, staleness SLA and retry thresholds shared by
//! the control loop and the cleanup loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted period, interval or window: one year
pub const MAX_PERIOD_S: u64 = 365 * 24 * 3600;

/// Largest accepted `retention_factor`
pub const MAX_RETENTION_FACTOR: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopPolicy {
    /// Period of the protection cycle in seconds
    ///
    /// **Default:** 60
    pub drlogic_interval_s: u64,

    /// Period of the cleanup sweep in seconds
    ///
    /// **Default:** 600
    pub clean_up_interval_s: u64,

    /// Longest allowed gap between two protections of an entity
    ///
    /// **Default:** 3600 (1 hour)
    pub max_protection_interval_s: u64,

    /// Age of the last protection beyond which an entity is Stale
    ///
    /// **Default:** 10800 (3 hours)
    pub max_staleness_s: u64,

    /// Artifacts older than `max_protection_interval_s × retention_factor`
    /// are expired, except the newest one
    ///
    /// **Default:** 3
    pub retention_factor: u32,

    /// Consecutive failures after which an entity needs operator attention
    ///
    /// **Default:** 5
    pub retry_ceiling: u32,

    /// Smallest bandwidth worth starting a flow with
    ///
    /// **Default:** 10
    pub min_flow_bandwidth: u64,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            drlogic_interval_s: 60,
            clean_up_interval_s: 600,
            max_protection_interval_s: 3600,
            max_staleness_s: 3 * 3600,
            retention_factor: 3,
            retry_ceiling: 5,
            min_flow_bandwidth: 10,
        }
    }
}

impl LoopPolicy {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.drlogic_interval_s)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.clean_up_interval_s)
    }

    pub fn protection_interval(&self) -> chrono::Duration {
        seconds(self.max_protection_interval_s)
    }

    pub fn staleness_window(&self) -> chrono::Duration {
        seconds(self.max_staleness_s)
    }

    /// Saturates instead of wrapping; [`validate`](Self::validate) keeps it
    /// far below the limit
    pub fn retention_window(&self) -> chrono::Duration {
        i32::try_from(self.retention_factor)
            .ok()
            .and_then(|factor| self.protection_interval().checked_mul(factor))
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Validate the policy configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.drlogic_interval_s == 0 {
            return Err("drlogic_interval_s must be greater than 0".to_string());
        }

        if self.clean_up_interval_s == 0 {
            return Err("clean_up_interval_s must be greater than 0".to_string());
        }

        if self.max_protection_interval_s == 0 {
            return Err("max_protection_interval_s must be greater than 0".to_string());
        }

        if self.max_staleness_s < self.max_protection_interval_s {
            return Err(
                "max_staleness_s must not be shorter than max_protection_interval_s".to_string(),
            );
        }

        for (name, value) in [
            ("drlogic_interval_s", self.drlogic_interval_s),
            ("clean_up_interval_s", self.clean_up_interval_s),
            ("max_protection_interval_s", self.max_protection_interval_s),
            ("max_staleness_s", self.max_staleness_s),
        ] {
            if value > MAX_PERIOD_S {
                return Err(format!("{} must not exceed {} seconds", name, MAX_PERIOD_S));
            }
        }

        if self.retention_factor == 0 {
            return Err("retention_factor must be at least 1".to_string());
        }

        if self.retention_factor > MAX_RETENTION_FACTOR {
            return Err(format!(
                "retention_factor must not exceed {}",
                MAX_RETENTION_FACTOR
            ));
        }

        Ok(())
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
