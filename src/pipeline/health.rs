//! Per-field staleness tracking.
//!
//! Every cycle reports which fields came back live. A field that keeps
//! falling back is counted, and once the count reaches the alert threshold
//! the cycle logs a warning for it and the service reports itself degraded.

use crate::pipeline::cache::CacheState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug)]
pub struct HealthTracker {
    threshold: u32,
    failures: BTreeMap<String, u32>,
    last_live_at: Option<DateTime<Utc>>,
    cycles: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub state: CacheState,
    pub commodities_state: CacheState,
    pub last_live_at: Option<DateTime<Utc>>,
    pub consecutive_failures: BTreeMap<String, u32>,
    pub degraded: bool,
    pub cycles: u64,
}

impl HealthTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: BTreeMap::new(),
            last_live_at: None,
            cycles: 0,
        }
    }

    /// Record one cycle. Returns the fields at or past the alert threshold.
    pub fn observe<'a, I>(&mut self, fields: I, at: DateTime<Utc>) -> Vec<String>
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        self.cycles += 1;
        let mut any_live = false;
        let mut alerts = Vec::new();

        for (field, live) in fields {
            let count = self.failures.entry(field.to_string()).or_insert(0);
            if live {
                *count = 0;
                any_live = true;
            } else {
                *count += 1;
                if *count >= self.threshold {
                    warn!(
                        "{}: {} consecutive cycles without live data",
                        field, count
                    );
                    alerts.push(field.to_string());
                }
            }
        }

        if any_live {
            self.last_live_at = Some(at);
        }
        alerts
    }

    #[cfg(test)]
    pub fn failures(&self, field: &str) -> u32 {
        self.failures.get(field).copied().unwrap_or(0)
    }

    pub fn is_degraded(&self) -> bool {
        self.failures.values().any(|c| *c >= self.threshold)
    }

    pub fn report(&self, state: CacheState, commodities_state: CacheState) -> HealthReport {
        HealthReport {
            state,
            commodities_state,
            last_live_at: self.last_live_at,
            consecutive_failures: self.failures.clone(),
            degraded: self.is_degraded(),
            cycles: self.cycles,
        }
    }
}
