//! Per-owner creation counters.

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;

use crate::models::OwnerKey;

/// Sink for creation events, consulted by quota checks outside this crate.
pub trait UsageCounters: Send + Sync {
    fn record_creation(&self, owner: &OwnerKey, at: DateTime<Utc>);

    fn total(&self, owner: &OwnerKey) -> u64;

    fn monthly(&self, owner: &OwnerKey, year: i32, month: u32) -> u64;
}

#[derive(Debug, Default)]
pub struct InMemoryUsageCounters {
    totals: DashMap<OwnerKey, u64>,
    monthly: DashMap<(OwnerKey, i32, u32), u64>,
}

impl InMemoryUsageCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageCounters for InMemoryUsageCounters {
    fn record_creation(&self, owner: &OwnerKey, at: DateTime<Utc>) {
        *self.totals.entry(owner.clone()).or_insert(0) += 1;
        *self
            .monthly
            .entry((owner.clone(), at.year(), at.month()))
            .or_insert(0) += 1;
    }

    fn total(&self, owner: &OwnerKey) -> u64 {
        self.totals.get(owner).map(|entry| *entry.value()).unwrap_or(0)
    }

    fn monthly(&self, owner: &OwnerKey, year: i32, month: u32) -> u64 {
        self.monthly
            .get(&(owner.clone(), year, month))
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }
}
