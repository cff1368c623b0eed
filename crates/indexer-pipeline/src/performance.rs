//! Named counters and distributions accumulated by stages and tasks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use indexer_types::IndexType;

#[derive(Debug)]
struct Statistic {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for Statistic {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }
}

impl Statistic {
    fn record(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatisticSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        StatisticSnapshot {
            count,
            min: if count == 0 { 0 } else { self.min.load(Ordering::Relaxed) },
            mean: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Summary of one named distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatisticSnapshot {
    pub count: u64,
    pub min: u64,
    pub mean: f64,
    pub max: u64,
}

/// Sorted copy of every counter and distribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub statistics: BTreeMap<String, StatisticSnapshot>,
}

/// Observability data for one index type. Lives for the process; cleared
/// only by [`reset`](Self::reset).
#[derive(Debug)]
pub struct PipelinePerformance {
    index_type: IndexType,
    counters: DashMap<String, AtomicU64>,
    statistics: DashMap<String, Statistic>,
}

impl PipelinePerformance {
    pub fn new(index_type: IndexType) -> Self {
        Self {
            index_type,
            counters: DashMap::new(),
            statistics: DashMap::new(),
        }
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Add one to a named counter.
    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Add `amount` to a named counter, creating it on first use.
    pub fn add(&self, name: &str, amount: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(amount, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_default()
            .fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value of a counter; zero if never touched.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record one sample of a named distribution.
    pub fn record(&self, name: &str, value: u64) {
        if let Some(statistic) = self.statistics.get(name) {
            statistic.record(value);
            return;
        }
        self.statistics
            .entry(name.to_string())
            .or_default()
            .record(value);
    }

    /// Record a duration sample in microseconds.
    pub fn record_duration(&self, name: &str, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.record(name, micros);
    }

    pub fn statistic(&self, name: &str) -> Option<StatisticSnapshot> {
        self.statistics.get(name).map(|s| s.snapshot())
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            statistics: self
                .statistics
                .iter()
                .map(|e| (e.key().clone(), e.value().snapshot()))
                .collect(),
        }
    }

    /// Drop every counter and distribution.
    pub fn reset(&self) {
        self.counters.clear();
        self.statistics.clear();
    }
}
