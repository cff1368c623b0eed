//! Per-run pipeline status.
//!
//! Every item that enters the pipeline is eventually settled exactly once:
//! committed, filtered out, missing from the entity store, failed, or
//! rejected by a full worker pool. The run is complete when the settled
//! total catches up with `incoming` and every stage is idle.
//!
//! All counters are atomics; nothing here holds a lock while stage tasks run.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use indexer_types::IndexType;

const NO_DATE: i64 = i64::MIN;

fn store_date(slot: &AtomicI64, date: DateTime<Utc>) {
    slot.store(date.timestamp_millis(), Ordering::Release);
}

fn load_date(slot: &AtomicI64) -> Option<DateTime<Utc>> {
    match slot.load(Ordering::Acquire) {
        NO_DATE => None,
        millis => DateTime::from_timestamp_millis(millis),
    }
}

/// Transient counters for one pipeline's current run.
#[derive(Debug)]
pub struct PipelineStatus {
    index_type: IndexType,
    incoming: AtomicU64,
    completed: AtomicU64,
    filtered: AtomicU64,
    load_misses: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    is_completed: AtomicBool,
    latest_start: AtomicI64,
    last_completion: AtomicI64,
    settled_signal: Notify,
}

/// Copy of the counters at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStatusSnapshot {
    pub incoming: u64,
    pub completed: u64,
    pub filtered: u64,
    pub load_misses: u64,
    pub failed: u64,
    pub rejected: u64,
    pub is_completed: bool,
    pub latest_start: Option<DateTime<Utc>>,
    pub last_completion: Option<DateTime<Utc>>,
}

impl PipelineStatusSnapshot {
    /// Items that reached a final outcome.
    pub fn settled(&self) -> u64 {
        self.completed + self.filtered + self.load_misses + self.failed + self.rejected
    }

    /// True when some items failed or were rejected.
    pub fn has_losses(&self) -> bool {
        self.failed > 0 || self.rejected > 0
    }
}

impl PipelineStatus {
    /// Fresh, idle status.
    pub fn new(index_type: IndexType) -> Self {
        Self {
            index_type,
            incoming: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            load_misses: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            is_completed: AtomicBool::new(false),
            latest_start: AtomicI64::new(NO_DATE),
            last_completion: AtomicI64::new(NO_DATE),
            settled_signal: Notify::new(),
        }
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Begin a new run: zero the counters, clear the completion flag and
    /// stamp the start time. The last completion date is kept.
    pub fn notify_started(&self) {
        for counter in [
            &self.incoming,
            &self.completed,
            &self.filtered,
            &self.load_misses,
            &self.failed,
            &self.rejected,
        ] {
            counter.store(0, Ordering::Release);
        }
        self.is_completed.store(false, Ordering::Release);
        store_date(&self.latest_start, Utc::now());
    }

    /// Zero everything, including dates.
    pub fn reset(&self) {
        self.notify_started();
        self.latest_start.store(NO_DATE, Ordering::Release);
        self.last_completion.store(NO_DATE, Ordering::Release);
    }

    pub fn add_incoming(&self, count: u64) {
        self.incoming.fetch_add(count, Ordering::AcqRel);
    }

    /// Documents accepted by the commit sink.
    pub fn record_completed(&self, count: u64) {
        self.completed.fetch_add(count, Ordering::AcqRel);
        self.signal_if_settled();
    }

    /// Identifiers the filter authority dropped.
    pub fn record_filtered(&self, count: u64) {
        self.filtered.fetch_add(count, Ordering::AcqRel);
        self.signal_if_settled();
    }

    /// Identifiers the entity store could not resolve.
    pub fn record_load_misses(&self, count: u64) {
        self.load_misses.fetch_add(count, Ordering::AcqRel);
        self.signal_if_settled();
    }

    /// Items lost to a collaborator failure or a panicking task.
    pub fn record_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::AcqRel);
        self.signal_if_settled();
    }

    /// Items refused by a full worker pool.
    pub fn record_rejected(&self, count: u64) {
        self.rejected.fetch_add(count, Ordering::AcqRel);
        self.signal_if_settled();
    }

    pub fn incoming(&self) -> u64 {
        self.incoming.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Acquire)
    }

    pub fn settled(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
            + self.filtered.load(Ordering::Acquire)
            + self.load_misses.load(Ordering::Acquire)
            + self.failed.load(Ordering::Acquire)
            + self.rejected.load(Ordering::Acquire)
    }

    /// Every incoming item has an outcome.
    pub fn is_settled(&self) -> bool {
        self.settled() >= self.incoming()
    }

    /// Latch the completion flag and wake any waiter.
    pub fn mark_completed(&self) {
        store_date(&self.last_completion, Utc::now());
        self.is_completed.store(true, Ordering::Release);
        self.settled_signal.notify_one();
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed.load(Ordering::Acquire)
    }

    pub fn latest_start(&self) -> Option<DateTime<Utc>> {
        load_date(&self.latest_start)
    }

    pub fn last_completion(&self) -> Option<DateTime<Utc>> {
        load_date(&self.last_completion)
    }

    /// Resolves at the next settlement signal. Signals sent while nobody was
    /// waiting are kept, so a waiter never misses the last one.
    pub async fn settled_signal(&self) {
        self.settled_signal.notified().await;
    }

    fn signal_if_settled(&self) {
        if self.is_settled() {
            self.settled_signal.notify_one();
        }
    }

    pub fn snapshot(&self) -> PipelineStatusSnapshot {
        PipelineStatusSnapshot {
            incoming: self.incoming(),
            completed: self.completed(),
            filtered: self.filtered.load(Ordering::Acquire),
            load_misses: self.load_misses.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            rejected: self.rejected(),
            is_completed: self.is_completed(),
            latest_start: self.latest_start(),
            last_completion: self.last_completion(),
        }
    }
}
