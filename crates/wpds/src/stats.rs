use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::catalog::CatalogItem;

/// Receives counters and timings from a sync run.
///
/// Implementations are shared by every fetch worker, so all methods take
/// `&self` and must serialize their own updates.
pub trait StatsSink: Send + Sync {
    fn record_success(&self, item: &CatalogItem, bytes: u64);

    fn record_failure(&self, item: &CatalogItem);

    /// Called once per fetch batch with its size and wall-clock time.
    fn record_batch(&self, items: usize, elapsed: Duration);

    fn summary(&self) -> StatsSummary;
}

/// Snapshot of everything recorded so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSummary {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub bytes: u64,
    pub batches: u64,
    pub elapsed: Duration,
}

/// Mutex-guarded in-process statistics.
#[derive(Debug, Default)]
pub struct Stats {
    counters: Mutex<StatsSummary>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut StatsSummary)) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut counters);
    }
}

impl StatsSink for Stats {
    fn record_success(&self, _item: &CatalogItem, bytes: u64) {
        self.update(|c| {
            c.attempted += 1;
            c.succeeded += 1;
            c.bytes += bytes;
        });
    }

    fn record_failure(&self, _item: &CatalogItem) {
        self.update(|c| {
            c.attempted += 1;
            c.failed += 1;
        });
    }

    fn record_batch(&self, _items: usize, elapsed: Duration) {
        self.update(|c| {
            c.batches += 1;
            c.elapsed += elapsed;
        });
    }

    fn summary(&self) -> StatsSummary {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        let item = CatalogItem::new("akismet");

        stats.record_success(&item, 100);
        stats.record_success(&item, 50);
        stats.record_failure(&item);
        stats.record_batch(3, Duration::from_millis(20));

        let summary = stats.summary();
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.bytes, 150);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.elapsed, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let stats = Arc::new(Stats::new());
        let mut handles = Vec::new();

        for i in 0..50 {
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                let item = CatalogItem::new(format!("item-{i}"));
                if i % 5 == 0 {
                    stats.record_failure(&item);
                } else {
                    stats.record_success(&item, 1);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let summary = stats.summary();
        assert_eq!(summary.attempted, 50);
        assert_eq!(summary.failed, 10);
        assert_eq!(summary.succeeded, 40);
    }
}
