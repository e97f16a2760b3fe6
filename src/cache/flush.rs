//! Dirty-id queue and the explicit snapshot flush.
//!
//! Cache writes only mark an id dirty. [`flush`] later writes the value cached
//! at flush time, so several updates to one profile between flushes cost a
//! single side-store write.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use futures::future::join_all;
use metrics::histogram;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

use super::lock::mutex_lock;
use super::service::ServiceCore;

const SOURCE: &str = "cache::flush";
const METRIC_FLUSH_MS: &str = "rollcall_flush_ms";

#[derive(Default)]
struct Pending {
    order: VecDeque<String>,
    queued: HashSet<String>,
}

/// FIFO of profile ids awaiting persistence; each id appears at most once.
#[derive(Default)]
pub(crate) struct DirtyQueue {
    pending: Mutex<Pending>,
}

impl DirtyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark(&self, id: &str) {
        let mut pending = mutex_lock(&self.pending, SOURCE, "mark");
        if pending.queued.insert(id.to_string()) {
            pending.order.push_back(id.to_string());
        }
    }

    /// Remove up to `limit` ids in FIFO order.
    pub(crate) fn drain(&self, limit: usize) -> Vec<String> {
        let mut pending = mutex_lock(&self.pending, SOURCE, "drain");
        let count = limit.min(pending.order.len());
        let ids: Vec<String> = pending.order.drain(..count).collect();
        for id in &ids {
            pending.queued.remove(id);
        }
        ids
    }

    pub(crate) fn len(&self) -> usize {
        mutex_lock(&self.pending, SOURCE, "len").order.len()
    }

    pub(crate) fn clear(&self) {
        let mut pending = mutex_lock(&self.pending, SOURCE, "clear");
        pending.order.clear();
        pending.queued.clear();
    }
}

/// Result of one [`flush`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Write every dirty profile to the side store, batch by batch.
///
/// Ids whose cached value is gone or not persistable are skipped. Failed
/// writes are reported to the error sink and not retried.
#[instrument(skip(core))]
pub(crate) async fn flush(core: &ServiceCore) -> FlushReport {
    let Some(snapshots) = core.snapshots() else {
        core.dirty.clear();
        return FlushReport::default();
    };

    let started_at = Instant::now();
    let mut report = FlushReport::default();
    let limit = core.config.flush_batch_limit();

    loop {
        let ids = core.dirty.drain(limit);
        if ids.is_empty() {
            break;
        }

        let profiles: Vec<_> = ids
            .iter()
            .filter_map(|id| core.entities.get(id))
            .filter(|profile| profile.is_persistable())
            .collect();
        report.skipped += ids.len() - profiles.len();

        let results = join_all(profiles.iter().map(|profile| snapshots.save(profile))).await;
        for result in results {
            match result {
                Ok(()) => report.written += 1,
                Err(err) => {
                    report.failed += 1;
                    core.tasks.report(err);
                }
            }
        }
    }

    if report == FlushReport::default() {
        return report;
    }

    info!(
        written = report.written,
        skipped = report.skipped,
        failed = report.failed,
        "Profile snapshots flushed"
    );
    histogram!(METRIC_FLUSH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
    report
}

/// Run [`flush`] on the configured interval until the service is dropped.
pub(crate) fn spawn_auto_flush(core: &Arc<ServiceCore>) -> JoinHandle<()> {
    let weak: Weak<ServiceCore> = Arc::downgrade(core);
    let period = core.config.flush_interval();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let Some(core) = weak.upgrade() else {
                debug!("Profile service dropped; auto-flush stopping");
                break;
            };
            flush(&core).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_deduplicates_and_keeps_order() {
        let queue = DirtyQueue::new();
        queue.mark("2");
        queue.mark("1");
        queue.mark("2");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.drain(10), vec!["2", "1"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn drain_respects_limit_and_allows_requeue() {
        let queue = DirtyQueue::new();
        for id in ["a", "b", "c"] {
            queue.mark(id);
        }

        assert_eq!(queue.drain(2), vec!["a", "b"]);
        queue.mark("a");
        assert_eq!(queue.drain(5), vec!["c", "a"]);
    }

    #[test]
    fn clear_empties_queue() {
        let queue = DirtyQueue::new();
        queue.mark("a");
        queue.clear();
        assert_eq!(queue.drain(5), Vec::<String>::new());
        queue.mark("a");
        assert_eq!(queue.len(), 1);
    }
}
