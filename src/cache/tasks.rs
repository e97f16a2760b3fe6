//! Supervised background work owned by the profile service.
//!
//! Enrichment, backfill and snapshot writes run here instead of being spawned
//! detached. Failures go to a single [`ErrorSink`]; panics are caught and
//! logged. Dropping the set aborts whatever is still running.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use metrics::counter;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::application::error::SyncError;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::tasks";
const METRIC_BACKGROUND_ERROR_TOTAL: &str = "rollcall_background_error_total";

/// Receives every failure raised by background work.
pub type ErrorSink = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Default sink: failures are already logged by the task set, nothing else.
pub fn log_only_sink() -> ErrorSink {
    Arc::new(|_: &SyncError| {})
}

pub(crate) struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
    running: Arc<Running>,
    sink: ErrorSink,
}

#[derive(Default)]
struct Running {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the running count even when the task unwinds or is aborted.
struct RunningGuard(Arc<Running>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl BackgroundTasks {
    pub(crate) fn new(sink: ErrorSink) -> Self {
        Self {
            set: Mutex::new(JoinSet::new()),
            running: Arc::new(Running::default()),
            sink,
        }
    }

    /// Spawn `task` on the current runtime. Outside a runtime the task is
    /// dropped with a warning.
    pub(crate) fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            warn!(task = label, "No tokio runtime; background task skipped");
            return;
        };

        self.running.count.fetch_add(1, Ordering::SeqCst);
        let guard = RunningGuard(Arc::clone(&self.running));
        let supervised = async move {
            let _guard = guard;
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                error!(task = label, "Background task panicked");
                counter!(METRIC_BACKGROUND_ERROR_TOTAL, "kind" => "panic").increment(1);
            }
        };

        let mut set = mutex_lock(&self.set, SOURCE, "spawn");
        while set.try_join_next().is_some() {}
        set.spawn_on(supervised, &handle);
    }

    /// Log, count and forward a background failure to the sink.
    pub(crate) fn report(&self, err: SyncError) {
        warn!(kind = err.kind(), error = %err, "Background profile work failed");
        counter!(METRIC_BACKGROUND_ERROR_TOTAL, "kind" => err.kind()).increment(1);

        let sink = Arc::clone(&self.sink);
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink(&err))).is_err() {
            error!(kind = err.kind(), "Error sink panicked");
        }
    }

    pub(crate) fn running(&self) -> usize {
        self.running.count.load(Ordering::SeqCst)
    }

    /// Wait until no background task is running, including tasks spawned by
    /// other tasks while waiting.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let idle = self.running.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.running() == 0 {
                break;
            }
            idle.await;
        }

        let mut set = mutex_lock(&self.set, SOURCE, "wait_idle");
        while set.try_join_next().is_some() {}
    }
}
