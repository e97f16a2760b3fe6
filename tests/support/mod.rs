#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rollcall::application::error::SyncError;
use rollcall::application::repos::{
    AvatarResolver, BusSubscription, ChangeBus, ChangeHandler, ProfileStore, RemoteError,
};
use rollcall::cache::ErrorSink;
use rollcall::domain::entities::{ChangeEvent, ProfilePatch, RawProfile};

pub fn row(id: &str, first: &str, last: &str) -> RawProfile {
    RawProfile {
        id: id.to_string(),
        first_name: Some(first.to_string()),
        last_name: Some(last.to_string()),
        email: Some(format!("{}@example.com", first.to_lowercase())),
        ..RawProfile::default()
    }
}

pub fn row_with_avatar(id: &str, avatar: &str) -> RawProfile {
    RawProfile {
        avatar_url: Some(avatar.to_string()),
        ..row(id, "Ana", "Berisha")
    }
}

/// Profile store that counts calls and can be slowed down or broken.
#[derive(Default)]
pub struct CountingStore {
    rows: Mutex<HashMap<String, RawProfile>>,
    delay_ms: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fetch_by_id_calls: AtomicUsize,
    fetch_batch_calls: AtomicUsize,
    batches: Mutex<Vec<Vec<String>>>,
    updates: Mutex<Vec<(String, ProfilePatch)>>,
}

impl CountingStore {
    pub fn with_rows(rows: impl IntoIterator<Item = RawProfile>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut map = store.rows.lock().expect("rows lock");
            for row in rows {
                map.insert(row.id.clone(), row);
            }
        }
        Arc::new(store)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_by_id_calls(&self) -> usize {
        self.fetch_by_id_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_batch_calls(&self) -> usize {
        self.fetch_batch_calls.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().expect("batches lock").clone()
    }

    pub fn updates(&self) -> Vec<(String, ProfilePatch)> {
        self.updates.lock().expect("updates lock").clone()
    }

    async fn pause(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
    }

    fn check_reads(&self) -> Result<(), RemoteError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for CountingStore {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<RawProfile>, RemoteError> {
        self.fetch_by_id_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.check_reads()?;
        Ok(self.rows.lock().expect("rows lock").get(id).cloned())
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<RawProfile>, RemoteError> {
        self.fetch_batch_calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().expect("batches lock").push(ids.to_vec());
        self.pause().await;
        self.check_reads()?;
        let rows = self.rows.lock().expect("rows lock");
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn update_fields(&self, id: &str, patch: ProfilePatch) -> Result<(), RemoteError> {
        self.updates
            .lock()
            .expect("updates lock")
            .push((id.to_string(), patch));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::backend("write rejected"));
        }
        Ok(())
    }
}

/// Resolves `key` to `https://cdn.test/<key>` after an optional delay.
#[derive(Default)]
pub struct StubResolver {
    delay_ms: AtomicUsize,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StubResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvatarResolver for StubResolver {
    async fn resolve(&self, key: &str) -> Result<String, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::backend("resolver down"));
        }
        Ok(format!("https://cdn.test/{key}"))
    }
}

/// Change bus that hands events to handlers synchronously on `emit`.
#[derive(Default)]
pub struct ManualBus {
    handlers: Arc<Mutex<Vec<(u64, String, ChangeHandler)>>>,
    next_id: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl ManualBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn active_handlers(&self) -> usize {
        self.handlers.lock().expect("handlers lock").len()
    }

    pub fn emit(&self, topic: &str, event: ChangeEvent) {
        let handlers: Vec<ChangeHandler> = self
            .handlers
            .lock()
            .expect("handlers lock")
            .iter()
            .filter(|(_, t, _)| t == topic)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

impl ChangeBus for ManualBus {
    fn subscribe(
        &self,
        topic: &str,
        handler: ChangeHandler,
    ) -> Result<BusSubscription, RemoteError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
        self.handlers
            .lock()
            .expect("handlers lock")
            .push((id, topic.to_string(), handler));

        let handlers = Arc::clone(&self.handlers);
        Ok(BusSubscription::new(move || {
            handlers
                .lock()
                .expect("handlers lock")
                .retain(|(existing, _, _)| *existing != id);
        }))
    }
}

/// Error sink that records the kind of every reported failure.
pub fn recording_sink() -> (ErrorSink, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = Arc::clone(&seen);
    let sink: ErrorSink = Arc::new(move |err: &SyncError| {
        inner
            .lock()
            .expect("sink lock")
            .push(err.kind().to_string());
    });
    (sink, seen)
}
