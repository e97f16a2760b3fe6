//! Profile synchronization service.
//!
//! [`ProfileSyncService`] owns the entity map, the coalescer, the subscriber
//! registry and the background task set. Every read and write from the rest
//! of the application goes through it.
//!
//! Lookup path: entity map, then the snapshot side store, then one coalesced
//! remote fetch per id. Every settled result is written to the map, marked
//! for persistence, fanned out to subscribers and handed to enrichment.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashSet;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use metrics::counter;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::application::error::SyncError;
use crate::application::repos::{
    AvatarResolver, BusSubscription, ChangeBus, ProfileStore, RemoteError, SideStore,
    SideStoreError,
};
use crate::domain::entities::{ProfilePatch, RawProfile, UserProfile};
use crate::domain::normalize::normalize;

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::enrich;
use super::flush::{self, DirtyQueue, FlushReport};
use super::inflight::{Claim, Coalescer, FetchToken, SharedFetch};
use super::listener;
use super::lock::mutex_lock;
use super::registry::{ProfileCallback, Subscription, SubscriptionRegistry, invoke};
use super::snapshot::SnapshotAdapter;
use super::store::EntityMap;
use super::tasks::{BackgroundTasks, ErrorSink, log_only_sink};

const SOURCE: &str = "cache::service";
const METRIC_CACHE_HIT_TOTAL: &str = "rollcall_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "rollcall_cache_miss_total";
const METRIC_FETCH_TOTAL: &str = "rollcall_fetch_total";
const METRIC_FETCH_COALESCED_TOTAL: &str = "rollcall_fetch_coalesced_total";

/// Where a cache write came from. Decides whether it is persisted and
/// whether it is handed to enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Fetch,
    Snapshot,
    Local,
    Change,
    Enrichment,
}

impl Origin {
    fn persists(self) -> bool {
        !matches!(self, Origin::Snapshot)
    }

    fn enriches(self) -> bool {
        !matches!(self, Origin::Enrichment)
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    /// Consult the snapshot side store before going remote.
    SnapshotFirst,
    Remote,
}

enum BatchOutcome {
    Rows(HashMap<String, RawProfile>),
    Failed(RemoteError),
    TimedOut,
}

type SharedBatch = Shared<BoxFuture<'static, Arc<HashMap<String, UserProfile>>>>;

pub(crate) struct ServiceCore {
    me: Weak<ServiceCore>,
    pub(crate) config: CacheConfig,
    pub(crate) store: Arc<dyn ProfileStore>,
    pub(crate) resolver: Option<Arc<dyn AvatarResolver>>,
    pub(crate) bus: Option<Arc<dyn ChangeBus>>,
    snapshots: Option<SnapshotAdapter>,
    pub(crate) entities: EntityMap,
    inflight: Coalescer,
    subscribers: SubscriptionRegistry,
    pub(crate) dirty: DirtyQueue,
    pub(crate) tasks: BackgroundTasks,
    pub(crate) listener: Mutex<Option<BusSubscription>>,
    /// `(profile id, avatar key)` pairs already written back this process.
    pub(crate) backfilled: DashSet<(String, String)>,
}

impl ServiceCore {
    pub(crate) fn handle(&self) -> Option<Arc<ServiceCore>> {
        self.me.upgrade()
    }

    pub(crate) fn snapshots(&self) -> Option<&SnapshotAdapter> {
        self.snapshots.as_ref()
    }

    async fn get_user(self: &Arc<Self>, id: &str) -> UserProfile {
        if let Some(profile) = self.entities.get(id).filter(UserProfile::is_usable) {
            counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
            return profile;
        }
        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
        self.load(id, Source::SnapshotFirst).await
    }

    /// Join or start the single outstanding fetch for `id`. A started fetch
    /// is also driven in the background so it completes even if every caller
    /// stops waiting.
    fn load(self: &Arc<Self>, id: &str, source: Source) -> SharedFetch {
        let claim = self.inflight.join_or_start(id, |token| {
            Arc::clone(self).fetch_one(token, source).boxed()
        });

        match claim {
            Claim::Started(fetch) => {
                self.tasks.spawn("fetch_profile", fetch.clone().map(|_| ()));
                fetch
            }
            Claim::Joined(fetch) => {
                debug!(profile_id = id, "Joined in-flight profile fetch");
                counter!(METRIC_FETCH_COALESCED_TOTAL).increment(1);
                fetch
            }
        }
    }

    async fn fetch_one(self: Arc<Self>, token: FetchToken, source: Source) -> UserProfile {
        let id = token.id().to_string();
        let epoch = self.entities.clear_epoch();

        if matches!(source, Source::SnapshotFirst) {
            if let Some(snapshot) = self.load_snapshot(&id).await {
                return self.settle(&id, snapshot, epoch, Origin::Snapshot);
            }
        }

        counter!(METRIC_FETCH_TOTAL, "mode" => "single").increment(1);
        let after = self.config.fetch_timeout();
        let profile = match timeout(after, self.store.fetch_by_id(&id)).await {
            Ok(Ok(Some(raw))) => normalize_for(&id, raw),
            Ok(Ok(None)) => lookup_failure(&id, SyncError::not_found(&id)),
            Ok(Err(source)) => lookup_failure(&id, SyncError::remote(&id, source)),
            Err(_) => lookup_failure(&id, SyncError::timeout(&id, after)),
        };

        let settled = self.settle(&id, profile, epoch, Origin::Fetch);
        drop(token);
        settled
    }

    /// Snapshot reads share the fetch timeout; a stalled side store counts as
    /// a miss so the lookup still reaches the remote store.
    async fn load_snapshot(&self, id: &str) -> Option<UserProfile> {
        let snapshots = self.snapshots.as_ref()?;
        let after = self.config.fetch_timeout();
        match timeout(after, snapshots.load(id)).await {
            Ok(found) => found,
            Err(_) => {
                warn!(
                    profile_id = id,
                    timeout_ms = after.as_millis() as u64,
                    "Snapshot read timed out; treating as absent"
                );
                None
            }
        }
    }

    async fn get_users(self: &Arc<Self>, ids: &[String]) -> HashMap<String, UserProfile> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut waiting: Vec<(String, SharedFetch)> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        let mut seen = HashSet::with_capacity(ids.len());

        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if let Some(profile) = self.entities.get(id).filter(UserProfile::is_usable) {
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                found.insert(id.clone(), profile);
                continue;
            }
            counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
            match self.inflight.join(id) {
                Some(fetch) => {
                    counter!(METRIC_FETCH_COALESCED_TOTAL).increment(1);
                    waiting.push((id.clone(), fetch));
                }
                None => missing.push(id.clone()),
            }
        }

        let epoch = self.entities.clear_epoch();
        let mut remote = Vec::with_capacity(missing.len());
        if self.snapshots.is_some() {
            let loaded = join_all(missing.iter().map(|id| self.load_snapshot(id))).await;
            for (id, snapshot) in missing.into_iter().zip(loaded) {
                match snapshot {
                    Some(profile) => {
                        let settled = self.settle(&id, profile, epoch, Origin::Snapshot);
                        found.insert(id, settled);
                    }
                    None => remote.push(id),
                }
            }
        } else {
            remote = missing;
        }

        if !remote.is_empty() {
            waiting.extend(self.start_batch(remote));
        }

        let settled = join_all(
            waiting
                .into_iter()
                .map(|(id, fetch)| async move { (id, fetch.await) }),
        )
        .await;
        found.extend(settled);
        found
    }

    /// Install one shared batch fetch covering every id not already in flight.
    ///
    /// Per-id views of the batch go into the coalescer so single lookups join
    /// it. The batch waits for `ready` so it never runs before every claimed
    /// token has been handed over.
    fn start_batch(self: &Arc<Self>, ids: Vec<String>) -> Vec<(String, SharedFetch)> {
        let claimed: Arc<Mutex<Vec<FetchToken>>> = Arc::default();
        let (ready_tx, ready_rx) = oneshot::channel();
        let epoch = self.entities.clear_epoch();
        let batch: SharedBatch = Arc::clone(self)
            .fetch_batch(Arc::clone(&claimed), ready_rx, epoch)
            .boxed()
            .shared();

        let mut waiting = Vec::with_capacity(ids.len());
        for id in ids {
            let key = id.clone();
            let view: SharedFetch = batch
                .clone()
                .map(move |profiles| {
                    profiles
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| UserProfile::failed(&key, SyncError::not_found(&key).to_string()))
                })
                .boxed()
                .shared();

            match self.inflight.try_install(&id, view.clone()) {
                Ok(token) => {
                    mutex_lock(&claimed, SOURCE, "start_batch").push(token);
                    waiting.push((id, view));
                }
                Err(existing) => {
                    counter!(METRIC_FETCH_COALESCED_TOTAL).increment(1);
                    waiting.push((id, existing));
                }
            }
        }

        let owns_any = !mutex_lock(&claimed, SOURCE, "start_batch").is_empty();
        let _ = ready_tx.send(());
        if owns_any {
            self.tasks.spawn("fetch_profile_batch", batch.map(|_| ()));
        }
        waiting
    }

    async fn fetch_batch(
        self: Arc<Self>,
        claimed: Arc<Mutex<Vec<FetchToken>>>,
        ready: oneshot::Receiver<()>,
        epoch: u64,
    ) -> Arc<HashMap<String, UserProfile>> {
        let _ = ready.await;
        let tokens = std::mem::take(&mut *mutex_lock(&claimed, SOURCE, "fetch_batch"));
        if tokens.is_empty() {
            return Arc::default();
        }

        let ids: Vec<String> = tokens.iter().map(|token| token.id().to_string()).collect();
        counter!(METRIC_FETCH_TOTAL, "mode" => "batch").increment(1);
        debug!(count = ids.len(), "Fetching profile batch");

        let after = self.config.fetch_timeout();
        let mut outcome = match timeout(after, self.store.fetch_batch(&ids)).await {
            Ok(Ok(rows)) => BatchOutcome::Rows(
                rows.into_iter()
                    .map(|raw| (raw.id.clone(), raw))
                    .collect(),
            ),
            Ok(Err(source)) => BatchOutcome::Failed(source),
            Err(_) => BatchOutcome::TimedOut,
        };

        let mut profiles = HashMap::with_capacity(tokens.len());
        for token in tokens {
            let id = token.id().to_string();
            let profile = match &mut outcome {
                BatchOutcome::Rows(rows) => match rows.remove(&id) {
                    Some(raw) => normalize_for(&id, raw),
                    None => lookup_failure(&id, SyncError::not_found(&id)),
                },
                BatchOutcome::Failed(source) => {
                    lookup_failure(&id, SyncError::remote(&id, source.clone()))
                }
                BatchOutcome::TimedOut => lookup_failure(&id, SyncError::timeout(&id, after)),
            };
            let settled = self.settle(&id, profile, epoch, Origin::Fetch);
            profiles.insert(id, settled);
            drop(token);
        }
        Arc::new(profiles)
    }

    /// Write a lookup result into the map and return what callers should see.
    ///
    /// Results from before a `clear_cache` are returned but not cached.
    /// Failures and snapshots never displace a usable cached profile.
    fn settle(&self, id: &str, profile: UserProfile, epoch: u64, origin: Origin) -> UserProfile {
        if self.entities.clear_epoch() != epoch {
            debug!(profile_id = id, "Cache cleared during lookup; result not cached");
            return profile;
        }

        if profile.is_usable() && origin != Origin::Snapshot {
            self.apply(id, profile.clone(), origin);
            return profile;
        }

        let (current, outcome) =
            self.entities
                .replace_unless(id, profile, UserProfile::is_usable);
        if outcome.is_change() {
            self.after_write(id, &current, origin);
        }
        current
    }

    /// Replace the cached profile; side effects only run on a content change.
    pub(crate) fn apply(&self, id: &str, profile: UserProfile, origin: Origin) -> bool {
        if !self.entities.replace(id, profile.clone()).is_change() {
            return false;
        }
        self.after_write(id, &profile, origin);
        true
    }

    pub(crate) fn after_write(&self, id: &str, profile: &UserProfile, origin: Origin) {
        if origin.persists() && profile.is_persistable() && self.snapshots.is_some() {
            self.dirty.mark(id);
        }
        let delivered = self.subscribers.notify(id, profile);
        debug!(profile_id = id, ?origin, delivered, "Profile updated");
        if origin.enriches() {
            enrich::enrich(self, profile);
        }
    }

    fn subscribe(self: &Arc<Self>, id: &str, callback: ProfileCallback) -> Subscription {
        let subscription = self.subscribers.add(id, Arc::clone(&callback));

        match self.entities.get(id) {
            Some(profile) => {
                invoke(id, subscription.subscriber(), &callback, &profile);
            }
            None => {
                invoke(
                    id,
                    subscription.subscriber(),
                    &callback,
                    &UserProfile::placeholder(id),
                );
                let core = Arc::clone(self);
                let id = id.to_string();
                self.tasks.spawn("subscribe_fetch", async move {
                    core.get_user(&id).await;
                });
            }
        }

        subscription
    }

    async fn update_avatar_reference(self: &Arc<Self>, id: &str, key: &str) {
        let key = key.trim().to_string();
        if key.is_empty() {
            warn!(profile_id = id, "Ignoring empty avatar reference");
            return;
        }

        if !self.entities.get(id).is_some_and(|p| p.is_usable()) {
            let fetched = self.get_user(id).await;
            if !fetched.is_usable() {
                warn!(
                    profile_id = id,
                    error = fetched.error.as_deref().unwrap_or_default(),
                    "No usable profile; avatar reference not written"
                );
                return;
            }
        }
        let updated = self.entities.update(id, |current| {
            current.is_usable().then(|| UserProfile {
                avatar_url: Some(key.clone()),
                ..current.clone()
            })
        });
        if let Some(profile) = updated {
            self.after_write(id, &profile, Origin::Local);
        }

        let core = Arc::clone(self);
        let id = id.to_string();
        self.tasks.spawn("write_avatar_reference", async move {
            let after = core.config.fetch_timeout();
            let result = timeout(after, core.store.update_fields(&id, ProfilePatch::avatar_path(key)))
                .await
                .unwrap_or(Err(RemoteError::Unavailable));
            if let Err(source) = result {
                core.tasks.report(SyncError::RemoteWrite { id, source });
            }
        });
    }

    async fn refresh_user(self: &Arc<Self>, id: &str) -> UserProfile {
        if let Some(fetch) = self.inflight.join(id) {
            counter!(METRIC_FETCH_COALESCED_TOTAL).increment(1);
            return fetch.await;
        }
        self.entities.remove(id);
        self.load(id, Source::Remote).await
    }

    fn clear_cache(&self) {
        self.entities.clear();
        self.inflight.clear();
        self.dirty.clear();
        info!("Profile cache cleared");
    }
}

/// Normalize a remote row addressed to `id`.
fn normalize_for(id: &str, mut raw: RawProfile) -> UserProfile {
    if raw.id != id {
        if !raw.id.is_empty() {
            warn!(profile_id = id, row_id = %raw.id, "Remote row id mismatch; keeping requested id");
        }
        raw.id = id.to_string();
    }
    normalize(&raw)
}

fn lookup_failure(id: &str, err: SyncError) -> UserProfile {
    warn!(profile_id = id, kind = err.kind(), error = %err, "Profile lookup failed");
    UserProfile::failed(id, err.to_string())
}

/// Cache and synchronization facade for user profiles.
///
/// Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct ProfileSyncService {
    core: Arc<ServiceCore>,
}

impl ProfileSyncService {
    pub fn builder(store: Arc<dyn ProfileStore>) -> ProfileSyncServiceBuilder {
        ProfileSyncServiceBuilder {
            config: CacheConfig::default(),
            store,
            side_store: None,
            resolver: None,
            bus: None,
            clock: Arc::new(SystemClock),
            sink: log_only_sink(),
        }
    }

    /// Cached profile for `id`, without any I/O.
    pub fn get(&self, id: &str) -> Option<UserProfile> {
        self.core.entities.get(id)
    }

    /// Resolve a profile. Never fails: lookup errors come back as a profile
    /// with `error` set.
    #[instrument(skip(self))]
    pub async fn get_user(&self, id: &str) -> UserProfile {
        self.core.get_user(id).await
    }

    /// Resolve many profiles with at most one remote batch call.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn get_users(&self, ids: &[String]) -> HashMap<String, UserProfile> {
        self.core.get_users(ids).await
    }

    /// Register `callback` for `id` and deliver the current value (or the
    /// placeholder) immediately. Dropping the handle unsubscribes.
    pub fn subscribe<F>(&self, id: &str, callback: F) -> Subscription
    where
        F: Fn(&UserProfile) + Send + Sync + 'static,
    {
        self.core.subscribe(id, Arc::new(callback))
    }

    /// Replace the cached profile for `id`. `display_name` and `initials` are
    /// recomputed from the identity fields first; equal content is a no-op.
    pub fn set(&self, id: &str, mut profile: UserProfile) -> bool {
        if profile.id != id {
            warn!(profile_id = id, entity_id = %profile.id, "Profile id overridden on set");
            profile.id = id.to_string();
        }
        self.core.apply(id, profile.rederive(), Origin::Local)
    }

    /// Point the avatar at a storage key locally, then write the key to the
    /// remote store in the background.
    #[instrument(skip(self))]
    pub async fn update_avatar_reference(&self, id: &str, key: &str) {
        self.core.update_avatar_reference(id, key).await;
    }

    /// Drop the cached profile and fetch it again from the remote store.
    #[instrument(skip(self))]
    pub async fn refresh_user(&self, id: &str) -> UserProfile {
        self.core.refresh_user(id).await
    }

    /// Forget every cached profile and in-flight fetch. Snapshots stay and
    /// expire on their own; changes not yet flushed are dropped, so call
    /// [`flush`](Self::flush) first to keep them.
    pub fn clear_cache(&self) {
        self.core.clear_cache();
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.core.entities.contains(id)
    }

    pub fn cached_len(&self) -> usize {
        self.core.entities.len()
    }

    pub fn subscriber_count(&self, id: &str) -> usize {
        self.core.subscribers.subscriber_count(id)
    }

    pub fn in_flight_len(&self) -> usize {
        self.core.inflight.len()
    }

    pub fn is_fetching(&self, id: &str) -> bool {
        self.core.inflight.is_pending(id)
    }

    pub fn pending_flush_len(&self) -> usize {
        self.core.dirty.len()
    }

    /// Subscribe to the change bus once; later calls are no-ops.
    pub fn ensure_active(&self) -> Result<(), SyncError> {
        listener::ensure_active(&self.core)
    }

    pub fn deactivate(&self) {
        listener::deactivate(&self.core);
    }

    pub fn is_listening(&self) -> bool {
        mutex_lock(&self.core.listener, SOURCE, "is_listening").is_some()
    }

    /// Persist every dirty profile now.
    pub async fn flush(&self) -> FlushReport {
        flush::flush(&self.core).await
    }

    /// Flush on the configured interval until the service is dropped.
    pub fn spawn_auto_flush(&self) -> JoinHandle<()> {
        flush::spawn_auto_flush(&self.core)
    }

    /// Wipe every persisted snapshot.
    pub async fn clear_snapshots(&self) -> Result<(), SideStoreError> {
        match self.core.snapshots() {
            Some(snapshots) => snapshots.clear().await,
            None => Ok(()),
        }
    }

    /// Wait for background fetches, enrichment and write-backs to finish.
    pub async fn wait_idle(&self) {
        self.core.tasks.wait_idle().await;
    }
}

pub struct ProfileSyncServiceBuilder {
    config: CacheConfig,
    store: Arc<dyn ProfileStore>,
    side_store: Option<Arc<dyn SideStore>>,
    resolver: Option<Arc<dyn AvatarResolver>>,
    bus: Option<Arc<dyn ChangeBus>>,
    clock: Arc<dyn Clock>,
    sink: ErrorSink,
}

impl ProfileSyncServiceBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn side_store(mut self, side_store: Arc<dyn SideStore>) -> Self {
        self.side_store = Some(side_store);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn AvatarResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn change_bus(mut self, bus: Arc<dyn ChangeBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn error_sink(mut self, sink: ErrorSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> ProfileSyncService {
        let snapshots = self
            .side_store
            .filter(|_| self.config.enable_side_store)
            .map(|store| SnapshotAdapter::new(store, self.clock, self.config.snapshot_ttl()));

        let core = Arc::new_cyclic(|me| ServiceCore {
            me: me.clone(),
            config: self.config,
            store: self.store,
            resolver: self.resolver,
            bus: self.bus,
            snapshots,
            entities: EntityMap::new(),
            inflight: Coalescer::new(),
            subscribers: SubscriptionRegistry::new(),
            dirty: DirtyQueue::new(),
            tasks: BackgroundTasks::new(self.sink),
            listener: Mutex::new(None),
            backfilled: DashSet::new(),
        });

        ProfileSyncService { core }
    }
}
