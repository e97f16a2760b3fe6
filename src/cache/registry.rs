//! Per-profile subscriber registry.
//!
//! Callbacks are kept in registration order. Fan-out snapshots the callback
//! list before invoking anything, so callbacks may subscribe or unsubscribe
//! from inside a notification without deadlocking.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::domain::entities::UserProfile;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::registry";

pub type ProfileCallback = Arc<dyn Fn(&UserProfile) + Send + Sync>;

type Callbacks = HashMap<String, Vec<(u64, ProfileCallback)>>;

pub(crate) struct SubscriptionRegistry {
    callbacks: Arc<Mutex<Callbacks>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn add(&self, profile_id: &str, callback: ProfileCallback) -> Subscription {
        let subscriber = self.next_id.fetch_add(1, Ordering::SeqCst);
        mutex_lock(&self.callbacks, SOURCE, "add")
            .entry(profile_id.to_string())
            .or_default()
            .push((subscriber, callback));

        Subscription {
            profile_id: profile_id.to_string(),
            subscriber,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }

    /// Invoke every callback registered for `profile_id`, in order. A panicking
    /// callback is logged and skipped; the rest still run. Returns how many
    /// callbacks completed normally.
    pub(crate) fn notify(&self, profile_id: &str, profile: &UserProfile) -> usize {
        let targets: Vec<(u64, ProfileCallback)> = mutex_lock(&self.callbacks, SOURCE, "notify")
            .get(profile_id)
            .cloned()
            .unwrap_or_default();

        targets
            .into_iter()
            .filter(|(subscriber, callback)| invoke(profile_id, *subscriber, callback, profile))
            .count()
    }

    pub(crate) fn subscriber_count(&self, profile_id: &str) -> usize {
        mutex_lock(&self.callbacks, SOURCE, "subscriber_count")
            .get(profile_id)
            .map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) fn tracked_profiles(&self) -> usize {
        mutex_lock(&self.callbacks, SOURCE, "tracked_profiles").len()
    }
}

/// Call one subscriber, isolating panics.
pub(crate) fn invoke(
    profile_id: &str,
    subscriber: u64,
    callback: &ProfileCallback,
    profile: &UserProfile,
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback(profile))) {
        Ok(()) => true,
        Err(_) => {
            warn!(
                profile_id,
                subscriber, "Profile subscriber panicked; continuing fan-out"
            );
            false
        }
    }
}

/// Handle for one registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    profile_id: String,
    subscriber: u64,
    callbacks: Weak<Mutex<Callbacks>>,
}

impl Subscription {
    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn unsubscribe(self) {}

    pub(crate) fn subscriber(&self) -> u64 {
        self.subscriber
    }

    fn release(&mut self) {
        let Some(callbacks) = self.callbacks.upgrade() else {
            return;
        };
        let mut callbacks = mutex_lock(&callbacks, SOURCE, "unsubscribe");
        if let Some(list) = callbacks.get_mut(&self.profile_id) {
            list.retain(|(subscriber, _)| *subscriber != self.subscriber);
            if list.is_empty() {
                callbacks.remove(&self.profile_id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("profile_id", &self.profile_id)
            .field("subscriber", &self.subscriber)
            .finish()
    }
}
