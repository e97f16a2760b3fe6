//! Collaborator traits the profile cache consumes.
//!
//! None of these promise ordering or transactions; the cache treats each one
//! as an eventually consistent key-addressed service.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{ChangeEvent, ProfilePatch, RawProfile, SnapshotRecord};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("backend unavailable")]
    Unavailable,
    #[error("failed to decode backend payload: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SideStoreError {
    #[error("side store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("side store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Remote, key-addressed profile store.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<RawProfile>, RemoteError>;

    /// Missing ids are simply absent from the result.
    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<RawProfile>, RemoteError>;

    async fn update_fields(&self, id: &str, patch: ProfilePatch) -> Result<(), RemoteError>;
}

/// Turns a storage key into a displayable URL.
#[async_trait]
pub trait AvatarResolver: Send + Sync {
    async fn resolve(&self, key: &str) -> Result<String, RemoteError>;
}

/// Durable key-value store for profile snapshots.
///
/// Capacity limits belong to the implementation; the cache never evicts.
#[async_trait]
pub trait SideStore: Send + Sync {
    async fn read(&self, id: &str) -> Result<Option<SnapshotRecord>, SideStoreError>;

    async fn write(&self, id: &str, record: SnapshotRecord) -> Result<(), SideStoreError>;

    async fn clear(&self) -> Result<(), SideStoreError>;
}

pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Publish/subscribe feed of remote mutations. Delivery is at-least-once and
/// may be out of order.
pub trait ChangeBus: Send + Sync {
    fn subscribe(&self, topic: &str, handler: ChangeHandler)
    -> Result<BusSubscription, RemoteError>;
}

/// Live change-bus subscription; dropping it unsubscribes.
pub struct BusSubscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl BusSubscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn subscription_cancels_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = BusSubscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(BusSubscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
