//! Per-id request coalescing.
//!
//! At most one fetch per profile id is outstanding. The first caller installs
//! a shared future; later callers clone it and all of them observe the same
//! profile. The token owned by the fetch removes the entry when dropped, so
//! the slot is released whether the fetch succeeds, fails or panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::domain::entities::UserProfile;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, UserProfile>>;

struct Pending {
    seq: u64,
    fetch: SharedFetch,
}

pub(crate) enum Claim {
    /// This caller installed the fetch and must make sure it is driven.
    Started(SharedFetch),
    /// A fetch was already outstanding.
    Joined(SharedFetch),
}

#[derive(Default)]
pub(crate) struct Coalescer {
    pending: Arc<DashMap<String, Pending>>,
    next_seq: AtomicU64,
}

impl Coalescer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn join(&self, id: &str) -> Option<SharedFetch> {
        self.pending.get(id).map(|pending| pending.fetch.clone())
    }

    /// Join the outstanding fetch for `id`, or build and install a new one.
    ///
    /// When another caller wins the race to install, the freshly built future
    /// is dropped unpolled and its token releases nothing.
    pub(crate) fn join_or_start<F>(&self, id: &str, start: F) -> Claim
    where
        F: FnOnce(FetchToken) -> BoxFuture<'static, UserProfile>,
    {
        if let Some(existing) = self.join(id) {
            return Claim::Joined(existing);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let fetch = start(self.token(id, seq)).shared();
        match self.insert_vacant(id, seq, fetch.clone()) {
            Ok(()) => Claim::Started(fetch),
            Err(existing) => Claim::Joined(existing),
        }
    }

    /// Install an already-built fetch for `id` unless one is outstanding.
    pub(crate) fn try_install(
        &self,
        id: &str,
        fetch: SharedFetch,
    ) -> Result<FetchToken, SharedFetch> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.insert_vacant(id, seq, fetch)?;
        Ok(self.token(id, seq))
    }

    fn insert_vacant(&self, id: &str, seq: u64, fetch: SharedFetch) -> Result<(), SharedFetch> {
        match self.pending.entry(id.to_string()) {
            Entry::Occupied(occupied) => Err(occupied.get().fetch.clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(Pending { seq, fetch });
                Ok(())
            }
        }
    }

    fn token(&self, id: &str, seq: u64) -> FetchToken {
        FetchToken {
            id: id.to_string(),
            seq,
            pending: Arc::clone(&self.pending),
        }
    }

    pub(crate) fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Forget every outstanding fetch. Running fetches keep running, but their
    /// tokens no longer match anything in the map.
    pub(crate) fn clear(&self) {
        self.pending.clear();
    }
}

/// Ownership of one coalescing slot; releases it on drop.
pub(crate) struct FetchToken {
    id: String,
    seq: u64,
    pending: Arc<DashMap<String, Pending>>,
}

impl FetchToken {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for FetchToken {
    fn drop(&mut self) {
        self.pending
            .remove_if(&self.id, |_, pending| pending.seq == self.seq);
    }
}
