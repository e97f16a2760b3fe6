//! Authoritative in-memory profile map.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::entities::UserProfile;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Outcome of a wholesale replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Replace {
    Inserted,
    Changed,
    Unchanged,
}

impl Replace {
    pub(crate) fn is_change(self) -> bool {
        !matches!(self, Replace::Unchanged)
    }
}

/// Map from profile id to profile. Entries are replaced whole, never patched.
///
/// The clear epoch increases on every [`EntityMap::clear`] so that work started
/// before a clear can tell its result is no longer wanted.
pub(crate) struct EntityMap {
    entries: RwLock<HashMap<String, UserProfile>>,
    clear_epoch: AtomicU64,
}

impl EntityMap {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clear_epoch: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<UserProfile> {
        rw_read(&self.entries, SOURCE, "get").get(id).cloned()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains_key(id)
    }

    /// Replace the entry for `id`, comparing content with the previous value.
    pub(crate) fn replace(&self, id: &str, profile: UserProfile) -> Replace {
        let mut entries = rw_write(&self.entries, SOURCE, "replace");
        match entries.get_mut(id) {
            Some(current) if *current == profile => Replace::Unchanged,
            Some(current) => {
                *current = profile;
                Replace::Changed
            }
            None => {
                entries.insert(id.to_string(), profile);
                Replace::Inserted
            }
        }
    }

    /// Replace only when `keep` rejects the current value; returns the value now
    /// cached.
    pub(crate) fn replace_unless(
        &self,
        id: &str,
        profile: UserProfile,
        keep: impl Fn(&UserProfile) -> bool,
    ) -> (UserProfile, Replace) {
        let mut entries = rw_write(&self.entries, SOURCE, "replace_unless");
        match entries.get_mut(id) {
            Some(current) if keep(current) || *current == profile => {
                (current.clone(), Replace::Unchanged)
            }
            Some(current) => {
                *current = profile.clone();
                (profile, Replace::Changed)
            }
            None => {
                entries.insert(id.to_string(), profile.clone());
                (profile, Replace::Inserted)
            }
        }
    }

    /// Atomically derive a new value from the current one. `derive` returning
    /// `None`, or an equal value, leaves the entry untouched.
    pub(crate) fn update(
        &self,
        id: &str,
        derive: impl FnOnce(&UserProfile) -> Option<UserProfile>,
    ) -> Option<UserProfile> {
        let mut entries = rw_write(&self.entries, SOURCE, "update");
        let current = entries.get_mut(id)?;
        let next = derive(current).filter(|next| *next != *current)?;
        *current = next.clone();
        Some(next)
    }

    pub(crate) fn remove(&self, id: &str) -> Option<UserProfile> {
        rw_write(&self.entries, SOURCE, "remove").remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub(crate) fn clear_epoch(&self) -> u64 {
        self.clear_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        self.clear_epoch.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }
}
