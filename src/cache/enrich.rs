//! Background avatar enrichment and legacy-avatar backfill.

use tokio::time::timeout;
use tracing::{debug, info};

use crate::application::error::SyncError;
use crate::domain::avatar::AvatarRef;
use crate::domain::entities::{ProfilePatch, UserProfile};

use super::service::{Origin, ServiceCore};

/// Schedule whatever follow-up work `profile`'s avatar needs. Never blocks.
pub(crate) fn enrich(core: &ServiceCore, profile: &UserProfile) {
    let Some(stored) = profile.avatar_url.as_deref() else {
        return;
    };

    match AvatarRef::classify(stored) {
        Some(AvatarRef::Reference(key)) => resolve_reference(core, &profile.id, stored, key),
        Some(AvatarRef::Legacy { key, .. }) => backfill_legacy(core, &profile.id, key),
        Some(AvatarRef::Resolved(_)) | None => {}
    }
}

/// Resolve a storage key and swap the resolved URL into the cached profile,
/// provided the cached avatar still holds that key.
fn resolve_reference(core: &ServiceCore, id: &str, stored: &str, key: &str) {
    if !core.config.enable_enrichment {
        return;
    }
    let (Some(resolver), Some(core_ref)) = (core.resolver.clone(), core.handle()) else {
        return;
    };

    let id = id.to_string();
    let stored = stored.to_string();
    let key = key.to_string();
    core.tasks.spawn("resolve_avatar", async move {
        let after = core_ref.config.fetch_timeout();
        let resolved = match timeout(after, resolver.resolve(&key)).await {
            Ok(Ok(url)) if !url.trim().is_empty() => url.trim().to_string(),
            Ok(Ok(_)) => {
                core_ref.tasks.report(SyncError::ResolutionFailure {
                    key,
                    message: "resolver returned an empty value".to_string(),
                });
                return;
            }
            Ok(Err(err)) => {
                core_ref.tasks.report(SyncError::ResolutionFailure {
                    key,
                    message: err.to_string(),
                });
                return;
            }
            Err(_) => {
                core_ref.tasks.report(SyncError::ResolutionFailure {
                    key,
                    message: format!("timed out after {}ms", after.as_millis()),
                });
                return;
            }
        };

        let updated = core_ref.entities.update(&id, |current| {
            (current.avatar_url.as_deref() == Some(stored.as_str())).then(|| UserProfile {
                avatar_url: Some(resolved.clone()),
                ..current.clone()
            })
        });

        match updated {
            Some(profile) => core_ref.after_write(&id, &profile, Origin::Enrichment),
            None => debug!(
                profile_id = %id,
                avatar_key = %key,
                "Avatar changed or already resolved; resolution discarded"
            ),
        }
    });
}

/// Write the canonical key for a legacy avatar URL back to the remote store,
/// once per `(id, key)` per process. Failed writes may be retried later.
fn backfill_legacy(core: &ServiceCore, id: &str, key: String) {
    if !core.config.enable_backfill {
        return;
    }
    let Some(core_ref) = core.handle() else {
        return;
    };

    let claim = (id.to_string(), key);
    if !core.backfilled.insert(claim.clone()) {
        return;
    }

    core.tasks.spawn("backfill_avatar", async move {
        let (id, key) = claim;
        let after = core_ref.config.fetch_timeout();
        let patch = ProfilePatch::avatar_path(key.clone());
        let outcome = match timeout(after, core_ref.store.update_fields(&id, patch)).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(_) => Err(format!("timed out after {}ms", after.as_millis())),
        };

        match outcome {
            Ok(()) => info!(profile_id = %id, avatar_key = %key, "Legacy avatar key backfilled"),
            Err(message) => {
                core_ref.backfilled.remove(&(id.clone(), key.clone()));
                core_ref
                    .tasks
                    .report(SyncError::Backfill { id, key, message });
            }
        }
    });
}
