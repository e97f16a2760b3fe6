//! Remote change listener.
//!
//! One bus subscription per service. Each event is decoded, normalized and
//! written through the same path as a local `set`; events that fail to decode
//! are logged, reported and dropped.

use std::sync::Arc;

use tracing::{debug, info};

use crate::application::error::SyncError;
use crate::application::repos::ChangeHandler;
use crate::domain::entities::{ChangeEvent, RawProfile};
use crate::domain::normalize::normalize;

use super::lock::mutex_lock;
use super::service::{Origin, ServiceCore};

const SOURCE: &str = "cache::listener";

pub(crate) fn ensure_active(core: &Arc<ServiceCore>) -> Result<(), SyncError> {
    let Some(bus) = core.bus.as_ref() else {
        debug!("No change bus configured; listener stays idle");
        return Ok(());
    };

    let mut slot = mutex_lock(&core.listener, SOURCE, "ensure_active");
    if slot.is_some() {
        return Ok(());
    }

    let weak = Arc::downgrade(core);
    let handler: ChangeHandler = Arc::new(move |event: ChangeEvent| {
        if let Some(core) = weak.upgrade() {
            apply_change(&core, event);
        }
    });

    let topic = core.config.change_topic.as_str();
    let subscription = bus
        .subscribe(topic, handler)
        .map_err(|source| SyncError::ChangeFeed {
            topic: topic.to_string(),
            source,
        })?;
    *slot = Some(subscription);

    info!(topic, "Profile change listener active");
    Ok(())
}

pub(crate) fn deactivate(core: &ServiceCore) {
    let subscription = mutex_lock(&core.listener, SOURCE, "deactivate").take();
    if let Some(subscription) = subscription {
        subscription.unsubscribe();
        info!("Profile change listener stopped");
    }
}

pub(crate) fn apply_change(core: &ServiceCore, event: ChangeEvent) {
    match RawProfile::from_change(&event) {
        Ok(raw) => {
            let profile = normalize(&raw);
            core.apply(&raw.id, profile, Origin::Change);
        }
        Err(err) => core.tasks.report(SyncError::malformed(err)),
    }
}
