use std::time::Duration;

use thiserror::Error;

use crate::application::repos::RemoteError;
use crate::domain::error::DomainError;

/// Failure taxonomy of the profile cache.
///
/// Lookup failures (`NotFound`, `Timeout`, `Remote`) never reach callers as
/// `Err`; they are folded into a profile with `error` set. Everything else is
/// raised from background work and funneled into the service's error sink.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("profile `{id}` not found")]
    NotFound { id: String },
    #[error("fetching profile `{id}` timed out after {}ms", after.as_millis())]
    Timeout { id: String, after: Duration },
    #[error("fetching profile `{id}` failed: {source}")]
    Remote {
        id: String,
        #[source]
        source: RemoteError,
    },
    #[error("dropped malformed change event: {reason}")]
    MalformedRemoteEvent {
        reason: String,
        #[source]
        source: Option<DomainError>,
    },
    #[error("failed to persist snapshot for `{id}`: {message}")]
    PersistenceWriteFailure { id: String, message: String },
    #[error("failed to resolve avatar reference `{key}`: {message}")]
    ResolutionFailure { key: String, message: String },
    #[error("failed to backfill avatar key `{key}` for `{id}`: {message}")]
    Backfill {
        id: String,
        key: String,
        message: String,
    },
    #[error("failed to write profile `{id}` back to the remote store: {source}")]
    RemoteWrite {
        id: String,
        #[source]
        source: RemoteError,
    },
    #[error("failed to subscribe to change topic `{topic}`: {source}")]
    ChangeFeed {
        topic: String,
        #[source]
        source: RemoteError,
    },
}

impl SyncError {
    pub fn not_found(id: &str) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    pub fn timeout(id: &str, after: Duration) -> Self {
        Self::Timeout {
            id: id.to_string(),
            after,
        }
    }

    pub fn remote(id: &str, source: RemoteError) -> Self {
        Self::Remote {
            id: id.to_string(),
            source,
        }
    }

    pub fn malformed(source: DomainError) -> Self {
        Self::MalformedRemoteEvent {
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Stable label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotFound { .. } => "not_found",
            SyncError::Timeout { .. } => "timeout",
            SyncError::Remote { .. } => "remote",
            SyncError::MalformedRemoteEvent { .. } => "malformed_remote_event",
            SyncError::PersistenceWriteFailure { .. } => "persistence_write_failure",
            SyncError::ResolutionFailure { .. } => "resolution_failure",
            SyncError::Backfill { .. } => "backfill",
            SyncError::RemoteWrite { .. } => "remote_write",
            SyncError::ChangeFeed { .. } => "change_feed",
        }
    }
}
