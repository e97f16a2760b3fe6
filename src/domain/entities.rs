//! Profile records as they travel between the remote store, the cache and the
//! snapshot side store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    error::DomainError,
    normalize::{self, normalize},
    types::{AccountStatus, Role},
};

/// Canonical cached user profile.
///
/// `display_name` and `initials` are derived output: [`normalize`] produces
/// them from a raw record and [`UserProfile::rederive`] recomputes them before
/// any caller-supplied profile enters the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub auth_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: String,
    pub initials: String,
    pub username: Option<String>,
    /// Either a storage reference (`avatars/42/a.png`) awaiting resolution or a
    /// displayable URL.
    pub avatar_url: Option<String>,
    pub verified: bool,
    pub role: Role,
    pub account_status: AccountStatus,
    pub loading: bool,
    pub error: Option<String>,
}

impl UserProfile {
    /// The single "unknown user" shape handed out before data is known.
    pub fn placeholder(id: &str) -> Self {
        normalize(&RawProfile::empty(id))
    }

    /// A renderable profile describing a failed lookup.
    pub fn failed(id: &str, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::placeholder(id)
        }
    }

    /// Recompute the derived identity strings from the identity fields.
    pub fn rederive(self) -> Self {
        normalize::rederive(self)
    }

    pub fn is_usable(&self) -> bool {
        self.error.is_none() && !self.loading
    }

    /// Only settled, successful records are worth snapshotting.
    pub fn is_persistable(&self) -> bool {
        self.is_usable()
    }
}

/// Profile row as delivered by the remote store or a change-feed payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawProfile {
    pub id: String,
    pub auth_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    /// Canonical storage key; preferred over `avatar_url` when both exist.
    pub avatar_path: Option<String>,
    pub verified: Option<bool>,
    pub role: Option<String>,
    pub account_status: Option<String>,
}

impl RawProfile {
    pub fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    /// Decode a change-feed payload addressed to `id`.
    pub fn from_change(event: &ChangeEvent) -> Result<Self, DomainError> {
        if event.id.trim().is_empty() {
            return Err(DomainError::MissingId);
        }
        if !event.new_record.is_object() {
            return Err(DomainError::NotAnObject {
                id: event.id.clone(),
            });
        }

        let mut raw: RawProfile = serde_json::from_value(event.new_record.clone())
            .map_err(|err| DomainError::undecodable(&event.id, err))?;

        if raw.id.is_empty() {
            raw.id = event.id.clone();
        } else if raw.id != event.id {
            return Err(DomainError::IdMismatch {
                event_id: event.id.clone(),
                record_id: raw.id,
            });
        }

        Ok(raw)
    }
}

/// Field patch sent back to the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_path: Option<String>,
}

impl ProfilePatch {
    pub fn avatar_path(key: impl Into<String>) -> Self {
        Self {
            avatar_path: Some(key.into()),
        }
    }
}

/// Snapshot persisted in the side store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub entity: UserProfile,
    pub cached_at_epoch_ms: i64,
}

/// Change notification delivered by the change bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: String,
    pub new_record: Value,
}

impl ChangeEvent {
    pub fn new(id: impl Into<String>, new_record: Value) -> Self {
        Self {
            id: id.into(),
            new_record,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn placeholder_is_not_loading_and_has_no_error() {
        let profile = UserProfile::placeholder("9");
        assert_eq!(profile.id, "9");
        assert_eq!(profile.display_name, "User");
        assert_eq!(profile.initials, "??");
        assert!(!profile.loading);
        assert!(profile.error.is_none());
    }

    #[test]
    fn failed_profiles_are_not_persistable() {
        let profile = UserProfile::failed("9", "profile `9` not found");
        assert!(!profile.is_persistable());
        assert_eq!(profile.display_name, "User");
        assert!(profile.email.is_none());
    }

    #[test]
    fn change_payload_inherits_event_id() {
        let event = ChangeEvent::new("7", json!({ "username": "neo" }));
        let raw = RawProfile::from_change(&event).expect("decodes");
        assert_eq!(raw.id, "7");
        assert_eq!(raw.username.as_deref(), Some("neo"));
    }

    #[test]
    fn change_payload_with_mismatched_id_is_rejected() {
        let event = ChangeEvent::new("7", json!({ "id": "8" }));
        let err = RawProfile::from_change(&event).expect_err("mismatch");
        assert!(matches!(err, DomainError::IdMismatch { .. }));
    }

    #[test]
    fn non_object_payloads_are_rejected() {
        for payload in [json!(null), json!("x"), json!([1, 2])] {
            let event = ChangeEvent::new("7", payload);
            assert!(RawProfile::from_change(&event).is_err());
        }
    }

    #[test]
    fn wrongly_typed_fields_are_rejected() {
        let event = ChangeEvent::new("7", json!({ "verified": "yes" }));
        let err = RawProfile::from_change(&event).expect_err("bad type");
        assert!(matches!(err, DomainError::Undecodable { .. }));
    }

    #[test]
    fn snapshot_record_uses_camel_case_keys() {
        let record = SnapshotRecord {
            entity: UserProfile::placeholder("1"),
            cached_at_epoch_ms: 42,
        };
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["cachedAtEpochMs"], json!(42));
        assert_eq!(value["entity"]["displayName"], json!("User"));
    }
}
