use thiserror::Error;

/// Why a change-feed payload could not become a profile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("change event carries an empty id")]
    MissingId,
    #[error("change event for `{id}` carries a non-object record")]
    NotAnObject { id: String },
    #[error("change event for `{id}` has an undecodable record: {message}")]
    Undecodable { id: String, message: String },
    #[error("record id `{record_id}` does not match event id `{event_id}`")]
    IdMismatch { event_id: String, record_id: String },
}

impl DomainError {
    pub fn undecodable(id: &str, err: impl std::fmt::Display) -> Self {
        Self::Undecodable {
            id: id.to_string(),
            message: err.to_string(),
        }
    }
}
