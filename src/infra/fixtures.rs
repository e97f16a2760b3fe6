//! Local collaborators used by the CLI: a profile store backed by a JSON
//! fixture file and a URL-template avatar resolver.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use crate::application::repos::{AvatarResolver, ProfileStore, RemoteError};
use crate::domain::entities::{ProfilePatch, RawProfile};

use super::error::InfraError;

/// Profile store over an in-memory table, usually loaded from a JSON array of
/// raw profile rows.
#[derive(Debug, Default)]
pub struct FixtureProfileStore {
    rows: RwLock<HashMap<String, RawProfile>>,
}

impl FixtureProfileStore {
    pub fn from_rows(rows: impl IntoIterator<Item = RawProfile>) -> Self {
        Self {
            rows: RwLock::new(rows.into_iter().map(|row| (row.id.clone(), row)).collect()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, InfraError> {
        let rows: Vec<RawProfile> = serde_json::from_str(json).map_err(|err| {
            InfraError::configuration(format!("invalid profile fixtures: {err}"))
        })?;
        Ok(Self::from_rows(rows))
    }

    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let json = fs::read_to_string(path).await?;
        let store = Self::from_json(&json)?;
        info!(path = %path.display(), rows = store.len(), "Profile fixtures loaded");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, id: &str) -> Option<RawProfile> {
        self.read().get(id).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RawProfile>> {
        self.rows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ProfileStore for FixtureProfileStore {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<RawProfile>, RemoteError> {
        Ok(self.row(id))
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<RawProfile>, RemoteError> {
        let rows = self.read();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn update_fields(&self, id: &str, patch: ProfilePatch) -> Result<(), RemoteError> {
        let mut rows = self
            .rows
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let row = rows
            .get_mut(id)
            .ok_or_else(|| RemoteError::Backend(format!("no profile row `{id}`")))?;
        if let Some(path) = patch.avatar_path {
            row.avatar_path = Some(path);
        }
        Ok(())
    }
}

/// Resolves storage keys by appending them to a base URL.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    base_url: String,
}

impl TemplateResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AvatarResolver for TemplateResolver {
    async fn resolve(&self, key: &str) -> Result<String, RemoteError> {
        let base = self.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(RemoteError::Backend(
                "no avatar base url configured".to_string(),
            ));
        }
        Ok(format!("{base}/{}", key.trim_start_matches('/')))
    }
}
