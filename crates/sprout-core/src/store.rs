//! Durable profile/settings storage: in-memory hot cache in front of a Sled DB.
//!
//! The store is read at startup and on explicit save actions only; it is not
//! on the turn-taking hot path.

use crate::error::{CoreError, CoreResult};
use crate::profile::{ChildProfile, ParentSettings};
use dashmap::DashMap;
use sled::Db;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const PROFILE_KEY: &str = "profile";
const SETTINGS_KEY: &str = "settings";

/// Key-value persistence for the child profile and parent settings.
pub struct ProfileStore {
    db: Db,
    /// Hot cache: key -> serialized value. Checked before Sled.
    cache: Arc<DashMap<String, Vec<u8>>>,
}

impl ProfileStore {
    /// Opens or creates a Sled database at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            cache: Arc::new(DashMap::new()),
        })
    }

    /// Load the child profile, or `None` if onboarding has not run yet.
    pub async fn get_profile(&self) -> CoreResult<Option<ChildProfile>> {
        self.get_json(PROFILE_KEY)
    }

    /// Persist the child profile (onboarding or settings save).
    pub async fn save_profile(&self, profile: &ChildProfile) -> CoreResult<()> {
        self.put_json(PROFILE_KEY, profile)
    }

    /// Load parent settings, or `None` if never saved.
    pub async fn get_settings(&self) -> CoreResult<Option<ParentSettings>> {
        self.get_json(SETTINGS_KEY)
    }

    /// Persist parent settings.
    pub async fn save_settings(&self, settings: &ParentSettings) -> CoreResult<()> {
        self.put_json(SETTINGS_KEY, settings)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        let bytes = if let Some(v) = self.cache.get(key) {
            Some(v.clone())
        } else {
            let v = self.db.get(key.as_bytes())?.map(|iv| iv.to_vec());
            if let Some(ref vec) = v {
                self.cache.insert(key.to_string(), vec.clone());
            }
            v
        };
        match bytes {
            Some(b) => Ok(Some(serde_json::from_slice(&b)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: serde::Serialize>(&self, key: &str, value: &T) -> CoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes.clone())?;
        self.db
            .flush()
            .map_err(|e| CoreError::Store(e.to_string()))?;
        self.cache.insert(key.to_string(), bytes);
        debug!(key, "profile store: saved");
        Ok(())
    }
}
