//! Per-user translation preferences.
//!
//! Two interchangeable backends implement [`SettingsStore`]: a JSON file
//! ([`FileStore`]) and an external key-value store ([`ExternalStore`]).
//! Callers never talk to a backend directly; they go through
//! [`SettingsService`], which bounds every call with a timeout and applies
//! the failure policy (reads fail open to "translation off", writes surface
//! the error).

mod external;
mod file;
#[cfg(any(test, feature = "test-util"))]
mod memory;

pub use external::{ExternalStore, KeyValueBackend, RedisBackend};
pub use file::FileStore;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Chat-platform user identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Overlay,
    #[default]
    Off,
}

impl DisplayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Overlay => "overlay",
            DisplayMode::Off => "off",
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "overlay" => Ok(DisplayMode::Overlay),
            "off" => Ok(DisplayMode::Off),
            other => Err(format!("unknown display mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSettings {
    pub user_id: UserId,
    /// Free-text language name; empty means not configured
    pub target_language: String,
    pub display_mode: DisplayMode,
}

impl UserSettings {
    pub fn default_for(user_id: UserId) -> Self {
        Self {
            user_id,
            target_language: String::new(),
            display_mode: DisplayMode::Off,
        }
    }

    /// Overlay mode with an empty language is inert.
    pub fn is_active(&self) -> bool {
        self.display_mode == DisplayMode::Overlay && !self.target_language.trim().is_empty()
    }

    pub fn apply(&mut self, update: &SettingUpdate) {
        match update {
            SettingUpdate::TargetLanguage(language) => {
                self.target_language = language.trim().to_string();
            }
            SettingUpdate::DisplayMode(mode) => self.display_mode = *mode,
        }
    }

    pub(crate) fn to_record(&self) -> SettingsRecord {
        SettingsRecord {
            target_language: self.target_language.clone(),
            mode: self.display_mode,
        }
    }
}

/// A single-field change requested by a user command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingUpdate {
    TargetLanguage(String),
    DisplayMode(DisplayMode),
}

/// Persisted shape of one user's settings.
///
/// Reads accept the older `{"language": null | string, "mode": ...}` layout;
/// writes always produce `{"target_language": ..., "mode": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SettingsRecord {
    #[serde(default, alias = "language", deserialize_with = "null_as_empty")]
    pub target_language: String,
    #[serde(default, deserialize_with = "lenient_mode")]
    pub mode: DisplayMode,
}

impl SettingsRecord {
    pub fn into_settings(self, user_id: UserId) -> UserSettings {
        UserSettings {
            user_id,
            target_language: self.target_language.trim().to_string(),
            display_mode: self.mode,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Unknown or missing modes read as `off`.
fn lenient_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DisplayMode, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|m| m.parse().ok()).unwrap_or_default())
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("settings store unavailable: {0}")]
    Unavailable(String),

    #[error("settings record corrupt: {0}")]
    Corrupt(String),

    #[error("settings store timed out after {0:?}")]
    Timeout(Duration),
}

/// Backend contract shared by every settings store.
///
/// Implementations report failures honestly; the fail-open policy lives in
/// [`SettingsService`].
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the user has no record.
    async fn fetch(&self, user_id: UserId) -> Result<Option<UserSettings>, StoreError>;

    /// Replace the whole record for `settings.user_id`.
    async fn put(&self, settings: &UserSettings) -> Result<(), StoreError>;

    /// Every readable record. Corrupt records are skipped.
    async fn all(&self) -> Result<Vec<UserSettings>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Read-modify-write of one field. A corrupt existing record is replaced.
    async fn update(
        &self,
        user_id: UserId,
        update: &SettingUpdate,
    ) -> Result<UserSettings, StoreError> {
        let mut settings = match self.fetch(user_id).await {
            Ok(Some(existing)) => existing,
            Ok(None) => UserSettings::default_for(user_id),
            Err(StoreError::Corrupt(reason)) => {
                warn!("Replacing corrupt settings for user {}: {}", user_id, reason);
                UserSettings::default_for(user_id)
            }
            Err(e) => return Err(e),
        };
        settings.apply(update);
        self.put(&settings).await?;
        Ok(settings)
    }

    async fn list_active(&self) -> Result<Vec<UserSettings>, StoreError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(UserSettings::is_active)
            .collect())
    }
}

/// The settings contract used by the resolver and the command handlers.
#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    timeout: Duration,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingsStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    /// Settings for `user_id`; the inert default when absent or unreadable.
    pub async fn get(&self, user_id: UserId) -> UserSettings {
        match self.bounded(self.store.fetch(user_id)).await {
            Ok(Some(settings)) => settings,
            Ok(None) => UserSettings::default_for(user_id),
            Err(StoreError::Corrupt(reason)) => {
                warn!(
                    "Corrupt settings for user {} in {} store, using defaults: {}",
                    user_id,
                    self.store.name(),
                    reason
                );
                UserSettings::default_for(user_id)
            }
            Err(e) => {
                error!(
                    "Failed to read settings for user {} from {} store, using defaults: {}",
                    user_id,
                    self.store.name(),
                    e
                );
                UserSettings::default_for(user_id)
            }
        }
    }

    /// Persist a single-field change. Errors are returned to the caller.
    pub async fn set(
        &self,
        user_id: UserId,
        update: SettingUpdate,
    ) -> Result<UserSettings, StoreError> {
        let result = self.bounded(self.store.update(user_id, &update)).await;
        if let Err(e) = &result {
            error!(
                "Failed to save settings for user {} to {} store: {}",
                user_id,
                self.store.name(),
                e
            );
        }
        result
    }

    /// Users with overlay mode on and a language set.
    pub async fn list_active(&self) -> Result<Vec<UserSettings>, StoreError> {
        self.bounded(self.store.list_active()).await
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(self.store.ping()).await
    }
}

/// Copy every readable record from `source` into `target`, overwriting
/// records already present in `target`. Returns the number copied.
pub async fn copy_settings(
    source: &dyn SettingsStore,
    target: &dyn SettingsStore,
) -> Result<usize, StoreError> {
    let users = source.all().await?;
    for settings in &users {
        target.put(settings).await?;
    }
    info!(
        "Copied {} settings records from {} store to {} store",
        users.len(),
        source.name(),
        target.name()
    );
    Ok(users.len())
}
