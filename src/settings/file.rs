use super::{SettingUpdate, SettingsRecord, SettingsStore, StoreError, UserId, UserSettings};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Whole document: user id (as string) -> settings record.
///
/// Records are kept as raw JSON values so a single malformed record does not
/// make the other users unreadable.
type Document = BTreeMap<String, Value>;

/// Settings kept in a single JSON file.
///
/// Every mutation rewrites the whole file while holding `write_lock`, from
/// the read through to the atomic rename, so concurrent commands cannot lose
/// each other's updates. Readers never take the lock: the rename guarantees
/// they see either the old or the new document.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Document, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if contents.trim().is_empty() {
            return Ok(Document::new());
        }

        serde_json::from_str(&contents).map_err(|e| {
            StoreError::Corrupt(format!("{} is not a settings document: {}", self.path.display(), e))
        })
    }

    /// Every record that parses is written back in the canonical shape;
    /// unparsable entries are kept verbatim.
    async fn write_document(&self, mut document: Document) -> Result<(), StoreError> {
        canonicalize(&mut document);
        let contents = serde_json::to_vec_pretty(&document)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, &contents))
            .await
            .map_err(|e| StoreError::Unavailable(format!("settings write task failed: {}", e)))?
    }

    fn record_from(user_id: UserId, value: &Value) -> Result<UserSettings, StoreError> {
        SettingsRecord::deserialize_value(value).map(|record| record.into_settings(user_id))
    }

    fn insert(document: &mut Document, settings: &UserSettings) -> Result<(), StoreError> {
        let value = serde_json::to_value(settings.to_record())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        document.insert(settings.user_id.to_string(), value);
        Ok(())
    }
}

impl SettingsRecord {
    fn deserialize_value(value: &Value) -> Result<Self, StoreError> {
        <SettingsRecord as serde::Deserialize>::deserialize(value)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

fn canonicalize(document: &mut Document) {
    for (key, value) in document.iter_mut() {
        match SettingsRecord::deserialize_value(value)
            .and_then(|record| serde_json::to_value(record).map_err(|e| StoreError::Corrupt(e.to_string())))
        {
            Ok(canonical) => *value = canonical,
            Err(e) => debug!("Keeping unreadable settings entry {} as is: {}", key, e),
        }
    }
}

/// Write to a temp file beside `path`, then rename over it.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |e: std::io::Error| {
        StoreError::Unavailable(format!("failed to write {}: {}", path.display(), e))
    };

    std::fs::create_dir_all(&dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(contents).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[async_trait]
impl SettingsStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn fetch(&self, user_id: UserId) -> Result<Option<UserSettings>, StoreError> {
        let document = self.read_document().await?;
        document
            .get(&user_id.to_string())
            .map(|value| Self::record_from(user_id, value))
            .transpose()
    }

    async fn put(&self, settings: &UserSettings) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        Self::insert(&mut document, settings)?;
        self.write_document(document).await
    }

    async fn all(&self) -> Result<Vec<UserSettings>, StoreError> {
        let document = self.read_document().await?;
        let mut users = Vec::with_capacity(document.len());

        for (key, value) in &document {
            let Ok(user_id) = key.parse::<UserId>() else {
                warn!("Skipping settings entry with non-numeric user id: {}", key);
                continue;
            };
            match Self::record_from(user_id, value) {
                Ok(settings) => users.push(settings),
                Err(e) => warn!("Skipping corrupt settings for user {}: {}", user_id, e),
            }
        }

        Ok(users)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.read_document().await.map(|_| ())
    }

    /// An unparsable document is never overwritten: that would discard every
    /// other user's settings.
    async fn update(
        &self,
        user_id: UserId,
        update: &SettingUpdate,
    ) -> Result<UserSettings, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;

        let mut settings = match document.get(&user_id.to_string()) {
            Some(value) => Self::record_from(user_id, value).unwrap_or_else(|e| {
                warn!("Replacing corrupt settings for user {}: {}", user_id, e);
                UserSettings::default_for(user_id)
            }),
            None => UserSettings::default_for(user_id),
        };
        settings.apply(update);

        Self::insert(&mut document, &settings)?;
        self.write_document(document).await?;
        debug!("Saved settings for user {} to {}", user_id, self.path.display());

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DisplayMode;
    use std::sync::Arc;
    use tempfile::TempDir;

    // ==================== Helper Functions ====================

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::new(temp_dir.path().join("settings.json"));
        (store, temp_dir)
    }

    fn overlay(id: i64, language: &str) -> UserSettings {
        UserSettings {
            user_id: UserId(id),
            target_language: language.to_string(),
            display_mode: DisplayMode::Overlay,
        }
    }

    // ==================== Basic Operations ====================

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let (store, _temp_dir) = create_test_store();

        assert_eq!(store.fetch(UserId(1)).await, Ok(None));
        assert!(store.all().await.expect("all").is_empty());
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_put_then_fetch_round_trip() {
        let (store, _temp_dir) = create_test_store();

        store.put(&overlay(1, "Spanish")).await.expect("put");

        let fetched = store.fetch(UserId(1)).await.expect("fetch");
        assert_eq!(fetched, Some(overlay(1, "Spanish")));
    }

    #[tokio::test]
    async fn test_document_layout_on_disk() {
        let (store, _temp_dir) = create_test_store();

        store
            .update(UserId(42), &SettingUpdate::TargetLanguage("French".to_string()))
            .await
            .expect("update");

        let contents = std::fs::read_to_string(store.path()).expect("read file");
        let value: Value = serde_json::from_str(&contents).expect("valid json");
        assert_eq!(
            value,
            serde_json::json!({"42": {"target_language": "French", "mode": "off"}})
        );
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = FileStore::new(temp_dir.path().join("nested/dir/settings.json"));

        store.put(&overlay(1, "Tamil")).await.expect("put");
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_update_preserves_other_users() {
        let (store, _temp_dir) = create_test_store();

        store.put(&overlay(1, "Spanish")).await.expect("put");
        store
            .update(UserId(2), &SettingUpdate::DisplayMode(DisplayMode::Overlay))
            .await
            .expect("update");

        assert_eq!(store.fetch(UserId(1)).await, Ok(Some(overlay(1, "Spanish"))));
        let second = store.fetch(UserId(2)).await.expect("fetch").expect("present");
        assert_eq!(second.display_mode, DisplayMode::Overlay);
        assert_eq!(second.target_language, "");
    }

    #[tokio::test]
    async fn test_list_active() {
        let (store, _temp_dir) = create_test_store();

        store.put(&overlay(1, "Spanish")).await.expect("put");
        store.put(&overlay(2, "")).await.expect("put");
        store
            .put(&UserSettings {
                user_id: UserId(3),
                target_language: "French".to_string(),
                display_mode: DisplayMode::Off,
            })
            .await
            .expect("put");

        let active = store.list_active().await.expect("list");
        assert_eq!(active, vec![overlay(1, "Spanish")]);
    }

    // ==================== Corruption Handling ====================

    #[tokio::test]
    async fn test_corrupt_record_isolated() {
        let (store, _temp_dir) = create_test_store();
        std::fs::write(
            store.path(),
            r#"{"1": {"target_language": "Spanish", "mode": "overlay"}, "2": "nonsense", "x": {}}"#,
        )
        .expect("write");

        assert!(matches!(
            store.fetch(UserId(2)).await,
            Err(StoreError::Corrupt(_))
        ));
        assert_eq!(store.all().await.expect("all"), vec![overlay(1, "Spanish")]);

        // Writing over the corrupt record repairs it
        let repaired = store
            .update(UserId(2), &SettingUpdate::TargetLanguage("German".to_string()))
            .await
            .expect("update");
        assert_eq!(repaired.target_language, "German");
        assert_eq!(store.fetch(UserId(1)).await, Ok(Some(overlay(1, "Spanish"))));
    }

    #[tokio::test]
    async fn test_corrupt_document_refuses_writes() {
        let (store, _temp_dir) = create_test_store();
        std::fs::write(store.path(), "{ this is not json").expect("write");

        assert!(matches!(store.fetch(UserId(1)).await, Err(StoreError::Corrupt(_))));

        let err = store
            .update(UserId(1), &SettingUpdate::TargetLanguage("Spanish".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));

        // Original bytes left untouched
        let contents = std::fs::read_to_string(store.path()).expect("read");
        assert_eq!(contents, "{ this is not json");
    }

    #[tokio::test]
    async fn test_legacy_records_readable() {
        let (store, _temp_dir) = create_test_store();
        std::fs::write(
            store.path(),
            r#"{"7": {"language": "Japanese", "mode": "overlay"}, "8": {"language": null, "mode": "off"}}"#,
        )
        .expect("write");

        assert_eq!(store.list_active().await.expect("list"), vec![overlay(7, "Japanese")]);

        // Rewritten in the canonical shape on next update
        store
            .update(UserId(7), &SettingUpdate::DisplayMode(DisplayMode::Overlay))
            .await
            .expect("update");
        let contents = std::fs::read_to_string(store.path()).expect("read");
        assert!(contents.contains("target_language"));
        assert!(!contents.contains("\"language\""));
    }

    #[tokio::test]
    async fn test_rewrite_canonicalizes_untouched_records_and_keeps_corrupt_ones() {
        let (store, _temp_dir) = create_test_store();
        std::fs::write(
            store.path(),
            r#"{"8": {"language": null, "mode": "OFF"}, "9": {"language": "Tamil", "mode": "overlay"}, "10": "nonsense"}"#,
        )
        .expect("write");

        store
            .update(UserId(1), &SettingUpdate::TargetLanguage("Spanish".to_string()))
            .await
            .expect("update");

        let document: Document =
            serde_json::from_str(&std::fs::read_to_string(store.path()).expect("read")).expect("json");
        assert_eq!(
            document["8"],
            serde_json::json!({"target_language": "", "mode": "off"})
        );
        assert_eq!(
            document["9"],
            serde_json::json!({"target_language": "Tamil", "mode": "overlay"})
        );
        assert_eq!(document["10"], serde_json::json!("nonsense"));
    }

    // ==================== Concurrency ====================

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let (store, _temp_dir) = create_test_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..25)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .update(UserId(i), &SettingUpdate::TargetLanguage(format!("Lang{}", i)))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.expect("task").expect("update");
        }

        let all = store.all().await.expect("all");
        assert_eq!(all.len(), 25);
        for i in 0..25 {
            let settings = store.fetch(UserId(i)).await.expect("fetch").expect("present");
            assert_eq!(settings.target_language, format!("Lang{}", i));
        }
    }

    #[tokio::test]
    async fn test_concurrent_updates_same_user_both_fields_survive() {
        let (store, _temp_dir) = create_test_store();
        let store = Arc::new(store);

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update(UserId(1), &SettingUpdate::TargetLanguage("Spanish".to_string()))
                    .await
            })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update(UserId(1), &SettingUpdate::DisplayMode(DisplayMode::Overlay))
                    .await
            })
        };
        a.await.expect("task").expect("update");
        b.await.expect("task").expect("update");

        assert_eq!(store.fetch(UserId(1)).await, Ok(Some(overlay(1, "Spanish"))));
    }
}
