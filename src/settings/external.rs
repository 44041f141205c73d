use super::{SettingsRecord, SettingsStore, StoreError, UserId, UserSettings};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

const KEY_PREFIX: &str = "user:";
const SCAN_COUNT: usize = 500;
const MGET_CHUNK: usize = 500;

/// Minimal string key-value surface the external store needs.
///
/// Each `set` must be atomic for its key; no cross-key transaction is
/// required.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// All keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Values for `keys`, in order; `None` for keys that no longer exist.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Settings stored one key per user (`user:{id}`) with a JSON record value.
pub struct ExternalStore<B> {
    backend: B,
}

impl<B: KeyValueBackend> ExternalStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn key(user_id: UserId) -> String {
        format!("{}{}", KEY_PREFIX, user_id)
    }
}

#[async_trait]
impl<B: KeyValueBackend> SettingsStore for ExternalStore<B> {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn fetch(&self, user_id: UserId) -> Result<Option<UserSettings>, StoreError> {
        match self.backend.get(&Self::key(user_id)).await? {
            Some(raw) => Ok(Some(SettingsRecord::from_json(&raw)?.into_settings(user_id))),
            None => Ok(None),
        }
    }

    async fn put(&self, settings: &UserSettings) -> Result<(), StoreError> {
        let value = settings.to_record().to_json()?;
        self.backend.set(&Self::key(settings.user_id), &value).await
    }

    async fn all(&self) -> Result<Vec<UserSettings>, StoreError> {
        let mut keys = self.backend.keys(KEY_PREFIX).await?;
        keys.sort();

        let mut ids = Vec::with_capacity(keys.len());
        let mut user_keys = Vec::with_capacity(keys.len());
        for key in keys {
            let parsed = key.strip_prefix(KEY_PREFIX).map(str::parse::<UserId>);
            match parsed {
                Some(Ok(id)) => {
                    ids.push(id);
                    user_keys.push(key);
                }
                _ => warn!("Skipping settings key with non-numeric user id: {}", key),
            }
        }
        if user_keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.backend.get_many(&user_keys).await?;
        let mut users = Vec::with_capacity(ids.len());
        for (user_id, value) in ids.into_iter().zip(values) {
            // Keys can vanish between the scan and the read
            let Some(raw) = value else {
                continue;
            };

            match SettingsRecord::from_json(&raw) {
                Ok(record) => users.push(record.into_settings(user_id)),
                Err(e) => warn!("Skipping corrupt settings for user {}: {}", user_id, e),
            }
        }

        Ok(users)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.backend.ping().await
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Redis-backed key-value store. `rediss://` URLs connect over TLS.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to `url`; with `force_tls`, a plain `redis://` URL is upgraded
    /// to `rediss://` (managed Redis endpoints that only accept TLS).
    pub async fn connect(url: &str, force_tls: bool) -> Result<Self, StoreError> {
        let url = connection_url(url, force_tls);
        let client = redis::Client::open(url.as_str()).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        info!(
            "Connected to Redis settings store (tls: {})",
            url.starts_with("rediss://")
        );
        Ok(Self { conn })
    }
}

fn connection_url(url: &str, force_tls: bool) -> String {
    match url.strip_prefix("redis://") {
        Some(rest) if force_tls => format!("rediss://{}", rest),
        _ => url.to_string(),
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(unavailable)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(unavailable)?;
        Ok(())
    }

    /// Cursor-based `SCAN MATCH`, so large keyspaces never block the server.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let mut conn = self.conn.clone();
        let mut values = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MGET_CHUNK) {
            let batch: Vec<Option<String>> = redis::cmd("MGET")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            values.extend(batch);
        }
        Ok(values)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
