use crate::core::error::UploadError;
use crate::core::model::Fingerprint;
use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Durable string key-value store backing the resume cache.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("create_dir_all {}", parent.display()))?;
            }
        }

        let abs = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            std::env::current_dir()
                .with_context(|| "current_dir")?
                .join(db_path)
        };

        let mut p = abs.to_string_lossy().to_string();
        if cfg!(windows) {
            p = p.replace('\\', "/");
        }

        // mode=rwc creates the file on first use
        let url = if p.starts_with('/') {
            format!("sqlite://{}?mode=rwc", p)
        } else {
            format!("sqlite:///{}?mode=rwc", p)
        };

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .with_context(|| format!("connect sqlite url={} (file={})", url, abs.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resume_locations (
              fingerprint TEXT PRIMARY KEY NOT NULL,
              location TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn now_epoch() -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

#[async_trait]
impl ResumeStore for SqliteStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT location FROM resume_locations
            WHERE fingerprint = ?;
            "#,
        )
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("fetch resume location")?;

        Ok(row.map(|r| r.get::<String, _>("location")))
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_locations (fingerprint, location, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE
            SET location = excluded.location,
                updated_at = excluded.updated_at;
            "#,
        )
            .bind(key)
            .bind(value)
            .bind(Self::now_epoch())
            .execute(&self.pool)
            .await
            .context("store resume location")?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM resume_locations WHERE fingerprint = ?"#)
            .bind(key)
            .execute(&self.pool)
            .await
            .context("delete resume location")?;
        Ok(())
    }
}

/// Process-local store, lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl ResumeStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Fingerprint → resource location mapping on top of a [`ResumeStore`].
///
/// Read and delete failures are logged and treated as a cache miss; write
/// failures are reported so the caller can decide, but are never fatal to an
/// upload.
#[derive(Clone)]
pub struct ResumeCache {
    store: Arc<dyn ResumeStore>,
}

impl ResumeCache {
    pub fn new(store: Arc<dyn ResumeStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        match self.store.get(fingerprint.as_str()).await {
            Ok(v) => v,
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(fingerprint = %fingerprint, %error, "resume cache read failed");
                None
            }
        }
    }

    pub async fn set(&self, fingerprint: &Fingerprint, location: &str) -> Result<(), UploadError> {
        self.store
            .set(fingerprint.as_str(), location)
            .await
            .map_err(|e| UploadError::CacheWriteFailed(format!("{:#}", e)))?;
        debug!(fingerprint = %fingerprint, location, "resume location cached");
        Ok(())
    }

    pub async fn clear(&self, fingerprint: &Fingerprint) {
        debug!(fingerprint = %fingerprint, "clearing cached resume location");
        if let Err(e) = self.store.remove(fingerprint.as_str()).await {
            let error = format!("{:#}", e);
            warn!(fingerprint = %fingerprint, %error, "resume cache delete failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "http://host/files/1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("http://host/files/1"));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("state").join("resume.sqlite");

        {
            let store = SqliteStore::open(&db).await.unwrap();
            store.set("tus-a-b-1", "http://host/files/1").await.unwrap();
            store.set("tus-a-b-1", "http://host/files/2").await.unwrap();
            store.set("tus-c-d-2", "http://host/files/3").await.unwrap();
            store.remove("tus-c-d-2").await.unwrap();
        }

        let store = SqliteStore::open(&db).await.unwrap();
        assert_eq!(
            store.get("tus-a-b-1").await.unwrap().as_deref(),
            Some("http://host/files/2")
        );
        assert_eq!(store.get("tus-c-d-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cache_round_trips_by_fingerprint() {
        let cache = ResumeCache::new(Arc::new(MemoryStore::new()));
        let fp = Fingerprint::derive("a.bin", "application/octet-stream", 10);
        assert_eq!(cache.get(&fp).await, None);
        cache.set(&fp, "http://host/files/9").await.unwrap();
        assert_eq!(cache.get(&fp).await.as_deref(), Some("http://host/files/9"));
        cache.clear(&fp).await;
        assert_eq!(cache.get(&fp).await, None);
    }
}
