use std::{
    fs,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::Executor;

use crate::{conf, store::cache::KvStore};

const MIGRATIONS: [&str; 1] = [include_str!("../migrations/0_cache.sql")];

#[derive(sqlx::FromRow)]
struct KvRow {
    // Used in SQL, but not in Rust. Here for documentation.
    #[allow(dead_code)]
    key: String,

    value: String,

    // Used in SQL, but not in Rust. Here for documentation.
    #[allow(dead_code)]
    updated_at: i64,
}

/// Host-local key-value file. Survives restarts; nothing more is promised.
#[derive(Clone)]
pub struct SqliteKv {
    pool: sqlx::Pool<sqlx::Sqlite>,
}

impl SqliteKv {
    pub async fn connect() -> anyhow::Result<Self> {
        let conf = conf::global();
        let busy_timeout =
            Duration::from_secs_f32(conf.cache.sqlite_busy_timeout);
        Self::connect_to(&conf.cache.file, busy_timeout).await
    }

    pub async fn connect_to(
        file_path: &Path,
        busy_timeout: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = file_path.parent() {
            let ctx = format!(
                "Failed to create parent directory \
                for cache file: {file_path:?}"
            );
            fs::create_dir_all(parent).context(ctx)?;
        }
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(file_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);
        let pool = sqlx::SqlitePool::connect_with(options).await?;
        let selph = Self { pool };
        for migration in MIGRATIONS {
            selph.pool.execute(migration).await?;
        }
        Ok(selph)
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row: Option<KvRow> = sqlx::query_as("SELECT * FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|KvRow { value, .. }| value))
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let now =
            i64::try_from(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())?;
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dir: &Path) -> SqliteKv {
        SqliteKv::connect_to(&dir.join("data").join("cache.db"), Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn get_set_remove() {
        let dir = tempfile::tempdir().unwrap();
        let kv = open(dir.path()).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
        kv.set("a", "1").await.unwrap();
        kv.set("a", "2").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("2"));
        kv.remove("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = open(dir.path()).await;
            kv.set("search_count:u1", "3").await.unwrap();
            kv.pool.close().await;
        }
        let kv = open(dir.path()).await;
        assert_eq!(kv.get("search_count:u1").await.unwrap().as_deref(), Some("3"));
    }
}
