//! Local, degraded-mode storage for usage records.

use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::types::{SearchRecord, UsageRecord};

use super::UsageStore;

/// String key-value storage.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Usage records spread over per-user keys of a [`KvStore`].
///
/// Search history is not cached here, so `recent_searches` always fails.
pub struct CacheStore {
    kv: Arc<dyn KvStore>,
}

impl CacheStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    /// Forget everything cached for the user.
    pub async fn clear(&self, user_id: &str) -> anyhow::Result<()> {
        self.kv.remove(&count_key(user_id)).await?;
        self.kv.remove(&reset_key(user_id)).await?;
        self.kv.remove(&tier_key(user_id)).await?;
        Ok(())
    }
}

fn count_key(user_id: &str) -> String {
    format!("search_count:{user_id}")
}

fn reset_key(user_id: &str) -> String {
    format!("last_reset:{user_id}")
}

fn tier_key(user_id: &str) -> String {
    format!("tier:{user_id}")
}

#[async_trait]
impl UsageStore for CacheStore {
    async fn fetch_usage(
        &self,
        user_id: &str,
    ) -> anyhow::Result<Option<UsageRecord>> {
        let Some(count) = self.kv.get(&count_key(user_id)).await? else {
            return Ok(None);
        };
        // A corrupt count is as good as none.
        let search_count = count.trim().parse::<u64>().unwrap_or_else(|error| {
            tracing::warn!(?error, user_id, %count, "Corrupt cached count.");
            0
        });
        let last_reset_date = self.kv.get(&reset_key(user_id)).await?;
        let tier = self.kv.get(&tier_key(user_id)).await?;
        Ok(Some(UsageRecord {
            user_id: user_id.to_string(),
            search_count,
            last_reset_date,
            tier,
        }))
    }

    async fn save_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        let user_id = record.user_id.as_str();
        self.kv
            .set(&count_key(user_id), &record.search_count.to_string())
            .await
            .context("Failed to cache search count")?;
        match &record.last_reset_date {
            Some(date) => self.kv.set(&reset_key(user_id), date).await?,
            None => self.kv.remove(&reset_key(user_id)).await?,
        }
        if let Some(tier) = &record.tier {
            self.kv.set(&tier_key(user_id), tier).await?;
        }
        Ok(())
    }

    async fn recent_searches(
        &self,
        _limit: u32,
        _since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SearchRecord>> {
        Err(anyhow!("Search history is not cached locally"))
    }
}
