use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    reset,
    types::{SearchRecord, UsageRecord},
};

use super::UsageStore;

/// In-process stand-in for the remote store, which can be switched off
/// to behave as unreachable.
pub struct MemoryStore {
    usage: Mutex<HashMap<String, UsageRecord>>,
    /// Oldest first.
    history: Mutex<Vec<SearchRecord>>,
    reachable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            usage: Mutex::default(),
            history: Mutex::default(),
            reachable: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub async fn push_search(&self, query: &str, created_at: DateTime<Utc>) {
        self.history.lock().await.push(SearchRecord {
            query: query.to_string(),
            created_at: Some(reset::format_timestamp(created_at)),
        });
    }

    fn check_reachable(&self) -> anyhow::Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            bail!("Remote store unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn fetch_usage(
        &self,
        user_id: &str,
    ) -> anyhow::Result<Option<UsageRecord>> {
        self.check_reachable()?;
        Ok(self.usage.lock().await.get(user_id).cloned())
    }

    async fn save_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.check_reachable()?;
        self.usage
            .lock()
            .await
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn recent_searches(
        &self,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SearchRecord>> {
        self.check_reachable()?;
        let history = self.history.lock().await;
        let records = history
            .iter()
            .rev()
            .filter(|r| match (since, r.created_at.as_deref()) {
                (None, _) => true,
                (Some(since), Some(t)) => {
                    reset::parse_timestamp(t).is_some_and(|t| t >= since)
                }
                (Some(_), None) => false,
            })
            .take(usize::try_from(limit)?)
            .cloned()
            .collect();
        Ok(records)
    }
}
