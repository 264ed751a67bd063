pub mod cache;
pub mod memory;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{SearchRecord, UsageRecord};

/// Where usage records and search history live.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// `Ok(None)` when the user has no record yet.
    async fn fetch_usage(
        &self,
        user_id: &str,
    ) -> anyhow::Result<Option<UsageRecord>>;

    /// Create or overwrite the user's record.
    async fn save_usage(&self, record: &UsageRecord) -> anyhow::Result<()>;

    /// Newest first, at most `limit`, optionally only those created at or
    /// after `since`.
    async fn recent_searches(
        &self,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SearchRecord>>;
}

#[async_trait]
impl<T: UsageStore + ?Sized> UsageStore for Arc<T> {
    async fn fetch_usage(
        &self,
        user_id: &str,
    ) -> anyhow::Result<Option<UsageRecord>> {
        (**self).fetch_usage(user_id).await
    }

    async fn save_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        (**self).save_usage(record).await
    }

    async fn recent_searches(
        &self,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SearchRecord>> {
        (**self).recent_searches(limit, since).await
    }
}

/// Uses `primary` and only when it fails, `secondary`. A successful primary
/// answer is final: the secondary is neither consulted nor updated.
pub struct Fallback<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> Fallback<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl<P: UsageStore, S: UsageStore> UsageStore for Fallback<P, S> {
    #[tracing::instrument(name = "fallback_fetch", skip(self))]
    async fn fetch_usage(
        &self,
        user_id: &str,
    ) -> anyhow::Result<Option<UsageRecord>> {
        match self.primary.fetch_usage(user_id).await {
            Ok(record) => Ok(record),
            Err(error) => {
                tracing::warn!(?error, "Primary read failed. Using fallback.");
                self.secondary.fetch_usage(user_id).await
            }
        }
    }

    #[tracing::instrument(
        name = "fallback_save",
        skip_all,
        fields(user_id = %record.user_id)
    )]
    async fn save_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        match self.primary.save_usage(record).await {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::warn!(?error, "Primary write failed. Using fallback.");
                self.secondary.save_usage(record).await
            }
        }
    }

    async fn recent_searches(
        &self,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SearchRecord>> {
        match self.primary.recent_searches(limit, since).await {
            Ok(records) => Ok(records),
            Err(error) => {
                tracing::warn!(?error, "Primary history read failed.");
                self.secondary.recent_searches(limit, since).await
            }
        }
    }
}
