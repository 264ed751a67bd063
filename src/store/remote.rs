//! The source of truth: usage and history tables behind a PostgREST-style
//! HTTP API.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response};

use crate::{
    conf::ConfRemote,
    reset,
    types::{SearchRecord, UsageRecord},
};

use super::UsageStore;

#[derive(Clone)]
pub struct RemoteStore {
    client: Client,
    conf: ConfRemote,
}

impl RemoteStore {
    pub fn new(conf: &ConfRemote) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(conf.timeout())
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            conf: conf.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.conf.base_url.trim_end_matches('/'),
            table
        )
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.conf.api_key)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.conf.api_key),
            )
            .header(header::ACCEPT, "application/json")
    }
}

/// Non-2xx is an error, carrying whatever the server said.
async fn ensure_success(resp: Response) -> anyhow::Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!("Remote store responded {status}: {body}"))
}

#[async_trait]
impl UsageStore for RemoteStore {
    #[tracing::instrument(name = "remote_fetch", skip(self))]
    async fn fetch_usage(
        &self,
        user_id: &str,
    ) -> anyhow::Result<Option<UsageRecord>> {
        let url = self.table_url(&self.conf.usage_table);
        let user_filter = format!("eq.{user_id}");
        let resp = self
            .authorized(self.client.get(&url))
            .query(&[("user_id", user_filter.as_str()), ("select", "*")])
            .send()
            .await
            .context("Failed to reach remote store")?;
        let mut rows: Vec<UsageRecord> = ensure_success(resp)
            .await?
            .json()
            .await
            .context("Malformed usage rows")?;
        tracing::debug!(rows = rows.len(), "Fetched usage.");
        Ok(rows.pop())
    }

    #[tracing::instrument(
        name = "remote_save",
        skip_all,
        fields(user_id = %record.user_id, search_count = record.search_count)
    )]
    async fn save_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        let url = self.table_url(&self.conf.usage_table);
        let resp = self
            .authorized(self.client.post(&url))
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record)
            .send()
            .await
            .context("Failed to reach remote store")?;
        ensure_success(resp).await?;
        tracing::debug!("Saved usage.");
        Ok(())
    }

    #[tracing::instrument(name = "remote_history", skip(self))]
    async fn recent_searches(
        &self,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SearchRecord>> {
        let url = self.table_url(&self.conf.history_table);
        let mut query = vec![
            ("select", "query,created_at".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            query.push((
                "created_at",
                format!("gte.{}", reset::format_timestamp(since)),
            ));
        }
        let resp = self
            .authorized(self.client.get(&url))
            .query(&query)
            .send()
            .await
            .context("Failed to reach remote store")?;
        let rows: Vec<SearchRecord> = ensure_success(resp)
            .await?
            .json()
            .await
            .context("Malformed history rows")?;
        tracing::debug!(rows = rows.len(), "Fetched search history.");
        Ok(rows)
    }
}
