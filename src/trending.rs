use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use anyhow::bail;
use chrono::{DateTime, Duration, Utc};
use utoipa::ToSchema;

use crate::{
    conf::ConfTrending,
    store::UsageStore,
    types::{KeywordFrequency, SearchRecord},
};

/// How far back the history query reaches. Each period is its own query
/// against the store, not a slice of one sample.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    ToSchema,
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    All,
    Day,
    Week,
    Month,
}

impl Period {
    #[must_use]
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::All => None,
            Self::Day => Some(now - Duration::days(1)),
            Self::Week => Some(now - Duration::weeks(1)),
            Self::Month => Some(now - Duration::days(30)),
        }
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let period = match s.trim().to_ascii_lowercase().as_str() {
            "all" => Self::All,
            "day" => Self::Day,
            "week" => Self::Week,
            "month" => Self::Month,
            other => bail!("Unknown period: {other:?}"),
        };
        Ok(period)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        };
        f.write_str(s)
    }
}

/// Most searched queries among the most recent ones.
#[derive(Clone)]
pub struct PopularityAggregator {
    store: Arc<dyn UsageStore>,
    conf: ConfTrending,
}

impl PopularityAggregator {
    pub fn new(store: Arc<dyn UsageStore>, conf: ConfTrending) -> Self {
        Self { store, conf }
    }

    /// Window and count from config, over all time.
    pub async fn trending(&self) -> Vec<KeywordFrequency> {
        self.top_keywords(self.conf.window_size, self.conf.top_n, Period::All)
            .await
    }

    /// Never fails: if history cannot be fetched, the configured
    /// placeholders come back with zero counts.
    #[tracing::instrument(skip(self))]
    pub async fn top_keywords(
        &self,
        window_size: u32,
        top_n: usize,
        period: Period,
    ) -> Vec<KeywordFrequency> {
        let since = period.since(Utc::now());
        match self.store.recent_searches(window_size, since).await {
            Ok(records) => rank(&records, top_n),
            Err(error) => {
                tracing::warn!(?error, "History unavailable. Using placeholders.");
                self.placeholders(top_n)
            }
        }
    }

    fn placeholders(&self, top_n: usize) -> Vec<KeywordFrequency> {
        self.conf
            .placeholders
            .iter()
            .take(top_n)
            .map(|keyword| KeywordFrequency {
                keyword: keyword.clone(),
                count: 0,
            })
            .collect()
    }
}

#[must_use]
pub fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Counts normalized queries and returns the `top_n` most frequent,
/// ties in the order first seen.
#[must_use]
pub fn rank(records: &[SearchRecord], top_n: usize) -> Vec<KeywordFrequency> {
    let mut counts: Vec<KeywordFrequency> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in records {
        let keyword = normalize(&record.query);
        if keyword.is_empty() {
            continue;
        }
        match index.get(&keyword) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(keyword.clone(), counts.len());
                counts.push(KeywordFrequency { keyword, count: 1 });
            }
        }
    }
    // Stable, so ties keep first-seen order.
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(top_n);
    counts
}
