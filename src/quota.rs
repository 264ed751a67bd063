use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::{
    conf::ConfQuota,
    reset,
    store::UsageStore,
    tier::Tier,
    types::{LimitCheck, Usage, UsageRecord},
};

const UPDATES_CAPACITY: usize = 64;

/// Counts searches per user against their tier's ceiling.
///
/// Reads and writes go through one [`UsageStore`], normally a
/// [`Fallback`](crate::store::Fallback) of the remote store over the local
/// cache. Recording is read-then-write with no version check: two
/// concurrent recordings for one user race and the last write wins.
#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn UsageStore>,
    limits: ConfQuota,
    updates: broadcast::Sender<UsageRecord>,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn UsageStore>, limits: ConfQuota) -> Self {
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        Self {
            store,
            limits,
            updates,
        }
    }

    /// Every record written by [`Self::record_search`], as it is written.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageRecord> {
        self.updates.subscribe()
    }

    pub async fn get_usage(&self, user_id: &str) -> Usage {
        self.get_usage_at(user_id, Utc::now()).await
    }

    /// Never fails: an unreadable store reads as zero usage on the free
    /// tier. A count whose period has ended reads as zero, though nothing
    /// is written until the next search.
    #[tracing::instrument(skip(self, now))]
    pub async fn get_usage_at(&self, user_id: &str, now: DateTime<Utc>) -> Usage {
        let record = self.current_record(user_id).await;
        let tier = record.tier().unwrap_or_default();
        Usage {
            count: effective_count(&record, tier, now),
            limit: tier.limit(&self.limits),
            tier,
        }
    }

    pub async fn check_limit(&self, user_id: &str, tier: Tier) -> LimitCheck {
        self.check_limit_at(user_id, tier, Utc::now()).await
    }

    #[tracing::instrument(skip(self, now))]
    pub async fn check_limit_at(
        &self,
        user_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> LimitCheck {
        let record = self.current_record(user_id).await;
        self.check_record_at(&record, tier, now)
    }

    /// [`Self::check_limit`] against a record already in hand.
    #[must_use]
    pub fn check_record(&self, record: &UsageRecord, tier: Tier) -> LimitCheck {
        self.check_record_at(record, tier, Utc::now())
    }

    #[must_use]
    pub fn check_record_at(
        &self,
        record: &UsageRecord,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> LimitCheck {
        let current_count = effective_count(record, tier, now);
        let limit = tier.limit(&self.limits);
        LimitCheck {
            reached: limit.is_reached_by(current_count),
            current_count,
            limit,
        }
    }

    pub async fn record_search(
        &self,
        user_id: &str,
        tier_hint: Option<Tier>,
    ) -> anyhow::Result<UsageRecord> {
        self.record_search_at(user_id, tier_hint, Utc::now()).await
    }

    /// Resets the period if it has ended, then counts one search.
    ///
    /// The tier comes from the stored record, else `tier_hint`, else free.
    /// Fails only when the write could not land anywhere.
    #[tracing::instrument(skip(self, now))]
    pub async fn record_search_at(
        &self,
        user_id: &str,
        tier_hint: Option<Tier>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UsageRecord> {
        let mut record = self.current_record(user_id).await;
        let tier = record.tier().or(tier_hint).unwrap_or_default();
        if reset::is_reset_due(tier, record.last_reset_date.as_deref(), now) {
            tracing::info!(
                %tier,
                prev_count = record.search_count,
                prev_reset = ?record.last_reset_date,
                "Period ended. Resetting."
            );
            record.search_count = 0;
            record.last_reset_date = Some(reset::format_timestamp(now));
        }
        record.search_count = record.search_count.saturating_add(1);
        if record.tier.is_none() {
            record.tier = tier_hint.map(|t| t.to_string());
        }
        self.store.save_usage(&record).await.inspect_err(|error| {
            tracing::error!(?error, "Search not recorded anywhere.");
        })?;
        tracing::debug!(search_count = record.search_count, "Search recorded.");
        // Nobody listening is fine.
        let _ = self.updates.send(record.clone());
        Ok(record)
    }

    /// The stored record as it is, before any reset. Never fails: an
    /// unreadable store reads as an empty record.
    pub async fn current_record(&self, user_id: &str) -> UsageRecord {
        match self.store.fetch_usage(user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => UsageRecord::empty(user_id),
            Err(error) => {
                tracing::warn!(?error, "Usage unreadable. Assuming none.");
                UsageRecord::empty(user_id)
            }
        }
    }
}

fn effective_count(record: &UsageRecord, tier: Tier, now: DateTime<Utc>) -> u64 {
    if reset::is_reset_due(tier, record.last_reset_date.as_deref(), now) {
        0
    } else {
        record.search_count
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{
        store::{cache::CacheStore, memory::MemoryStore, Fallback},
        tier::Limit,
    };

    fn limits() -> ConfQuota {
        ConfQuota {
            free_limit: 25,
            standard_limit: 25,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    struct Fixture {
        remote: Arc<MemoryStore>,
        cache: Arc<CacheStore>,
        tracker: QuotaTracker,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheStore::in_memory());
        let store = Fallback::new(remote.clone(), cache.clone());
        let tracker = QuotaTracker::new(Arc::new(store), limits());
        Fixture {
            remote,
            cache,
            tracker,
        }
    }

    async fn seed(
        f: &Fixture,
        count: u64,
        last_reset: Option<DateTime<Utc>>,
        tier: Tier,
    ) {
        let record = UsageRecord {
            user_id: "u1".to_string(),
            search_count: count,
            last_reset_date: last_reset.map(reset::format_timestamp),
            tier: Some(tier.to_string()),
        };
        f.remote.save_usage(&record).await.unwrap();
    }

    #[tokio::test]
    async fn never_reset_starts_at_one() {
        let f = fixture();
        seed(&f, 17, None, Tier::Standard).await;
        let record = f.tracker.record_search_at("u1", None, now()).await.unwrap();
        assert_eq!(record.search_count, 1);
        assert_eq!(
            record.last_reset_date.as_deref(),
            Some(reset::format_timestamp(now()).as_str())
        );
    }

    #[tokio::test]
    async fn new_user_starts_at_one_with_hinted_tier() {
        let f = fixture();
        let record = f
            .tracker
            .record_search_at("u1", Some(Tier::Standard), now())
            .await
            .unwrap();
        assert_eq!(record.search_count, 1);
        assert_eq!(record.tier(), Some(Tier::Standard));
    }

    #[tokio::test]
    async fn free_resets_when_month_turns() {
        let f = fixture();
        let march_1st = Utc.with_ymd_and_hms(2025, 3, 1, 0, 30, 0).unwrap();
        let last = march_1st - Duration::hours(1);
        seed(&f, 20, Some(last), Tier::Free).await;
        let record = f
            .tracker
            .record_search_at("u1", None, march_1st)
            .await
            .unwrap();
        assert_eq!(record.search_count, 1);
    }

    #[tokio::test]
    async fn standard_keeps_count_within_a_day() {
        let f = fixture();
        seed(&f, 6, Some(now() - Duration::hours(23)), Tier::Standard).await;
        let record = f.tracker.record_search_at("u1", None, now()).await.unwrap();
        assert_eq!(record.search_count, 7);
    }

    #[tokio::test]
    async fn standard_resets_after_a_day() {
        let f = fixture();
        seed(&f, 6, Some(now() - Duration::hours(25)), Tier::Standard).await;
        let record = f.tracker.record_search_at("u1", None, now()).await.unwrap();
        assert_eq!(record.search_count, 1);
    }

    #[tokio::test]
    async fn stored_tier_beats_hint() {
        let f = fixture();
        // Monthly for free; daily would have reset after 25 hours.
        let last = now() - Duration::hours(25);
        seed(&f, 6, Some(last), Tier::Free).await;
        let record = f
            .tracker
            .record_search_at("u1", Some(Tier::Standard), now())
            .await
            .unwrap();
        assert_eq!(record.search_count, 7);
        assert_eq!(record.tier(), Some(Tier::Free));
    }

    #[tokio::test]
    async fn free_limit_is_reached_at_the_ceiling() {
        let f = fixture();
        let last = now() - Duration::days(2);
        seed(&f, 24, Some(last), Tier::Free).await;

        let check = f.tracker.check_limit_at("u1", Tier::Free, now()).await;
        assert_eq!(
            check,
            LimitCheck {
                reached: false,
                current_count: 24,
                limit: Limit::Bounded(25),
            }
        );

        f.tracker.record_search_at("u1", None, now()).await.unwrap();

        let check = f.tracker.check_limit_at("u1", Tier::Free, now()).await;
        assert_eq!(
            check,
            LimitCheck {
                reached: true,
                current_count: 25,
                limit: Limit::Bounded(25),
            }
        );
    }

    #[tokio::test]
    async fn pro_is_never_reached() {
        let f = fixture();
        seed(&f, 10_000, Some(now() - Duration::hours(1)), Tier::Pro).await;
        let check = f.tracker.check_limit_at("u1", Tier::Pro, now()).await;
        assert!(!check.reached);
        assert_eq!(check.current_count, 10_000);
        assert_eq!(check.limit, Limit::Unlimited);
    }

    #[tokio::test]
    async fn reached_iff_count_at_least_limit() {
        let f = fixture();
        for count in [0, 1, 24, 25, 26, 100] {
            seed(&f, count, Some(now() - Duration::hours(1)), Tier::Standard)
                .await;
            let check = f.tracker.check_limit_at("u1", Tier::Standard, now()).await;
            assert_eq!(check.reached, count >= 25, "count={count}");
        }
    }

    #[tokio::test]
    async fn stale_period_reads_as_zero() {
        let f = fixture();
        seed(&f, 25, Some(now() - Duration::hours(30)), Tier::Standard).await;
        let usage = f.tracker.get_usage_at("u1", now()).await;
        assert_eq!(usage.count, 0);
        assert_eq!(usage.tier, Tier::Standard);
        // Nothing was written.
        let stored = f.remote.fetch_usage("u1").await.unwrap().unwrap();
        assert_eq!(stored.search_count, 25);
    }

    #[tokio::test]
    async fn everything_down_reads_as_zero() {
        let remote = Arc::new(MemoryStore::new());
        remote.set_reachable(false);
        let tracker = QuotaTracker::new(remote, limits());
        let usage = tracker.get_usage_at("u1", now()).await;
        assert_eq!(
            usage,
            Usage {
                count: 0,
                limit: Limit::Bounded(25),
                tier: Tier::Free,
            }
        );
        assert!(tracker.record_search_at("u1", None, now()).await.is_err());
    }

    #[tokio::test]
    async fn remote_down_writes_land_in_cache() {
        let f = fixture();
        seed(&f, 3, Some(now() - Duration::hours(1)), Tier::Standard).await;
        f.remote.set_reachable(false);

        let record = f.tracker.record_search_at("u1", None, now()).await.unwrap();
        // Remote unreadable, so counting starts over from the empty cache.
        assert_eq!(record.search_count, 1);
        let cached = f.cache.fetch_usage("u1").await.unwrap().unwrap();
        assert_eq!(cached.search_count, 1);
        let usage = f.tracker.get_usage_at("u1", now()).await;
        assert_eq!(usage.count, 1);

        // Back online: the remote is authoritative again.
        f.remote.set_reachable(true);
        let usage = f.tracker.get_usage_at("u1", now()).await;
        assert_eq!(usage.count, 3);
    }

    #[tokio::test]
    async fn recordings_are_published() {
        let f = fixture();
        let mut updates = f.tracker.subscribe();
        f.tracker.record_search_at("u1", None, now()).await.unwrap();
        let record = updates.recv().await.unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.search_count, 1);
    }
}
