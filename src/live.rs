//! Keeping a user's quota figures fresh while something is watching.

use std::time::Duration;

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    quota::QuotaTracker,
    tier::Tier,
    types::{LimitCheck, UsageRecord},
};

/// Owns two tasks: one polling the store on an interval, one applying
/// records pushed by the tracker as searches are recorded. Both stop on
/// [`LiveStats::unsubscribe`] or when the handle is dropped.
pub struct LiveStats {
    latest: watch::Receiver<Option<LimitCheck>>,
    cancel: CancellationToken,
    poll: Option<JoinHandle<()>>,
    push: Option<JoinHandle<()>>,
}

impl LiveStats {
    pub fn spawn(
        tracker: QuotaTracker,
        user_id: &str,
        tier: Tier,
        interval: Duration,
    ) -> Self {
        let (tx, latest) = watch::channel(None);
        let cancel = CancellationToken::new();
        let updates = tracker.subscribe();
        let poll = tokio::spawn(poll(
            tracker.clone(),
            user_id.to_string(),
            tier,
            interval,
            tx.clone(),
            cancel.clone(),
        ));
        let push = tokio::spawn(push(
            tracker,
            user_id.to_string(),
            tier,
            updates,
            tx,
            cancel.clone(),
        ));
        Self {
            latest,
            cancel,
            poll: Some(poll),
            push: Some(push),
        }
    }

    /// `None` until the first poll completes.
    #[must_use]
    pub fn latest(&self) -> Option<LimitCheck> {
        *self.latest.borrow()
    }

    /// Waits for the next figure. `None` once both tasks have stopped.
    pub async fn changed(&mut self) -> Option<LimitCheck> {
        self.latest.changed().await.ok()?;
        *self.latest.borrow_and_update()
    }

    /// Stops both tasks and waits for them to finish.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        for task in [self.poll.take(), self.push.take()].into_iter().flatten() {
            if let Err(error) = task.await {
                tracing::error!(?error, "Live stats task failed.");
            }
        }
        tracing::debug!("Live stats unsubscribed.");
    }
}

impl Drop for LiveStats {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tracing::instrument(name = "live_poll", skip(tracker, tx, cancel))]
async fn poll(
    tracker: QuotaTracker,
    user_id: String,
    tier: Tier,
    interval: Duration,
    tx: watch::Sender<Option<LimitCheck>>,
    cancel: CancellationToken,
) {
    let mut ticks = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {
                let check = tracker.check_limit(&user_id, tier).await;
                tracing::debug!(?check, "Polled.");
                tx.send_replace(Some(check));
            }
        }
    }
}

#[tracing::instrument(name = "live_push", skip(tracker, updates, tx, cancel))]
async fn push(
    tracker: QuotaTracker,
    user_id: String,
    tier: Tier,
    mut updates: broadcast::Receiver<UsageRecord>,
    tx: watch::Sender<Option<LimitCheck>>,
    cancel: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            () = cancel.cancelled() => break,
            update = updates.recv() => update,
        };
        match update {
            Ok(record) if record.user_id == user_id => {
                // The pushed record is fresh, so the store need not be asked.
                let check = tracker.check_record(&record, tier);
                tracing::debug!(?check, "Pushed.");
                tx.send_replace(Some(check));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Live stats fell behind.");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
