//! Background reconcilers: the expiry sweep and the deletion purge.
//!
//! Both loops share one [`CancellationToken`] and stop only when it fires.
//! A failing tick is logged and the schedule continues.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PollConfig;
use crate::errors::PollError;
use crate::ports::PollNotifier;
use crate::service::PollService;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcilerSchedule {
    pub sweep_interval: Duration,
    pub purge_interval: Duration,
    pub deleted_retention: Duration,
}

impl ReconcilerSchedule {
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            sweep_interval: config.sweep_interval(),
            purge_interval: config.purge_interval(),
            deleted_retention: config.deleted_retention(),
        }
    }
}

impl Default for ReconcilerSchedule {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

pub struct Reconcilers {
    sweep: JoinHandle<()>,
    purge: JoinHandle<()>,
}

impl Reconcilers {
    pub fn spawn(
        service: Arc<PollService>,
        notifier: Arc<dyn PollNotifier>,
        schedule: ReconcilerSchedule,
        cancel: CancellationToken,
    ) -> Self {
        let sweep = tokio::spawn(run_expiry_sweep(
            service.clone(),
            notifier,
            schedule.sweep_interval,
            cancel.child_token(),
        ));
        let purge = tokio::spawn(run_deletion_purge(
            service,
            schedule.purge_interval,
            schedule.deleted_retention,
            cancel.child_token(),
        ));

        info!(
            event_name = "reconcilers.started",
            sweep_interval_secs = schedule.sweep_interval.as_secs(),
            purge_interval_secs = schedule.purge_interval.as_secs(),
            "background reconcilers started"
        );
        Self { sweep, purge }
    }

    /// Waits for both loops to exit. Call after cancelling their token.
    pub async fn join(self) {
        for (name, handle) in [("expiry_sweep", self.sweep), ("deletion_purge", self.purge)] {
            if let Err(error) = handle.await {
                warn!(event_name = "reconcilers.join_failed", reconciler = name, error = %error, "reconciler task failed");
            }
        }
    }
}

/// One expiry pass: close expired polls and announce each in its channel.
/// Returns how many polls were closed.
pub async fn sweep_once(service: &PollService, notifier: &dyn PollNotifier) -> Result<usize, PollError> {
    let closed = service.finish_expired_polls().await?;

    for poll in &closed {
        if let Err(error) = notifier.poll_expired(poll).await {
            warn!(
                event_name = "poll.notify_failed",
                poll_id = %poll.id,
                channel_id = %poll.channel_id,
                error = %error,
                "failed to announce expired poll"
            );
        }
    }

    Ok(closed.len())
}

pub async fn run_expiry_sweep(
    service: Arc<PollService>,
    notifier: Arc<dyn PollNotifier>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(error) = sweep_once(&service, notifier.as_ref()).await {
                    warn!(event_name = "reconciler.sweep_failed", error = %error, "expiry sweep failed");
                }
            }
        }
    }

    info!(event_name = "reconciler.stopped", reconciler = "expiry_sweep", "expiry sweep stopped");
}

pub async fn run_deletion_purge(
    service: Arc<PollService>,
    period: Duration,
    retention: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(error) = service.purge_deleted_polls(retention).await {
                    warn!(event_name = "reconciler.purge_failed", error = %error, "deletion purge failed");
                }
            }
        }
    }

    info!(event_name = "reconciler.stopped", reconciler = "deletion_purge", "deletion purge stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::{run_deletion_purge, run_expiry_sweep, sweep_once, ReconcilerSchedule, Reconcilers};
    use crate::config::PollConfig;
    use crate::domain::poll::{Poll, PollStatus};
    use crate::ports::{NotifyError, PollNotifier};
    use crate::service::tests::FakeStore;
    use crate::service::PollService;

    #[derive(Default)]
    struct RecordingNotifier {
        notified: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl PollNotifier for RecordingNotifier {
        async fn poll_expired(&self, poll: &Poll) -> Result<(), NotifyError> {
            self.notified.lock().expect("lock").push(poll.id.0.clone());
            if self.fail {
                return Err(NotifyError::Rejected(500));
            }
            Ok(())
        }
    }

    fn expired_poll() -> Poll {
        let mut poll = Poll::new(
            "Expired?",
            vec!["Yes".to_owned(), "No".to_owned()],
            "u1",
            "c1",
            60,
            10,
        )
        .expect("poll");
        poll.created_at -= 3600;
        poll.expires_at = poll.created_at + 60;
        poll
    }

    #[test]
    fn default_schedule_matches_poll_defaults() {
        let schedule = ReconcilerSchedule::default();

        assert_eq!(schedule.sweep_interval, Duration::from_secs(60));
        assert_eq!(schedule.purge_interval, Duration::from_secs(24 * 60 * 60));
        assert_eq!(schedule.deleted_retention, Duration::from_secs(30 * 24 * 60 * 60));
    }

    #[tokio::test]
    async fn sweep_once_notifies_each_closed_poll_even_when_delivery_fails() {
        let store = Arc::new(FakeStore::default());
        let first = expired_poll();
        let second = expired_poll();
        store.insert(first.clone());
        store.insert(second.clone());
        let service = PollService::new(store.clone(), PollConfig::default());
        let notifier = RecordingNotifier { fail: true, ..RecordingNotifier::default() };

        let closed = sweep_once(&service, &notifier).await.expect("sweep");

        assert_eq!(closed, 2);
        assert_eq!(notifier.notified.lock().expect("lock").len(), 2);
        assert_eq!(store.status_of(&first.id), Some(PollStatus::Closed));
        assert_eq!(store.status_of(&second.id), Some(PollStatus::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_sweep_runs_after_each_period_until_cancelled() {
        let store = Arc::new(FakeStore::default());
        let service = Arc::new(PollService::new(store.clone(), PollConfig::default()));
        let notifier = Arc::new(RecordingNotifier::default());
        let cancel = CancellationToken::new();

        let poll = expired_poll();
        store.insert(poll.clone());

        let handle = tokio::spawn(run_expiry_sweep(
            service,
            notifier.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.status_of(&poll.id), Some(PollStatus::Active));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.status_of(&poll.id), Some(PollStatus::Closed));
        assert_eq!(notifier.notified.lock().expect("lock").as_slice(), &[poll.id.0.clone()]);

        cancel.cancel();
        handle.await.expect("sweep loop exits");
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_sweep_survives_failing_ticks() {
        let store = Arc::new(FakeStore::default());
        store.fail_expired_query.store(true, Ordering::SeqCst);
        let service = Arc::new(PollService::new(store.clone(), PollConfig::default()));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_expiry_sweep(
            service,
            Arc::new(RecordingNotifier::default()),
            Duration::from_secs(60),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!handle.is_finished());

        let poll = expired_poll();
        store.insert(poll.clone());
        store.fail_expired_query.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.status_of(&poll.id), Some(PollStatus::Closed));

        cancel.cancel();
        handle.await.expect("sweep loop exits");
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_purge_uses_retention_on_schedule() {
        let store = Arc::new(FakeStore::default());
        let service = Arc::new(PollService::new(store.clone(), PollConfig::default()));
        let cancel = CancellationToken::new();
        let retention = Duration::from_secs(30 * 24 * 60 * 60);

        let handle = tokio::spawn(run_deletion_purge(
            service,
            Duration::from_secs(24 * 60 * 60),
            retention,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(23 * 60 * 60)).await;
        assert!(store.purge_requests.lock().expect("lock").is_empty());

        tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;
        assert_eq!(store.purge_requests.lock().expect("lock").as_slice(), &[retention]);

        cancel.cancel();
        handle.await.expect("purge loop exits");
    }

    #[tokio::test(start_paused = true)]
    async fn shared_token_stops_both_reconcilers() {
        let store = Arc::new(FakeStore::default());
        let service = Arc::new(PollService::new(store, PollConfig::default()));
        let cancel = CancellationToken::new();

        let reconcilers = Reconcilers::spawn(
            service,
            Arc::new(RecordingNotifier::default()),
            ReconcilerSchedule::default(),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), reconcilers.join())
            .await
            .expect("reconcilers stop promptly");
    }
}
