//! Worker pool draining the webhook spool.
//!
//! ```text
//!  POST /webhook ──► spool ──► dispatcher ──► channel ──► worker 1..N ──► EventRouter
//!                      ▲  (claims .proc)                     │
//!                      └──── .done / .retry ─────────────────┘
//! ```
//!
//! The dispatcher wakes when the server spools a delivery, or on a timer so
//! that retries whose backoff has elapsed get picked up again. It claims each
//! ready delivery before handing it to the pool, so a delivery is handled by
//! at most one worker at a time. There is no ordering between deliveries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::effects::{GitInterpreter, RemoteInterpreter};
use crate::github::RetryConfig;
use crate::spool::delivery::unclaim;
use crate::spool::{
    Release, SpoolError, SpooledDelivery, cleanup_done_deliveries, cleanup_interrupted_processing,
    drain_pending, mark_done, mark_processing, release_for_retry,
};

use super::policy::{FailureAction, classify_failure};
use super::router::EventRouter;

pub const DEFAULT_WORKER_COUNT: usize = 5;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_DONE_GRACE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub spool_dir: PathBuf,
    pub worker_count: usize,
    /// How often the spool is rescanned without a wake-up.
    pub poll_interval: Duration,
    /// Backoff and attempt limit for retried deliveries.
    pub redelivery: RetryConfig,
    /// How long finished deliveries are kept before being swept.
    pub done_grace_period: Duration,
}

impl DispatcherConfig {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        DispatcherConfig {
            spool_dir: spool_dir.into(),
            worker_count: DEFAULT_WORKER_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            redelivery: RetryConfig::REDELIVERY,
            done_grace_period: DEFAULT_DONE_GRACE_PERIOD,
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_redelivery(mut self, redelivery: RetryConfig) -> Self {
        self.redelivery = redelivery;
        self
    }
}

/// How a delivery left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Handled,
    /// Failed, logged and finished without retry.
    Acknowledged,
    /// Failed, back in the spool until `not_before`.
    Retrying {
        attempts: u32,
        not_before: DateTime<Utc>,
    },
    /// Failed too many times; finished.
    Abandoned { attempts: u32 },
    /// The payload could not be read back. Never retried.
    Unreadable,
}

pub struct Dispatcher<R, G> {
    config: DispatcherConfig,
    router: EventRouter<R, G>,
    wake: Arc<Notify>,
}

impl<R, G> Clone for Dispatcher<R, G> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            router: self.router.clone(),
            wake: Arc::clone(&self.wake),
        }
    }
}

impl<R, G> Dispatcher<R, G> {
    pub fn new(config: DispatcherConfig, router: EventRouter<R, G>) -> Self {
        info!(
            spool_dir = %config.spool_dir.display(),
            workers = config.worker_count,
            "creating dispatcher"
        );
        Dispatcher {
            config,
            router,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Notified by the webhook endpoint after each spooled delivery.
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Makes deliveries interrupted by a previous run pending again.
    ///
    /// Must run before [`Dispatcher::run`].
    pub fn recover(&self) -> Result<usize, SpoolError> {
        cleanup_interrupted_processing(&self.config.spool_dir)
    }
}

impl<R, G> Dispatcher<R, G>
where
    R: RemoteInterpreter + 'static,
    G: GitInterpreter + 'static,
{
    /// Runs the pool until `shutdown` fires. Deliveries in flight finish
    /// first; claimed deliveries not yet started are put back.
    pub async fn run(self, shutdown: CancellationToken) {
        let (tx, rx) = mpsc::channel::<SpooledDelivery>(self.config.worker_count);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for index in 0..self.config.worker_count {
            let worker = self.clone();
            let rx = Arc::clone(&rx);
            let cancel = shutdown.child_token();
            workers.spawn(async move { worker.work(index, rx, cancel).await });
        }
        info!(workers = self.config.worker_count, "dispatcher started");

        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = poll.tick() => {}
                _ = sweep.tick() => {
                    self.sweep();
                    continue;
                }
            }
            self.feed(&tx, &shutdown).await;
        }

        drop(tx);
        while workers.join_next().await.is_some() {}
        info!("dispatcher stopped");
    }

    /// Claims every ready delivery and queues it for the pool.
    async fn feed(&self, tx: &mpsc::Sender<SpooledDelivery>, shutdown: &CancellationToken) {
        let ready = match drain_pending(&self.config.spool_dir, Utc::now()) {
            Ok(ready) => ready,
            Err(e) => {
                error!(error = %e, "failed to scan spool");
                return;
            }
        };

        for delivery in ready {
            match mark_processing(&delivery) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(delivery_id = %delivery.delivery_id, error = %e, "failed to claim delivery");
                    continue;
                }
            }
            tokio::select! {
                sent = tx.send(delivery.clone()) => {
                    if sent.is_err() {
                        release_claim(&delivery);
                        return;
                    }
                }
                _ = shutdown.cancelled() => {
                    release_claim(&delivery);
                    return;
                }
            }
        }
    }

    fn sweep(&self) {
        match cleanup_done_deliveries(&self.config.spool_dir, self.config.done_grace_period) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "swept finished deliveries"),
            Err(e) => warn!(error = %e, "failed to sweep spool"),
        }
    }

    async fn work(
        &self,
        index: usize,
        rx: Arc<Mutex<mpsc::Receiver<SpooledDelivery>>>,
        cancel: CancellationToken,
    ) {
        debug!(worker = index, "worker started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                next = async { rx.lock().await.recv().await } => next,
            };
            let Some(delivery) = next else {
                break;
            };
            if let Err(e) = self.process(&delivery).await {
                error!(worker = index, delivery_id = %delivery.delivery_id, error = %e, "spool error while finishing delivery");
            }
        }
        debug!(worker = index, "worker stopped");
    }

    /// Handles one claimed delivery and records the result in the spool.
    #[instrument(skip_all, fields(delivery_id = %delivery.delivery_id))]
    pub async fn process(&self, delivery: &SpooledDelivery) -> Result<DeliveryOutcome, SpoolError> {
        let spooled = match delivery.read_event() {
            Ok(spooled) => spooled,
            Err(e) => {
                error!(error = %e, "unreadable delivery, dropping it");
                mark_done(delivery)?;
                return Ok(DeliveryOutcome::Unreadable);
            }
        };
        let event = &spooled.event;

        let error = match self.router.route(event).await {
            Ok(()) => {
                mark_done(delivery)?;
                debug!(kind = event.kind(), "delivery handled");
                return Ok(DeliveryOutcome::Handled);
            }
            Err(e) => e,
        };

        match classify_failure(event) {
            FailureAction::Acknowledge => {
                warn!(
                    kind = event.kind(),
                    installation_id = %event.installation_id(),
                    error = %error,
                    "handler failed, acknowledging without retry"
                );
                mark_done(delivery)?;
                Ok(DeliveryOutcome::Acknowledged)
            }
            FailureAction::Retry => {
                match release_for_retry(delivery, &self.config.redelivery, Utc::now())? {
                    Release::Scheduled {
                        attempts,
                        not_before,
                    } => {
                        info!(
                            kind = event.kind(),
                            installation_id = %event.installation_id(),
                            attempts,
                            %not_before,
                            error = %error,
                            "handler failed, will retry"
                        );
                        Ok(DeliveryOutcome::Retrying {
                            attempts,
                            not_before,
                        })
                    }
                    Release::Abandoned { attempts } => {
                        error!(
                            kind = event.kind(),
                            installation_id = %event.installation_id(),
                            attempts,
                            error = %error,
                            "handler failed too many times, giving up"
                        );
                        Ok(DeliveryOutcome::Abandoned { attempts })
                    }
                }
            }
        }
    }
}

fn release_claim(delivery: &SpooledDelivery) {
    if let Err(e) = unclaim(delivery) {
        warn!(delivery_id = %delivery.delivery_id, error = %e, "failed to release claim; recovered at next startup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryPlatform;
    use crate::spool::{RetryState, SpooledEvent, spool_delivery};
    use crate::store::RepositoryStore;
    use crate::test_utils::{Harness, MockGit, MockRemote, at, repository, sha};
    use crate::types::{DeliveryId, InstallationId, RemoteRepoId};
    use crate::webhooks::{
        CommitState, InstallationAction, InstallationEvent, PushEvent, RepoRef, StatusEvent,
        WebhookEvent,
    };
    use tempfile::tempdir;

    fn dispatcher(h: &Harness, spool_dir: &std::path::Path) -> Dispatcher<MockRemote, MockGit> {
        let config = DispatcherConfig::new(spool_dir).with_redelivery(RetryConfig::new(
            1,
            Duration::from_secs(5),
            Duration::from_secs(5),
            2.0,
        ));
        Dispatcher::new(config, EventRouter::new(h.ctx.clone()))
    }

    fn spool(dir: &std::path::Path, id: &str, event: WebhookEvent) -> SpooledDelivery {
        let delivery = spool_delivery(
            dir,
            &SpooledEvent {
                delivery_id: DeliveryId::new(id),
                received_at: Utc::now(),
                event,
            },
        )
        .unwrap();
        assert!(mark_processing(&delivery).unwrap());
        delivery
    }

    fn status_event() -> WebhookEvent {
        WebhookEvent::Status(StatusEvent {
            installation_id: InstallationId(1),
            repository_id: RemoteRepoId(10),
            sha: sha('a'),
            state: CommitState::Success,
            context: "ci".into(),
            target_url: None,
            updated_at: Some(at(1)),
        })
    }

    #[tokio::test]
    async fn handled_delivery_is_done() {
        let h = Harness::new();
        h.store.insert_repository(&repository(1, 10, "cb-1")).unwrap();
        let dir = tempdir().unwrap();
        let delivery = spool(dir.path(), "d-1", status_event());

        let outcome = dispatcher(&h, dir.path()).process(&delivery).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Handled);
        assert!(delivery.is_done());
        assert_eq!(h.platform.statuses().len(), 1);
    }

    #[tokio::test]
    async fn failed_push_is_acknowledged() {
        let h = Harness::new();
        h.store.insert_repository(&repository(1, 10, "cb-1")).unwrap();
        let dir = tempdir().unwrap();
        // No token scripted: the token request fails.
        let delivery = spool(
            dir.path(),
            "d-1",
            WebhookEvent::Push(PushEvent {
                installation_id: InstallationId(1),
                repository_id: RemoteRepoId(10),
                git_ref: "refs/heads/main".into(),
                after: Some(sha('b')),
            }),
        );

        let outcome = dispatcher(&h, dir.path()).process(&delivery).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Acknowledged);
        assert!(delivery.is_done());
        assert!(delivery.retry_state().unwrap().is_none());
    }

    fn installation_event(repo: u64) -> WebhookEvent {
        WebhookEvent::Installation(InstallationEvent {
            action: InstallationAction::Created,
            installation_id: InstallationId(1),
            account_login: "acme".into(),
            sender_login: None,
            repositories: vec![RepoRef {
                id: RemoteRepoId(repo),
                name: format!("repo-{repo}"),
            }],
        })
    }

    /// Queueing a clone job fails because the job consumer is gone.
    fn harness_without_job_consumer() -> Harness {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        Harness::with_platform(MemoryPlatform::new().with_job_sender(tx))
    }

    #[tokio::test]
    async fn failed_installation_is_retried() {
        let h = harness_without_job_consumer();
        let dir = tempdir().unwrap();
        let delivery = spool(dir.path(), "d-1", installation_event(10));
        let dispatcher = dispatcher(&h, dir.path());

        let first = dispatcher.process(&delivery).await.unwrap();
        assert!(matches!(first, DeliveryOutcome::Retrying { attempts: 1, .. }));
        assert!(!delivery.is_done());
        assert!(!delivery.is_processing());

        // The repository row exists now, so the replay has nothing to queue.
        assert!(mark_processing(&delivery).unwrap());
        let second = dispatcher.process(&delivery).await.unwrap();
        assert_eq!(second, DeliveryOutcome::Handled);
        assert!(delivery.is_done());
    }

    #[tokio::test]
    async fn exhausted_retries_are_abandoned() {
        let h = harness_without_job_consumer();
        let dir = tempdir().unwrap();
        let delivery = spool(dir.path(), "d-1", installation_event(10));
        delivery
            .write_retry_state(&RetryState {
                attempts: 1,
                not_before: Utc::now(),
            })
            .unwrap();

        let outcome = dispatcher(&h, dir.path()).process(&delivery).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Abandoned { attempts: 2 });
        assert!(delivery.is_done());
    }

    #[tokio::test]
    async fn unreadable_delivery_is_dropped() {
        let h = Harness::new();
        let dir = tempdir().unwrap();
        let delivery = SpooledDelivery::new(dir.path(), DeliveryId::new("bad"));
        std::fs::write(&delivery.payload_path, b"{}").unwrap();

        let outcome = dispatcher(&h, dir.path()).process(&delivery).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Unreadable);
        assert!(delivery.is_done());
    }

    #[tokio::test]
    async fn pool_drains_spool_and_stops() {
        let h = Harness::new();
        h.store.insert_repository(&repository(1, 10, "cb-1")).unwrap();
        let dir = tempdir().unwrap();
        let delivery = spool_delivery(
            dir.path(),
            &SpooledEvent {
                delivery_id: DeliveryId::new("d-1"),
                received_at: Utc::now(),
                event: status_event(),
            },
        )
        .unwrap();

        let dispatcher = dispatcher(&h, dir.path());
        let waker = dispatcher.waker();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(shutdown.clone()));
        waker.notify_one();

        for _ in 0..200 {
            if delivery.is_done() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert!(delivery.is_done());
        assert_eq!(h.platform.statuses().len(), 1);
    }
}
