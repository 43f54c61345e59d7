//! Background SMS delivery from the notification outbox.
//!
//! Jobs are claimed in `available_at` order, sent through the configured
//! gateway, and written back with their new state. Delivery is at-least-once:
//! a crash between a provider accept and the outbox write resends the message.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kahawa_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use kahawa_core::domain::notification::{NotificationJob, NotificationState};
use kahawa_core::notify::RetryPolicy;
use kahawa_db::repositories::{OutboxRepository, RepositoryError};
use kahawa_notify::{SmsGateway, SmsMessage};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::workflow::RequestChange;

const BATCH_SIZE: u32 = 25;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.sent + self.retried + self.failed
    }
}

pub struct NotificationDispatcher {
    outbox: Arc<dyn OutboxRepository>,
    gateway: Arc<dyn SmsGateway>,
    retry: RetryPolicy,
    audit: Arc<dyn AuditSink>,
}

impl NotificationDispatcher {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        gateway: Arc<dyn SmsGateway>,
        retry: RetryPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { outbox, gateway, retry, audit }
    }

    /// Sends every job due at `now`, up to one batch.
    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<DispatchReport, RepositoryError> {
        let jobs = self.outbox.due(now, BATCH_SIZE).await?;
        let mut report = DispatchReport::default();

        for mut job in jobs {
            let message = SmsMessage { to: job.recipient_phone.clone(), body: job.message.clone() };
            match self.gateway.send(&message).await {
                Ok(receipt) => {
                    job.mark_sent(Utc::now());
                    report.sent += 1;
                    debug!(
                        event_name = "notify.sms.sent",
                        job_id = %job.id.0,
                        request_id = %job.request_id,
                        provider_message_id = receipt.provider_message_id.as_deref().unwrap_or(""),
                        "sms delivered to provider"
                    );
                }
                Err(error) => {
                    let failed_at = Utc::now();
                    if error.is_permanent() {
                        job.mark_failed_terminal(error.to_string(), failed_at);
                    } else {
                        let retry_at = self.retry.next_attempt_at(job.attempts + 1, failed_at);
                        job.mark_failed(error.to_string(), retry_at, failed_at);
                    }

                    if job.state == NotificationState::FailedTerminal {
                        report.failed += 1;
                        self.record_terminal_failure(&job);
                    } else {
                        report.retried += 1;
                        warn!(
                            event_name = "notify.sms.retry_scheduled",
                            job_id = %job.id.0,
                            request_id = %job.request_id,
                            attempts = job.attempts,
                            retry_at = %job.available_at.to_rfc3339(),
                            error = %error,
                            "sms send failed; will retry"
                        );
                    }
                }
            }

            self.outbox.save(&job).await?;
        }

        if report.attempted() > 0 {
            info!(
                event_name = "notify.dispatch.batch_completed",
                sent = report.sent,
                retried = report.retried,
                failed = report.failed,
                "outbox batch processed"
            );
        }
        Ok(report)
    }

    fn record_terminal_failure(&self, job: &NotificationJob) {
        let error = job.last_error.clone().unwrap_or_default();
        warn!(
            event_name = "notify.sms.failed_terminal",
            job_id = %job.id.0,
            request_id = %job.request_id,
            attempts = job.attempts,
            error = %error,
            "sms delivery abandoned"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(job.request_id.clone()),
                format!("outbox-{}", job.id.0),
                "notification.failed",
                AuditCategory::Notification,
                "system",
                AuditOutcome::Failed,
            )
            .with_metadata("recipient", job.recipient_identity.clone())
            .with_metadata("attempts", job.attempts.to_string())
            .with_metadata("error", error),
        );
    }

    /// Drains on every tick and whenever a request changes, until `shutdown`
    /// flips to true.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut changes: broadcast::Receiver<RequestChange>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(50)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut feed_open = true;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    change = changes.recv(), if feed_open => {
                        if let Err(broadcast::error::RecvError::Closed) = change {
                            // Ticker alone from here on.
                            feed_open = false;
                            continue;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if let Err(error) = self.drain_once(Utc::now()).await {
                    warn!(
                        event_name = "notify.dispatch.drain_failed",
                        error = %error,
                        "outbox drain failed"
                    );
                }
            }

            info!(event_name = "notify.dispatch.stopped", "notification dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use kahawa_core::audit::InMemoryAuditSink;
    use kahawa_core::domain::notification::{NotificationJob, NotificationState};
    use kahawa_core::domain::request::RequestId;
    use kahawa_core::notify::RetryPolicy;
    use kahawa_db::repositories::{InMemoryOutboxRepository, OutboxRepository};
    use kahawa_notify::RecordingSmsGateway;
    use tokio::sync::{broadcast, watch};

    use super::NotificationDispatcher;

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
        }
    }

    fn job(phone: &str) -> NotificationJob {
        NotificationJob::queued(
            RequestId("REQ-0001".to_owned()),
            "grace@kahawa.test",
            phone,
            "REQ-0001 awaits your Finance approval.",
            3,
            Utc::now() - chrono::Duration::seconds(1),
        )
    }

    fn dispatcher(
        outbox: Arc<InMemoryOutboxRepository>,
        gateway: RecordingSmsGateway,
        audit: InMemoryAuditSink,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(outbox, Arc::new(gateway), retry(), Arc::new(audit))
    }

    #[tokio::test]
    async fn due_jobs_are_sent_and_marked() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        outbox.enqueue(&[job("+256781121639"), job("+256772000111")]).await.expect("enqueue");
        let gateway = RecordingSmsGateway::default();

        let report = dispatcher(outbox.clone(), gateway.clone(), InMemoryAuditSink::default())
            .drain_once(Utc::now())
            .await
            .expect("drain");

        assert_eq!(report.sent, 2);
        assert_eq!(gateway.sent().len(), 2);
        let jobs = outbox.list_for_request(&RequestId("REQ-0001".to_owned())).await.expect("jobs");
        assert!(jobs.iter().all(|job| job.state == NotificationState::Sent && job.attempts == 1));
        assert!(outbox.due(Utc::now(), 10).await.expect("due").is_empty());
    }

    #[tokio::test]
    async fn transient_failures_back_off_then_give_up() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        outbox.enqueue(&[job("+256781121639")]).await.expect("enqueue");
        let gateway = RecordingSmsGateway::default();
        gateway.fail_with_transport_error();
        let audit = InMemoryAuditSink::default();
        let dispatcher = dispatcher(outbox.clone(), gateway, audit.clone());

        let first = dispatcher.drain_once(Utc::now()).await.expect("first");
        assert_eq!(first.retried, 1);

        // Not due again until the backoff passes.
        let idle = dispatcher.drain_once(Utc::now()).await.expect("idle");
        assert_eq!(idle.attempted(), 0);

        let later = Utc::now() + chrono::Duration::hours(1);
        dispatcher.drain_once(later).await.expect("second");
        let last = dispatcher.drain_once(later + chrono::Duration::hours(1)).await.expect("third");
        assert_eq!(last.failed, 1);

        let jobs = outbox.list_for_request(&RequestId("REQ-0001".to_owned())).await.expect("jobs");
        assert_eq!(jobs[0].state, NotificationState::FailedTerminal);
        assert_eq!(jobs[0].attempts, 3);
        assert!(audit.events().iter().any(|event| event.event_type == "notification.failed"));
    }

    #[tokio::test]
    async fn permanent_rejections_are_not_retried() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        outbox.enqueue(&[job("+256781121639")]).await.expect("enqueue");
        let gateway = RecordingSmsGateway::default();
        gateway.fail_with_status(400);

        let report = dispatcher(outbox.clone(), gateway, InMemoryAuditSink::default())
            .drain_once(Utc::now())
            .await
            .expect("drain");

        assert_eq!(report.failed, 1);
        let jobs = outbox.list_for_request(&RequestId("REQ-0001".to_owned())).await.expect("jobs");
        assert_eq!(jobs[0].state, NotificationState::FailedTerminal);
        assert_eq!(jobs[0].attempts, 1);
    }

    #[tokio::test]
    async fn spawned_dispatcher_stops_on_shutdown() {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        outbox.enqueue(&[job("+256781121639")]).await.expect("enqueue");
        let gateway = RecordingSmsGateway::default();
        let (_changes_tx, changes) = broadcast::channel(4);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let handle = Arc::new(dispatcher(outbox, gateway.clone(), InMemoryAuditSink::default()))
            .spawn(Duration::from_millis(50), changes, shutdown);

        for _ in 0..40 {
            if !gateway.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(gateway.sent().len(), 1);

        shutdown_tx.send(true).expect("signal shutdown");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatcher stops")
            .expect("task joins");
    }
}
