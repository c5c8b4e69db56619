use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use super::transport::{DeliveryError, Mailer, OutboundEmail};
use crate::config::MailConfig;

/// Delivery knobs for the background worker.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub send_timeout: Duration,
}

impl From<&MailConfig> for RetryPolicy {
    fn from(cfg: &MailConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            backoff: cfg.retry_backoff,
            send_timeout: cfg.send_timeout,
        }
    }
}

/// Handle to the mail queue. Enqueueing never waits on the transport.
///
/// Delivery is at-least-once and best-effort: each message gets up to
/// `max_attempts` tries, then is dropped with an error log.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<OutboundEmail>,
}

impl Notifier {
    pub fn spawn(
        mailer: Arc<dyn Mailer>,
        capacity: usize,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(rx, mailer, policy));
        (Self { tx }, worker)
    }

    /// Returns `false` when the message was dropped because the queue is full or closed.
    pub fn enqueue(&self, email: OutboundEmail) -> bool {
        match self.tx.try_send(email) {
            Ok(()) => true,
            Err(TrySendError::Full(email)) => {
                warn!(to = %email.to, subject = %email.subject, "mail queue full; message dropped");
                false
            }
            Err(TrySendError::Closed(email)) => {
                warn!(to = %email.to, subject = %email.subject, "mail worker stopped; message dropped");
                false
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<OutboundEmail>,
    mailer: Arc<dyn Mailer>,
    policy: RetryPolicy,
) {
    while let Some(email) = rx.recv().await {
        if let Err(e) = deliver_with_retry(mailer.as_ref(), &email, policy).await {
            error!(to = %email.to, subject = %email.subject, error = %e, "mail delivery abandoned");
        }
    }
    info!("mail worker stopped");
}

pub(crate) async fn deliver_with_retry(
    mailer: &dyn Mailer,
    email: &OutboundEmail,
    policy: RetryPolicy,
) -> Result<(), DeliveryError> {
    let mut backoff = policy.backoff;
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.send_timeout, mailer.send(email)).await {
            Ok(res) => res,
            Err(_) => Err(DeliveryError::Timeout(policy.send_timeout)),
        };
        match result {
            Ok(()) => {
                info!(to = %email.to, subject = %email.subject, attempt, "mail delivered");
                return Ok(());
            }
            // retrying can't fix a bad address or an unbuildable message
            Err(e @ (DeliveryError::Address(_) | DeliveryError::Message(_))) => return Err(e),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                warn!(to = %email.to, attempt, error = %e, "mail delivery failed; retrying");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

/// One-time startup check of the mail transport. Never fails the caller.
pub async fn probe_transport(mailer: &dyn Mailer, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, mailer.verify()).await {
        Ok(Ok(())) => {
            info!("mail transport ready");
            true
        }
        Ok(Err(e)) => {
            warn!(error = %e, "mail transport not ready; continuing without it");
            false
        }
        Err(_) => {
            warn!(?timeout, "mail transport probe timed out; continuing without it");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::testing::{FlakyMailer, HangingMailer, RecordingMailer, UnsendableMailer};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
            send_timeout: Duration::from_millis(200),
        }
    }

    fn email() -> OutboundEmail {
        OutboundEmail {
            to: "a@x.com".into(),
            subject: "hi".into(),
            body: "hello".into(),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mailer = FlakyMailer::failing_first(2);
        deliver_with_retry(&mailer, &email(), policy(3)).await.unwrap();
        assert_eq!(mailer.attempts(), 3);
        assert_eq!(mailer.delivered().len(), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let mailer = FlakyMailer::failing_first(u32::MAX);
        let err = deliver_with_retry(&mailer, &email(), policy(3)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert_eq!(mailer.attempts(), 3);
    }

    #[tokio::test]
    async fn unbuildable_message_is_not_retried() {
        let mailer = UnsendableMailer::default();
        let err = deliver_with_retry(&mailer, &email(), policy(3)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Message(_)));
        assert_eq!(mailer.attempts(), 1);
    }

    #[tokio::test]
    async fn hung_send_counts_as_timeout() {
        let err = deliver_with_retry(&HangingMailer, &email(), policy(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn worker_delivers_queued_messages() {
        let mailer = Arc::new(RecordingMailer::default());
        let (notifier, _worker) = Notifier::spawn(mailer.clone(), 8, policy(1));
        assert!(notifier.enqueue(email()));
        let sent = mailer.wait_for(1).await;
        assert_eq!(sent[0].to, "a@x.com");
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let stuck = RetryPolicy {
            send_timeout: Duration::from_secs(60),
            ..policy(1)
        };
        let (notifier, worker) = Notifier::spawn(Arc::new(HangingMailer), 1, stuck);

        // the worker holds at most one message and the queue one more
        let accepted = (0..3).filter(|_| notifier.enqueue(email())).count();
        assert!((1..=2).contains(&accepted), "accepted {accepted}");
        assert!(!notifier.enqueue(email()));
        worker.abort();
    }

    #[tokio::test]
    async fn enqueue_reports_closed_queue() {
        let mailer = Arc::new(RecordingMailer::default());
        let (notifier, worker) = Notifier::spawn(mailer, 1, policy(1));
        worker.abort();
        let _ = worker.await;
        assert!(!notifier.enqueue(email()));
    }

    #[tokio::test]
    async fn probe_times_out_without_failing() {
        assert!(!probe_transport(&HangingMailer, Duration::from_millis(20)).await);
        assert!(probe_transport(&RecordingMailer::default(), Duration::from_millis(20)).await);
    }
}
