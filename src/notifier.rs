use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::flights::OwnerId;
use crate::price_change::TrackerEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    /// The transport refused the message (blocked bot, unknown chat, ...)
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Pushes tracker events to the owning chat
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner: OwnerId, event: &TrackerEvent) -> Result<(), DeliveryError>;
}

/// Writes events to the log instead of a chat, for runs without a transport
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner: OwnerId, event: &TrackerEvent) -> Result<(), DeliveryError> {
        info!("Notification for {}: {}", owner, event.render());
        Ok(())
    }
}

/// Sends events with a per-attempt timeout and a bounded number of immediate
/// retries. Never returns an error: delivery problems are logged and counted.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    retries: u32,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            retries: 1,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Returns whether the event was delivered
    pub async fn dispatch(&self, owner: OwnerId, event: &TrackerEvent) -> bool {
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            let result =
                match tokio::time::timeout(self.timeout, self.notifier.notify(owner, event)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(self.timeout)),
                };

            match result {
                Ok(()) => {
                    debug!("Delivered {} to {}", event.kind(), owner);
                    metrics::counter!("farewatch.notify.sent_total", "kind" => event.kind())
                        .increment(1);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Failed to deliver {} to {} (attempt {}/{}): {}",
                        event.kind(),
                        owner,
                        attempt,
                        attempts,
                        e
                    );
                    // A rejection will not succeed on immediate retry
                    if matches!(e, DeliveryError::Rejected(_)) {
                        break;
                    }
                }
            }
        }
        metrics::counter!("farewatch.notify.failed_total", "kind" => event.kind()).increment(1);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flights::{FlightKey, TrackedFlight};
    use chrono::{NaiveDate, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedNotifier {
        calls: AtomicU32,
        results: Mutex<Vec<Result<(), DeliveryError>>>,
        delay: Option<Duration>,
    }

    impl ScriptedNotifier {
        fn new(results: Vec<Result<(), DeliveryError>>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                results: Mutex::new(results),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn notify(&self, _owner: OwnerId, _event: &TrackerEvent) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        }
    }

    fn event() -> TrackerEvent {
        let key = FlightKey::new(
            OwnerId(1),
            "FR1".parse().unwrap(),
            NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        );
        TrackerEvent::TrackingSuspended {
            flight: TrackedFlight::new(key, None, Utc::now()),
            consecutive_failures: 3,
            reason: "timeout".to_string(),
        }
    }

    #[tokio::test]
    async fn test_delivered_first_try() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![]));
        let dispatcher = NotificationDispatcher::new(notifier.clone(), Duration::from_secs(1));
        assert!(dispatcher.dispatch(OwnerId(1), &event()).await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_retry_on_transport_error() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![
            Err(DeliveryError::Transport("reset".into())),
            Ok(()),
        ]));
        let dispatcher = NotificationDispatcher::new(notifier.clone(), Duration::from_secs(1));
        assert!(dispatcher.dispatch(OwnerId(1), &event()).await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_one_retry() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![
            Err(DeliveryError::Transport("reset".into())),
            Err(DeliveryError::Transport("reset".into())),
            Ok(()),
        ]));
        let dispatcher = NotificationDispatcher::new(notifier.clone(), Duration::from_secs(1));
        assert!(!dispatcher.dispatch(OwnerId(1), &event()).await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let notifier = Arc::new(ScriptedNotifier::new(vec![Err(DeliveryError::Rejected(
            "bot was blocked by the user".into(),
        ))]));
        let dispatcher = NotificationDispatcher::new(notifier.clone(), Duration::from_secs(1));
        assert!(!dispatcher.dispatch(OwnerId(1), &event()).await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_times_out() {
        let mut slow = ScriptedNotifier::new(vec![]);
        slow.delay = Some(Duration::from_secs(60));
        let notifier = Arc::new(slow);
        let dispatcher = NotificationDispatcher::new(notifier.clone(), Duration::from_secs(2));
        assert!(!dispatcher.dispatch(OwnerId(1), &event()).await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    }
}
