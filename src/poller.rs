//! Fare polling scheduler.
//!
//! A [`Poller`] owns its tick cadence and a handle to the [`Registry`]. Each
//! tick snapshots the pollable entries, looks up every fare with bounded
//! concurrency and a per-call timeout, records the result against the entry,
//! and notifies the owner on a price change. Entries are independent: a
//! failing lookup only affects its own entry.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::fare_provider::{FareError, FareProvider, FareQuery};
use crate::flights::{FlightStatus, TrackedFlight};
use crate::notifier::NotificationDispatcher;
use crate::price_change::{self, PriceChange, PriceDirection, PriceEvent, TrackerEvent};
use crate::registry::{Registry, RegistryError};

/// `tokio::time::interval` rejects a zero period
const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub interval: Duration,
    pub lookup_timeout: Duration,
    pub max_concurrent_lookups: usize,
    pub notify_on_rise: bool,
    /// Purge expired entries older than this at the end of each tick
    pub expired_retention: Option<chrono::Duration>,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            lookup_timeout: Duration::from_secs(20),
            max_concurrent_lookups: 3,
            notify_on_rise: true,
            expired_retention: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
}

/// What happened to one entry during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryOutcome {
    Baseline,
    Unchanged,
    Changed {
        direction: PriceDirection,
        /// None when no notification was due
        delivered: Option<bool>,
    },
    Failed {
        newly_errored: bool,
        delivered: Option<bool>,
    },
    /// Removed or otherwise gone between snapshot and update
    Vanished,
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub baselines: usize,
    pub unchanged: usize,
    pub drops: usize,
    pub rises: usize,
    pub failures: usize,
    pub newly_errored: usize,
    pub vanished: usize,
    pub expired: usize,
    pub purged: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: EntryOutcome) {
        self.checked += 1;
        let delivered = match outcome {
            EntryOutcome::Baseline => {
                self.baselines += 1;
                None
            }
            EntryOutcome::Unchanged => {
                self.unchanged += 1;
                None
            }
            EntryOutcome::Changed {
                direction,
                delivered,
            } => {
                match direction {
                    PriceDirection::Drop => self.drops += 1,
                    PriceDirection::Rise => self.rises += 1,
                }
                delivered
            }
            EntryOutcome::Failed {
                newly_errored,
                delivered,
                ..
            } => {
                self.failures += 1;
                if newly_errored {
                    self.newly_errored += 1;
                }
                delivered
            }
            EntryOutcome::Vanished => {
                self.vanished += 1;
                None
            }
        };
        match delivered {
            Some(true) => self.notifications_sent += 1,
            Some(false) => self.notifications_failed += 1,
            None => {}
        }
    }
}

impl std::fmt::Display for TickReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "checked={} baselines={} unchanged={} drops={} rises={} failures={} \
             newly_errored={} vanished={} expired={} purged={} notified={} notify_failed={}",
            self.checked,
            self.baselines,
            self.unchanged,
            self.drops,
            self.rises,
            self.failures,
            self.newly_errored,
            self.vanished,
            self.expired,
            self.purged,
            self.notifications_sent,
            self.notifications_failed
        )
    }
}

#[derive(Clone)]
pub struct Poller {
    registry: Registry,
    provider: Arc<dyn FareProvider>,
    dispatcher: NotificationDispatcher,
    options: PollerOptions,
    state: Arc<watch::Sender<PollerState>>,
}

impl Poller {
    pub fn new(
        registry: Registry,
        provider: Arc<dyn FareProvider>,
        dispatcher: NotificationDispatcher,
        mut options: PollerOptions,
    ) -> Self {
        if options.interval < MIN_INTERVAL {
            warn!(
                "Poll interval {:?} is too short, using {:?}",
                options.interval, MIN_INTERVAL
            );
            options.interval = MIN_INTERVAL;
        }
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            registry,
            provider,
            dispatcher,
            options,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Run one full scan. Only a persistence failure is returned as an error;
    /// every per-entry problem is recorded in the report instead.
    pub async fn tick(&self) -> Result<TickReport, RegistryError> {
        self.state.send_replace(PollerState::Polling);
        let started = Instant::now();
        let result = self
            .run_tick()
            .instrument(tracing::info_span!("poll_tick"))
            .await;
        self.state.send_replace(PollerState::Idle);

        metrics::histogram!("farewatch.tick.duration_ms")
            .record(started.elapsed().as_millis() as f64);
        metrics::counter!("farewatch.tick.completed_total").increment(1);
        result
    }

    async fn run_tick(&self) -> Result<TickReport, RegistryError> {
        let snapshot = self.registry.all_active().await;
        let mut report = TickReport::default();
        info!("Polling fares for {} tracked flights", snapshot.len());

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_lookups.max(1)));
        let mut tasks: JoinSet<Result<EntryOutcome, RegistryError>> = JoinSet::new();
        let mut fatal: Option<RegistryError> = None;

        for flight in snapshot {
            // Waiting here keeps at most `max_concurrent_lookups` tasks alive
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            while let Some(joined) = tasks.try_join_next() {
                Self::collect(joined, &mut report, &mut fatal);
            }
            if fatal.is_some() {
                break;
            }

            let poller = self.clone();
            tasks.spawn(
                async move {
                    let outcome = poller.process_entry(flight).await;
                    drop(permit);
                    outcome
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            Self::collect(joined, &mut report, &mut fatal);
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        let today = self.registry.clock().today();
        report.expired = self.registry.expire_stale(today).await?.len();
        if let Some(retention) = self.options.expired_retention {
            report.purged = self.registry.purge_expired(retention).await?;
        }

        info!("Poll tick finished: {}", report);
        Ok(report)
    }

    fn collect(
        joined: Result<Result<EntryOutcome, RegistryError>, tokio::task::JoinError>,
        report: &mut TickReport,
        fatal: &mut Option<RegistryError>,
    ) {
        match joined {
            Ok(Ok(outcome)) => report.record(outcome),
            Ok(Err(e)) if e.is_fatal() => {
                error!("Aborting tick: {}", e);
                fatal.get_or_insert(e);
            }
            Ok(Err(e)) => warn!("Entry update failed: {}", e),
            Err(e) => error!("Fare lookup task panicked: {}", e),
        }
    }

    /// query -> compare -> update or mark_error -> maybe notify
    async fn process_entry(&self, flight: TrackedFlight) -> Result<EntryOutcome, RegistryError> {
        let key = flight.key();
        let query = FareQuery {
            flight_code: flight.flight_code.clone(),
            date: flight.date,
            route: flight.route.clone(),
        };

        let started = Instant::now();
        let lookup =
            match tokio::time::timeout(self.options.lookup_timeout, self.provider.current_fare(&query))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FareError::Timeout),
            };
        metrics::histogram!("farewatch.lookup.duration_ms")
            .record(started.elapsed().as_millis() as f64);

        match lookup {
            Ok(price) => {
                metrics::counter!("farewatch.lookup.success_total").increment(1);
                let observed_at = self.registry.clock().now();
                let update = match self
                    .registry
                    .update_price(&key, price.clone(), observed_at)
                    .await
                {
                    Ok(update) => update,
                    Err(RegistryError::NotFound(_)) => {
                        debug!("{} was removed during the tick", key);
                        return Ok(EntryOutcome::Vanished);
                    }
                    Err(e) => return Err(e),
                };

                match price_change::detect(update.previous.as_ref(), &price) {
                    PriceChange::Baseline => {
                        info!("Baseline fare for {}: {}", key, price);
                        Ok(EntryOutcome::Baseline)
                    }
                    PriceChange::Unchanged => {
                        debug!("Fare unchanged for {}: {}", key, price);
                        Ok(EntryOutcome::Unchanged)
                    }
                    PriceChange::CurrencyChanged { old, new } => {
                        warn!(
                            "Fare currency changed for {} ({} -> {}), treating as new baseline",
                            key, old, new
                        );
                        Ok(EntryOutcome::Baseline)
                    }
                    PriceChange::Changed {
                        direction,
                        old,
                        new,
                        delta,
                    } => {
                        info!("{} for {}: {} -> {} ({})", direction, key, old, new, delta);
                        let wanted = direction == PriceDirection::Drop || self.options.notify_on_rise;
                        // A flight paused mid-tick keeps its price but stays quiet
                        let delivered = if wanted && update.flight.status == FlightStatus::Active {
                            let event = TrackerEvent::Price(PriceEvent {
                                flight: update.flight.clone(),
                                direction,
                                old,
                                new,
                                delta,
                                observed_at,
                            });
                            Some(self.dispatcher.dispatch(key.owner, &event).await)
                        } else {
                            None
                        };
                        Ok(EntryOutcome::Changed {
                            direction,
                            delivered,
                        })
                    }
                }
            }
            Err(error) => {
                metrics::counter!("farewatch.lookup.failed_total", "kind" => error.kind())
                    .increment(1);
                debug!("Fare lookup failed for {}: {}", key, error);
                let reason = error.to_string();
                let outcome = match self.registry.mark_error(&key, &reason).await {
                    Ok(outcome) => outcome,
                    Err(RegistryError::NotFound(_)) => return Ok(EntryOutcome::Vanished),
                    Err(e) => return Err(e),
                };

                let delivered = if outcome.newly_errored {
                    let current = self.registry.get(&key).await.unwrap_or(flight);
                    let event = TrackerEvent::TrackingSuspended {
                        flight: current,
                        consecutive_failures: outcome.consecutive_failures,
                        reason,
                    };
                    Some(self.dispatcher.dispatch(key.owner, &event).await)
                } else {
                    None
                };

                Ok(EntryOutcome::Failed {
                    newly_errored: outcome.newly_errored,
                    delivered,
                })
            }
        }
    }

    /// Spawn the polling loop. The first tick runs immediately so a restart
    /// resumes tracking without waiting a full interval.
    pub fn start(self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = self.options.interval;
        let task = tokio::spawn(
            self.run(shutdown_rx)
                .instrument(tracing::info_span!("fare_poller")),
        );
        info!("Started fare poller (every {} seconds)", interval.as_secs());
        PollerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), RegistryError> {
        let mut interval = tokio::time::interval(self.options.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            // A started tick always runs to completion
            if let Err(e) = self.tick().await {
                error!("Fare poller stopping: {}", e);
                return Err(e);
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("Fare poller stopped");
        Ok(())
    }
}

/// Controls a running poller loop. Dropping the handle also stops the loop.
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), RegistryError>>,
}

impl PollerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end on its own (only happens on a fatal error)
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        match (&mut self.task).await {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::anyhow!("fare poller task failed: {}", e)),
        }
    }

    /// Ask the loop to stop, letting an in-flight tick finish within `grace`
    pub async fn shutdown(self, grace: Duration) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);
        let PollerHandle { task, .. } = self;
        let abort = task.abort_handle();
        match tokio::time::timeout(grace, task).await {
            Ok(Ok(result)) => result.map_err(anyhow::Error::from),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(anyhow::anyhow!("fare poller task failed: {}", e)),
            Err(_) => {
                warn!(
                    "Fare poller did not finish within {:?}, abandoning in-flight lookups",
                    grace
                );
                abort.abort();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_outcomes() {
        let mut report = TickReport::default();
        report.record(EntryOutcome::Baseline);
        report.record(EntryOutcome::Unchanged);
        report.record(EntryOutcome::Changed {
            direction: PriceDirection::Drop,
            delivered: Some(true),
        });
        report.record(EntryOutcome::Changed {
            direction: PriceDirection::Rise,
            delivered: None,
        });
        report.record(EntryOutcome::Failed {
            newly_errored: true,
            delivered: Some(false),
        });
        report.record(EntryOutcome::Vanished);

        assert_eq!(report.checked, 6);
        assert_eq!(report.baselines, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.drops, 1);
        assert_eq!(report.rises, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.newly_errored, 1);
        assert_eq!(report.vanished, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(report.notifications_failed, 1);
    }

    #[test]
    fn test_report_display() {
        let report = TickReport {
            checked: 2,
            drops: 1,
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.starts_with("checked=2 "));
        assert!(text.contains("drops=1"));
    }
}
