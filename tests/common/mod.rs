//! Shared fakes for tracking-engine integration tests.
//!
//! `TestTracker` wires a real [`Registry`] (backed by a JSON file in a temp
//! dir) to a scripted fare provider and a recording notifier, with a clock
//! the test controls.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use farewatch::clock::FixedClock;
use farewatch::fare_provider::{FareError, FareProvider, FareQuery};
use farewatch::flights::{FlightCode, Money, OwnerId};
use farewatch::notifier::{DeliveryError, NotificationDispatcher, Notifier};
use farewatch::poller::{Poller, PollerOptions};
use farewatch::price_change::TrackerEvent;
use farewatch::registry::{Registry, RegistryOptions};
use farewatch::registry_store::JsonFileStore;

pub fn eur(units: i64) -> Money {
    Money::new("EUR", Decimal::from(units))
}

/// Returns queued answers per flight code; the last answer repeats
#[derive(Default)]
pub struct ScriptedProvider {
    answers: Mutex<HashMap<FlightCode, VecDeque<Result<Money, FareError>>>>,
    delays: Mutex<HashMap<FlightCode, Duration>>,
    calls: Mutex<Vec<FlightCode>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn script(&self, code: &str, answers: Vec<Result<Money, FareError>>) {
        let code: FlightCode = code.parse().unwrap();
        self.answers.lock().unwrap().insert(code, answers.into());
    }

    pub fn delay(&self, code: &str, delay: Duration) {
        let code: FlightCode = code.parse().unwrap();
        self.delays.lock().unwrap().insert(code, delay);
    }

    pub fn calls_for(&self, code: &str) -> usize {
        let code: FlightCode = code.parse().unwrap();
        self.calls.lock().unwrap().iter().filter(|c| **c == code).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FareProvider for ScriptedProvider {
    async fn current_fare(&self, query: &FareQuery) -> Result<Money, FareError> {
        self.calls.lock().unwrap().push(query.flight_code.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(&query.flight_code).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let answer = {
            let mut answers = self.answers.lock().unwrap();
            match answers.get_mut(&query.flight_code) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue
                    .front()
                    .cloned()
                    .unwrap_or(Err(FareError::NotFound)),
                None => Err(FareError::NotFound),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(OwnerId, TrackerEvent)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(OwnerId, TrackerEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|(_, e)| e.kind()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, owner: OwnerId, event: &TrackerEvent) -> Result<(), DeliveryError> {
        self.events.lock().unwrap().push((owner, event.clone()));
        Ok(())
    }
}

/// A transport that is down: every send fails
#[derive(Default)]
pub struct UnreachableNotifier {
    attempts: AtomicUsize,
}

impl UnreachableNotifier {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for UnreachableNotifier {
    async fn notify(&self, _owner: OwnerId, _event: &TrackerEvent) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::Transport("connection refused".to_string()))
    }
}

pub struct TestTracker {
    pub dir: TempDir,
    pub clock: Arc<FixedClock>,
    pub registry: Registry,
    pub provider: Arc<ScriptedProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub poller: Poller,
    pub options: PollerOptions,
}

impl TestTracker {
    pub async fn new() -> Self {
        Self::with_options(PollerOptions::default()).await
    }

    pub async fn with_options(options: PollerOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap(),
        ));
        let provider = Arc::new(ScriptedProvider::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = open_registry(&dir, clock.clone()).await;
        let poller = build_poller(&registry, &provider, &notifier, &options);
        Self {
            dir,
            clock,
            registry,
            provider,
            notifier,
            poller,
            options,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }

    /// Simulate a process restart: fresh registry and poller over the same file
    pub async fn restart(&mut self) {
        self.registry = open_registry(&self.dir, self.clock.clone()).await;
        self.poller = build_poller(&self.registry, &self.provider, &self.notifier, &self.options);
    }
}

async fn open_registry(dir: &TempDir, clock: Arc<FixedClock>) -> Registry {
    let store = Arc::new(JsonFileStore::new(dir.path().join("state.json")));
    Registry::open(store, clock, RegistryOptions::default())
        .await
        .unwrap()
}

fn build_poller(
    registry: &Registry,
    provider: &Arc<ScriptedProvider>,
    notifier: &Arc<RecordingNotifier>,
    options: &PollerOptions,
) -> Poller {
    Poller::new(
        registry.clone(),
        provider.clone(),
        NotificationDispatcher::new(notifier.clone(), Duration::from_secs(5)),
        options.clone(),
    )
}
