//! In-memory registry of tracked flights, persisted on every mutation.
//!
//! All mutations go through [`Registry::commit`]: the current map is cloned,
//! the change is applied to the copy, the copy is written to the store, and
//! only then swapped in. A failed write therefore leaves both memory and disk
//! at the last committed state.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::flights::{
    FlightCode, FlightKey, FlightStatus, InvalidFlightCode, Money, OwnerId, Route, TrackedFlight,
};
use crate::registry_store::{RegistryStore, StoreError};

/// Consecutive lookup failures before an entry is parked in ERROR
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

type FlightMap = BTreeMap<FlightKey, TrackedFlight>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("flight date {date} is in the past (today is {today})")]
    InvalidDate { date: NaiveDate, today: NaiveDate },
    #[error(transparent)]
    InvalidCode(#[from] InvalidFlightCode),
    #[error("already tracking {}", .0.describe())]
    Duplicate(Box<TrackedFlight>),
    #[error("limit of {0} tracked flights reached")]
    LimitReached(usize),
    #[error("no tracked flight {0}")]
    NotFound(FlightKey),
    #[error("failed to persist registry to {store}: {source}")]
    Persistence {
        store: String,
        #[source]
        source: StoreError,
    },
}

impl RegistryError {
    /// Only persistence failures must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, RegistryError::Persistence { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub failure_threshold: u32,
    /// Per-owner cap on tracked flights; 0 means unlimited
    pub max_flights_per_owner: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_flights_per_owner: 0,
        }
    }
}

/// Which of an owner's flights a pause/resume applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightSelector {
    All,
    One {
        flight_code: FlightCode,
        date: NaiveDate,
    },
}

/// Result of recording a successful lookup
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    /// Price stored before this update
    pub previous: Option<Money>,
    pub flight: TrackedFlight,
}

/// Result of recording a failed lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub consecutive_failures: u32,
    pub status: FlightStatus,
    /// True only on the failure that crossed the threshold
    pub newly_errored: bool,
}

#[derive(Clone)]
pub struct Registry {
    flights: Arc<RwLock<FlightMap>>,
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    options: RegistryOptions,
}

impl Registry {
    /// Load persisted state and re-derive EXPIRED for flights whose date has passed
    pub async fn open(
        store: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock>,
        options: RegistryOptions,
    ) -> Result<Self, RegistryError> {
        let loaded = store
            .load()
            .await
            .map_err(|source| RegistryError::Persistence {
                store: store.describe(),
                source,
            })?;

        let mut flights = FlightMap::new();
        for flight in loaded {
            let key = flight.key();
            if flights.insert(key.clone(), flight).is_some() {
                warn!("Dropping duplicate persisted entry {}", key);
            }
        }

        let registry = Self {
            flights: Arc::new(RwLock::new(flights)),
            store,
            clock,
            options,
        };

        let today = registry.clock.today();
        let expired = registry.expire_stale(today).await?;
        let total = registry.len().await;
        info!(
            "Registry loaded from {}: {} tracked flights ({} newly expired)",
            registry.store.describe(),
            total,
            expired.len()
        );
        metrics::gauge!("farewatch.registry.flights").set(total as f64);

        Ok(registry)
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Apply `change` to a copy of the state, persist it, then swap it in.
    /// `change` returns its result and whether anything was modified.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut FlightMap) -> Result<(T, bool), RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut guard = self.flights.write().await;
        let mut next = guard.clone();
        let (result, changed) = change(&mut next)?;
        if !changed {
            return Ok(result);
        }

        let mut ordered: Vec<TrackedFlight> = next.values().cloned().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key().cmp(&b.key())));
        self.store
            .save(&ordered)
            .await
            .map_err(|source| RegistryError::Persistence {
                store: self.store.describe(),
                source,
            })?;

        *guard = next;
        metrics::gauge!("farewatch.registry.flights").set(guard.len() as f64);
        Ok(result)
    }

    pub async fn add(
        &self,
        owner: OwnerId,
        flight_code: &str,
        date: NaiveDate,
    ) -> Result<TrackedFlight, RegistryError> {
        self.add_with_route(owner, flight_code, date, None).await
    }

    /// Register a flight. Rejects past dates and malformed codes; an exact
    /// duplicate is rejected with the existing entry and changes nothing.
    pub async fn add_with_route(
        &self,
        owner: OwnerId,
        flight_code: &str,
        date: NaiveDate,
        route: Option<Route>,
    ) -> Result<TrackedFlight, RegistryError> {
        let flight_code: FlightCode = flight_code.parse()?;
        let now = self.clock.now();
        let today = now.date_naive();
        if date < today {
            return Err(RegistryError::InvalidDate { date, today });
        }

        let key = FlightKey::new(owner, flight_code, date);
        let max = self.options.max_flights_per_owner;

        let flight = self
            .commit(|flights| {
                admit(flights, &key, max)?;
                let flight = TrackedFlight::new(key.clone(), route, now);
                flights.insert(key.clone(), flight.clone());
                Ok((flight, true))
            })
            .await?;

        info!("Now tracking {} for {}", flight.describe(), owner);
        Ok(flight)
    }

    /// Run the checks `add` would run without changing anything, so slow
    /// validation (a fare lookup) is only spent on flights that would be accepted
    pub async fn check_add(
        &self,
        owner: OwnerId,
        flight_code: &FlightCode,
        date: NaiveDate,
    ) -> Result<(), RegistryError> {
        let today = self.clock.now().date_naive();
        if date < today {
            return Err(RegistryError::InvalidDate { date, today });
        }
        let key = FlightKey::new(owner, flight_code.clone(), date);
        admit(&*self.flights.read().await, &key, self.options.max_flights_per_owner)
    }

    /// Returns whether an entry existed and was removed
    pub async fn remove(
        &self,
        owner: OwnerId,
        flight_code: &FlightCode,
        date: NaiveDate,
    ) -> Result<bool, RegistryError> {
        let key = FlightKey::new(owner, flight_code.clone(), date);
        let removed = self
            .commit(|flights| {
                let removed = flights.remove(&key).is_some();
                Ok((removed, removed))
            })
            .await?;
        if removed {
            info!("Stopped tracking {}", key);
        }
        Ok(removed)
    }

    /// Remove every entry of an owner
    pub async fn clear(&self, owner: OwnerId) -> Result<usize, RegistryError> {
        let removed = self
            .commit(|flights| {
                let before = flights.len();
                flights.retain(|key, _| key.owner != owner);
                let removed = before - flights.len();
                Ok((removed, removed > 0))
            })
            .await?;
        info!("Cleared {} tracked flights for {}", removed, owner);
        Ok(removed)
    }

    /// An owner's flights ordered by registration time
    pub async fn list(&self, owner: OwnerId) -> Vec<TrackedFlight> {
        let flights = self.flights.read().await;
        let mut owned: Vec<TrackedFlight> = flights
            .values()
            .filter(|f| f.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key().cmp(&b.key())));
        owned
    }

    /// Snapshot of every entry eligible for polling
    pub async fn all_active(&self) -> Vec<TrackedFlight> {
        let today = self.clock.today();
        let flights = self.flights.read().await;
        let mut active: Vec<TrackedFlight> = flights
            .values()
            .filter(|f| f.is_pollable(today))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key().cmp(&b.key())));
        active
    }

    pub async fn get(&self, key: &FlightKey) -> Option<TrackedFlight> {
        self.flights.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.flights.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flights.read().await.is_empty()
    }

    /// Record a successful lookup. Resets the failure counter and lifts ERROR;
    /// a paused entry stays paused.
    pub async fn update_price(
        &self,
        key: &FlightKey,
        price: Money,
        checked_at: DateTime<Utc>,
    ) -> Result<PriceUpdate, RegistryError> {
        self.commit(|flights| {
            let flight = flights
                .get_mut(key)
                .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
            let previous = flight.last_price.replace(price);
            flight.last_checked_at = Some(checked_at);
            flight.consecutive_failures = 0;
            flight.last_error = None;
            if flight.status == FlightStatus::Error {
                flight.status = FlightStatus::Active;
            }
            Ok((
                PriceUpdate {
                    previous,
                    flight: flight.clone(),
                },
                true,
            ))
        })
        .await
    }

    /// Record a failed lookup; the entry moves to ERROR once the failure
    /// count reaches the configured threshold. `last_price` is untouched.
    pub async fn mark_error(
        &self,
        key: &FlightKey,
        reason: &str,
    ) -> Result<FailureOutcome, RegistryError> {
        let threshold = self.options.failure_threshold.max(1);
        let outcome = self
            .commit(|flights| {
                let flight = flights
                    .get_mut(key)
                    .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
                flight.consecutive_failures = flight.consecutive_failures.saturating_add(1);
                flight.last_error = Some(reason.to_string());
                let newly_errored = flight.status == FlightStatus::Active
                    && flight.consecutive_failures >= threshold;
                if newly_errored {
                    flight.status = FlightStatus::Error;
                }
                Ok((
                    FailureOutcome {
                        consecutive_failures: flight.consecutive_failures,
                        status: flight.status,
                        newly_errored,
                    },
                    true,
                ))
            })
            .await?;

        if outcome.newly_errored {
            warn!(
                "Suspending {} after {} consecutive lookup failures (last: {})",
                key, outcome.consecutive_failures, reason
            );
        } else {
            debug!(
                "Lookup failure {}/{} for {}: {}",
                outcome.consecutive_failures, threshold, key, reason
            );
        }
        Ok(outcome)
    }

    /// Pause ACTIVE/ERROR entries. Returns how many entries changed.
    pub async fn pause(
        &self,
        owner: OwnerId,
        selector: FlightSelector,
    ) -> Result<usize, RegistryError> {
        self.set_status(owner, selector, |flight, _| {
            if matches!(flight.status, FlightStatus::Active | FlightStatus::Error) {
                flight.status = FlightStatus::Paused;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Resume PAUSED/ERROR entries, resetting the failure counter. This is the
    /// manual retry for entries parked in ERROR. EXPIRED entries never resume.
    pub async fn resume(
        &self,
        owner: OwnerId,
        selector: FlightSelector,
    ) -> Result<usize, RegistryError> {
        self.set_status(owner, selector, |flight, today| {
            if matches!(flight.status, FlightStatus::Paused | FlightStatus::Error)
                && flight.date >= today
            {
                flight.status = FlightStatus::Active;
                flight.consecutive_failures = 0;
                flight.last_error = None;
                true
            } else {
                false
            }
        })
        .await
    }

    async fn set_status(
        &self,
        owner: OwnerId,
        selector: FlightSelector,
        apply: impl Fn(&mut TrackedFlight, NaiveDate) -> bool,
    ) -> Result<usize, RegistryError> {
        let today = self.clock.today();
        self.commit(|flights| {
            let changed = match &selector {
                FlightSelector::All => flights
                    .values_mut()
                    .filter(|f| f.owner == owner)
                    .map(|f| apply(f, today))
                    .filter(|changed| *changed)
                    .count(),
                FlightSelector::One { flight_code, date } => {
                    let key = FlightKey::new(owner, flight_code.clone(), *date);
                    let flight = flights
                        .get_mut(&key)
                        .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
                    usize::from(apply(flight, today))
                }
            };
            Ok((changed, changed > 0))
        })
        .await
    }

    /// Move entries whose date is before `today` to EXPIRED
    pub async fn expire_stale(&self, today: NaiveDate) -> Result<Vec<FlightKey>, RegistryError> {
        let now = self.clock.now();
        let expired = self
            .commit(|flights| {
                let expired: Vec<FlightKey> = flights
                    .values_mut()
                    .filter(|f| f.date < today && f.status != FlightStatus::Expired)
                    .map(|f| {
                        f.status = FlightStatus::Expired;
                        f.expired_at = Some(now);
                        f.key()
                    })
                    .collect();
                let changed = !expired.is_empty();
                Ok((expired, changed))
            })
            .await?;
        for key in &expired {
            info!("Flight {} has departed, marking expired", key);
        }
        Ok(expired)
    }

    /// Drop EXPIRED entries that expired more than `retention` ago
    pub async fn purge_expired(&self, retention: chrono::Duration) -> Result<usize, RegistryError> {
        let cutoff = self.clock.now() - retention;
        let purged = self
            .commit(|flights| {
                let before = flights.len();
                flights.retain(|_, f| {
                    !(f.status == FlightStatus::Expired
                        && f.expired_at.is_some_and(|at| at <= cutoff))
                });
                let purged = before - flights.len();
                Ok((purged, purged > 0))
            })
            .await?;
        if purged > 0 {
            info!("Purged {} expired flights past retention", purged);
        }
        Ok(purged)
    }
}

fn admit(flights: &FlightMap, key: &FlightKey, max: usize) -> Result<(), RegistryError> {
    if let Some(existing) = flights.get(key) {
        return Err(RegistryError::Duplicate(Box::new(existing.clone())));
    }
    if max > 0 && flights.keys().filter(|k| k.owner == key.owner).count() >= max {
        return Err(RegistryError::LimitReached(max));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::registry_store::JsonFileStore;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 6, d).unwrap()
    }

    fn eur(cents: i64) -> Money {
        Money::new("EUR", Decimal::new(cents, 2))
    }

    async fn open(dir: &TempDir, clock: Arc<FixedClock>, options: RegistryOptions) -> Registry {
        let store = Arc::new(JsonFileStore::new(dir.path().join("registry.json")));
        Registry::open(store, clock, options).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;

        let flight = registry.add(OwnerId(1), "fr1234", date(20)).await.unwrap();
        assert_eq!(flight.flight_code.as_str(), "FR 1234");

        let listed = registry.list(OwnerId(1)).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].last_price, None);
        assert_eq!(listed[0].status, FlightStatus::Active);
        assert!(registry.list(OwnerId(2)).await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;

        registry.add(OwnerId(1), "FR1234", date(20)).await.unwrap();
        let err = registry.add(OwnerId(1), "FR 1234", date(20)).await.unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
        assert_eq!(registry.len().await, 1);

        // Same flight for a different owner is a separate subscription
        registry.add(OwnerId(2), "FR1234", date(20)).await.unwrap();
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_past_date_rejected_without_mutation() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;

        let err = registry
            .add(OwnerId(1), "FR1234", NaiveDate::from_ymd_opt(2030, 5, 31).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDate { .. }));
        assert!(registry.is_empty().await);
        assert!(!dir.path().join("registry.json").exists());

        // Today is still allowed
        registry.add(OwnerId(1), "FR1234", date(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_check_add_mirrors_add_without_mutating() {
        let dir = TempDir::new().unwrap();
        let options = RegistryOptions {
            max_flights_per_owner: 1,
            ..Default::default()
        };
        let registry = open(&dir, clock(), options).await;
        let code: FlightCode = "FR1234".parse().unwrap();

        registry.check_add(OwnerId(1), &code, date(20)).await.unwrap();
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.check_add(OwnerId(1), &code, date(1).pred_opt().unwrap()).await,
            Err(RegistryError::InvalidDate { .. })
        ));

        registry.add(OwnerId(1), "FR1234", date(20)).await.unwrap();
        assert!(matches!(
            registry.check_add(OwnerId(1), &code, date(20)).await,
            Err(RegistryError::Duplicate(_))
        ));
        assert!(matches!(
            registry.check_add(OwnerId(1), &code, date(21)).await,
            Err(RegistryError::LimitReached(1))
        ));
    }

    #[tokio::test]
    async fn test_malformed_code_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;
        let err = registry.add(OwnerId(1), "hello", date(20)).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCode(_)));
    }

    #[tokio::test]
    async fn test_per_owner_limit() {
        let dir = TempDir::new().unwrap();
        let options = RegistryOptions {
            max_flights_per_owner: 2,
            ..Default::default()
        };
        let registry = open(&dir, clock(), options).await;

        registry.add(OwnerId(1), "FR1", date(20)).await.unwrap();
        registry.add(OwnerId(1), "FR2", date(20)).await.unwrap();
        let err = registry.add(OwnerId(1), "FR3", date(20)).await.unwrap_err();
        assert!(matches!(err, RegistryError::LimitReached(2)));
        registry.add(OwnerId(2), "FR3", date(20)).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;
        let code: FlightCode = "FR1234".parse().unwrap();

        assert!(!registry.remove(OwnerId(1), &code, date(20)).await.unwrap());
        registry.add(OwnerId(1), "FR1234", date(20)).await.unwrap();
        assert!(!registry.remove(OwnerId(2), &code, date(20)).await.unwrap());
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove(OwnerId(1), &code, date(20)).await.unwrap());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_ordered_by_created_at() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let registry = open(&dir, clock.clone(), RegistryOptions::default()).await;

        registry.add(OwnerId(1), "FR9", date(20)).await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        registry.add(OwnerId(1), "FR1", date(25)).await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        registry.add(OwnerId(1), "FR5", date(10)).await.unwrap();

        let codes: Vec<String> = registry
            .list(OwnerId(1))
            .await
            .into_iter()
            .map(|f| f.flight_code.to_string())
            .collect();
        assert_eq!(codes, vec!["FR 9", "FR 1", "FR 5"]);
    }

    #[tokio::test]
    async fn test_mark_error_threshold_and_recovery() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;
        let flight = registry.add(OwnerId(1), "FR1234", date(20)).await.unwrap();
        let key = flight.key();

        let first = registry.mark_error(&key, "timeout").await.unwrap();
        assert_eq!(first.status, FlightStatus::Active);
        registry.mark_error(&key, "timeout").await.unwrap();
        let third = registry.mark_error(&key, "timeout").await.unwrap();
        assert!(third.newly_errored);
        assert_eq!(third.status, FlightStatus::Error);
        assert!(registry.all_active().await.is_empty());

        // A fourth failure does not re-announce the transition
        let fourth = registry.mark_error(&key, "timeout").await.unwrap();
        assert!(!fourth.newly_errored);

        let update = registry.update_price(&key, eur(5000), Utc::now()).await.unwrap();
        assert_eq!(update.previous, None);
        assert_eq!(update.flight.status, FlightStatus::Active);
        assert_eq!(update.flight.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_touch_price() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;
        let key = registry.add(OwnerId(1), "FR1", date(20)).await.unwrap().key();

        registry.update_price(&key, eur(10000), Utc::now()).await.unwrap();
        registry.mark_error(&key, "not found").await.unwrap();
        let flight = registry.get(&key).await.unwrap();
        assert_eq!(flight.last_price, Some(eur(10000)));
        assert_eq!(flight.last_error.as_deref(), Some("not found"));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;
        let a = registry.add(OwnerId(1), "FR1", date(20)).await.unwrap();
        registry.add(OwnerId(1), "FR2", date(20)).await.unwrap();

        let paused = registry
            .pause(
                OwnerId(1),
                FlightSelector::One {
                    flight_code: a.flight_code.clone(),
                    date: a.date,
                },
            )
            .await
            .unwrap();
        assert_eq!(paused, 1);
        assert_eq!(registry.all_active().await.len(), 1);

        assert_eq!(registry.pause(OwnerId(1), FlightSelector::All).await.unwrap(), 1);
        assert!(registry.all_active().await.is_empty());

        assert_eq!(registry.resume(OwnerId(1), FlightSelector::All).await.unwrap(), 2);
        assert_eq!(registry.all_active().await.len(), 2);

        let missing = registry
            .pause(
                OwnerId(1),
                FlightSelector::One {
                    flight_code: "FR3".parse().unwrap(),
                    date: date(20),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(missing, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expiry_and_retention() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let registry = open(&dir, clock.clone(), RegistryOptions::default()).await;
        registry.add(OwnerId(1), "FR1", date(2)).await.unwrap();
        registry.add(OwnerId(1), "FR2", date(30)).await.unwrap();

        clock.advance(chrono::Duration::days(2));
        let expired = registry.expire_stale(clock.today()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(registry.all_active().await.len(), 1);

        // Expired entries stay visible and cannot be resumed
        let listed = registry.list(OwnerId(1)).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(registry.resume(OwnerId(1), FlightSelector::All).await.unwrap(), 0);

        assert_eq!(registry.purge_expired(chrono::Duration::days(7)).await.unwrap(), 0);
        clock.advance(chrono::Duration::days(8));
        assert_eq!(registry.purge_expired(chrono::Duration::days(7)).await.unwrap(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reload_rederives_expired() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        {
            let registry = open(&dir, clock.clone(), RegistryOptions::default()).await;
            let key = registry.add(OwnerId(1), "FR1", date(3)).await.unwrap().key();
            registry.update_price(&key, eur(2000), clock.now()).await.unwrap();
        }

        clock.advance(chrono::Duration::days(5));
        let registry = open(&dir, clock.clone(), RegistryOptions::default()).await;
        let listed = registry.list(OwnerId(1)).await;
        assert_eq!(listed[0].status, FlightStatus::Expired);
        assert_eq!(listed[0].last_price, Some(eur(2000)));
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir, clock(), RegistryOptions::default()).await;
        registry.add(OwnerId(1), "FR1", date(20)).await.unwrap();
        registry.add(OwnerId(1), "FR2", date(20)).await.unwrap();
        registry.add(OwnerId(2), "FR1", date(20)).await.unwrap();

        assert_eq!(registry.clear(OwnerId(1)).await.unwrap(), 2);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.clear(OwnerId(1)).await.unwrap(), 0);
    }
}
