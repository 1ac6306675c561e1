//! Change detection between two observations of the same fare, and the
//! events users are notified about.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::flights::{FlightKey, Money, TrackedFlight};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceDirection {
    Drop,
    Rise,
}

impl fmt::Display for PriceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceDirection::Drop => f.write_str("PRICE_DROP"),
            PriceDirection::Rise => f.write_str("PRICE_RISE"),
        }
    }
}

/// Outcome of comparing a fresh quote against the stored one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceChange {
    /// First successful observation; never notified
    Baseline,
    Unchanged,
    Changed {
        direction: PriceDirection,
        old: Money,
        new: Money,
        /// `new - old`, negative for drops
        delta: Money,
    },
    /// Quote came back in another currency; treated as a new baseline
    CurrencyChanged { old: Money, new: Money },
}

pub fn detect(previous: Option<&Money>, current: &Money) -> PriceChange {
    let Some(old) = previous else {
        return PriceChange::Baseline;
    };
    if !old.same_currency(current) {
        return PriceChange::CurrencyChanged {
            old: old.clone(),
            new: current.clone(),
        };
    }
    // An unrepresentable difference is not a price anyone can act on
    let Some(diff) = current.amount.checked_sub(old.amount) else {
        return PriceChange::Baseline;
    };
    if diff.is_zero() {
        return PriceChange::Unchanged;
    }
    let direction = if diff.is_sign_negative() {
        PriceDirection::Drop
    } else {
        PriceDirection::Rise
    };
    PriceChange::Changed {
        direction,
        old: old.clone(),
        new: current.clone(),
        delta: Money::new(current.currency.clone(), diff),
    }
}

/// A detected change for one tracked flight
#[derive(Debug, Clone, PartialEq)]
pub struct PriceEvent {
    pub flight: TrackedFlight,
    pub direction: PriceDirection,
    pub old: Money,
    pub new: Money,
    pub delta: Money,
    pub observed_at: DateTime<Utc>,
}

impl PriceEvent {
    pub fn key(&self) -> FlightKey {
        self.flight.key()
    }
}

/// Anything pushed to a user without them asking
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Price(PriceEvent),
    /// Lookups kept failing and polling for this flight has stopped
    TrackingSuspended {
        flight: TrackedFlight,
        consecutive_failures: u32,
        reason: String,
    },
}

impl TrackerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerEvent::Price(event) => match event.direction {
                PriceDirection::Drop => "price_drop",
                PriceDirection::Rise => "price_rise",
            },
            TrackerEvent::TrackingSuspended { .. } => "tracking_suspended",
        }
    }

    /// Chat message text for this event
    pub fn render(&self) -> String {
        match self {
            TrackerEvent::Price(event) => {
                let heading = match event.direction {
                    PriceDirection::Drop => "📉 PRICE DROP",
                    PriceDirection::Rise => "📈 PRICE RISE",
                };
                format!(
                    "🔔 {}\nFlight: {}\nNew price: {} (was {}, change {})",
                    heading,
                    event.flight.describe(),
                    event.new,
                    event.old,
                    signed(&event.delta)
                )
            }
            TrackerEvent::TrackingSuspended {
                flight,
                consecutive_failures,
                reason,
            } => format!(
                "⚠️ Stopped checking {} after {} failed lookups (last error: {}).\n\
                 Send START {} {} to retry or REMOVE {} {} to drop it.",
                flight.describe(),
                consecutive_failures,
                reason,
                flight.flight_code.compact(),
                flight.date,
                flight.flight_code.compact(),
                flight.date
            ),
        }
    }
}

fn signed(delta: &Money) -> String {
    if delta.amount.is_sign_positive() {
        format!("+{}", delta)
    } else {
        delta.to_string()
    }
}
