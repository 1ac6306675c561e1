use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Two-character carrier designator, then 1-4 digits and an optional operational suffix.
static FLIGHT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z0-9]{2})\s*([0-9]{1,4}[A-Z]?)$").unwrap());

static AIRPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());

/// Chat the subscription belongs to (a Telegram chat id on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid flight code '{0}': expected a carrier designator and flight number, e.g. FR1234")]
pub struct InvalidFlightCode(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid airport code '{0}': expected a 3-letter IATA code, e.g. VNO")]
pub struct InvalidAirportCode(pub String);

/// Normalized flight code, always rendered as `XX NNNN` (e.g. `FR 1234`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlightCode(String);

impl FlightCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Carrier designator, e.g. `FR`
    pub fn carrier(&self) -> &str {
        &self.0[..2]
    }

    /// Code with whitespace stripped, used when comparing against provider payloads
    pub fn compact(&self) -> String {
        self.0.split_whitespace().collect()
    }
}

impl FromStr for FlightCode {
    type Err = InvalidFlightCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let caps = FLIGHT_CODE_RE
            .captures(&upper)
            .ok_or_else(|| InvalidFlightCode(s.trim().to_string()))?;
        let carrier = &caps[1];
        // A designator needs at least one letter; "12 345" is ambiguous garbage
        if !carrier.chars().any(|c| c.is_ascii_alphabetic()) {
            return Err(InvalidFlightCode(s.trim().to_string()));
        }
        Ok(FlightCode(format!("{} {}", carrier, &caps[2])))
    }
}

impl TryFrom<String> for FlightCode {
    type Error = InvalidFlightCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FlightCode> for String {
    fn from(code: FlightCode) -> Self {
        code.0
    }
}

impl fmt::Display for FlightCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// IATA airport code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AirportCode(String);

impl AirportCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AirportCode {
    type Err = InvalidAirportCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        if AIRPORT_RE.is_match(&upper) {
            Ok(AirportCode(upper))
        } else {
            Err(InvalidAirportCode(s.trim().to_string()))
        }
    }
}

impl TryFrom<String> for AirportCode {
    type Error = InvalidAirportCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AirportCode> for String {
    fn from(code: AirportCode) -> Self {
        code.0
    }
}

impl fmt::Display for AirportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub origin: AirportCode,
    pub destination: AirportCode,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.origin, self.destination)
    }
}

/// Monetary amount in a single currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub currency: String,
    pub amount: Decimal,
}

impl Money {
    pub fn new(currency: impl Into<String>, amount: Decimal) -> Self {
        Self {
            currency: currency.into().to_uppercase(),
            amount,
        }
    }

    pub fn same_currency(&self, other: &Money) -> bool {
        self.currency == other.currency
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.round_dp(2).normalize(), self.currency)
    }
}

/// Identity of a tracked flight: (owner, flight code, date)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlightKey {
    pub owner: OwnerId,
    pub flight_code: FlightCode,
    pub date: NaiveDate,
}

impl FlightKey {
    pub fn new(owner: OwnerId, flight_code: FlightCode, date: NaiveDate) -> Self {
        Self {
            owner,
            flight_code,
            date,
        }
    }
}

impl fmt::Display for FlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {} for {}", self.flight_code, self.date, self.owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightStatus {
    Active,
    Paused,
    Expired,
    Error,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::Active => "active",
            FlightStatus::Paused => "paused",
            FlightStatus::Expired => "expired",
            FlightStatus::Error => "error",
        }
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's subscription to fare changes for a single flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFlight {
    pub owner: OwnerId,
    pub flight_code: FlightCode,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    pub last_price: Option<Money>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub status: FlightStatus,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Set when the entry transitions to EXPIRED, drives retention cleanup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
}

impl TrackedFlight {
    pub fn new(key: FlightKey, route: Option<Route>, created_at: DateTime<Utc>) -> Self {
        Self {
            owner: key.owner,
            flight_code: key.flight_code,
            date: key.date,
            route,
            last_price: None,
            last_checked_at: None,
            created_at,
            status: FlightStatus::Active,
            consecutive_failures: 0,
            last_error: None,
            expired_at: None,
        }
    }

    pub fn key(&self) -> FlightKey {
        FlightKey::new(self.owner, self.flight_code.clone(), self.date)
    }

    /// Eligible for polling: ACTIVE and departing today or later
    pub fn is_pollable(&self, today: NaiveDate) -> bool {
        self.status == FlightStatus::Active && self.date >= today
    }

    pub fn describe(&self) -> String {
        match &self.route {
            Some(route) => format!("{} ({}) on {}", self.flight_code, route, self.date),
            None => format!("{} on {}", self.flight_code, self.date),
        }
    }
}
