use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::flights::{FlightCode, Money, Route};

/// Everything a provider may need to price one flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FareQuery {
    pub flight_code: FlightCode,
    pub date: NaiveDate,
    /// Route-based APIs (e.g. Ryanair) search by airport pair, then match the flight number
    pub route: Option<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FareError {
    #[error("flight not found")]
    NotFound,
    /// The route flies that day, just not this flight number
    #[error("flight not operated on that route and date (available: {})", .available.join(", "))]
    NotOnRoute { available: Vec<String> },
    #[error("rate limited by fare provider")]
    RateLimited,
    #[error("fare lookup timed out")]
    Timeout,
    #[error("fare lookup failed: {0}")]
    Unknown(String),
}

impl FareError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FareError::NotFound | FareError::NotOnRoute { .. } => "not_found",
            FareError::RateLimited => "rate_limited",
            FareError::Timeout => "timeout",
            FareError::Unknown(_) => "unknown",
        }
    }
}

/// Answers "what does flight X on date Y cost right now"
#[async_trait]
pub trait FareProvider: Send + Sync {
    async fn current_fare(&self, query: &FareQuery) -> Result<Money, FareError>;

    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Whether queries must carry an origin/destination pair
    fn requires_route(&self) -> bool {
        false
    }
}
