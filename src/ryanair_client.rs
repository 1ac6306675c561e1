use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::fare_provider::{FareError, FareProvider, FareQuery};
use crate::flights::Money;

pub const DEFAULT_RYANAIR_BASE_URL: &str = "https://services-api.ryanair.com";

#[derive(Debug, Deserialize)]
struct OneWayFaresResponse {
    #[serde(default)]
    fares: Vec<FareEntry>,
}

#[derive(Debug, Deserialize)]
struct FareEntry {
    outbound: Outbound,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Outbound {
    flight_number: String,
    departure_date: String,
    price: Price,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Price {
    value: Decimal,
    currency_code: String,
}

/// Fare provider backed by Ryanair's public one-way fares search.
///
/// The endpoint searches by airport pair and day, so the query must carry a
/// route; the requested flight is then picked out by flight number.
#[derive(Clone)]
pub struct RyanairClient {
    client: Client,
    base_url: String,
    currency: String,
    request_timeout: Duration,
}

impl RyanairClient {
    pub fn new(client: Client, base_url: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            currency: currency.into(),
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn pick_fare(response: OneWayFaresResponse, query: &FareQuery) -> Result<Money, FareError> {
        let wanted = query.flight_code.compact();
        let date_prefix = query.date.format("%Y-%m-%d").to_string();

        let mut available = Vec::new();
        for fare in response.fares {
            if !fare.outbound.departure_date.starts_with(&date_prefix) {
                continue;
            }
            let number: String = fare.outbound.flight_number.split_whitespace().collect();
            if number.eq_ignore_ascii_case(&wanted) {
                return Ok(Money::new(
                    fare.outbound.price.currency_code,
                    fare.outbound.price.value,
                ));
            }
            available.push(number.to_ascii_uppercase());
        }

        if available.is_empty() {
            return Err(FareError::NotFound);
        }
        debug!(
            "Flight {} not among fares for {}: [{}]",
            query.flight_code,
            query.date,
            available.join(", ")
        );
        Err(FareError::NotOnRoute { available })
    }

    fn query_params(&self, query: &FareQuery) -> Result<Vec<(&'static str, String)>, FareError> {
        let route = query.route.as_ref().ok_or_else(|| {
            FareError::Unknown("Ryanair lookups need origin and destination airports".to_string())
        })?;
        let day = query.date.format("%Y-%m-%d").to_string();
        Ok(vec![
            ("departureAirportIataCode", route.origin.to_string()),
            ("arrivalAirportIataCode", route.destination.to_string()),
            ("outboundDepartureDateFrom", day.clone()),
            ("outboundDepartureDateTo", day),
            ("outboundDepartureTimeFrom", "00:00".to_string()),
            ("outboundDepartureTimeTo", "23:59".to_string()),
            ("currency", self.currency.clone()),
            ("language", "en".to_string()),
            ("market", "en-gb".to_string()),
        ])
    }
}

#[async_trait]
impl FareProvider for RyanairClient {
    async fn current_fare(&self, query: &FareQuery) -> Result<Money, FareError> {
        let params = self.query_params(query)?;
        let url = format!("{}/farfnd/v4/oneWayFares", self.base_url);
        debug!("Querying Ryanair fares for {} on {}", query.flight_code, query.date);

        let response = self
            .client
            .get(&url)
            .query(&params)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FareError::Timeout
                } else {
                    FareError::Unknown(format!("request to Ryanair failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited by Ryanair fares API");
            return Err(FareError::RateLimited);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FareError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FareError::Unknown(format!(
                "Ryanair API error {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: OneWayFaresResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FareError::Timeout
            } else {
                FareError::Unknown(format!("failed to parse Ryanair response: {}", e))
            }
        })?;

        Self::pick_fare(parsed, query)
    }

    fn name(&self) -> &'static str {
        "ryanair"
    }

    fn requires_route(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flights::Route;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"{
        "arrivalAirportCategories": null,
        "fares": [
            {
                "outbound": {
                    "departureAirport": {"iataCode": "VNO", "name": "Vilnius"},
                    "arrivalAirport": {"iataCode": "BVA", "name": "Paris Beauvais"},
                    "departureDate": "2030-05-20T06:25:00",
                    "arrivalDate": "2030-05-20T08:10:00",
                    "price": {"value": 29.99, "valueMainUnit": "29", "currencyCode": "EUR", "currencySymbol": "€"},
                    "flightKey": "FR~1234~ ~~VNO~05/20/2030 06:25~BVA~05/20/2030 08:10~~",
                    "flightNumber": "FR1234"
                },
                "summary": {"price": {"value": 29.99, "currencyCode": "EUR"}}
            }
        ],
        "nextPage": null,
        "size": 1
    }"#;

    fn query(code: &str, day: u32) -> FareQuery {
        FareQuery {
            flight_code: code.parse().unwrap(),
            date: NaiveDate::from_ymd_opt(2030, 5, day).unwrap(),
            route: Some(Route {
                origin: "VNO".parse().unwrap(),
                destination: "BVA".parse().unwrap(),
            }),
        }
    }

    #[test]
    fn test_pick_matching_fare() {
        let response: OneWayFaresResponse = serde_json::from_str(SAMPLE).unwrap();
        let price = RyanairClient::pick_fare(response, &query("FR 1234", 20)).unwrap();
        assert_eq!(price, Money::new("EUR", Decimal::new(2999, 2)));
    }

    #[test]
    fn test_other_flight_is_not_found() {
        let response: OneWayFaresResponse = serde_json::from_str(SAMPLE).unwrap();
        let err = RyanairClient::pick_fare(response, &query("FR 9999", 20)).unwrap_err();
        assert_eq!(
            err,
            FareError::NotOnRoute {
                available: vec!["FR1234".to_string()]
            }
        );
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_other_date_is_not_found() {
        let response: OneWayFaresResponse = serde_json::from_str(SAMPLE).unwrap();
        let err = RyanairClient::pick_fare(response, &query("FR1234", 21)).unwrap_err();
        assert_eq!(err, FareError::NotFound);
    }

    #[test]
    fn test_empty_response() {
        let response: OneWayFaresResponse = serde_json::from_str(r#"{"fares": []}"#).unwrap();
        assert_eq!(
            RyanairClient::pick_fare(response, &query("FR1234", 20)).unwrap_err(),
            FareError::NotFound
        );
    }

    #[test]
    fn test_route_is_required() {
        let client = RyanairClient::new(Client::new(), DEFAULT_RYANAIR_BASE_URL, "EUR");
        let mut q = query("FR1234", 20);
        q.route = None;
        assert!(matches!(
            client.query_params(&q),
            Err(FareError::Unknown(_))
        ));
        assert!(client.requires_route());
    }
}
