//! Chat command parsing and execution.
//!
//! Text is parsed into a [`Command`] before anything touches the registry.
//! Every outcome except a persistence failure becomes a reply string.

use chrono::NaiveDate;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fare_provider::{FareError, FareProvider, FareQuery};
use crate::flights::{
    AirportCode, FlightCode, FlightStatus, InvalidAirportCode, InvalidFlightCode, OwnerId, Route,
    TrackedFlight,
};
use crate::registry::{FlightSelector, Registry, RegistryError};

pub const HELP_TEXT: &str = "✈️ I watch flight prices and message you when they change.\n\
\n\
Commands:\n\
ADD <flight> <YYYY-MM-DD> [<FROM> <TO>] - start tracking, e.g. ADD FR1234 2030-05-20 DUB STN\n\
REMOVE <flight> <YYYY-MM-DD> - stop tracking a flight\n\
LIST - show your tracked flights\n\
STOP [<flight> <YYYY-MM-DD>] - pause one flight or all of them\n\
START [<flight> <YYYY-MM-DD>] - resume one flight or all of them\n\
CLEAR - forget all your flights\n\
HELP - show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        flight_code: FlightCode,
        date: NaiveDate,
        route: Option<Route>,
    },
    Remove {
        flight_code: FlightCode,
        date: NaiveDate,
    },
    List,
    Stop(FlightSelector),
    Start(FlightSelector),
    /// The chat client's `/start` greeting
    Greeting,
    Help,
    Clear,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Add { .. } => "add",
            Command::Remove { .. } => "remove",
            Command::List => "list",
            Command::Stop(_) => "stop",
            Command::Start(_) => "start",
            Command::Greeting => "greeting",
            Command::Help => "help",
            Command::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    InvalidCode(#[from] InvalidFlightCode),
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error(transparent)]
    InvalidRoute(#[from] InvalidAirportCode),
}

const ADD_USAGE: &str = "ADD <flight> <YYYY-MM-DD> [<FROM> <TO>]";
const REMOVE_USAGE: &str = "REMOVE <flight> <YYYY-MM-DD>";
const STOP_USAGE: &str = "STOP [<flight> <YYYY-MM-DD>]";
const START_USAGE: &str = "START [<flight> <YYYY-MM-DD>]";

impl FromStr for Command {
    type Err = CommandError;

    /// Keywords are case-insensitive and may carry a leading `/` and a
    /// Telegram `@botname` suffix. A flight code may be written with or
    /// without the space (`FR1234` or `FR 1234`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace();
        let Some(raw_keyword) = tokens.next() else {
            return Err(CommandError::Unknown(String::new()));
        };
        let slash = raw_keyword.starts_with('/');
        let keyword = raw_keyword
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let args: Vec<&str> = tokens.collect();

        match keyword.as_str() {
            "ADD" | "TRACK" => {
                let (flight_code, rest) = take_flight_code(&args, ADD_USAGE)?;
                let (date, rest) = take_date(rest, ADD_USAGE)?;
                let route = match rest {
                    [] => None,
                    [origin, destination] => Some(Route {
                        origin: origin.parse::<AirportCode>()?,
                        destination: destination.parse::<AirportCode>()?,
                    }),
                    _ => return Err(CommandError::Usage(ADD_USAGE)),
                };
                Ok(Command::Add {
                    flight_code,
                    date,
                    route,
                })
            }
            "REMOVE" | "DELETE" => {
                let (flight_code, rest) = take_flight_code(&args, REMOVE_USAGE)?;
                let (date, rest) = take_date(rest, REMOVE_USAGE)?;
                if !rest.is_empty() {
                    return Err(CommandError::Usage(REMOVE_USAGE));
                }
                Ok(Command::Remove { flight_code, date })
            }
            "LIST" if args.is_empty() => Ok(Command::List),
            "HELP" if args.is_empty() => Ok(Command::Help),
            "CLEAR" if args.is_empty() => Ok(Command::Clear),
            "START" if slash && args.is_empty() => Ok(Command::Greeting),
            "START" => Ok(Command::Start(selector(&args, START_USAGE)?)),
            "STOP" | "PAUSE" => Ok(Command::Stop(selector(&args, STOP_USAGE)?)),
            "RESUME" => Ok(Command::Start(selector(&args, START_USAGE)?)),
            _ => Err(CommandError::Unknown(raw_keyword.to_string())),
        }
    }
}

/// Flight code from the front of `args`, joining `FR` `1234` when split
fn take_flight_code<'a, 'b>(
    args: &'a [&'b str],
    usage: &'static str,
) -> Result<(FlightCode, &'a [&'b str]), CommandError> {
    match args {
        [] => Err(CommandError::Usage(usage)),
        [carrier, number, rest @ ..]
            if carrier.len() == 2
                && number.starts_with(|c: char| c.is_ascii_digit())
                && !looks_like_date(number) =>
        {
            let code: FlightCode = format!("{}{}", carrier, number).parse()?;
            Ok((code, rest))
        }
        [code, rest @ ..] => Ok((code.parse::<FlightCode>()?, rest)),
    }
}

fn take_date<'a, 'b>(
    args: &'a [&'b str],
    usage: &'static str,
) -> Result<(NaiveDate, &'a [&'b str]), CommandError> {
    match args {
        [] => Err(CommandError::Usage(usage)),
        [date, rest @ ..] => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(|d| (d, rest))
            .map_err(|_| CommandError::InvalidDate(date.to_string())),
    }
}

fn selector(args: &[&str], usage: &'static str) -> Result<FlightSelector, CommandError> {
    if args.is_empty() {
        return Ok(FlightSelector::All);
    }
    let (flight_code, rest) = take_flight_code(args, usage)?;
    let (date, rest) = take_date(rest, usage)?;
    if !rest.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    Ok(FlightSelector::One { flight_code, date })
}

fn looks_like_date(token: &str) -> bool {
    token.len() == 10 && token.as_bytes().get(4) == Some(&b'-')
}

/// Applies parsed commands for one owner against the registry
#[derive(Clone)]
pub struct CommandHandler {
    registry: Registry,
    requires_route: bool,
    fare_check: Option<FareCheck>,
}

/// Provider consulted on ADD so unknown flights are refused up front
#[derive(Clone)]
struct FareCheck {
    provider: Arc<dyn FareProvider>,
    timeout: Duration,
}

impl CommandHandler {
    pub fn new(registry: Registry, requires_route: bool) -> Self {
        Self {
            registry,
            requires_route,
            fare_check: None,
        }
    }

    /// Look the flight up once before accepting an ADD. The price found is
    /// not stored; the first poll records the baseline.
    pub fn with_fare_check(mut self, provider: Arc<dyn FareProvider>, timeout: Duration) -> Self {
        self.requires_route = provider.requires_route();
        self.fare_check = Some(FareCheck { provider, timeout });
        self
    }

    /// Reply text for `text`. Errors only when the registry could not be
    /// persisted, which the caller must treat as fatal.
    pub async fn handle(&self, owner: OwnerId, text: &str) -> Result<String, RegistryError> {
        let command = match text.parse::<Command>() {
            Ok(command) => command,
            Err(CommandError::Unknown(keyword)) => {
                debug!("Unknown command '{}' from {}", keyword, owner);
                return Ok(HELP_TEXT.to_string());
            }
            Err(e) => return Ok(format!("❌ {}", e)),
        };
        metrics::counter!("farewatch.commands.handled_total", "command" => command.name())
            .increment(1);
        self.execute(owner, command).await
    }

    pub async fn execute(&self, owner: OwnerId, command: Command) -> Result<String, RegistryError> {
        let reply = match command {
            Command::Add {
                flight_code,
                date,
                route,
            } => {
                if self.requires_route && route.is_none() {
                    return Ok(format!(
                        "❌ I need the route to price this flight: ADD {} {} <FROM> <TO>",
                        flight_code.compact(),
                        date
                    ));
                }
                if let Some(check) = &self.fare_check {
                    if let Err(e) = self.registry.check_add(owner, &flight_code, date).await {
                        return add_rejection(e);
                    }
                    if let Some(reply) = check.verify(&flight_code, date, route.as_ref()).await {
                        return Ok(reply);
                    }
                }
                match self
                    .registry
                    .add_with_route(owner, flight_code.as_str(), date, route)
                    .await
                {
                    Ok(flight) => format!(
                        "✅ Now tracking {}. I'll message you when the price changes.",
                        flight.describe()
                    ),
                    Err(e) => return add_rejection(e),
                }
            }
            Command::Remove { flight_code, date } => {
                if self.registry.remove(owner, &flight_code, date).await? {
                    format!("🗑️ Stopped tracking {} on {}.", flight_code, date)
                } else {
                    format!("❓ You are not tracking {} on {}.", flight_code, date)
                }
            }
            Command::List => format_list(&self.registry.list(owner).await),
            Command::Stop(selector) => {
                let target = describe_selector(&selector);
                match self.registry.pause(owner, selector).await {
                    Ok(0) => format!("Nothing to pause for {}.", target),
                    Ok(n) => format!("⏸️ Paused {} ({}).", target, count_flights(n)),
                    Err(RegistryError::NotFound(key)) => {
                        format!("❓ You are not tracking {} on {}.", key.flight_code, key.date)
                    }
                    Err(e) => return Err(e),
                }
            }
            Command::Start(selector) => {
                let target = describe_selector(&selector);
                match self.registry.resume(owner, selector).await {
                    Ok(0) => format!("Nothing to resume for {}.", target),
                    Ok(n) => format!("▶️ Resumed {} ({}).", target, count_flights(n)),
                    Err(RegistryError::NotFound(key)) => {
                        format!("❓ You are not tracking {} on {}.", key.flight_code, key.date)
                    }
                    Err(e) => return Err(e),
                }
            }
            Command::Greeting => {
                let resumed = self.registry.resume(owner, FlightSelector::All).await?;
                if resumed > 0 {
                    info!("Resumed {} flights for {} on greeting", resumed, owner);
                }
                HELP_TEXT.to_string()
            }
            Command::Help => HELP_TEXT.to_string(),
            Command::Clear => {
                let removed = self.registry.clear(owner).await?;
                format!("🧹 Removed {}.", count_flights(removed))
            }
        };
        Ok(reply)
    }
}

impl FareCheck {
    /// A rejection reply when the provider says the flight does not exist.
    /// Transient lookup failures let the ADD through; the poller retries.
    async fn verify(
        &self,
        flight_code: &FlightCode,
        date: NaiveDate,
        route: Option<&Route>,
    ) -> Option<String> {
        let query = FareQuery {
            flight_code: flight_code.clone(),
            date,
            route: route.cloned(),
        };
        let on_route = route
            .map(|r| format!(" for {}", r))
            .unwrap_or_default();
        match tokio::time::timeout(self.timeout, self.provider.current_fare(&query)).await {
            Ok(Ok(price)) => {
                debug!("{} on {} currently costs {}", flight_code, date, price);
                None
            }
            Ok(Err(FareError::NotFound)) => Some(format!(
                "❌ No flight {} found on {}{}.",
                flight_code.compact(),
                date,
                on_route
            )),
            Ok(Err(FareError::NotOnRoute { available })) => Some(format!(
                "❌ Flight {} not found on {}{}. Available on that route/date: {}.",
                flight_code.compact(),
                date,
                on_route,
                available.join(", ")
            )),
            Ok(Err(e)) => {
                warn!("Could not verify {} on {}, tracking anyway: {}", flight_code, date, e);
                None
            }
            Err(_) => {
                warn!("Verifying {} on {} timed out, tracking anyway", flight_code, date);
                None
            }
        }
    }
}

fn add_rejection(e: RegistryError) -> Result<String, RegistryError> {
    match e {
        RegistryError::Duplicate(existing) => Ok(format!(
            "ℹ️ You are already tracking {} ({}).",
            existing.describe(),
            existing.status
        )),
        RegistryError::LimitReached(max) => Ok(format!(
            "❌ You can track at most {} flights. REMOVE one first.",
            max
        )),
        e if e.is_fatal() => Err(e),
        e => Ok(format!("❌ {}", e)),
    }
}

fn count_flights(n: usize) -> String {
    if n == 1 {
        "1 flight".to_string()
    } else {
        format!("{} flights", n)
    }
}

fn describe_selector(selector: &FlightSelector) -> String {
    match selector {
        FlightSelector::All => "all your flights".to_string(),
        FlightSelector::One { flight_code, date } => format!("{} on {}", flight_code, date),
    }
}

/// LIST reply body
pub fn format_list(flights: &[TrackedFlight]) -> String {
    if flights.is_empty() {
        return "You are not tracking any flights. Send ADD <flight> <YYYY-MM-DD> to start."
            .to_string();
    }

    let mut lines = vec!["📋 Your tracked flights:".to_string()];
    for (i, flight) in flights.iter().enumerate() {
        let price = flight
            .last_price
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "no price yet".to_string());
        let mut line = format!("{}. {} | {} | {}", i + 1, flight.describe(), price, flight.status);
        if let Some(checked) = flight.last_checked_at {
            line.push_str(&format!(" | checked {}", checked.format("%Y-%m-%d %H:%M UTC")));
        }
        if flight.status == FlightStatus::Error
            && let Some(error) = &flight.last_error
        {
            line.push_str(&format!(" | last error: {}", error));
        }
        lines.push(line);
    }
    lines.join("\n")
}
