//! farewatch - tracks airfare prices for chat users and notifies them when a
//! tracked fare changes.
//!
//! The tracking engine is [`registry::Registry`] (state, persisted on every
//! mutation) driven by [`poller::Poller`] (scheduled fare lookups and change
//! notifications). Chat input arrives through [`commands::CommandHandler`].

pub mod bot;
pub mod clock;
pub mod commands;
pub mod fare_provider;
pub mod flights;
pub mod instance_lock;
pub mod log_format;
pub mod metrics;
pub mod notifier;
pub mod poller;
pub mod price_change;
pub mod registry;
pub mod registry_store;
pub mod ryanair_client;
pub mod telegram_client;
pub mod tracker_config;

pub use fare_provider::{FareError, FareProvider, FareQuery};
pub use flights::{FlightCode, FlightKey, FlightStatus, Money, OwnerId, TrackedFlight};
pub use notifier::{DeliveryError, NotificationDispatcher, Notifier};
pub use poller::{Poller, PollerHandle, PollerOptions, TickReport};
pub use registry::{Registry, RegistryError, RegistryOptions};
