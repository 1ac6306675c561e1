pub mod check;
pub mod list;
pub mod run;

pub use check::handle_check;
pub use list::handle_list;
pub use run::handle_run;

use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;

use farewatch::clock::SystemClock;
use farewatch::registry::Registry;
use farewatch::registry_store::JsonFileStore;
use farewatch::ryanair_client::RyanairClient;
use farewatch::tracker_config::TrackerConfig;

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("farewatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

pub(crate) async fn open_registry(config: &TrackerConfig) -> Result<Registry> {
    let store = Arc::new(JsonFileStore::new(&config.state_path));
    Registry::open(store, Arc::new(SystemClock), config.registry_options())
        .await
        .with_context(|| format!("Failed to load registry from {}", config.state_path.display()))
}

pub(crate) fn fare_provider(config: &TrackerConfig, client: Client) -> RyanairClient {
    RyanairClient::new(client, &config.ryanair_base_url, &config.currency)
        .with_request_timeout(config.lookup_timeout())
}
