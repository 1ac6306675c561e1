use anyhow::{Context, Result};

use farewatch::commands::format_list;
use farewatch::flights::{OwnerId, TrackedFlight};
use farewatch::registry_store::JsonFileStore;
use farewatch::tracker_config::TrackerConfig;

/// Reads the state file directly, so it works next to a running tracker
pub async fn handle_list(config: TrackerConfig, owner: i64) -> Result<()> {
    let store = JsonFileStore::new(&config.state_path);
    let owner = OwnerId(owner);
    let mut flights: Vec<TrackedFlight> = store
        .read()
        .await
        .with_context(|| format!("Failed to read {}", config.state_path.display()))?
        .into_iter()
        .filter(|f| f.owner == owner)
        .collect();
    flights.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    println!("{}", format_list(&flights));
    Ok(())
}
