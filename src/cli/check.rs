use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

use farewatch::instance_lock::InstanceLock;
use farewatch::notifier::{LogNotifier, NotificationDispatcher, Notifier};
use farewatch::poller::Poller;
use farewatch::telegram_client::TelegramClient;
use farewatch::tracker_config::{BOT_TOKEN_ENV, TrackerConfig, bot_token};

/// One poll tick against the persisted registry. Without a bot token the
/// notifications are only logged.
pub async fn handle_check(config: TrackerConfig) -> Result<()> {
    let _lock = InstanceLock::for_state_file(&config.state_path)?;

    let http = super::http_client()?;
    let notifier: Arc<dyn Notifier> = match bot_token() {
        Ok(token) => Arc::new(TelegramClient::new(http.clone(), token)),
        Err(_) => {
            warn!("{} is not set, notifications will only be logged", BOT_TOKEN_ENV);
            Arc::new(LogNotifier)
        }
    };

    let registry = super::open_registry(&config).await?;
    let provider = Arc::new(super::fare_provider(&config, http));
    let poller = Poller::new(
        registry,
        provider,
        NotificationDispatcher::new(notifier, config.notify_timeout()),
        config.poller_options(),
    );

    let report = poller.tick().await?;
    println!("{}", report);
    Ok(())
}
