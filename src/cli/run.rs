use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use farewatch::bot::Bot;
use farewatch::commands::CommandHandler;
use farewatch::fare_provider::FareProvider;
use farewatch::instance_lock::InstanceLock;
use farewatch::notifier::NotificationDispatcher;
use farewatch::poller::Poller;
use farewatch::telegram_client::TelegramClient;
use farewatch::tracker_config::{TrackerConfig, bot_token};

pub async fn handle_run(config: TrackerConfig) -> Result<()> {
    // Checked before touching any state
    let token = bot_token()?;

    if let Some(port) = config.metrics_port {
        farewatch::metrics::install_exporter(port)?;
    }

    let _lock = InstanceLock::for_state_file(&config.state_path)?;

    let http = super::http_client()?;
    let telegram = TelegramClient::new(http.clone(), token);
    let username = telegram
        .get_me()
        .await
        .context("Telegram rejected the bot token")?;
    info!("Connected to Telegram as @{}", username);

    let registry = super::open_registry(&config).await?;
    let provider = Arc::new(super::fare_provider(&config, http));
    info!("Using fare provider {}", provider.name());

    let dispatcher = NotificationDispatcher::new(Arc::new(telegram.clone()), config.notify_timeout());
    let poller = Poller::new(
        registry.clone(),
        provider.clone(),
        dispatcher,
        config.poller_options(),
    );
    let mut poller_handle = poller.start();

    let handler = CommandHandler::new(registry, provider.requires_route())
        .with_fare_check(provider.clone(), config.lookup_timeout());
    let bot = Bot::new(telegram, handler);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bot_task = bot.run(shutdown_rx);
    tokio::pin!(bot_task);
    let grace = config.shutdown_grace();

    tokio::select! {
        result = &mut bot_task => {
            // The bot only returns early when a change could not be persisted
            if let Err(e) = poller_handle.shutdown(grace).await {
                error!("Fare poller failed during shutdown: {:#}", e);
            }
            result
        }
        result = poller_handle.wait() => {
            let _ = shutdown_tx.send(true);
            if let Err(e) = bot_task.await {
                error!("Bot failed during shutdown: {:#}", e);
            }
            result.and(Err(anyhow!("fare poller stopped unexpectedly")))
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Unable to listen for shutdown signal")?;
            info!("Received shutdown signal (Ctrl+C), finishing in-flight work...");
            let _ = shutdown_tx.send(true);
            let bot_result = bot_task.await;
            let poller_result = poller_handle.shutdown(grace).await;
            info!("Graceful shutdown complete");
            bot_result.and(poller_result)
        }
    }
}
