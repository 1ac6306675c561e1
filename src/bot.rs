//! Inbound side of the chat transport: long-polls Telegram for text messages
//! and answers each one through the [`CommandHandler`].

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, warn};

use crate::commands::CommandHandler;
use crate::registry::RegistryError;
use crate::telegram_client::{IncomingText, TelegramClient};

const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct Bot {
    telegram: TelegramClient,
    handler: CommandHandler,
}

impl Bot {
    pub fn new(telegram: TelegramClient, handler: CommandHandler) -> Self {
        Self { telegram, handler }
    }

    /// Serve updates until `shutdown` flips to true. Returns an error only
    /// when the registry could not be persisted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut offset: Option<i64> = None;
        let mut backoff = Duration::from_secs(1);
        info!("Listening for chat commands");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let updates = tokio::select! {
                result = self.telegram.get_updates(offset, LONG_POLL_TIMEOUT) => result,
                _ = shutdown.changed() => break,
            };

            let updates = match updates {
                Ok(updates) => {
                    backoff = Duration::from_secs(1);
                    updates
                }
                Err(e) => {
                    warn!("Failed to fetch updates, retrying in {:?}: {}", backoff, e);
                    metrics::counter!("farewatch.bot.poll_errors_total").increment(1);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            for update in updates {
                // Telegram confirms the batch on the next getUpdates, so a crash
                // mid-batch redelivers it; every command is safe to apply twice
                offset = Some(update.update_id + 1);
                if let Some(message) = update.into_text() {
                    self.answer(message)
                        .await
                        .context("command handling failed")?;
                }
            }
        }

        info!("Stopped listening for chat commands");
        Ok(())
    }

    async fn answer(&self, message: IncomingText) -> Result<(), RegistryError> {
        let span = tracing::info_span!("command", owner = %message.owner);
        async {
            debug!("Received '{}'", message.text);
            let reply = match self.handler.handle(message.owner, &message.text).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Could not persist registry change: {}", e);
                    let _ = self
                        .telegram
                        .send_message(
                            message.owner,
                            "⚠️ Sorry, I could not save that change. Please try again later.",
                        )
                        .await;
                    return Err(e);
                }
            };
            if let Err(e) = self.telegram.send_message(message.owner, &reply).await {
                warn!("Failed to reply to {}: {}", message.owner, e);
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}
