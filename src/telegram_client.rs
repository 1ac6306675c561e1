use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::flights::OwnerId;
use crate::notifier::{DeliveryError, Notifier};
use crate::price_change::TrackerEvent;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram rejects longer messages
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("request to Telegram failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Telegram API error {code}: {description}")]
    Api { code: u16, description: String },
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    #[serde(default)]
    pub username: Option<String>,
}

/// A text message addressed to the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingText {
    pub update_id: i64,
    pub owner: OwnerId,
    pub text: String,
}

impl Update {
    pub fn into_text(self) -> Option<IncomingText> {
        let message = self.message?;
        let text = message.text?;
        Some(IncomingText {
            update_id: self.update_id,
            owner: OwnerId(message.chat.id),
            text,
        })
    }
}

/// Minimal Bot API client: long-polls updates and sends plain-text messages
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: String,
    send_timeout: Duration,
}

impl TelegramClient {
    pub fn new(client: Client, token: impl Into<String>) -> Self {
        Self::with_base_url(client, token, DEFAULT_TELEGRAM_API_URL)
    }

    pub fn with_base_url(
        client: Client,
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            send_timeout: Duration::from_secs(10),
        }
    }

    // The token is part of the path; never log the result
    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, TelegramError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TelegramError::Http(e.without_url()))?;

        let status = response.status();
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TelegramError::Http(e.without_url()))?;

        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            other => Err(TelegramError::Api {
                code: other.error_code.unwrap_or(status.as_u16()),
                description: other
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    /// Validates the token; returns the bot's username
    pub async fn get_me(&self) -> Result<String, TelegramError> {
        let me: BotUser = self
            .call("getMe", &serde_json::json!({}), self.send_timeout)
            .await?;
        Ok(me.username.unwrap_or_default())
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        poll_timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut body = serde_json::json!({
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = serde_json::json!(offset);
        }
        // The HTTP timeout must outlast the server-side long poll
        self.call("getUpdates", &body, poll_timeout + Duration::from_secs(10))
            .await
    }

    pub async fn send_message(&self, chat: OwnerId, text: &str) -> Result<(), DeliveryError> {
        let text: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        let body = serde_json::json!({
            "chat_id": chat.0,
            "text": text,
            "disable_web_page_preview": true,
        });
        match self
            .call::<serde_json::Value>("sendMessage", &body, self.send_timeout)
            .await
        {
            Ok(_) => {
                debug!("Sent message to chat {}", chat);
                Ok(())
            }
            Err(e) => Err(classify_send_error(e)),
        }
    }
}

/// Blocked bots and unknown chats are permanent; everything else may pass on retry
fn classify_send_error(error: TelegramError) -> DeliveryError {
    match error {
        TelegramError::Api { code, description }
            if code == StatusCode::FORBIDDEN.as_u16() || code == StatusCode::BAD_REQUEST.as_u16() =>
        {
            DeliveryError::Rejected(description)
        }
        TelegramError::Api { code, description }
            if code == StatusCode::TOO_MANY_REQUESTS.as_u16() =>
        {
            warn!("Rate limited by Telegram: {}", description);
            DeliveryError::Transport(format!("rate limited: {}", description))
        }
        other => DeliveryError::Transport(other.to_string()),
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify(&self, owner: OwnerId, event: &TrackerEvent) -> Result<(), DeliveryError> {
        self.send_message(owner, &event.render()).await
    }
}
